//! Account definitions for ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use simplebank_common::{AccountId, Currency};

/// A ledger account.
///
/// `balance` is only ever changed through the balance mutator inside a
/// transfer, so it always equals the sum of the account's entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Unique account identifier.
    pub id: AccountId,
    /// Owner name.
    pub owner: String,
    /// Balance in minor currency units. May be negative.
    pub balance: i64,
    /// Account currency.
    pub currency: Currency,
    /// When the account was created.
    pub created_at: DateTime<Utc>,
}

/// Parameters for opening an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateAccountParams {
    pub owner: String,
    pub currency: Currency,
    /// Seed balance, recorded as an opening entry when non-zero.
    pub opening_balance: i64,
}

impl CreateAccountParams {
    /// Open an empty account.
    pub fn new(owner: impl Into<String>, currency: Currency) -> Self {
        Self {
            owner: owner.into(),
            currency,
            opening_balance: 0,
        }
    }

    /// Seed the account with an opening balance.
    pub fn with_opening_balance(mut self, amount: i64) -> Self {
        self.opening_balance = amount;
        self
    }
}
