//! Transfer records and the engine's request/result types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use simplebank_common::{AccountId, Currency, TransferId};

use crate::account::Account;
use crate::journal::Entry;

/// One completed movement of funds between two accounts.
///
/// Always paired with a debit entry on `from_account_id` and a credit entry
/// on `to_account_id` of the same magnitude.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    /// Unique transfer ID.
    pub id: TransferId,
    /// Debited account.
    pub from_account_id: AccountId,
    /// Credited account.
    pub to_account_id: AccountId,
    /// Positive amount in minor units.
    pub amount: i64,
    /// When this transfer was created.
    pub created_at: DateTime<Utc>,
}

/// Parameters for inserting a transfer row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateTransferParams {
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: i64,
}

/// A transfer request as handed over by the API layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    /// Positive amount in minor units.
    pub amount: i64,
    /// When set, both accounts must be denominated in this currency.
    #[serde(default)]
    pub currency: Option<Currency>,
}

impl TransferRequest {
    /// Create a request without a currency assertion.
    pub fn new(from_account_id: AccountId, to_account_id: AccountId, amount: i64) -> Self {
        Self {
            from_account_id,
            to_account_id,
            amount,
            currency: None,
        }
    }

    /// Require both accounts to hold `currency`.
    pub fn in_currency(mut self, currency: Currency) -> Self {
        self.currency = Some(currency);
        self
    }

    /// Check whether both sides are the same account.
    pub fn is_self_transfer(&self) -> bool {
        self.from_account_id == self.to_account_id
    }
}

/// Post-commit snapshot of a completed transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferResult {
    pub transfer: Transfer,
    pub from_entry: Entry,
    pub to_entry: Entry,
    /// Source account including this transfer's debit.
    pub from_account: Account,
    /// Destination account including this transfer's credit.
    pub to_account: Account,
}
