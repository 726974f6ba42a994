//! Balance mutation.
//!
//! The only path through which an account balance changes. The store applies
//! the delta as a single in-place increment, so two units of work mutating
//! the same account never lose an update.

use serde::{Deserialize, Serialize};
use simplebank_common::{AccountId, Result};
use tracing::debug;

use crate::account::Account;
use crate::store::LedgerTx;

/// Type of balance change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BalanceChangeType {
    /// Credit (increase).
    Credit,
    /// Debit (decrease).
    Debit,
}

impl BalanceChangeType {
    /// Classify a signed delta.
    pub fn of(delta: i64) -> Self {
        if delta < 0 {
            BalanceChangeType::Debit
        } else {
            BalanceChangeType::Credit
        }
    }
}

/// Balance change applied inside a unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceChange {
    pub account_id: AccountId,
    pub change_type: BalanceChangeType,
    pub delta: i64,
    pub balance_after: i64,
}

/// Apply `delta` to an account and return its post-increment state.
///
/// No sufficiency check is made here; the result may be negative.
pub async fn add_balance<T: LedgerTx>(tx: &mut T, account_id: AccountId, delta: i64) -> Result<Account> {
    let account = tx.add_balance(account_id, delta).await?;

    let change = BalanceChange {
        account_id,
        change_type: BalanceChangeType::of(delta),
        delta,
        balance_after: account.balance,
    };
    debug!(
        account = %change.account_id,
        change_type = ?change.change_type,
        delta = change.delta,
        balance_after = change.balance_after,
        "Balance updated"
    );

    Ok(account)
}

/// Check if an account can cover `amount` without going negative.
pub fn has_sufficient_funds(account: &Account, amount: i64) -> bool {
    account.balance >= amount
}
