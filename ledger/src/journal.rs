//! Journal entry types for double-entry bookkeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use simplebank_common::{AccountId, EntryId};

/// Direction of a journal entry, derived from the sign of its amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryType {
    /// Money leaves the account (negative amount).
    Debit,
    /// Money enters the account (positive amount).
    Credit,
}

/// A single append-only ledger line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Unique entry ID.
    pub id: EntryId,
    /// Account affected.
    pub account_id: AccountId,
    /// Signed delta: positive credits, negative debits.
    pub amount: i64,
    /// When this entry was created.
    pub created_at: DateTime<Utc>,
}

impl Entry {
    /// Get the entry direction.
    pub fn entry_type(&self) -> EntryType {
        if self.amount < 0 {
            EntryType::Debit
        } else {
            EntryType::Credit
        }
    }
}

/// Parameters for appending an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateEntryParams {
    pub account_id: AccountId,
    pub amount: i64,
}

impl CreateEntryParams {
    /// Debit `amount` (positive) from an account.
    pub fn debit(account_id: AccountId, amount: i64) -> Self {
        Self {
            account_id,
            amount: -amount,
        }
    }

    /// Credit `amount` (positive) to an account.
    pub fn credit(account_id: AccountId, amount: i64) -> Self {
        Self { account_id, amount }
    }
}

/// Check that a group of entries nets to zero.
pub fn is_balanced<'a>(entries: impl IntoIterator<Item = &'a Entry>) -> bool {
    entries
        .into_iter()
        .try_fold(0i64, |sum, e| sum.checked_add(e.amount))
        == Some(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: i64, account: i64, amount: i64) -> Entry {
        Entry {
            id: EntryId::new(id),
            account_id: AccountId::new(account),
            amount,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_balanced_pair() {
        let debit = entry(1, 1, -1000);
        let credit = entry(2, 2, 1000);

        assert_eq!(debit.entry_type(), EntryType::Debit);
        assert_eq!(credit.entry_type(), EntryType::Credit);
        assert!(is_balanced([&debit, &credit]));
    }

    #[test]
    fn test_unbalanced() {
        let debit = entry(1, 1, -1000);
        assert!(!is_balanced([&debit]));
        assert!(!is_balanced(&[entry(1, 1, i64::MAX), entry(2, 2, 1)]));
    }

    #[test]
    fn test_params_signs() {
        let account = AccountId::new(5);
        assert_eq!(CreateEntryParams::debit(account, 30).amount, -30);
        assert_eq!(CreateEntryParams::credit(account, 30).amount, 30);
    }
}
