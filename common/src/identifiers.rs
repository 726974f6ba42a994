//! Identifier types for ledger rows.
//!
//! All identifiers are database identity values (`bigserial`). They are
//! totally ordered, which the transfer engine relies on to take row locks in
//! a fixed global order.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of an account row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(i64);

impl AccountId {
    /// Wrap a raw identity value.
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw identity value.
    pub const fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for AccountId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Identity of a ledger entry row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(i64);

impl EntryId {
    /// Wrap a raw identity value.
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw identity value.
    pub const fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a transfer row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferId(i64);

impl TransferId {
    /// Wrap a raw identity value.
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw identity value.
    pub const fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_ids_are_ordered() {
        let low = AccountId::new(3);
        let high = AccountId::from(17);
        assert!(low < high);
        assert_eq!(low.max(high), high);
    }

    #[test]
    fn test_ids_serialize_as_plain_integers() {
        let json = serde_json::to_string(&TransferId::new(42)).unwrap();
        assert_eq!(json, "42");

        let id: AccountId = serde_json::from_str("7").unwrap();
        assert_eq!(id.get(), 7);
    }

    #[test]
    fn test_display() {
        assert_eq!(EntryId::new(9).to_string(), "9");
    }
}
