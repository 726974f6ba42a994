//! Storage contracts the transfer engine composes.
//!
//! A [`LedgerStore`] hands out units of work ([`LedgerTx`]); every write the
//! engine performs goes through one of them. Implementations must make the
//! primitives individually atomic and must discard all buffered writes when
//! a unit of work is rolled back or dropped without commit.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use simplebank_common::{AccountId, Result, TransferId};

use crate::account::{Account, CreateAccountParams};
use crate::journal::{CreateEntryParams, Entry};
use crate::transfer::{CreateTransferParams, Transfer};

/// One isolated unit of work against the ledger.
#[async_trait]
pub trait LedgerTx: Send + Sized {
    /// Read an account and hold its row lock until the unit of work ends.
    async fn get_account_for_update(&mut self, id: AccountId) -> Result<Account>;

    /// Insert a transfer row.
    async fn create_transfer(&mut self, params: &CreateTransferParams) -> Result<Transfer>;

    /// Append an entry row.
    async fn create_entry(&mut self, params: &CreateEntryParams) -> Result<Entry>;

    /// Atomically apply `delta` to the stored balance and return the updated row.
    async fn add_balance(&mut self, id: AccountId, delta: i64) -> Result<Account>;

    /// Make every write of this unit of work durable and visible.
    async fn commit(self) -> Result<()>;

    /// Discard every write of this unit of work.
    async fn rollback(self) -> Result<()>;
}

/// The durable ledger.
#[async_trait]
pub trait LedgerStore: Send + Sync + 'static {
    type Tx: LedgerTx;

    /// Begin a unit of work.
    async fn begin(&self) -> Result<Self::Tx>;

    /// Open an account; a non-zero opening balance is recorded as an entry.
    async fn create_account(&self, params: CreateAccountParams) -> Result<Account>;

    async fn get_account(&self, id: AccountId) -> Result<Account>;

    /// List accounts ordered by id, optionally restricted to one owner.
    async fn list_accounts(&self, owner: Option<&str>) -> Result<Vec<Account>>;

    async fn get_transfer(&self, id: TransferId) -> Result<Transfer>;

    /// List transfers ordered by id, optionally restricted to those touching an account.
    async fn list_transfers(&self, account_id: Option<AccountId>) -> Result<Vec<Transfer>>;

    /// List an account's entries ordered by id.
    async fn list_entries(&self, account_id: AccountId) -> Result<Vec<Entry>>;

    /// Recompute every balance from the entries and report discrepancies.
    async fn verify_integrity(&self) -> Result<IntegrityReport>;
}

/// An account whose stored balance disagrees with its entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceMismatch {
    pub account_id: AccountId,
    pub stored_balance: i64,
    pub ledger_balance: i64,
}

/// Outcome of a ledger integrity check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    /// Number of accounts checked.
    pub accounts: u64,
    /// Number of entries summed.
    pub entries: u64,
    /// Number of transfers recorded.
    pub transfers: u64,
    /// Sum of all stored balances.
    pub total_balance: i64,
    /// Accounts whose balance is not the sum of their entries.
    pub mismatches: Vec<BalanceMismatch>,
}

impl IntegrityReport {
    /// Check if the ledger is consistent.
    pub fn is_consistent(&self) -> bool {
        self.mismatches.is_empty()
    }
}
