//! In-memory ledger store.
//!
//! Emulates the relational store closely enough to exercise the engine's
//! concurrency contract without a database:
//!
//! - per-account row locks with a bounded lock wait,
//! - repeatable-read style conflict detection (locking a row that another
//!   unit of work committed after this one began fails with `Conflict`),
//! - buffered writes applied only on commit,
//! - identity sequences that are not rolled back,
//! - one-shot fault injection at each write primitive.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use simplebank_common::{AccountId, EntryId, LedgerError, Result, TransferId};
use tokio::sync::{Mutex as RowLock, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::account::{Account, CreateAccountParams};
use crate::journal::{CreateEntryParams, Entry};
use crate::store::{BalanceMismatch, IntegrityReport, LedgerStore, LedgerTx};
use crate::transfer::{CreateTransferParams, Transfer};

/// Write primitive at which a fault can be injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FaultPoint {
    CreateTransfer,
    CreateEntry,
    AddBalance,
    Commit,
}

/// Error produced by an injected fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultKind {
    Conflict,
    Storage,
}

impl FaultKind {
    fn into_error(self, point: FaultPoint) -> LedgerError {
        match self {
            FaultKind::Conflict => {
                LedgerError::Conflict(format!("injected serialization failure at {:?}", point))
            }
            FaultKind::Storage => LedgerError::Storage(format!("injected failure at {:?}", point)),
        }
    }
}

/// In-memory store configuration.
#[derive(Debug, Clone)]
pub struct MemoryStoreConfig {
    /// Maximum time to wait for a row lock before failing with `Conflict`.
    pub lock_timeout: Duration,
    /// Fail with `Conflict` when locking a row committed after the unit of work began.
    pub snapshot_conflicts: bool,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(5),
            snapshot_conflicts: true,
        }
    }
}

struct AccountRow {
    account: Account,
    /// Commit sequence number of the last write.
    version: u64,
}

#[derive(Default)]
struct Tables {
    accounts: BTreeMap<AccountId, AccountRow>,
    entries: BTreeMap<EntryId, Entry>,
    transfers: BTreeMap<TransferId, Transfer>,
}

struct Shared {
    config: MemoryStoreConfig,
    tables: RwLock<Tables>,
    row_locks: DashMap<AccountId, Arc<RowLock<()>>>,
    commit_seq: AtomicU64,
    account_seq: AtomicI64,
    entry_seq: AtomicI64,
    transfer_seq: AtomicI64,
    faults: Mutex<Vec<(FaultPoint, FaultKind)>>,
}

impl Shared {
    fn take_fault(&self, point: FaultPoint) -> Result<()> {
        let mut faults = self.faults.lock();
        if let Some(pos) = faults.iter().position(|(p, _)| *p == point) {
            let (_, kind) = faults.remove(pos);
            warn!(?point, ?kind, "Injected fault triggered");
            return Err(kind.into_error(point));
        }
        Ok(())
    }

    fn account_exists(&self, id: AccountId) -> Result<()> {
        let exists = self.tables.read().accounts.contains_key(&id);
        if exists {
            Ok(())
        } else {
            Err(LedgerError::AccountNotFound(id))
        }
    }
}

/// In-memory implementation of [`LedgerStore`].
///
/// Cloning is cheap and every clone shares the same tables.
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    /// Create an empty store with default configuration.
    pub fn new() -> Self {
        Self::with_config(MemoryStoreConfig::default())
    }

    /// Create an empty store.
    pub fn with_config(config: MemoryStoreConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                tables: RwLock::new(Tables::default()),
                row_locks: DashMap::new(),
                commit_seq: AtomicU64::new(0),
                account_seq: AtomicI64::new(0),
                entry_seq: AtomicI64::new(0),
                transfer_seq: AtomicI64::new(0),
                faults: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Fail the next call reaching `point` with an error of `kind`.
    ///
    /// Faults queue up; each fires exactly once.
    pub fn inject_fault(&self, point: FaultPoint, kind: FaultKind) {
        self.shared.faults.lock().push((point, kind));
    }

    /// Drop every fault that has not fired yet.
    pub fn clear_faults(&self) {
        self.shared.faults.lock().clear();
    }

    /// Number of faults that have not fired yet.
    pub fn pending_faults(&self) -> usize {
        self.shared.faults.lock().len()
    }

    /// Number of committed transfers.
    pub fn transfer_count(&self) -> usize {
        self.shared.tables.read().transfers.len()
    }

    /// Number of committed entries, opening entries included.
    pub fn entry_count(&self) -> usize {
        self.shared.tables.read().entries.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx> {
        Ok(MemoryTx {
            shared: self.shared.clone(),
            snapshot: self.shared.commit_seq.load(Ordering::SeqCst),
            locks: HashMap::new(),
            deltas: BTreeMap::new(),
            transfers: Vec::new(),
            entries: Vec::new(),
        })
    }

    async fn create_account(&self, params: CreateAccountParams) -> Result<Account> {
        let now = Utc::now();
        let mut tables = self.shared.tables.write();

        let id = AccountId::new(self.shared.account_seq.fetch_add(1, Ordering::SeqCst) + 1);
        let account = Account {
            id,
            owner: params.owner,
            balance: params.opening_balance,
            currency: params.currency,
            created_at: now,
        };
        tables.accounts.insert(
            id,
            AccountRow {
                account: account.clone(),
                version: self.shared.commit_seq.load(Ordering::SeqCst),
            },
        );

        if params.opening_balance != 0 {
            let entry_id = EntryId::new(self.shared.entry_seq.fetch_add(1, Ordering::SeqCst) + 1);
            tables.entries.insert(
                entry_id,
                Entry {
                    id: entry_id,
                    account_id: id,
                    amount: params.opening_balance,
                    created_at: now,
                },
            );
        }

        Ok(account)
    }

    async fn get_account(&self, id: AccountId) -> Result<Account> {
        self.shared
            .tables
            .read()
            .accounts
            .get(&id)
            .map(|row| row.account.clone())
            .ok_or(LedgerError::AccountNotFound(id))
    }

    async fn list_accounts(&self, owner: Option<&str>) -> Result<Vec<Account>> {
        Ok(self
            .shared
            .tables
            .read()
            .accounts
            .values()
            .filter(|row| owner.map_or(true, |o| row.account.owner == o))
            .map(|row| row.account.clone())
            .collect())
    }

    async fn get_transfer(&self, id: TransferId) -> Result<Transfer> {
        self.shared
            .tables
            .read()
            .transfers
            .get(&id)
            .cloned()
            .ok_or(LedgerError::TransferNotFound(id))
    }

    async fn list_transfers(&self, account_id: Option<AccountId>) -> Result<Vec<Transfer>> {
        Ok(self
            .shared
            .tables
            .read()
            .transfers
            .values()
            .filter(|t| {
                account_id.map_or(true, |id| t.from_account_id == id || t.to_account_id == id)
            })
            .cloned()
            .collect())
    }

    async fn list_entries(&self, account_id: AccountId) -> Result<Vec<Entry>> {
        self.shared.account_exists(account_id)?;
        Ok(self
            .shared
            .tables
            .read()
            .entries
            .values()
            .filter(|e| e.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn verify_integrity(&self) -> Result<IntegrityReport> {
        let tables = self.shared.tables.read();

        let mut sums: HashMap<AccountId, i64> = HashMap::new();
        for entry in tables.entries.values() {
            let sum = sums.entry(entry.account_id).or_insert(0);
            *sum = sum.saturating_add(entry.amount);
        }

        let mut report = IntegrityReport {
            accounts: tables.accounts.len() as u64,
            entries: tables.entries.len() as u64,
            transfers: tables.transfers.len() as u64,
            ..IntegrityReport::default()
        };
        for (id, row) in &tables.accounts {
            report.total_balance = report.total_balance.saturating_add(row.account.balance);
            let ledger_balance = sums.get(id).copied().unwrap_or(0);
            if ledger_balance != row.account.balance {
                report.mismatches.push(BalanceMismatch {
                    account_id: *id,
                    stored_balance: row.account.balance,
                    ledger_balance,
                });
            }
        }

        Ok(report)
    }
}

/// Unit of work against a [`MemoryStore`].
///
/// Dropping it without calling `commit` discards its writes and releases its
/// row locks.
pub struct MemoryTx {
    shared: Arc<Shared>,
    snapshot: u64,
    locks: HashMap<AccountId, OwnedMutexGuard<()>>,
    deltas: BTreeMap<AccountId, i64>,
    transfers: Vec<Transfer>,
    entries: Vec<Entry>,
}

impl MemoryTx {
    async fn lock_row(&mut self, id: AccountId) -> Result<()> {
        if self.locks.contains_key(&id) {
            return Ok(());
        }
        self.shared.account_exists(id)?;

        let row_lock = self
            .shared
            .row_locks
            .entry(id)
            .or_insert_with(|| Arc::new(RowLock::new(())))
            .clone();
        let guard = tokio::time::timeout(self.shared.config.lock_timeout, row_lock.lock_owned())
            .await
            .map_err(|_| LedgerError::Conflict(format!("lock wait timeout on account {}", id)))?;

        if self.shared.config.snapshot_conflicts {
            let version = self
                .shared
                .tables
                .read()
                .accounts
                .get(&id)
                .map_or(0, |row| row.version);
            if version > self.snapshot {
                return Err(LedgerError::Conflict(format!(
                    "could not serialize access to account {} due to concurrent update",
                    id
                )));
            }
        }

        self.locks.insert(id, guard);
        Ok(())
    }

    /// Account as seen by this unit of work, pending deltas applied.
    fn current(&self, id: AccountId) -> Result<Account> {
        let mut account = self
            .shared
            .tables
            .read()
            .accounts
            .get(&id)
            .map(|row| row.account.clone())
            .ok_or(LedgerError::AccountNotFound(id))?;

        if let Some(delta) = self.deltas.get(&id) {
            account.balance = account
                .balance
                .checked_add(*delta)
                .ok_or_else(|| LedgerError::Storage(format!("balance overflow on account {}", id)))?;
        }
        Ok(account)
    }
}

#[async_trait]
impl LedgerTx for MemoryTx {
    async fn get_account_for_update(&mut self, id: AccountId) -> Result<Account> {
        self.lock_row(id).await?;
        self.current(id)
    }

    async fn create_transfer(&mut self, params: &CreateTransferParams) -> Result<Transfer> {
        self.shared.take_fault(FaultPoint::CreateTransfer)?;
        self.shared.account_exists(params.from_account_id)?;
        self.shared.account_exists(params.to_account_id)?;

        let transfer = Transfer {
            id: TransferId::new(self.shared.transfer_seq.fetch_add(1, Ordering::SeqCst) + 1),
            from_account_id: params.from_account_id,
            to_account_id: params.to_account_id,
            amount: params.amount,
            created_at: Utc::now(),
        };
        self.transfers.push(transfer.clone());
        Ok(transfer)
    }

    async fn create_entry(&mut self, params: &CreateEntryParams) -> Result<Entry> {
        self.shared.take_fault(FaultPoint::CreateEntry)?;
        self.shared.account_exists(params.account_id)?;

        let entry = Entry {
            id: EntryId::new(self.shared.entry_seq.fetch_add(1, Ordering::SeqCst) + 1),
            account_id: params.account_id,
            amount: params.amount,
            created_at: Utc::now(),
        };
        self.entries.push(entry.clone());
        Ok(entry)
    }

    async fn add_balance(&mut self, id: AccountId, delta: i64) -> Result<Account> {
        self.shared.take_fault(FaultPoint::AddBalance)?;
        self.lock_row(id).await?;

        let mut account = self.current(id)?;
        let overflow = || LedgerError::Storage(format!("balance overflow on account {}", id));
        account.balance = account.balance.checked_add(delta).ok_or_else(overflow)?;

        let pending = self.deltas.entry(id).or_insert(0);
        *pending = pending.checked_add(delta).ok_or_else(overflow)?;

        Ok(account)
    }

    async fn commit(self) -> Result<()> {
        self.shared.take_fault(FaultPoint::Commit)?;

        let MemoryTx {
            shared,
            locks,
            deltas,
            transfers,
            entries,
            ..
        } = self;

        {
            let mut tables = shared.tables.write();

            let mut updates = Vec::with_capacity(deltas.len());
            for (id, delta) in &deltas {
                let row = tables
                    .accounts
                    .get(id)
                    .ok_or(LedgerError::AccountNotFound(*id))?;
                let balance = row.account.balance.checked_add(*delta).ok_or_else(|| {
                    LedgerError::Storage(format!("balance overflow on account {}", id))
                })?;
                updates.push((*id, balance));
            }

            let version = shared.commit_seq.fetch_add(1, Ordering::SeqCst) + 1;
            for (id, balance) in updates {
                if let Some(row) = tables.accounts.get_mut(&id) {
                    row.account.balance = balance;
                    row.version = version;
                }
            }
            for transfer in transfers {
                tables.transfers.insert(transfer.id, transfer);
            }
            for entry in entries {
                tables.entries.insert(entry.id, entry);
            }
        }

        debug!(rows_locked = locks.len(), "Unit of work committed");
        drop(locks);
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        debug!(rows_locked = self.locks.len(), "Unit of work rolled back");
        Ok(())
    }
}
