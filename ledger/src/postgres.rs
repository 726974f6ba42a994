//! PostgreSQL ledger store.
//!
//! Each unit of work is a database transaction opened at the configured
//! isolation level. Row locks are taken with `FOR NO KEY UPDATE`, which does
//! not block the key-share locks the foreign keys on `entries` and
//! `transfers` take on inserts.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use simplebank_common::{AccountId, EntryId, LedgerError, Result, TransferId};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, Postgres, Transaction};
use tracing::{debug, info};

use crate::account::{Account, CreateAccountParams};
use crate::journal::{CreateEntryParams, Entry};
use crate::store::{BalanceMismatch, IntegrityReport, LedgerStore, LedgerTx};
use crate::transfer::{CreateTransferParams, Transfer};

/// SQLSTATE codes surfaced as `Conflict`.
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";
const LOCK_NOT_AVAILABLE: &str = "55P03";
const FOREIGN_KEY_VIOLATION: &str = "23503";

/// Transaction isolation level for units of work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum IsolationLevel {
    ReadCommitted,
    #[default]
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    fn set_transaction_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadCommitted => "SET TRANSACTION ISOLATION LEVEL READ COMMITTED",
            IsolationLevel::RepeatableRead => "SET TRANSACTION ISOLATION LEVEL REPEATABLE READ",
            IsolationLevel::Serializable => "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE",
        }
    }
}

impl FromStr for IsolationLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['_', ' '], "-").as_str() {
            "read-committed" => Ok(IsolationLevel::ReadCommitted),
            "repeatable-read" => Ok(IsolationLevel::RepeatableRead),
            "serializable" => Ok(IsolationLevel::Serializable),
            other => Err(format!("unknown isolation level: {}", other)),
        }
    }
}

/// PostgreSQL store configuration.
#[derive(Debug, Clone, Default)]
pub struct PgStoreConfig {
    pub isolation: IsolationLevel,
    /// `lock_timeout` applied to every unit of work; the server default when `None`.
    pub lock_timeout: Option<Duration>,
}

#[derive(FromRow)]
struct AccountRow {
    id: i64,
    owner: String,
    balance: i64,
    currency: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<AccountRow> for Account {
    type Error = LedgerError;

    fn try_from(row: AccountRow) -> Result<Self> {
        let currency = row.currency.parse().map_err(|_| {
            LedgerError::Storage(format!(
                "account {} has unknown currency {:?}",
                row.id, row.currency
            ))
        })?;
        Ok(Account {
            id: AccountId::new(row.id),
            owner: row.owner,
            balance: row.balance,
            currency,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct EntryRow {
    id: i64,
    account_id: i64,
    amount: i64,
    created_at: DateTime<Utc>,
}

impl From<EntryRow> for Entry {
    fn from(row: EntryRow) -> Self {
        Entry {
            id: EntryId::new(row.id),
            account_id: AccountId::new(row.account_id),
            amount: row.amount,
            created_at: row.created_at,
        }
    }
}

#[derive(FromRow)]
struct TransferRow {
    id: i64,
    from_account_id: i64,
    to_account_id: i64,
    amount: i64,
    created_at: DateTime<Utc>,
}

impl From<TransferRow> for Transfer {
    fn from(row: TransferRow) -> Self {
        Transfer {
            id: TransferId::new(row.id),
            from_account_id: AccountId::new(row.from_account_id),
            to_account_id: AccountId::new(row.to_account_id),
            amount: row.amount,
            created_at: row.created_at,
        }
    }
}

fn sqlstate(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db) => db.code().map(|code| code.into_owned()),
        _ => None,
    }
}

/// Map a driver error onto the ledger taxonomy.
fn classify(err: sqlx::Error) -> LedgerError {
    match sqlstate(&err).as_deref() {
        Some(SERIALIZATION_FAILURE) | Some(DEADLOCK_DETECTED) | Some(LOCK_NOT_AVAILABLE) => {
            LedgerError::Conflict(err.to_string())
        }
        _ => LedgerError::Storage(err.to_string()),
    }
}

/// Like [`classify`], reporting a foreign-key violation as the missing account.
fn classify_reference(err: sqlx::Error, account_id: AccountId) -> LedgerError {
    if sqlstate(&err).as_deref() == Some(FOREIGN_KEY_VIOLATION) {
        return LedgerError::AccountNotFound(account_id);
    }
    classify(err)
}

/// PostgreSQL implementation of [`LedgerStore`].
#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
    config: PgStoreConfig,
}

impl PgLedgerStore {
    /// Wrap an existing pool.
    pub fn new(pool: PgPool, config: PgStoreConfig) -> Self {
        Self { pool, config }
    }

    /// Open a connection pool.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        config: PgStoreConfig,
    ) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(classify)?;

        info!(
            max_connections,
            isolation = ?config.isolation,
            "Connected to ledger database"
        );
        Ok(Self::new(pool, config))
    }

    /// Apply the embedded schema migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| LedgerError::Storage(format!("migration failed: {}", e)))?;
        info!("Ledger schema up to date");
        Ok(())
    }

    /// Get the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    type Tx = PgLedgerTx;

    async fn begin(&self) -> Result<PgLedgerTx> {
        let mut tx = self.pool.begin().await.map_err(classify)?;

        sqlx::query(self.config.isolation.set_transaction_sql())
            .execute(&mut *tx)
            .await
            .map_err(classify)?;

        if let Some(timeout) = self.config.lock_timeout {
            let statement = format!("SET LOCAL lock_timeout = {}", timeout.as_millis());
            sqlx::query(&statement)
                .execute(&mut *tx)
                .await
                .map_err(classify)?;
        }

        Ok(PgLedgerTx { tx })
    }

    async fn create_account(&self, params: CreateAccountParams) -> Result<Account> {
        let mut tx = self.pool.begin().await.map_err(classify)?;

        let account: Account = sqlx::query_as::<_, AccountRow>(
            r#"
            INSERT INTO accounts (owner, balance, currency)
            VALUES ($1, $2, $3)
            RETURNING id, owner, balance, currency, created_at
            "#,
        )
        .bind(&params.owner)
        .bind(params.opening_balance)
        .bind(params.currency.code())
        .fetch_one(&mut *tx)
        .await
        .map_err(classify)?
        .try_into()?;

        if params.opening_balance != 0 {
            sqlx::query("INSERT INTO entries (account_id, amount) VALUES ($1, $2)")
                .bind(account.id.get())
                .bind(params.opening_balance)
                .execute(&mut *tx)
                .await
                .map_err(classify)?;
        }

        tx.commit().await.map_err(classify)?;
        Ok(account)
    }

    async fn get_account(&self, id: AccountId) -> Result<Account> {
        sqlx::query_as::<_, AccountRow>(
            "SELECT id, owner, balance, currency, created_at FROM accounts WHERE id = $1",
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)?
        .ok_or(LedgerError::AccountNotFound(id))?
        .try_into()
    }

    async fn list_accounts(&self, owner: Option<&str>) -> Result<Vec<Account>> {
        sqlx::query_as::<_, AccountRow>(
            r#"
            SELECT id, owner, balance, currency, created_at
            FROM accounts
            WHERE ($1::TEXT IS NULL OR owner = $1)
            ORDER BY id
            "#,
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await
        .map_err(classify)?
        .into_iter()
        .map(Account::try_from)
        .collect()
    }

    async fn get_transfer(&self, id: TransferId) -> Result<Transfer> {
        sqlx::query_as::<_, TransferRow>(
            r#"
            SELECT id, from_account_id, to_account_id, amount, created_at
            FROM transfers
            WHERE id = $1
            "#,
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)?
        .map(Transfer::from)
        .ok_or(LedgerError::TransferNotFound(id))
    }

    async fn list_transfers(&self, account_id: Option<AccountId>) -> Result<Vec<Transfer>> {
        let rows = sqlx::query_as::<_, TransferRow>(
            r#"
            SELECT id, from_account_id, to_account_id, amount, created_at
            FROM transfers
            WHERE ($1::BIGINT IS NULL OR from_account_id = $1 OR to_account_id = $1)
            ORDER BY id
            "#,
        )
        .bind(account_id.map(|id| id.get()))
        .fetch_all(&self.pool)
        .await
        .map_err(classify)?;

        Ok(rows.into_iter().map(Transfer::from).collect())
    }

    async fn list_entries(&self, account_id: AccountId) -> Result<Vec<Entry>> {
        self.get_account(account_id).await?;

        let rows = sqlx::query_as::<_, EntryRow>(
            r#"
            SELECT id, account_id, amount, created_at
            FROM entries
            WHERE account_id = $1
            ORDER BY id
            "#,
        )
        .bind(account_id.get())
        .fetch_all(&self.pool)
        .await
        .map_err(classify)?;

        Ok(rows.into_iter().map(Entry::from).collect())
    }

    async fn verify_integrity(&self) -> Result<IntegrityReport> {
        // One snapshot for both queries.
        let mut tx = self.pool.begin().await.map_err(classify)?;
        sqlx::query(IsolationLevel::RepeatableRead.set_transaction_sql())
            .execute(&mut *tx)
            .await
            .map_err(classify)?;

        let balances = sqlx::query_as::<_, (i64, i64, i64)>(
            r#"
            SELECT a.id, a.balance, COALESCE(SUM(e.amount), 0)::BIGINT
            FROM accounts a
            LEFT JOIN entries e ON e.account_id = a.id
            GROUP BY a.id, a.balance
            ORDER BY a.id
            "#,
        )
        .fetch_all(&mut *tx)
        .await
        .map_err(classify)?;

        let (entries, transfers) = sqlx::query_as::<_, (i64, i64)>(
            "SELECT (SELECT COUNT(*) FROM entries), (SELECT COUNT(*) FROM transfers)",
        )
        .fetch_one(&mut *tx)
        .await
        .map_err(classify)?;

        tx.commit().await.map_err(classify)?;

        let mut report = IntegrityReport {
            accounts: balances.len() as u64,
            entries: entries as u64,
            transfers: transfers as u64,
            ..IntegrityReport::default()
        };
        for (id, stored_balance, ledger_balance) in balances {
            report.total_balance = report.total_balance.saturating_add(stored_balance);
            if stored_balance != ledger_balance {
                report.mismatches.push(BalanceMismatch {
                    account_id: AccountId::new(id),
                    stored_balance,
                    ledger_balance,
                });
            }
        }

        Ok(report)
    }
}

/// Unit of work backed by a database transaction.
///
/// Dropping it without `commit` rolls the transaction back.
pub struct PgLedgerTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTx for PgLedgerTx {
    async fn get_account_for_update(&mut self, id: AccountId) -> Result<Account> {
        sqlx::query_as::<_, AccountRow>(
            r#"
            SELECT id, owner, balance, currency, created_at
            FROM accounts
            WHERE id = $1
            FOR NO KEY UPDATE
            "#,
        )
        .bind(id.get())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(classify)?
        .ok_or(LedgerError::AccountNotFound(id))?
        .try_into()
    }

    async fn create_transfer(&mut self, params: &CreateTransferParams) -> Result<Transfer> {
        let row = sqlx::query_as::<_, TransferRow>(
            r#"
            INSERT INTO transfers (from_account_id, to_account_id, amount)
            VALUES ($1, $2, $3)
            RETURNING id, from_account_id, to_account_id, amount, created_at
            "#,
        )
        .bind(params.from_account_id.get())
        .bind(params.to_account_id.get())
        .bind(params.amount)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| classify_reference(e, params.from_account_id))?;

        Ok(row.into())
    }

    async fn create_entry(&mut self, params: &CreateEntryParams) -> Result<Entry> {
        let row = sqlx::query_as::<_, EntryRow>(
            r#"
            INSERT INTO entries (account_id, amount)
            VALUES ($1, $2)
            RETURNING id, account_id, amount, created_at
            "#,
        )
        .bind(params.account_id.get())
        .bind(params.amount)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| classify_reference(e, params.account_id))?;

        Ok(row.into())
    }

    async fn add_balance(&mut self, id: AccountId, delta: i64) -> Result<Account> {
        sqlx::query_as::<_, AccountRow>(
            r#"
            UPDATE accounts
            SET balance = balance + $2
            WHERE id = $1
            RETURNING id, owner, balance, currency, created_at
            "#,
        )
        .bind(id.get())
        .bind(delta)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(classify)?
        .ok_or(LedgerError::AccountNotFound(id))?
        .try_into()
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await.map_err(classify)?;
        debug!("Transaction committed");
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await.map_err(classify)?;
        debug!("Transaction rolled back");
        Ok(())
    }
}
