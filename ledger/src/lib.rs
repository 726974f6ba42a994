//! SimpleBank Ledger Engine
//!
//! Double-entry ledger with an atomic, deadlock-free transfer engine.
//!
//! # Features
//!
//! - Store contracts ([`LedgerStore`], [`LedgerTx`]) with in-memory and
//!   PostgreSQL implementations
//! - Balance mutation through in-place increments only
//! - Transfers executed as one unit of work with id-ordered row locking
//! - Configurable retry of storage conflicts
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use simplebank_ledger::{MemoryStore, RetryPolicy, TransferEngine, TransferRequest};
//!
//! let engine = TransferEngine::new(Arc::new(MemoryStore::new()));
//! let result = engine
//!     .execute_with_retry(&TransferRequest::new(from, to, 30), &RetryPolicy::default())
//!     .await?;
//! assert_eq!(result.from_entry.amount + result.to_entry.amount, 0);
//! ```

pub mod account;
pub mod balance;
pub mod engine;
pub mod journal;
pub mod memory;
pub mod postgres;
pub mod retry;
pub mod store;
pub mod transfer;

pub use account::{Account, CreateAccountParams};
pub use engine::{TransferEngine, TransferPolicy};
pub use journal::{CreateEntryParams, Entry, EntryType};
pub use memory::{FaultKind, FaultPoint, MemoryStore, MemoryStoreConfig};
pub use postgres::{IsolationLevel, PgLedgerStore, PgStoreConfig};
pub use retry::{run_with_retry, Backoff, RetryPolicy};
pub use store::{BalanceMismatch, IntegrityReport, LedgerStore, LedgerTx};
pub use transfer::{CreateTransferParams, Transfer, TransferRequest, TransferResult};
