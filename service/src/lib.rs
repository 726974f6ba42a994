//! SimpleBank Transfer Service
//!
//! The entry point an API layer calls to move funds. Composes the ledger's
//! transfer engine with conflict retries, request deadlines, cancellation,
//! metrics and a start/stop lifecycle.

pub mod config;
pub mod metrics;
pub mod service;
pub mod state;

pub use config::{BackoffKind, RetryConfig, ServiceConfig, StoreConfig};
pub use metrics::{Metrics, MetricsSnapshot, SharedMetrics};
pub use service::TransferService;
pub use state::ServiceState;
