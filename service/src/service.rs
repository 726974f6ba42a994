//! Transfer service: the single entry point the API layer calls.
//!
//! Wraps the [`TransferEngine`] with the conflict retry policy, a request
//! deadline, caller cancellation, metrics and a start/stop lifecycle.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use simplebank_common::{AccountId, LedgerError, Result};
use simplebank_ledger::{
    Account, CreateAccountParams, Entry, IntegrityReport, LedgerStore, RetryPolicy, Transfer,
    TransferEngine, TransferRequest, TransferResult,
};
use tracing::{debug, info, info_span, instrument, warn, Instrument};
use uuid::Uuid;

use crate::config::ServiceConfig;
use crate::metrics::{Metrics, SharedMetrics};
use crate::state::ServiceState;

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Marks one transfer as in flight until dropped.
struct InFlight<'a>(&'a Metrics);

impl<'a> InFlight<'a> {
    fn enter(metrics: &'a Metrics) -> Self {
        metrics.transfer_started();
        Self(metrics)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.transfer_finished();
    }
}

/// Transfer service.
pub struct TransferService<S: LedgerStore> {
    /// Configuration.
    config: ServiceConfig,
    /// Transfer engine over the injected store.
    engine: TransferEngine<S>,
    /// Conflict retry policy.
    retry: RetryPolicy,
    /// Current lifecycle state.
    state: Arc<RwLock<ServiceState>>,
    /// Service metrics.
    metrics: SharedMetrics,
}

impl<S: LedgerStore> TransferService<S> {
    /// Create a new service in the `Starting` state.
    pub fn new(store: Arc<S>, config: ServiceConfig) -> Self {
        let engine = TransferEngine::with_policy(store, config.policy);
        let retry = config.retry.policy();

        Self {
            config,
            engine,
            retry,
            state: Arc::new(RwLock::new(ServiceState::Starting)),
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// Get the store.
    pub fn store(&self) -> &Arc<S> {
        self.engine.store()
    }

    /// Get the metrics.
    pub fn metrics(&self) -> &SharedMetrics {
        &self.metrics
    }

    /// Get the current lifecycle state.
    pub fn state(&self) -> ServiceState {
        *self.state.read()
    }

    /// Check if the service is accepting requests.
    pub fn is_accepting_requests(&self) -> bool {
        self.state().accepts_requests()
    }

    /// Start accepting requests.
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<()> {
        {
            let mut state = self.state.write();
            if matches!(*state, ServiceState::ShuttingDown | ServiceState::Stopped) {
                return Err(LedgerError::Unavailable("service has been stopped".to_string()));
            }
            *state = ServiceState::Running;
        }

        info!(
            isolation = ?self.config.store.isolation,
            max_attempts = self.retry.max_attempts,
            allow_overdraft = self.config.policy.allow_overdraft,
            allow_self_transfer = self.config.policy.allow_self_transfer,
            "Transfer service started"
        );
        Ok(())
    }

    /// Stop accepting requests and wait for in-flight transfers to finish.
    #[instrument(skip(self))]
    pub async fn stop(&self) -> Result<()> {
        {
            let mut state = self.state.write();
            if state.is_terminal() {
                debug!("Transfer service already stopped");
                return Ok(());
            }
            *state = ServiceState::ShuttingDown;
        }
        info!("Stopping transfer service");

        let drained = tokio::time::timeout(self.config.drain_timeout, async {
            while self.metrics.active() > 0 {
                debug!(pending = self.metrics.active(), "Waiting for in-flight transfers");
                tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
            }
        })
        .await
        .is_ok();

        if !drained {
            warn!(
                pending = self.metrics.active(),
                "Drain timeout elapsed with transfers in flight"
            );
        }

        *self.state.write() = ServiceState::Stopped;
        info!("Transfer service stopped");
        Ok(())
    }

    /// Execute a transfer under the retry policy and request deadline.
    pub async fn transfer(&self, request: TransferRequest) -> Result<TransferResult> {
        self.transfer_until(request, futures::future::pending()).await
    }

    /// Execute a transfer, aborting it when `cancel` resolves first.
    ///
    /// An aborted transfer leaves no trace: the in-flight unit of work is
    /// dropped and rolled back. Cancelling after commit has no effect.
    pub async fn transfer_until<C>(&self, request: TransferRequest, cancel: C) -> Result<TransferResult>
    where
        C: Future<Output = ()>,
    {
        let span = info_span!(
            "transfer",
            request_id = %Uuid::new_v4(),
            from = %request.from_account_id,
            to = %request.to_account_id,
            amount = request.amount,
        );
        self.run_transfer(request, cancel).instrument(span).await
    }

    async fn run_transfer<C>(&self, request: TransferRequest, cancel: C) -> Result<TransferResult>
    where
        C: Future<Output = ()>,
    {
        // Counted before the state check so that `stop` cannot miss this transfer.
        let _in_flight = InFlight::enter(&self.metrics);
        if let Err(err) = self.ensure_running() {
            self.metrics.transfer_rejected();
            return Err(err);
        }
        self.metrics.transfer_accepted();

        let deadline = self.config.request_timeout;
        let outcome = tokio::select! {
            biased;
            _ = cancel => Err(LedgerError::Cancelled),
            result = tokio::time::timeout(deadline, self.execute(&request)) => {
                result.unwrap_or_else(|_| Err(LedgerError::Timeout(deadline)))
            }
        };

        match &outcome {
            Ok(result) => {
                self.metrics.transfer_committed();
                info!(transfer_id = %result.transfer.id, "Transfer completed");
            }
            Err(err) => {
                self.metrics.transfer_failed(err.kind());
                warn!(error = %err, code = err.error_code(), "Transfer failed");
            }
        }
        outcome
    }

    async fn execute(&self, request: &TransferRequest) -> Result<TransferResult> {
        self.engine.validate(request)?;
        self.preflight(request).await?;

        self.retry
            .run(|attempt| {
                if attempt > 1 {
                    self.metrics.conflict_retry();
                }
                self.engine.execute(request)
            })
            .await
    }

    /// Check that both accounts hold the requested currency.
    async fn preflight(&self, request: &TransferRequest) -> Result<()> {
        let Some(expected) = request.currency else {
            return Ok(());
        };

        for account_id in [request.from_account_id, request.to_account_id] {
            let account = self.store().get_account(account_id).await?;
            if account.currency != expected {
                return Err(LedgerError::CurrencyMismatch {
                    account_id,
                    expected,
                    actual: account.currency,
                });
            }
        }
        Ok(())
    }

    /// Open an account.
    #[instrument(skip(self, params), fields(owner = %params.owner, currency = %params.currency))]
    pub async fn open_account(&self, params: CreateAccountParams) -> Result<Account> {
        self.ensure_running()?;
        let account = self.store().create_account(params).await?;
        info!(account_id = %account.id, balance = account.balance, "Account opened");
        Ok(account)
    }

    /// Get an account.
    pub async fn account(&self, id: AccountId) -> Result<Account> {
        self.ensure_running()?;
        self.store().get_account(id).await
    }

    /// List accounts, optionally for one owner.
    pub async fn accounts(&self, owner: Option<&str>) -> Result<Vec<Account>> {
        self.ensure_running()?;
        self.store().list_accounts(owner).await
    }

    /// List transfers, optionally touching one account.
    pub async fn transfers(&self, account_id: Option<AccountId>) -> Result<Vec<Transfer>> {
        self.ensure_running()?;
        self.store().list_transfers(account_id).await
    }

    /// List an account's entries.
    pub async fn entries(&self, account_id: AccountId) -> Result<Vec<Entry>> {
        self.ensure_running()?;
        self.store().list_entries(account_id).await
    }

    /// Recompute balances from the ledger.
    #[instrument(skip(self))]
    pub async fn verify(&self) -> Result<IntegrityReport> {
        self.ensure_running()?;
        let report = self.store().verify_integrity().await?;
        if report.is_consistent() {
            info!(accounts = report.accounts, entries = report.entries, "Ledger consistent");
        } else {
            warn!(mismatches = report.mismatches.len(), "Ledger inconsistent");
        }
        Ok(report)
    }

    fn ensure_running(&self) -> Result<()> {
        let state = self.state();
        if state.accepts_requests() {
            Ok(())
        } else {
            Err(LedgerError::Unavailable(format!("service is {:?}", state)))
        }
    }
}
