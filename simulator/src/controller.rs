//! Simulation controller.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::RwLock;
use tracing::{info, warn};

use simplebank_common::{AccountId, Currency, LedgerError};
use simplebank_ledger::{
    CreateAccountParams, IntegrityReport, LedgerStore, MemoryStore, TransferRequest, TransferResult,
};
use simplebank_service::TransferService;

use crate::metrics::SimulationMetrics;
use crate::scenario::{AssertCondition, Outcome, Scenario, ScenarioStep};

/// Random load parameters.
#[derive(Debug, Clone)]
pub struct LoadConfig {
    /// Transfers to execute; `None` runs until stopped.
    pub transfers: Option<u64>,
    /// Concurrent workers.
    pub concurrency: usize,
    /// Largest transfer amount in minor units.
    pub max_amount: i64,
    /// Stop after this long.
    pub duration: Option<Duration>,
}

/// Controls the simulation.
pub struct SimulationController<S: LedgerStore> {
    /// Transfer service under test.
    service: Arc<TransferService<S>>,
    /// Handle for fault injection when running on the in-memory store.
    faults: Option<MemoryStore>,
    /// Accounts by scenario name.
    accounts: HashMap<String, AccountId>,
    /// Random number generator.
    rng: StdRng,
    /// Simulation metrics.
    metrics: Arc<RwLock<SimulationMetrics>>,
    /// Running flag.
    running: Arc<AtomicBool>,
}

async fn timed_transfer<S: LedgerStore>(
    service: &TransferService<S>,
    metrics: &RwLock<SimulationMetrics>,
    request: TransferRequest,
) -> Result<TransferResult, LedgerError> {
    let started = Instant::now();
    let result = service.transfer(request).await;

    let mut metrics = metrics.write().await;
    match &result {
        Ok(_) => metrics.record_success(started.elapsed()),
        Err(e) => metrics.record_failure(e.kind()),
    }
    result
}

impl<S: LedgerStore> SimulationController<S> {
    /// Create a new simulation controller.
    pub fn new(service: Arc<TransferService<S>>, faults: Option<MemoryStore>, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };

        Self {
            service,
            faults,
            accounts: HashMap::new(),
            rng,
            metrics: Arc::new(RwLock::new(SimulationMetrics::new())),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Open `count` accounts for random load.
    pub async fn initialize(&mut self, count: usize, opening_balance: i64) -> anyhow::Result<()> {
        if count < 2 {
            return Err(anyhow::anyhow!("Random load needs at least 2 accounts"));
        }
        info!(count, opening_balance, "Opening simulation accounts");

        for i in 0..count {
            self.open_account(&format!("acct-{}", i), Currency::Usd, opening_balance)
                .await?;
        }
        Ok(())
    }

    async fn open_account(&mut self, name: &str, currency: Currency, balance: i64) -> anyhow::Result<AccountId> {
        let account = self
            .service
            .open_account(
                CreateAccountParams::new(format!("sim-{}", name), currency).with_opening_balance(balance),
            )
            .await?;
        self.accounts.insert(name.to_string(), account.id);
        Ok(account.id)
    }

    fn account_id(&self, name: &str) -> anyhow::Result<AccountId> {
        self.accounts
            .get(name)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("Unknown account in scenario: {}", name))
    }

    /// Run a scenario.
    pub async fn run_scenario(&mut self, scenario: Scenario) -> anyhow::Result<()> {
        info!("Running scenario: {} - {}", scenario.name, scenario.description);

        self.running.store(true, Ordering::SeqCst);
        for step in &scenario.steps {
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            self.execute_step(step).await?;
        }
        self.running.store(false, Ordering::SeqCst);

        info!("Scenario {} passed", scenario.name);
        Ok(())
    }

    /// Run random transfers between the initialized accounts.
    pub async fn run(&mut self, load: LoadConfig) -> anyhow::Result<()> {
        let ids: Vec<AccountId> = self.accounts.values().copied().collect();
        if ids.len() < 2 {
            return Err(anyhow::anyhow!("Simulation not initialized"));
        }
        info!(
            transfers = ?load.transfers,
            concurrency = load.concurrency,
            "Running random transfer load"
        );

        self.running.store(true, Ordering::SeqCst);
        let remaining = Arc::new(AtomicU64::new(load.transfers.unwrap_or(u64::MAX)));
        let started = Instant::now();

        let workers: Vec<_> = (0..load.concurrency.max(1))
            .map(|_| {
                let service = self.service.clone();
                let metrics = self.metrics.clone();
                let running = self.running.clone();
                let remaining = remaining.clone();
                let ids = ids.clone();
                let max_amount = load.max_amount.max(1);
                let mut rng = StdRng::seed_from_u64(self.rng.gen());

                tokio::spawn(async move {
                    while running.load(Ordering::SeqCst)
                        && remaining
                            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                            .is_ok()
                    {
                        let from = ids[rng.gen_range(0..ids.len())];
                        let mut to = ids[rng.gen_range(0..ids.len())];
                        while to == from {
                            to = ids[rng.gen_range(0..ids.len())];
                        }
                        let amount = rng.gen_range(1..=max_amount);

                        // Failures are counted in the metrics.
                        let _ = timed_transfer(&service, &metrics, TransferRequest::new(from, to, amount)).await;
                    }
                })
            })
            .collect();

        // Wait for duration or Ctrl+C
        let stopper = {
            let running = self.running.clone();
            let duration = load.duration;
            tokio::spawn(async move {
                match duration {
                    Some(d) => tokio::time::sleep(d).await,
                    None => {
                        if tokio::signal::ctrl_c().await.is_err() {
                            return;
                        }
                    }
                }
                info!("Stopping simulation");
                running.store(false, Ordering::SeqCst);
            })
        };

        for worker in join_all(workers).await {
            worker?;
        }
        stopper.abort();
        self.running.store(false, Ordering::SeqCst);

        let metrics = self.get_metrics().await;
        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            throughput = metrics.throughput(started.elapsed()),
            "Random load finished"
        );
        Ok(())
    }

    /// Execute a single scenario step.
    async fn execute_step(&mut self, step: &ScenarioStep) -> anyhow::Result<()> {
        match step {
            ScenarioStep::OpenAccount {
                name,
                currency,
                balance,
            } => {
                let id = self.open_account(name, *currency, *balance).await?;
                info!("Opened account {} as {} with {}", name, id, currency.format_minor(*balance));
            }
            ScenarioStep::Transfer {
                from,
                to,
                amount,
                expect,
            } => {
                let request = TransferRequest::new(self.account_id(from)?, self.account_id(to)?, *amount);
                let result = timed_transfer(&self.service, &self.metrics, request).await;
                match (expect, result) {
                    (Outcome::Committed, Ok(r)) => {
                        info!("Transfer {} -> {} of {} committed as {}", from, to, amount, r.transfer.id)
                    }
                    (Outcome::Failed, Err(e)) => info!("Transfer {} -> {} failed as expected: {}", from, to, e),
                    (Outcome::Committed, Err(e)) => {
                        return Err(anyhow::anyhow!("Transfer {} -> {} failed: {}", from, to, e));
                    }
                    (Outcome::Failed, Ok(r)) => {
                        return Err(anyhow::anyhow!(
                            "Transfer {} -> {} committed as {} but was expected to fail",
                            from,
                            to,
                            r.transfer.id
                        ));
                    }
                }
            }
            ScenarioStep::Burst {
                from,
                to,
                amount,
                count,
            } => {
                let request = TransferRequest::new(self.account_id(from)?, self.account_id(to)?, *amount);
                info!("Sending {} concurrent transfers {} -> {}", count, from, to);
                self.concurrent(vec![request; *count]).await?;
            }
            ScenarioStep::Contention { a, b, amount, rounds } => {
                let (a_id, b_id) = (self.account_id(a)?, self.account_id(b)?);
                let requests = (0..*rounds)
                    .flat_map(|_| {
                        [
                            TransferRequest::new(a_id, b_id, *amount),
                            TransferRequest::new(b_id, a_id, *amount),
                        ]
                    })
                    .collect();
                info!("Sending {} opposing transfer pairs between {} and {}", rounds, a, b);
                self.concurrent(requests).await?;
            }
            ScenarioStep::Wait { millis } => {
                tokio::time::sleep(Duration::from_millis(*millis)).await;
            }
            ScenarioStep::InjectFault { point, kind } => {
                let store = self
                    .faults
                    .as_ref()
                    .ok_or_else(|| anyhow::anyhow!("Fault injection requires the in-memory store"))?;
                info!("Injecting {:?} fault at {:?}", kind, point);
                store.inject_fault(*point, *kind);
            }
            ScenarioStep::ClearFaults => {
                if let Some(store) = &self.faults {
                    store.clear_faults();
                }
            }
            ScenarioStep::Assert { condition } => self.check(condition).await?,
        }

        Ok(())
    }

    /// Execute requests concurrently; returns how many committed.
    async fn concurrent(&self, requests: Vec<TransferRequest>) -> anyhow::Result<usize> {
        let total = requests.len();
        let handles: Vec<_> = requests
            .into_iter()
            .map(|request| {
                let service = self.service.clone();
                let metrics = self.metrics.clone();
                tokio::spawn(async move { timed_transfer(&service, &metrics, request).await })
            })
            .collect();

        let mut committed = 0;
        for handle in join_all(handles).await {
            match handle? {
                Ok(_) => committed += 1,
                Err(e) => warn!(error = %e, "Concurrent transfer failed"),
            }
        }
        info!(committed, total, "Concurrent transfers finished");
        Ok(committed)
    }

    async fn check(&self, condition: &AssertCondition) -> anyhow::Result<()> {
        match condition {
            AssertCondition::BalanceEquals { account, amount } => {
                let actual = self.service.account(self.account_id(account)?).await?.balance;
                if actual != *amount {
                    return Err(anyhow::anyhow!(
                        "Balance of {} is {}, expected {}",
                        account,
                        actual,
                        amount
                    ));
                }
            }
            AssertCondition::LedgerConsistent => {
                let report = self.verify().await?;
                if !report.is_consistent() {
                    return Err(anyhow::anyhow!("Ledger inconsistent: {:?}", report.mismatches));
                }
            }
            AssertCondition::TransferCount { account, count } => {
                let actual = self
                    .service
                    .transfers(Some(self.account_id(account)?))
                    .await?
                    .len();
                if actual != *count {
                    return Err(anyhow::anyhow!(
                        "{} has {} transfers, expected {}",
                        account,
                        actual,
                        count
                    ));
                }
            }
        }
        info!("Assertion held: {:?}", condition);
        Ok(())
    }

    /// Recompute every balance from the ledger.
    pub async fn verify(&self) -> anyhow::Result<IntegrityReport> {
        Ok(self.service.verify().await?)
    }

    /// Sum of the balances of the accounts this simulation opened.
    pub async fn total_balance(&self) -> anyhow::Result<i64> {
        let mut total = 0i64;
        for id in self.accounts.values() {
            total += self.service.account(*id).await?.balance;
        }
        Ok(total)
    }

    /// Get simulation metrics.
    pub async fn get_metrics(&self) -> SimulationMetrics {
        self.metrics.read().await.clone()
    }
}
