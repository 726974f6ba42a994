//! SimpleBank Simulator
//!
//! Drives concurrent transfer workloads and scripted scenarios against the
//! ledger, then checks that every balance still equals the sum of its entries.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use simplebank_ledger::{LedgerStore, MemoryStore, PgLedgerStore};
use simplebank_service::{ServiceConfig, TransferService};

mod controller;
mod metrics;
mod scenario;

use controller::{LoadConfig, SimulationController};
use scenario::Scenario;

/// SimpleBank Simulator CLI
#[derive(Parser, Debug)]
#[command(name = "simulator")]
#[command(about = "SimpleBank concurrent transfer workload and scenario driver")]
struct Args {
    /// Number of accounts for random load
    #[arg(short, long, default_value = "4")]
    accounts: usize,

    /// Opening balance of each account in minor units
    #[arg(long, default_value = "100000")]
    opening_balance: i64,

    /// Scenario to run (transfer-pair, bidirectional, fault-recovery)
    #[arg(short, long)]
    scenario: Option<String>,

    /// Number of random transfers (0 = until stopped)
    #[arg(short, long, default_value = "1000")]
    transfers: u64,

    /// Concurrent workers
    #[arg(short, long, default_value = "8")]
    concurrency: usize,

    /// Largest random transfer amount in minor units
    #[arg(long, default_value = "1000")]
    max_amount: i64,

    /// Attempts per transfer before a conflict is surfaced
    #[arg(long, default_value = "100")]
    max_attempts: u32,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Run duration in seconds (0 = infinite)
    #[arg(long, default_value = "0")]
    duration: u64,

    /// Run against PostgreSQL instead of the in-memory store
    #[arg(long)]
    database_url: Option<String>,

    /// Print the service counters in Prometheus text format on completion
    #[arg(long)]
    prometheus: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config = ServiceConfig::from_env();
    config.retry.max_attempts = args.max_attempts;
    if let Some(url) = &args.database_url {
        config.database_url = url.clone();
    }
    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(anyhow::anyhow!("Configuration error: {}", e));
    }

    info!("Starting SimpleBank Simulator");

    match &args.database_url {
        Some(url) => {
            let store = PgLedgerStore::connect(url, config.max_connections, config.store.pg_config()).await?;
            store.migrate().await?;
            info!("Using PostgreSQL store");
            simulate(Arc::new(store), None, config, &args).await
        }
        None => {
            let store = MemoryStore::new();
            info!("Using in-memory store");
            simulate(Arc::new(store.clone()), Some(store), config, &args).await
        }
    }
}

async fn simulate<S: LedgerStore>(
    store: Arc<S>,
    faults: Option<MemoryStore>,
    config: ServiceConfig,
    args: &Args,
) -> anyhow::Result<()> {
    let service = Arc::new(TransferService::new(store, config));
    service.start().await?;

    let mut controller = SimulationController::new(service.clone(), faults, args.seed);

    if let Some(scenario_name) = &args.scenario {
        info!("Running scenario: {}", scenario_name);

        let scenario = Scenario::load(scenario_name)?;
        controller.run_scenario(scenario).await?;
    } else {
        controller.initialize(args.accounts, args.opening_balance).await?;
        info!("Simulator initialized with {} accounts", args.accounts);

        let expected_total = args.opening_balance * args.accounts as i64;
        controller
            .run(LoadConfig {
                transfers: (args.transfers > 0).then_some(args.transfers),
                concurrency: args.concurrency,
                max_amount: args.max_amount,
                duration: (args.duration > 0).then(|| Duration::from_secs(args.duration)),
            })
            .await?;

        let total = controller.total_balance().await?;
        if total != expected_total {
            return Err(anyhow::anyhow!(
                "Funds not conserved: total {} expected {}",
                total,
                expected_total
            ));
        }
    }

    let report = controller.verify().await?;
    service.stop().await?;

    // Print metrics
    let metrics = controller.get_metrics().await;
    info!("Simulation complete");
    info!("Total transfers: {}", metrics.total_transfers);
    info!("Committed: {}", metrics.committed_transfers);
    info!("Failed: {} ({} by conflict)", metrics.failed_transfers, metrics.conflict_failures);
    info!("Success rate: {:.2}%", metrics.success_rate() * 100.0);
    let latency = metrics.latency();
    info!(
        "Latency mean/p50/p99/max: {:?}/{:?}/{:?}/{:?}",
        latency.mean, latency.p50, latency.p99, latency.max
    );
    if args.prometheus {
        print!("{}", service.metrics().to_prometheus());
    } else {
        info!("Service metrics: {:?}", service.metrics().snapshot());
    }

    if !report.is_consistent() {
        return Err(anyhow::anyhow!("Ledger inconsistent: {:?}", report.mismatches));
    }
    info!(
        accounts = report.accounts,
        entries = report.entries,
        transfers = report.transfers,
        "Ledger consistent"
    );
    Ok(())
}
