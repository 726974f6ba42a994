//! SimpleBank operator CLI
//!
//! Applies the ledger schema, opens accounts, executes transfers and verifies
//! the ledger against a PostgreSQL database.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use simplebank_common::{AccountId, Currency};
use simplebank_ledger::{CreateAccountParams, PgLedgerStore, TransferRequest};
use simplebank_service::{ServiceConfig, TransferService};

#[derive(Parser, Debug)]
#[command(name = "simplebank")]
#[command(about = "SimpleBank ledger operator CLI")]
struct Args {
    /// Database URL (overrides DATABASE_URL)
    #[arg(long)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply the ledger schema
    Migrate,

    /// Open an account
    OpenAccount {
        #[arg(long)]
        owner: String,
        #[arg(long, default_value = "USD")]
        currency: Currency,
        /// Opening balance in minor units
        #[arg(long, default_value = "0", allow_hyphen_values = true)]
        balance: i64,
    },

    /// Transfer funds between two accounts
    Transfer {
        #[arg(long)]
        from: i64,
        #[arg(long)]
        to: i64,
        /// Amount in minor units
        #[arg(long)]
        amount: i64,
        /// Require both accounts to hold this currency
        #[arg(long)]
        currency: Option<Currency>,
    },

    /// Show one account and its entries
    Account { id: i64 },

    /// List accounts
    Accounts {
        #[arg(long)]
        owner: Option<String>,
    },

    /// Recompute every balance from the ledger entries
    Verify,
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Logs go to stderr; stdout carries command output.
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .init();

    let mut config = ServiceConfig::from_env();
    if let Some(url) = args.database_url {
        config.database_url = url;
    }
    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(anyhow::anyhow!("Configuration error: {}", e));
    }

    let store = PgLedgerStore::connect(
        &config.database_url,
        config.max_connections,
        config.store.pg_config(),
    )
    .await?;

    if let Command::Migrate = args.command {
        store.migrate().await?;
        return Ok(());
    }

    let service = TransferService::new(Arc::new(store), config);
    service.start().await?;

    let outcome = run(&service, args.command).await;
    service.stop().await?;

    info!(metrics = ?service.metrics().snapshot(), "Done");
    outcome
}

async fn run(service: &TransferService<PgLedgerStore>, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Migrate => Ok(()),
        Command::OpenAccount {
            owner,
            currency,
            balance,
        } => {
            let account = service
                .open_account(CreateAccountParams::new(owner, currency).with_opening_balance(balance))
                .await?;
            print_json(&account)
        }
        Command::Transfer {
            from,
            to,
            amount,
            currency,
        } => {
            let mut request = TransferRequest::new(AccountId::new(from), AccountId::new(to), amount);
            request.currency = currency;

            let ctrl_c = async {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Interrupt received, cancelling transfer");
                } else {
                    futures::future::pending::<()>().await;
                }
            };
            let result = service.transfer_until(request, ctrl_c).await?;
            print_json(&result)
        }
        Command::Account { id } => {
            let id = AccountId::new(id);
            let account = service.account(id).await?;
            let entries = service.entries(id).await?;
            print_json(&serde_json::json!({
                "account": account,
                "balance": account.currency.format_minor(account.balance),
                "entries": entries,
            }))
        }
        Command::Accounts { owner } => print_json(&service.accounts(owner.as_deref()).await?),
        Command::Verify => {
            let report = service.verify().await?;
            print_json(&report)?;
            if report.is_consistent() {
                Ok(())
            } else {
                Err(anyhow::anyhow!(
                    "{} account(s) disagree with their entries",
                    report.mismatches.len()
                ))
            }
        }
    }
}
