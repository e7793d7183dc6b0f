//! Subzone Sweeper - Main Entry Point
//!
//! # Usage
//!
//! ```bash
//! subzone-sweeper run              # sweep on the configured interval
//! subzone-sweeper once             # one manual sweep, report as JSON
//! subzone-sweeper --state /var/lib/subzone/state.json once
//! SUBZONE_CONFIG=/etc/subzone/ledger.json subzone-sweeper run
//! ```
//!
//! Grants and resources are read from the `--state` file and written back
//! after a manual sweep and on shutdown.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use subzone_ledger::{Collaborators, EntitlementLedger, LedgerConfig, SweepScheduler};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod collaborators;
mod state;

use collaborators::{DryRunBilling, DryRunProvisioner, LogNotifier};
use state::StateSnapshot;

#[derive(Parser)]
#[command(name = "subzone-sweeper")]
#[command(version)]
#[command(about = "Expire lapsed entitlement grants", long_about = None)]
struct Cli {
    /// Ledger config file (JSON)
    #[arg(long, env = "SUBZONE_CONFIG", default_value = "/etc/subzone/ledger.json")]
    config: String,

    /// Ledger state file (JSON grants and resources)
    #[arg(long, env = "SUBZONE_STATE", default_value = "/var/lib/subzone/state.json")]
    state: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sweep on the configured interval until interrupted
    Run,
    /// Run a single sweep and print its report
    Once,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    tracing::info!("subzone-sweeper v{}", env!("CARGO_PKG_VERSION"));

    let config = LedgerConfig::load(&cli.config).unwrap_or_else(|e| {
        tracing::warn!(path = %cli.config, error = %e, "config not loaded, using defaults");
        LedgerConfig::default()
    });

    let collaborators = Collaborators {
        provisioner: Arc::new(DryRunProvisioner),
        notifier: Arc::new(LogNotifier),
        billing: Arc::new(DryRunBilling),
    };
    let state = StateSnapshot::load(&cli.state)?.into_stores().await?;
    let ledger = Arc::new(EntitlementLedger::new(
        config,
        state.grants.clone(),
        state.resources.clone(),
        collaborators,
    ));

    match cli.command {
        Command::Once => {
            let report = ledger.run_expiration_sweep().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Run => {
            let every = ledger.config().sweep_interval();
            tracing::info!(interval_secs = every.as_secs(), "sweep scheduler started");

            let scheduler = SweepScheduler::spawn(ledger, every);
            tokio::signal::ctrl_c().await?;
            scheduler.shutdown().await;
        }
    }

    StateSnapshot::capture(&state).save(&cli.state)?;
    tracing::info!(path = %cli.state.display(), "ledger state saved");
    Ok(())
}
