//! Command-line interface.
//!
//! - `serve`: load the snapshot, run the HTTP API and scheduled rebuilds
//! - `rebuild`: one-shot precompute rebuild
//! - `estimate`: print a breakdown for one destination

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::config::AppConfig;
use crate::estimation::{EstimationService, Snapshot, SnapshotHandle, TierFilter};
use crate::refresh::{RefreshConfig, RefreshRunner, rebuild_and_swap};
use crate::server::{AppState, FareApi};
use crate::storage::{FareStore, LocalFareStore};

#[derive(Parser, Debug)]
#[command(name = "farecast", version, about = "Expected air-fare estimation")]
pub struct Cli {
    /// Directory holding the bookings export, carrier table and precompute file
    #[arg(long, global = true, env = "FARECAST_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Serve the HTTP API
    Serve {
        /// Address to listen on
        #[arg(long, env = "FARECAST_BIND_ADDR")]
        bind: Option<SocketAddr>,

        /// Seconds between scheduled rebuilds (0 disables them)
        #[arg(long, env = "FARECAST_REFRESH_INTERVAL_SECS")]
        refresh_interval_secs: Option<u64>,
    },

    /// Rebuild and persist the precompute table
    Rebuild,

    /// Estimate fares for one destination and departure month
    Estimate {
        /// Destination airport code (e.g., "LAX")
        #[arg(long)]
        destination: String,

        /// Departure month, 1-12
        #[arg(long)]
        departure_month: u32,

        /// Number of travelers
        #[arg(long, default_value_t = 1)]
        travelers: u32,

        /// Restrict fallback aggregation to "premium" or "budget" carriers
        #[arg(long)]
        airline_filter: Option<TierFilter>,
    },
}

impl Cli {
    /// Apply flag overrides on top of the environment configuration.
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        if let Command::Serve {
            bind,
            refresh_interval_secs,
        } = &self.command
        {
            if let Some(bind) = bind {
                config.bind_addr = *bind;
            }
            if let Some(secs) = refresh_interval_secs {
                config.refresh_interval = (*secs > 0).then(|| Duration::from_secs(*secs));
            }
        }
    }
}

/// Run a parsed command.
pub async fn run(cli: Cli, mut config: AppConfig) -> anyhow::Result<()> {
    cli.apply(&mut config);
    let store: Arc<dyn FareStore> = Arc::new(LocalFareStore::from_config(&config));

    match cli.command {
        Command::Serve { .. } => serve(config, store).await,
        Command::Rebuild => rebuild(config, store).await,
        Command::Estimate {
            destination,
            departure_month,
            travelers,
            airline_filter,
        } => {
            let snapshot = load_snapshot(store.as_ref()).await?;
            let service = EstimationService::new(
                Arc::new(SnapshotHandle::new(snapshot)),
                Arc::new(config.estimator),
            );
            let estimate =
                service.estimate(&destination, departure_month, travelers, airline_filter)?;
            println!("{}", serde_json::to_string_pretty(&estimate)?);
            Ok(())
        }
    }
}

/// Load everything the estimator reads from the store.
pub async fn load_snapshot(store: &dyn FareStore) -> anyhow::Result<Snapshot> {
    let dataset = store.load_bookings().await?;
    let carriers = store.load_carrier_types().await?;
    let table = store.load_precompute().await?;

    if table.is_empty() && !dataset.is_empty() {
        tracing::warn!("No precompute table loaded, every estimate will use the fallback");
    }
    Ok(Snapshot::new(dataset, carriers, table))
}

async fn serve(config: AppConfig, store: Arc<dyn FareStore>) -> anyhow::Result<()> {
    let estimator = Arc::new(config.estimator.clone());
    let handle = Arc::new(SnapshotHandle::new(load_snapshot(store.as_ref()).await?));
    let service = Arc::new(EstimationService::new(
        Arc::clone(&handle),
        Arc::clone(&estimator),
    ));

    let mut runner = RefreshRunner::new(
        RefreshConfig::from_interval(config.refresh_interval),
        Arc::clone(&store),
        handle,
        estimator,
    );
    let refresh = tokio::spawn(async move { runner.run().await });

    let state = AppState {
        service,
        store,
        api_key: config.api_key.map(Arc::new),
    };
    if state.api_key.is_none() {
        tracing::warn!("No API key configured, the API is open");
    }

    let result = FareApi::serve(state, config.bind_addr, shutdown_signal()).await;
    refresh.abort();
    Ok(result?)
}

async fn rebuild(config: AppConfig, store: Arc<dyn FareStore>) -> anyhow::Result<()> {
    let handle = SnapshotHandle::default();
    let summary = rebuild_and_swap(store.as_ref(), &handle, Arc::new(config.estimator)).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
