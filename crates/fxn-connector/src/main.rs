use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use fxn_connector::{api, ApiState, ConnectorConfig, LocalSwarm};

#[derive(Parser)]
#[command(name = "fxn-connector")]
#[command(about = "fxn head node with a local worker swarm behind a REST API", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the head node, its workers and the REST API
    Run {
        /// Configuration file path
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Number of in-process workers
        #[arg(short, long)]
        workers: Option<usize>,

        /// Address for the REST API
        #[arg(short, long, value_name = "ADDR")]
        listen: Option<String>,

        /// Log filter, used when RUST_LOG is not set
        #[arg(long)]
        log_level: Option<String>,

        /// Data directory for functions and job working directories
        #[arg(long, value_name = "DIR")]
        data_dir: Option<PathBuf>,
    },

    /// Print the effective configuration as TOML
    Config {
        /// Configuration file path
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Config { config } => {
            let config = ConnectorConfig::load(config.as_deref())?;
            print!("{}", config.to_toml()?);
            Ok(())
        }
        Commands::Run {
            config,
            workers,
            listen,
            log_level,
            data_dir,
        } => {
            let mut config = ConnectorConfig::load(config.as_deref())?;
            if let Some(workers) = workers {
                config.workers = workers;
            }
            if let Some(listen) = listen {
                config.listen_addr = listen;
            }
            if let Some(level) = log_level {
                config.log_level = level;
            }
            if let Some(dir) = data_dir {
                config.data_dir = dir;
            }
            config.validate().context("Invalid configuration")?;

            init_logging(&config.log_level);
            run(config).await
        }
    }
}

async fn run(config: ConnectorConfig) -> Result<()> {
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        workers = config.workers,
        data_dir = %config.data_dir.display(),
        "Starting fxn connector"
    );

    let cancel = CancellationToken::new();
    let swarm = LocalSwarm::start(&config, &cancel).await?;

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Shutdown requested");
                shutdown.cancel();
            }
            Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal"),
        }
    });

    let state = ApiState {
        head: swarm.head.clone(),
    };
    let served = api::serve(&config.listen_addr, state, cancel.clone()).await;

    // Stop the nodes even when the server failed to start.
    cancel.cancel();
    swarm.join().await;
    served
}
