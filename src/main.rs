//! swarmboot - Docker Swarm bootstrap service
//!
//! This is the main CLI entry point for swarmboot.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use swarmboot::config::Config;
use swarmboot::error::{BootstrapError, Result};
use swarmboot::swarm::{
    BootstrapOrchestrator, BootstrapService, ClusterDescriptor, CommandPoller, HttpCommandChannel,
    HttpLedgerClient, HttpQueueClient, StatusLedger,
};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// swarmboot - bootstrap provisioned nodes into a Docker Swarm
#[derive(Parser)]
#[command(name = "swarmboot")]
#[command(author = "Evoker Industries")]
#[command(version)]
#[command(about = "Bootstraps freshly provisioned nodes into a Docker Swarm cluster", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Config file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bootstrap the next queued cluster and exit
    RunOnce,

    /// Keep bootstrapping queued clusters until interrupted
    Serve,

    /// Bootstrap a cluster from a descriptor file, bypassing the queue
    Bootstrap {
        /// Cluster descriptor (JSON)
        descriptor: PathBuf,
    },

    /// Validate the configuration
    CheckConfig {
        /// Also read this cluster's ledger record
        #[arg(long)]
        cluster: Option<String>,
    },
}

fn build_orchestrator(config: &Config) -> Result<BootstrapOrchestrator> {
    let channel = Arc::new(HttpCommandChannel::new(config.command.clone())?);
    let queue = Arc::new(HttpQueueClient::new(config.queue.clone())?);
    let ledger = Arc::new(HttpLedgerClient::new(config.ledger.clone())?);
    let poller = CommandPoller::new(channel.clone(), config.polling.policy());

    Ok(BootstrapOrchestrator::new(channel, poller, queue, ledger))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::RunOnce => {
            let orchestrator = build_orchestrator(&config)?;
            let mut service = BootstrapService::new(orchestrator, config.idle_interval());

            match service.run_once().await {
                Ok(report) => print_json(&report)?,
                Err(BootstrapError::EmptyQueue) => println!("No cluster waiting for bootstrap"),
                Err(e) => return Err(e),
            }
        }

        Commands::Serve => {
            let orchestrator = build_orchestrator(&config)?;
            let mut service = BootstrapService::new(orchestrator, config.idle_interval());

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            tokio::spawn(async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => info!("Interrupt received, finishing current run"),
                    Err(e) => warn!("Cannot listen for interrupts: {}", e),
                }
                let _ = shutdown_tx.send(true);
            });

            let stats = service.serve(shutdown_rx).await;
            println!(
                "{} bootstrapped, {} failed",
                stats.bootstrapped, stats.failed
            );
        }

        Commands::Bootstrap { descriptor } => {
            let body = std::fs::read_to_string(&descriptor)?;
            let descriptor = ClusterDescriptor::from_json(&body)?;

            let mut orchestrator = build_orchestrator(&config)?;
            let report = orchestrator.run(&descriptor).await?;
            print_json(&report)?;
        }

        Commands::CheckConfig { cluster } => {
            println!("Configuration OK");
            println!("  command service: {}", config.command.endpoint);
            println!("  queue:           {}", config.queue.url);
            println!(
                "  ledger:          {} (table {})",
                config.ledger.endpoint, config.ledger.table_name
            );

            if let Some(cluster_id) = cluster {
                let ledger = HttpLedgerClient::new(config.ledger.clone())?;
                match ledger.get_record(&cluster_id).await? {
                    Some(record) => print_json(&record)?,
                    None => println!("Cluster {} not found in ledger", cluster_id),
                }
            }
        }
    }

    Ok(())
}
