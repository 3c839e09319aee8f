//! Queue-driven bootstrap service
//!
//! Keeps consuming cluster descriptors. A failed run is logged and its
//! message left for redelivery; the service itself keeps going.

use super::orchestrator::{BootstrapOrchestrator, BootstrapReport};
use crate::error::{BootstrapError, Result};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Outcome of one service iteration
#[derive(Debug)]
pub enum Tick {
    /// A cluster was bootstrapped and its message acknowledged
    Bootstrapped(BootstrapReport),
    /// Nothing waiting in the queue
    Idle,
    /// The run failed, its message stays in the queue
    Failed(BootstrapError),
}

/// Counters over the lifetime of a service
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceStats {
    pub bootstrapped: u64,
    pub failed: u64,
    pub idle: u64,
}

/// Long-running bootstrap service
pub struct BootstrapService {
    orchestrator: BootstrapOrchestrator,
    idle_interval: Duration,
    worker: String,
    stats: ServiceStats,
}

impl BootstrapService {
    /// Create a new service
    pub fn new(orchestrator: BootstrapOrchestrator, idle_interval: Duration) -> Self {
        let worker = gethostname::gethostname().to_string_lossy().to_string();
        Self {
            orchestrator,
            idle_interval,
            worker,
            stats: ServiceStats::default(),
        }
    }

    pub fn stats(&self) -> ServiceStats {
        self.stats
    }

    /// Process the next descriptor, if any
    pub async fn tick(&mut self) -> Tick {
        match self.orchestrator.process_next().await {
            Ok(report) => {
                self.stats.bootstrapped += 1;
                Tick::Bootstrapped(report)
            }
            Err(BootstrapError::EmptyQueue) => {
                self.stats.idle += 1;
                Tick::Idle
            }
            Err(e) => {
                self.stats.failed += 1;
                if e.is_retryable() {
                    error!("Bootstrap failed, leaving descriptor for redelivery: {}", e);
                } else {
                    error!("Bootstrap failed and will not succeed on redelivery: {}", e);
                }
                Tick::Failed(e)
            }
        }
    }

    /// Process exactly one descriptor
    pub async fn run_once(&mut self) -> Result<BootstrapReport> {
        match self.tick().await {
            Tick::Bootstrapped(report) => Ok(report),
            Tick::Idle => Err(BootstrapError::EmptyQueue),
            Tick::Failed(e) => Err(e),
        }
    }

    /// Consume descriptors until `shutdown` turns true
    ///
    /// Shutdown is only observed between runs; a started bootstrap always
    /// runs to its end. After an empty receive or a failed run the service
    /// waits the idle interval before polling the queue again.
    pub async fn serve(&mut self, mut shutdown: watch::Receiver<bool>) -> ServiceStats {
        info!("Bootstrap service started on {}", self.worker);

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.tick().await {
                Tick::Bootstrapped(report) => {
                    info!(
                        "Cluster {} ready, {} follower(s) joined",
                        report.cluster_id,
                        report.followers_joined.len()
                    );
                }
                Tick::Failed(_) | Tick::Idle => {
                    if !self.pause(&mut shutdown).await {
                        break;
                    }
                }
            }
        }

        info!(
            "Bootstrap service stopped: {} bootstrapped, {} failed",
            self.stats.bootstrapped, self.stats.failed
        );
        self.stats
    }

    /// Wait out the idle interval; false once the shutdown signal is gone
    async fn pause(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(self.idle_interval) => true,
            changed = shutdown.changed() => {
                if changed.is_err() {
                    warn!("Shutdown signal dropped, stopping");
                    return false;
                }
                true
            }
        }
    }
}
