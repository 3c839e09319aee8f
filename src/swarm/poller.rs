//! Command completion polling

use super::command::{CommandChannel, CommandHandle, CommandResult, CommandStatus};
use crate::error::{BootstrapError, Result};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{sleep, Instant};
use tracing::debug;

/// How long to wait for a dispatched command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollPolicy {
    /// Wait before the first read
    pub settle_delay: Duration,
    /// Wait between the first and second read
    pub initial_backoff: Duration,
    /// Upper bound for the wait between reads
    pub max_backoff: Duration,
    /// Overall bound on polling, measured after the settle delay
    pub phase_timeout: Duration,
    /// Maximum reads per target
    pub max_attempts: u32,
    /// Report targets still pending at the end as `TimedOut`
    pub report_timeouts: bool,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(5),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(10),
            phase_timeout: Duration::from_secs(120),
            max_attempts: 30,
            report_timeouts: true,
        }
    }
}

impl PollPolicy {
    /// Sleep once, read once, and leave unfinished commands `Pending`
    pub fn single_check(settle_delay: Duration) -> Self {
        Self {
            settle_delay,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            phase_timeout: Duration::ZERO,
            max_attempts: 1,
            report_timeouts: false,
        }
    }

    /// Wait before the read following `backoff`, with up to 10% jitter
    fn jittered(&self, backoff: Duration) -> Duration {
        let spread = backoff.as_millis() as u64 / 10;
        if spread == 0 {
            return backoff;
        }
        backoff + Duration::from_millis(rand::thread_rng().gen_range(0..=spread))
    }
}

/// Waits for dispatched commands to reach a terminal state
pub struct CommandPoller {
    channel: Arc<dyn CommandChannel>,
    policy: PollPolicy,
}

impl CommandPoller {
    /// Create a new poller
    pub fn new(channel: Arc<dyn CommandChannel>, policy: PollPolicy) -> Self {
        Self { channel, policy }
    }

    /// Wait for `handle` on every target and return the last result per target
    ///
    /// Results are not interpreted here; a failed command is returned like
    /// any other result.
    pub async fn await_completion(
        &self,
        handle: &CommandHandle,
        targets: &[String],
    ) -> Result<HashMap<String, CommandResult>> {
        sleep(self.policy.settle_delay).await;

        let deadline = Instant::now() + self.policy.phase_timeout;
        let mut backoff = self.policy.initial_backoff;
        let mut results = HashMap::with_capacity(targets.len());
        let mut pending: Vec<String> = targets.to_vec();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let round = self.fetch_round(handle, &pending).await?;

            pending.clear();
            for (target, result) in round {
                if !result.status.is_terminal() {
                    pending.push(target.clone());
                }
                results.insert(target, result);
            }

            if pending.is_empty() || attempt >= self.policy.max_attempts {
                break;
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }

            debug!(
                "Command {} still pending on {} target(s), attempt {}",
                handle.command_id,
                pending.len(),
                attempt
            );

            sleep(self.policy.jittered(backoff).min(deadline - now)).await;
            backoff = (backoff * 2).min(self.policy.max_backoff);
        }

        if self.policy.report_timeouts {
            for target in &pending {
                if let Some(result) = results.get_mut(target) {
                    result.status = CommandStatus::TimedOut;
                }
            }
        }

        Ok(results)
    }

    /// Read every target once, concurrently
    async fn fetch_round(
        &self,
        handle: &CommandHandle,
        targets: &[String],
    ) -> Result<Vec<(String, CommandResult)>> {
        let mut fetches = JoinSet::new();
        for target in targets {
            let channel = Arc::clone(&self.channel);
            let handle = handle.clone();
            let target = target.clone();
            fetches.spawn(async move {
                let result = channel.fetch_result(&handle, &target).await;
                (target, result)
            });
        }

        let mut round = Vec::with_capacity(targets.len());
        while let Some(joined) = fetches.join_next().await {
            let (target, result) =
                joined.map_err(|e| BootstrapError::transport("command", e))?;
            round.push((target, result?));
        }

        Ok(round)
    }
}
