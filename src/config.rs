//! swarmboot configuration
//!
//! Configuration is read from a YAML file, then overridden by environment
//! variables, and handed to each client when it is constructed.

use crate::error::{BootstrapError, Result};
use crate::swarm::PollPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Queue URL (same variable the provisioner uses)
pub const ENV_QUEUE_URL: &str = "SQS_URL";
/// Ledger table name
pub const ENV_TABLE_NAME: &str = "TABLE_NAME";
pub const ENV_COMMAND_ENDPOINT: &str = "SWARMBOOT_COMMAND_ENDPOINT";
pub const ENV_LEDGER_ENDPOINT: &str = "SWARMBOOT_LEDGER_ENDPOINT";
pub const ENV_SETTLE_DELAY_SECS: &str = "SWARMBOOT_SETTLE_DELAY_SECS";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Remote command service
    pub command: CommandServiceConfig,
    /// Cluster descriptor queue
    pub queue: QueueConfig,
    /// Cluster status ledger
    pub ledger: LedgerConfig,
    /// Command polling
    pub polling: PollingConfig,
    /// Long-running service loop
    pub service: ServiceConfig,
}

/// Remote command service configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandServiceConfig {
    /// Base URL of the command service
    pub endpoint: String,
    /// Shell document commands are run through
    pub document: String,
    /// Per-request timeout
    pub request_timeout_secs: u64,
}

impl Default for CommandServiceConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            document: "AWS-RunShellScript".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// Queue configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Queue URL
    pub url: String,
    /// Long-poll wait for a message
    pub wait_seconds: u64,
    /// How long a received message stays hidden from other consumers
    pub visibility_timeout_secs: u64,
    /// Per-request timeout on top of the long-poll wait
    pub request_timeout_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            wait_seconds: 10,
            // a full bootstrap must fit in the visibility window
            visibility_timeout_secs: 900,
            request_timeout_secs: 30,
        }
    }
}

/// Status ledger configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Base URL of the ledger service
    pub endpoint: String,
    /// Table holding cluster records
    pub table_name: String,
    /// Only flip records that are still `Pending`
    pub conditional: bool,
    /// Per-request timeout
    pub request_timeout_secs: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            table_name: String::new(),
            conditional: true,
            request_timeout_secs: 30,
        }
    }
}

/// Command polling configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Wait before the first status read
    pub settle_delay_secs: u64,
    /// First wait between reads
    pub initial_backoff_ms: u64,
    /// Longest wait between reads
    pub max_backoff_ms: u64,
    /// Upper bound for one phase, after the settle delay
    pub phase_timeout_secs: u64,
    /// Maximum reads per node and phase
    pub max_attempts: u32,
    /// Read once after the settle delay and give up on anything unfinished
    pub single_check: bool,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            settle_delay_secs: 5,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 10_000,
            phase_timeout_secs: 120,
            max_attempts: 30,
            single_check: false,
        }
    }
}

impl PollingConfig {
    /// Build the poll policy described by this configuration
    pub fn policy(&self) -> PollPolicy {
        let settle_delay = Duration::from_secs(self.settle_delay_secs);
        if self.single_check {
            return PollPolicy::single_check(settle_delay);
        }

        PollPolicy {
            settle_delay,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            phase_timeout: Duration::from_secs(self.phase_timeout_secs),
            max_attempts: self.max_attempts,
            report_timeouts: true,
        }
    }
}

/// Service loop configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Wait after finding the queue empty
    pub idle_interval_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            idle_interval_secs: 20,
        }
    }
}

impl Config {
    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("swarmboot").join("config.yaml"))
    }

    /// Load configuration from `path`, or from the default location if it exists,
    /// then apply environment overrides and validate
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Read a YAML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from {}", path.display());
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&contents)?)
    }

    /// Apply overrides from environment variables
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_QUEUE_URL) {
            self.queue.url = url;
        }
        if let Some(table) = lookup(ENV_TABLE_NAME) {
            self.ledger.table_name = table;
        }
        if let Some(endpoint) = lookup(ENV_COMMAND_ENDPOINT) {
            self.command.endpoint = endpoint;
        }
        if let Some(endpoint) = lookup(ENV_LEDGER_ENDPOINT) {
            self.ledger.endpoint = endpoint;
        }
        if let Some(delay) = lookup(ENV_SETTLE_DELAY_SECS) {
            self.polling.settle_delay_secs = delay.trim().parse().map_err(|_| {
                BootstrapError::InvalidConfig(format!(
                    "{} must be a number of seconds, got {:?}",
                    ENV_SETTLE_DELAY_SECS, delay
                ))
            })?;
        }
        Ok(())
    }

    /// Check every client can be constructed from this configuration
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("command.endpoint", &self.command.endpoint),
            ("command.document", &self.command.document),
            ("queue.url", &self.queue.url),
            ("ledger.endpoint", &self.ledger.endpoint),
            ("ledger.table_name", &self.ledger.table_name),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(BootstrapError::InvalidConfig(format!("{} is not set", name)));
            }
        }

        let timeouts = [
            ("command.request_timeout_secs", self.command.request_timeout_secs),
            ("queue.request_timeout_secs", self.queue.request_timeout_secs),
            ("queue.visibility_timeout_secs", self.queue.visibility_timeout_secs),
            ("ledger.request_timeout_secs", self.ledger.request_timeout_secs),
        ];
        for (name, value) in timeouts {
            if value == 0 {
                return Err(BootstrapError::InvalidConfig(format!(
                    "{} must be positive",
                    name
                )));
            }
        }

        if !self.polling.single_check {
            if self.polling.max_attempts == 0 {
                return Err(BootstrapError::InvalidConfig(
                    "polling.max_attempts must be positive".to_string(),
                ));
            }
            if self.polling.phase_timeout_secs == 0 {
                return Err(BootstrapError::InvalidConfig(
                    "polling.phase_timeout_secs must be positive".to_string(),
                ));
            }
            if self.polling.initial_backoff_ms > self.polling.max_backoff_ms {
                return Err(BootstrapError::InvalidConfig(
                    "polling.initial_backoff_ms exceeds polling.max_backoff_ms".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Wait after finding the queue empty
    pub fn idle_interval(&self) -> Duration {
        Duration::from_secs(self.service.idle_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn complete() -> Config {
        let mut config = Config::default();
        config.command.endpoint = "http://commands.local".to_string();
        config.queue.url = "http://queue.local/clusters".to_string();
        config.ledger.endpoint = "http://ledger.local".to_string();
        config.ledger.table_name = "clusters".to_string();
        config
    }

    #[test]
    fn test_default_config_needs_endpoints() {
        let err = Config::default().validate().unwrap_err();
        assert!(err.to_string().contains("command.endpoint"));
        assert!(complete().validate().is_ok());
    }

    #[test]
    fn test_from_yaml_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "command:\n  endpoint: http://commands.local\nledger:\n  table_name: clusters\npolling:\n  settle_delay_secs: 2\n"
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.command.endpoint, "http://commands.local");
        assert_eq!(config.command.document, "AWS-RunShellScript");
        assert_eq!(config.ledger.table_name, "clusters");
        assert!(config.ledger.conditional);
        assert_eq!(config.polling.settle_delay_secs, 2);
        assert_eq!(config.polling.max_backoff_ms, 10_000);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_QUEUE_URL, "http://queue.other/clusters"),
            (ENV_TABLE_NAME, "swarm-clusters"),
            (ENV_SETTLE_DELAY_SECS, "7"),
        ]);

        let mut config = complete();
        config
            .apply_env(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.queue.url, "http://queue.other/clusters");
        assert_eq!(config.ledger.table_name, "swarm-clusters");
        assert_eq!(config.polling.settle_delay_secs, 7);
        assert_eq!(config.command.endpoint, "http://commands.local");
    }

    #[test]
    fn test_env_rejects_bad_settle_delay() {
        let mut config = complete();
        let err = config
            .apply_env(|key| (key == ENV_SETTLE_DELAY_SECS).then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, BootstrapError::InvalidConfig(_)));
    }

    #[test]
    fn test_validate_rejects_zero_timeouts() {
        let mut config = complete();
        config.queue.visibility_timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = complete();
        config.polling.initial_backoff_ms = 20_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_single_check_policy() {
        let mut polling = PollingConfig::default();
        polling.single_check = true;
        let policy = polling.policy();
        assert_eq!(policy.max_attempts, 1);
        assert!(!policy.report_timeouts);
        assert_eq!(policy.settle_delay, Duration::from_secs(5));

        let policy = PollingConfig::default().policy();
        assert_eq!(policy, PollPolicy::default());
    }
}
