//! Remote command channel
//!
//! Sends shell commands to provisioned nodes through the remote command
//! service and reads back per-node invocation results. Execution on the
//! nodes is asynchronous: a dispatch only queues the command, completion is
//! observed later through [`CommandChannel::fetch_result`].

use crate::config::CommandServiceConfig;
use crate::error::{BootstrapError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tracing::debug;

const SERVICE: &str = "command";

/// Status of a command invocation on one node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandStatus {
    /// Still queued or running
    #[default]
    Pending,
    /// Finished with exit code 0
    Success,
    /// Finished with an error
    Failed,
    /// Cancelled before it finished
    Cancelled,
    /// Did not finish in time
    TimedOut,
}

impl CommandStatus {
    /// Map a status reported by the command service
    pub fn from_wire(status: &str) -> Self {
        match status.to_ascii_lowercase().as_str() {
            "pending" | "inprogress" | "in_progress" | "delayed" => CommandStatus::Pending,
            "success" => CommandStatus::Success,
            "cancelled" | "cancelling" => CommandStatus::Cancelled,
            "timedout" | "timed_out" => CommandStatus::TimedOut,
            _ => CommandStatus::Failed,
        }
    }

    /// Check if the invocation will not change anymore
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CommandStatus::Pending)
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CommandStatus::Pending => "Pending",
            CommandStatus::Success => "Success",
            CommandStatus::Failed => "Failed",
            CommandStatus::Cancelled => "Cancelled",
            CommandStatus::TimedOut => "TimedOut",
        };
        f.write_str(s)
    }
}

/// Result of one command on one node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandResult {
    /// Invocation status
    pub status: CommandStatus,
    /// Captured standard output
    pub output: String,
    /// Captured standard error
    pub error_output: String,
}

impl CommandResult {
    pub fn new(status: CommandStatus, output: &str) -> Self {
        Self {
            status,
            output: output.to_string(),
            error_output: String::new(),
        }
    }

    /// Result of a command that has not finished yet
    pub fn pending() -> Self {
        Self::default()
    }

    pub fn is_success(&self) -> bool {
        self.status == CommandStatus::Success
    }

    /// Check both output streams for a message, ignoring case
    pub fn mentions(&self, needle: &str) -> bool {
        let needle = needle.to_ascii_lowercase();
        self.output.to_ascii_lowercase().contains(&needle)
            || self.error_output.to_ascii_lowercase().contains(&needle)
    }
}

/// Correlation token for one dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandHandle {
    /// Command ID assigned by the command service
    pub command_id: String,
    /// Node IDs the command was sent to
    pub targets: Vec<String>,
}

/// Remote command execution on cluster nodes
#[async_trait]
pub trait CommandChannel: Send + Sync {
    /// Queue `command` on every target in one call
    ///
    /// Either the command is queued on all targets or an error is returned.
    async fn dispatch(&self, targets: &[String], command: &str) -> Result<CommandHandle>;

    /// Read the current result of a dispatched command on one target
    ///
    /// Returns a `Pending` result while the command is still running.
    async fn fetch_result(&self, handle: &CommandHandle, target: &str) -> Result<CommandResult>;
}

/// Deduplicate targets while keeping their order
pub fn normalize_targets(targets: &[String]) -> Result<Vec<String>> {
    let mut unique: Vec<String> = Vec::with_capacity(targets.len());
    for target in targets {
        if target.is_empty() {
            return Err(BootstrapError::InvalidDescriptor(
                "empty command target".to_string(),
            ));
        }
        if !unique.contains(target) {
            unique.push(target.clone());
        }
    }

    if unique.is_empty() {
        return Err(BootstrapError::InvalidDescriptor(
            "command dispatched without targets".to_string(),
        ));
    }

    Ok(unique)
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct SendCommandRequest<'a> {
    instance_ids: &'a [String],
    document_name: &'a str,
    parameters: HashMap<&'static str, Vec<&'a str>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SendCommandResponse {
    command: SentCommand,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SentCommand {
    command_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InvocationResponse {
    status: String,
    #[serde(default)]
    standard_output_content: String,
    #[serde(default)]
    standard_error_content: String,
}

/// Command channel backed by the remote command service's HTTP API
pub struct HttpCommandChannel {
    /// Service configuration
    config: CommandServiceConfig,
    /// HTTP client
    client: reqwest::Client,
}

impl HttpCommandChannel {
    /// Create a new command channel
    pub fn new(config: CommandServiceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| BootstrapError::transport(SERVICE, e))?;

        Ok(Self { config, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.endpoint.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl CommandChannel for HttpCommandChannel {
    async fn dispatch(&self, targets: &[String], command: &str) -> Result<CommandHandle> {
        let targets = normalize_targets(targets)?;

        let mut parameters = HashMap::new();
        parameters.insert("commands", vec![command]);

        let request = SendCommandRequest {
            instance_ids: &targets,
            document_name: &self.config.document,
            parameters,
        };

        let response = self
            .client
            .post(self.url("/commands"))
            .json(&request)
            .send()
            .await
            .map_err(|e| BootstrapError::transport(SERVICE, e))?;

        if !response.status().is_success() {
            return Err(BootstrapError::transport(
                SERVICE,
                format!("send command returned {}", response.status()),
            ));
        }

        let sent: SendCommandResponse = response
            .json()
            .await
            .map_err(|e| BootstrapError::transport(SERVICE, e))?;

        debug!(
            "Dispatched command {} to {} target(s)",
            sent.command.command_id,
            targets.len()
        );

        Ok(CommandHandle {
            command_id: sent.command.command_id,
            targets,
        })
    }

    async fn fetch_result(&self, handle: &CommandHandle, target: &str) -> Result<CommandResult> {
        let url = self.url(&format!(
            "/commands/{}/invocations/{}",
            handle.command_id, target
        ));

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| BootstrapError::transport(SERVICE, e))?;

        // Invocations are registered asynchronously after the dispatch
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(CommandResult::pending());
        }

        if !response.status().is_success() {
            return Err(BootstrapError::transport(
                SERVICE,
                format!(
                    "get invocation {} on {} returned {}",
                    handle.command_id,
                    target,
                    response.status()
                ),
            ));
        }

        let invocation: InvocationResponse = response
            .json()
            .await
            .map_err(|e| BootstrapError::transport(SERVICE, e))?;

        Ok(CommandResult {
            status: CommandStatus::from_wire(&invocation.status),
            output: invocation.standard_output_content,
            error_output: invocation.standard_error_content,
        })
    }
}
