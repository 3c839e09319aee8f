//! Cluster descriptor queue client
//!
//! Receiving a message does not remove it: the queue hides it for the
//! visibility timeout and redelivers it unless it is acknowledged. A
//! bootstrap run only acknowledges after every other phase succeeded.

use super::cluster::ClusterDescriptor;
use crate::config::QueueConfig;
use crate::error::{BootstrapError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

const SERVICE: &str = "queue";

/// Receipt of a received message, needed to acknowledge it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckToken(String);

impl AckToken {
    pub fn new(receipt: &str) -> Self {
        Self(receipt.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Source of cluster descriptors waiting for bootstrap
#[async_trait]
pub trait DescriptorQueue: Send + Sync {
    /// Receive one descriptor without removing it from the queue
    ///
    /// Fails with [`BootstrapError::EmptyQueue`] when nothing is waiting.
    async fn receive_one(&self) -> Result<(AckToken, ClusterDescriptor)>;

    /// Remove a received message permanently
    async fn acknowledge(&self, token: &AckToken) -> Result<()>;
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ReceiveMessageRequest {
    max_number_of_messages: u32,
    wait_time_seconds: u64,
    visibility_timeout: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ReceiveMessageResponse {
    #[serde(default)]
    messages: Vec<QueueMessage>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct QueueMessage {
    receipt_handle: String,
    body: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct DeleteMessageRequest<'a> {
    receipt_handle: &'a str,
}

/// Queue client backed by the queue service's HTTP API
pub struct HttpQueueClient {
    config: QueueConfig,
    client: reqwest::Client,
}

impl HttpQueueClient {
    /// Create a new queue client
    pub fn new(config: QueueConfig) -> Result<Self> {
        // Long polls must not be cut short by the client
        let timeout = Duration::from_secs(config.wait_seconds + config.request_timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BootstrapError::transport(SERVICE, e))?;

        Ok(Self { config, client })
    }

    fn url(&self, action: &str) -> String {
        format!("{}/{}", self.config.url.trim_end_matches('/'), action)
    }
}

#[async_trait]
impl DescriptorQueue for HttpQueueClient {
    async fn receive_one(&self) -> Result<(AckToken, ClusterDescriptor)> {
        let request = ReceiveMessageRequest {
            max_number_of_messages: 1,
            wait_time_seconds: self.config.wait_seconds,
            visibility_timeout: self.config.visibility_timeout_secs,
        };

        let response = self
            .client
            .post(self.url("receive"))
            .json(&request)
            .send()
            .await
            .map_err(|e| BootstrapError::transport(SERVICE, e))?;

        if !response.status().is_success() {
            return Err(BootstrapError::transport(
                SERVICE,
                format!("receive message returned {}", response.status()),
            ));
        }

        let received: ReceiveMessageResponse = response
            .json()
            .await
            .map_err(|e| BootstrapError::transport(SERVICE, e))?;

        let message = received
            .messages
            .into_iter()
            .next()
            .ok_or(BootstrapError::EmptyQueue)?;

        // An undecodable body stays in flight and is redelivered
        let descriptor = ClusterDescriptor::from_json(&message.body).map_err(|e| {
            warn!("Received undecodable cluster descriptor: {}", e);
            e
        })?;

        debug!(
            "Received descriptor for cluster {} ({} nodes)",
            descriptor.id,
            descriptor.size()
        );

        Ok((AckToken::new(&message.receipt_handle), descriptor))
    }

    async fn acknowledge(&self, token: &AckToken) -> Result<()> {
        let response = self
            .client
            .post(self.url("delete"))
            .json(&DeleteMessageRequest {
                receipt_handle: token.as_str(),
            })
            .send()
            .await
            .map_err(|e| BootstrapError::transport(SERVICE, e))?;

        if !response.status().is_success() {
            return Err(BootstrapError::transport(
                SERVICE,
                format!("delete message returned {}", response.status()),
            ));
        }

        Ok(())
    }
}
