//! Cluster status ledger client

use super::cluster::{ClusterRecord, ClusterStatus};
use crate::config::LedgerConfig;
use crate::error::{BootstrapError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

const SERVICE: &str = "ledger";

/// Attribute holding the cluster status
const STATUS_ATTRIBUTE: &str = "ClusterStatus";

/// Status ledger of provisioned clusters
#[async_trait]
pub trait StatusLedger: Send + Sync {
    /// Flip the cluster record to `Done`
    ///
    /// A record that is already `Done` is left alone and reported as success.
    async fn mark_done(&self, cluster_id: &str) -> Result<()>;

    /// Read a cluster record
    async fn get_record(&self, cluster_id: &str) -> Result<Option<ClusterRecord>>;
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct UpdateItemRequest<'a> {
    key: HashMap<&'static str, &'a str>,
    update_expression: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    condition_expression: Option<String>,
    expression_attribute_values: HashMap<&'static str, String>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct GetItemRequest<'a> {
    key: HashMap<&'static str, &'a str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ItemResponse {
    #[serde(default)]
    item: Option<ClusterRecord>,
}

/// Ledger client backed by the ledger table's HTTP API
pub struct HttpLedgerClient {
    config: LedgerConfig,
    client: reqwest::Client,
}

impl HttpLedgerClient {
    /// Create a new ledger client
    pub fn new(config: LedgerConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| BootstrapError::transport(SERVICE, e))?;

        Ok(Self { config, client })
    }

    fn url(&self, action: &str) -> String {
        format!(
            "{}/tables/{}/{}",
            self.config.endpoint.trim_end_matches('/'),
            self.config.table_name,
            action
        )
    }

    fn done_request<'a>(&self, cluster_id: &'a str) -> UpdateItemRequest<'a> {
        let mut values = HashMap::new();
        values.insert(":s", ClusterStatus::Done.to_string());

        let condition_expression = if self.config.conditional {
            values.insert(":expected", ClusterStatus::Pending.to_string());
            Some(format!("{} = :expected", STATUS_ATTRIBUTE))
        } else {
            None
        };

        UpdateItemRequest {
            key: HashMap::from([("ID", cluster_id)]),
            update_expression: format!("set {} = :s", STATUS_ATTRIBUTE),
            condition_expression,
            expression_attribute_values: values,
        }
    }
}

#[async_trait]
impl StatusLedger for HttpLedgerClient {
    async fn mark_done(&self, cluster_id: &str) -> Result<()> {
        let response = self
            .client
            .post(self.url("update"))
            .json(&self.done_request(cluster_id))
            .send()
            .await
            .map_err(|e| BootstrapError::transport(SERVICE, e))?;

        let status = response.status();

        if status == reqwest::StatusCode::CONFLICT {
            let current: ItemResponse = response
                .json()
                .await
                .map_err(|e| BootstrapError::transport(SERVICE, e))?;

            return match current.item.map(|record| record.status) {
                Some(ClusterStatus::Done) => {
                    info!("Cluster {} already marked Done", cluster_id);
                    Ok(())
                }
                actual => Err(BootstrapError::PreconditionFailed {
                    cluster_id: cluster_id.to_string(),
                    actual: actual
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| "missing".to_string()),
                }),
            };
        }

        if !status.is_success() {
            return Err(BootstrapError::transport(
                SERVICE,
                format!("update item {} returned {}", cluster_id, status),
            ));
        }

        debug!("Cluster {} marked Done", cluster_id);
        Ok(())
    }

    async fn get_record(&self, cluster_id: &str) -> Result<Option<ClusterRecord>> {
        let response = self
            .client
            .post(self.url("get"))
            .json(&GetItemRequest {
                key: HashMap::from([("ID", cluster_id)]),
            })
            .send()
            .await
            .map_err(|e| BootstrapError::transport(SERVICE, e))?;

        if !response.status().is_success() {
            return Err(BootstrapError::transport(
                SERVICE,
                format!("get item {} returned {}", cluster_id, response.status()),
            ));
        }

        let found: ItemResponse = response
            .json()
            .await
            .map_err(|e| BootstrapError::transport(SERVICE, e))?;

        Ok(found.item)
    }
}
