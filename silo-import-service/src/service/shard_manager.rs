use crate::config::RemoteShardManagerConfig;
use async_trait::async_trait;
use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use silo_common::config::{HttpClientConfig, RetryConfig};
use silo_common::model::{ShardId, TableId};
use silo_common::retries::with_retries;
use silo_common::SafeDisplay;
use std::fmt::Display;
use url::Url;

/// Facade over the shard-manager catalog.
///
/// The catalog is the authoritative registry of tables, partitions and
/// shard-to-node bindings; all of its operations are idempotent, so
/// transport failures are retried here.
#[async_trait]
pub trait ShardManagerService {
    async fn create_import_table(
        &self,
        table_id: TableId,
        source_name: &str,
        database_name: &str,
        table_name: &str,
    ) -> Result<(), ShardManagerError>;

    /// Registers the chunks of one partition, returning one shard id per
    /// chunk, index-aligned.
    async fn create_import_partition(
        &self,
        table_id: TableId,
        partition_name: &str,
        chunks: &[Bytes],
    ) -> Result<Vec<ShardId>, ShardManagerError>;

    /// Marks the shard durable and assigned to the given node.
    async fn commit_shard(
        &self,
        shard_id: ShardId,
        node_id: &str,
    ) -> Result<(), ShardManagerError>;
}

pub struct ShardManagerServiceDefault {
    client: reqwest::Client,
    base_url: Url,
    retry_config: RetryConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateImportTableRequest {
    source_name: String,
    database_name: String,
    table_name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateImportPartitionRequest {
    partition_name: String,
    chunks: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateImportPartitionResponse {
    shard_ids: Vec<u64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct CommitShardRequest {
    node_id: String,
}

impl ShardManagerServiceDefault {
    pub fn new(config: &RemoteShardManagerConfig, http_config: &HttpClientConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(http_config.timeout)
            .connect_timeout(http_config.connect_timeout)
            .build()
            .expect("Failed to build shard manager HTTP client");
        Self {
            client,
            base_url: config.url(),
            retry_config: config.retries.clone(),
        }
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .expect("Shard manager URL cannot be a base")
            .pop_if_empty()
            .extend(segments);
        url
    }
}

async fn expect_success(response: reqwest::Response) -> Result<reqwest::Response, ShardManagerError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        let details = response.text().await.unwrap_or_default();
        Err(ShardManagerError::Server {
            status: status.as_u16(),
            details,
        })
    }
}

#[async_trait]
impl ShardManagerService for ShardManagerServiceDefault {
    async fn create_import_table(
        &self,
        table_id: TableId,
        source_name: &str,
        database_name: &str,
        table_name: &str,
    ) -> Result<(), ShardManagerError> {
        let url = self.url(&["v1", "import-table", &table_id.to_string()]);
        let body = CreateImportTableRequest {
            source_name: source_name.to_string(),
            database_name: database_name.to_string(),
            table_name: table_name.to_string(),
        };
        with_retries(
            "shard-manager",
            "create-import-table",
            Some(format!("{table_id}")),
            &self.retry_config,
            &(self.client.clone(), url, body),
            |(client, url, body)| {
                Box::pin(async move {
                    let response = client.put(url.clone()).json(body).send().await?;
                    expect_success(response).await?;
                    Ok(())
                })
            },
            ShardManagerError::is_retriable,
        )
        .await
    }

    async fn create_import_partition(
        &self,
        table_id: TableId,
        partition_name: &str,
        chunks: &[Bytes],
    ) -> Result<Vec<ShardId>, ShardManagerError> {
        let url = self.url(&["v1", "import-table", &table_id.to_string(), "partitions"]);
        let body = CreateImportPartitionRequest {
            partition_name: partition_name.to_string(),
            chunks: chunks
                .iter()
                .map(|chunk| BASE64_STANDARD.encode(chunk))
                .collect(),
        };
        let chunk_count = chunks.len();
        let shard_ids = with_retries(
            "shard-manager",
            "create-import-partition",
            Some(format!("{table_id}/{partition_name}")),
            &self.retry_config,
            &(self.client.clone(), url, body),
            |(client, url, body)| {
                Box::pin(async move {
                    let response = client.post(url.clone()).json(body).send().await?;
                    let response: CreateImportPartitionResponse =
                        expect_success(response).await?.json().await?;
                    Ok(response.shard_ids)
                })
            },
            ShardManagerError::is_retriable,
        )
        .await?;

        if shard_ids.len() != chunk_count {
            return Err(ShardManagerError::Unexpected(format!(
                "Catalog returned {} shard ids for {} chunks",
                shard_ids.len(),
                chunk_count
            )));
        }
        Ok(shard_ids.into_iter().map(ShardId).collect())
    }

    async fn commit_shard(
        &self,
        shard_id: ShardId,
        node_id: &str,
    ) -> Result<(), ShardManagerError> {
        let url = self.url(&["v1", "shard", &shard_id.to_string(), "commit"]);
        let body = CommitShardRequest {
            node_id: node_id.to_string(),
        };
        with_retries(
            "shard-manager",
            "commit-shard",
            Some(format!("{shard_id}")),
            &self.retry_config,
            &(self.client.clone(), url, body),
            |(client, url, body)| {
                Box::pin(async move {
                    let response = client.post(url.clone()).json(body).send().await?;
                    expect_success(response).await?;
                    Ok(())
                })
            },
            ShardManagerError::is_retriable,
        )
        .await
    }
}

#[derive(Debug)]
pub enum ShardManagerError {
    Server { status: u16, details: String },
    Transport(reqwest::Error),
    Unexpected(String),
}

impl From<reqwest::Error> for ShardManagerError {
    fn from(value: reqwest::Error) -> Self {
        Self::Transport(value)
    }
}

impl ShardManagerError {
    pub fn is_retriable(error: &ShardManagerError) -> bool {
        matches!(error, ShardManagerError::Transport(_))
    }
}

impl Display for ShardManagerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShardManagerError::Server { status, details } => {
                write!(f, "Shard manager returned status {status}: {details}")
            }
            ShardManagerError::Transport(error) => write!(f, "Transport error: {error}"),
            ShardManagerError::Unexpected(error) => write!(f, "Unexpected response: {error}"),
        }
    }
}

impl SafeDisplay for ShardManagerError {
    fn to_safe_string(&self) -> String {
        match self {
            ShardManagerError::Server { status, .. } => {
                format!("Shard manager returned status {status}")
            }
            ShardManagerError::Transport(_) => "Shard manager is unreachable".to_string(),
            ShardManagerError::Unexpected(_) => "Unexpected shard manager response".to_string(),
        }
    }
}

impl std::error::Error for ShardManagerError {}
