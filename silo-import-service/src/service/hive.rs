// Copyright 2024-2025 Golem Cloud
//
// Licensed under the Golem Source License v1.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://license.golem.cloud/LICENSE
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::config::RemoteHiveConfig;
use async_trait::async_trait;
use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use bytes::Bytes;
use serde::Deserialize;
use silo_common::config::HttpClientConfig;
use silo_common::SafeDisplay;
use url::Url;

/// Source-side metadata and chunk producer.
///
/// Chunks are opaque byte blobs; their semantics are private to the source
/// and the worker nodes. Both operations may fail transiently and the
/// failures propagate to the caller unchanged, the pipeline decides at
/// which stage to retry.
#[async_trait]
pub trait HiveSourceService {
    async fn partition_names(
        &self,
        database_name: &str,
        table_name: &str,
    ) -> Result<Vec<String>, HiveSourceError>;

    /// Fetches the full, finite list of chunk blobs for one partition.
    async fn partition_chunks(
        &self,
        database_name: &str,
        table_name: &str,
        partition_name: &str,
    ) -> Result<Vec<Bytes>, HiveSourceError>;
}

pub struct HiveSourceServiceDefault {
    client: reqwest::Client,
    base_url: Url,
}

#[derive(Debug, Deserialize)]
struct PartitionNamesResponse {
    partitions: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct PartitionChunksResponse {
    chunks: Vec<String>,
}

impl HiveSourceServiceDefault {
    pub fn new(config: &RemoteHiveConfig, http_config: &HttpClientConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(http_config.timeout)
            .connect_timeout(http_config.connect_timeout)
            .build()
            .expect("Failed to build Hive metastore HTTP client");
        Self {
            client,
            base_url: config.url(),
        }
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .expect("Hive metastore URL cannot be a base")
            .pop_if_empty()
            .extend(segments);
        url
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: Url,
    ) -> Result<T, HiveSourceError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let details = response.text().await.unwrap_or_default();
            return Err(HiveSourceError::Server {
                status: status.as_u16(),
                details,
            });
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl HiveSourceService for HiveSourceServiceDefault {
    async fn partition_names(
        &self,
        database_name: &str,
        table_name: &str,
    ) -> Result<Vec<String>, HiveSourceError> {
        let url = self.url(&[
            "v1",
            "database",
            database_name,
            "table",
            table_name,
            "partitions",
        ]);
        let response: PartitionNamesResponse = self.get_json(url).await?;
        Ok(response.partitions)
    }

    async fn partition_chunks(
        &self,
        database_name: &str,
        table_name: &str,
        partition_name: &str,
    ) -> Result<Vec<Bytes>, HiveSourceError> {
        let url = self.url(&[
            "v1",
            "database",
            database_name,
            "table",
            table_name,
            "partitions",
            partition_name,
            "chunks",
        ]);
        let response: PartitionChunksResponse = self.get_json(url).await?;
        response
            .chunks
            .iter()
            .map(|encoded| {
                BASE64_STANDARD.decode(encoded).map(Bytes::from).map_err(|err| {
                    HiveSourceError::UnexpectedPayload(format!("Invalid chunk encoding: {err}"))
                })
            })
            .collect()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HiveSourceError {
    #[error("Hive metastore returned status {status}: {details}")]
    Server { status: u16, details: String },
    #[error("Hive metastore request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Unexpected Hive metastore payload: {0}")]
    UnexpectedPayload(String),
}

impl SafeDisplay for HiveSourceError {
    fn to_safe_string(&self) -> String {
        match self {
            HiveSourceError::Server { status, .. } => {
                format!("Hive metastore returned status {status}")
            }
            HiveSourceError::Transport(_) => "Hive metastore is unreachable".to_string(),
            HiveSourceError::UnexpectedPayload(_) => {
                "Unexpected Hive metastore payload".to_string()
            }
        }
    }
}
