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

use crate::model::{base64_bytes, ShardImport};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use silo_common::config::HttpClientConfig;
use silo_common::model::{ImportField, ShardId, WorkerNode};

/// Outcome of asking a worker to start building a shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitiateResult {
    /// The worker answered 202 and is building the shard.
    Accepted,
    /// Any non-202 response.
    Rejected { status: u16 },
    TransportError { details: String },
}

/// Outcome of asking a worker whether a shard is complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollResult {
    /// 202: the worker is still building the shard.
    InProgress,
    /// 200: the shard is complete.
    Done,
    TransportError { details: String },
    UnexpectedStatus { status: u16 },
}

/// Typed wrappers for the worker shard HTTP surface.
#[async_trait]
pub trait WorkerShardService {
    async fn initiate(
        &self,
        worker: &WorkerNode,
        shard_id: ShardId,
        import: &ShardImport,
    ) -> InitiateResult;

    async fn poll(&self, worker: &WorkerNode, shard_id: ShardId) -> PollResult;
}

/// Wire format of `PUT /v1/shard/{shardId}`. The field list encoding must
/// round-trip with the worker unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateShardRequest {
    pub source_name: String,
    #[serde(with = "base64_bytes")]
    pub chunk: Bytes,
    pub fields: Vec<ImportField>,
}

impl From<&ShardImport> for CreateShardRequest {
    fn from(value: &ShardImport) -> Self {
        Self {
            source_name: value.source_name.clone(),
            chunk: value.chunk.clone(),
            fields: value.fields.clone(),
        }
    }
}

pub struct WorkerShardServiceDefault {
    client: reqwest::Client,
}

impl WorkerShardServiceDefault {
    pub fn new(http_config: &HttpClientConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(http_config.timeout)
            .connect_timeout(http_config.connect_timeout)
            .build()
            .expect("Failed to build worker HTTP client");
        Self { client }
    }
}

#[async_trait]
impl WorkerShardService for WorkerShardServiceDefault {
    async fn initiate(
        &self,
        worker: &WorkerNode,
        shard_id: ShardId,
        import: &ShardImport,
    ) -> InitiateResult {
        let request = CreateShardRequest::from(import);
        match self
            .client
            .put(worker.shard_url(shard_id))
            .json(&request)
            .send()
            .await
        {
            Ok(response) if response.status() == StatusCode::ACCEPTED => InitiateResult::Accepted,
            Ok(response) => InitiateResult::Rejected {
                status: response.status().as_u16(),
            },
            Err(error) => InitiateResult::TransportError {
                details: error.to_string(),
            },
        }
    }

    async fn poll(&self, worker: &WorkerNode, shard_id: ShardId) -> PollResult {
        match self.client.get(worker.shard_url(shard_id)).send().await {
            Ok(response) => match response.status() {
                StatusCode::ACCEPTED => PollResult::InProgress,
                StatusCode::OK => PollResult::Done,
                status => PollResult::UnexpectedStatus {
                    status: status.as_u16(),
                },
            },
            Err(error) => PollResult::TransportError {
                details: error.to_string(),
            },
        }
    }
}
