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

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use url::Url;

/// The only source accepted by the import pipeline in this revision.
pub const HIVE_SOURCE: &str = "hive";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize, Default,
)]
pub struct TableId(pub u64);

impl Display for TableId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TableId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = u64::from_str(s).map_err(|err| format!("Invalid table id: {err}"))?;
        Ok(Self(id))
    }
}

/// Identifier of a shard, assigned by the shard-manager catalog.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize, Default,
)]
pub struct ShardId(pub u64);

impl Display for ShardId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ShardId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = u64::from_str(s).map_err(|err| format!("Invalid shard id: {err}"))?;
        Ok(Self(id))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Long,
    Double,
    String,
}

impl Display for ColumnType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Long => write!(f, "long"),
            ColumnType::Double => write!(f, "double"),
            ColumnType::String => write!(f, "string"),
        }
    }
}

/// Description of one column to import: the source column identifier plus
/// the target column identifier and type. Passed unchanged from the import
/// request down to each shard import.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportField {
    pub source_column: String,
    pub target_column: String,
    pub target_type: ColumnType,
}

/// A reachable cluster node that materialises shards over HTTP.
///
/// Held by a chunk job from acquisition until the corresponding shard is
/// committed, or surrendered back to the pool on retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerNode {
    pub node_id: String,
    pub http_uri: Url,
}

impl WorkerNode {
    pub fn shard_url(&self, shard_id: ShardId) -> Url {
        self.http_uri
            .join(&format!("v1/shard/{shard_id}"))
            .expect("Failed to build worker shard URL")
    }
}

impl Display for WorkerNode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.node_id)
    }
}
