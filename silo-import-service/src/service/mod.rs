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

use crate::config::ImportServiceConfig;
use crate::service::hive::{HiveSourceService, HiveSourceServiceDefault};
use crate::service::import::ImportOrchestrator;
use crate::service::shard_manager::{ShardManagerService, ShardManagerServiceDefault};
use crate::service::worker::{WorkerShardService, WorkerShardServiceDefault};
use crate::service::worker_pool::WorkerPool;
use std::sync::Arc;

pub mod hive;
pub mod import;
pub mod shard_manager;
pub mod worker;
pub mod worker_pool;

#[derive(Clone)]
pub struct Services {
    pub orchestrator: Arc<ImportOrchestrator>,
}

impl Services {
    pub fn new(config: &ImportServiceConfig) -> Services {
        let hive: Arc<dyn HiveSourceService + Send + Sync> = Arc::new(
            HiveSourceServiceDefault::new(&config.hive, &config.http_client),
        );

        let shard_manager: Arc<dyn ShardManagerService + Send + Sync> = Arc::new(
            ShardManagerServiceDefault::new(&config.shard_manager, &config.http_client),
        );

        let workers: Arc<dyn WorkerShardService + Send + Sync> =
            Arc::new(WorkerShardServiceDefault::new(&config.http_client));

        let worker_pool = Arc::new(WorkerPool::new(
            config.worker_nodes.iter().map(|node| node.node()).collect(),
        ));

        let orchestrator = Arc::new(ImportOrchestrator::new(
            config.import.clone(),
            hive,
            shard_manager,
            workers,
            worker_pool,
        ));

        Services { orchestrator }
    }
}
