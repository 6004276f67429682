use serde::{Deserialize, Serialize};
use silo_common::config::{
    ConfigExample, ConfigLoader, HasConfigExamples, HttpClientConfig, RetryConfig,
};
use silo_common::model::WorkerNode;
use silo_common::tracing::TracingConfig;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImportServiceConfig {
    pub tracing: TracingConfig,
    pub environment: String,
    pub http_port: u16,
    pub hive: RemoteHiveConfig,
    pub shard_manager: RemoteShardManagerConfig,
    pub worker_nodes: Vec<WorkerNodeConfig>,
    pub http_client: HttpClientConfig,
    pub import: ImportPipelineConfig,
}

impl Default for ImportServiceConfig {
    fn default() -> Self {
        Self {
            tracing: TracingConfig::local_dev("import-service"),
            environment: "dev".to_string(),
            http_port: 8083,
            hive: RemoteHiveConfig::default(),
            shard_manager: RemoteShardManagerConfig::default(),
            worker_nodes: vec![],
            http_client: HttpClientConfig::default(),
            import: ImportPipelineConfig::default(),
        }
    }
}

impl HasConfigExamples<ImportServiceConfig> for ImportServiceConfig {
    fn examples() -> Vec<ConfigExample<ImportServiceConfig>> {
        vec![(
            "with-worker-nodes",
            ImportServiceConfig {
                worker_nodes: vec![
                    WorkerNodeConfig {
                        node_id: "node-1".to_string(),
                        host: "localhost".to_string(),
                        port: 9021,
                    },
                    WorkerNodeConfig {
                        node_id: "node-2".to_string(),
                        host: "localhost".to_string(),
                        port: 9022,
                    },
                ],
                ..ImportServiceConfig::default()
            },
        )]
    }
}

/// The Hive metastore gateway partition and chunk data is fetched from.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RemoteHiveConfig {
    pub host: String,
    pub port: u16,
}

impl RemoteHiveConfig {
    pub fn url(&self) -> Url {
        Url::parse(&format!("http://{}:{}", self.host, self.port))
            .expect("Failed to parse Hive metastore URL")
    }
}

impl Default for RemoteHiveConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8095,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RemoteShardManagerConfig {
    pub host: String,
    pub port: u16,
    pub retries: RetryConfig,
}

impl RemoteShardManagerConfig {
    pub fn url(&self) -> Url {
        Url::parse(&format!("http://{}:{}", self.host, self.port))
            .expect("Failed to parse shard manager URL")
    }
}

impl Default for RemoteShardManagerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8070,
            retries: RetryConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerNodeConfig {
    pub node_id: String,
    pub host: String,
    pub port: u16,
}

impl WorkerNodeConfig {
    pub fn node(&self) -> WorkerNode {
        WorkerNode {
            node_id: self.node_id.clone(),
            http_uri: Url::parse(&format!("http://{}:{}", self.host, self.port))
                .expect("Failed to parse worker node URL"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImportPipelineConfig {
    pub partition_parallelism: usize,
    pub chunk_parallelism: usize,
    pub shard_poll_parallelism: usize,
    #[serde(with = "humantime_serde")]
    pub shard_poll_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub initial_shard_poll_delay: Duration,
}

impl Default for ImportPipelineConfig {
    fn default() -> Self {
        Self {
            partition_parallelism: 50,
            chunk_parallelism: 50,
            shard_poll_parallelism: 50,
            shard_poll_interval: Duration::from_secs(1),
            initial_shard_poll_delay: Duration::from_secs(1),
        }
    }
}

pub fn make_config_loader() -> ConfigLoader<ImportServiceConfig> {
    ConfigLoader::new_with_examples(&PathBuf::from("config/import-service.toml"))
}
