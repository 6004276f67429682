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

use test_r::{test, test_dep};

use assert2::check;
use async_trait::async_trait;
use bytes::Bytes;
use silo_common::model::{ColumnType, ImportField, ShardId, TableId, WorkerNode};
use silo_common::tracing::{init_tracing_with_default_debug_env_filter, TracingConfig};
use silo_import_service::config::ImportPipelineConfig;
use silo_import_service::model::ShardImport;
use silo_import_service::service::hive::{HiveSourceError, HiveSourceService};
use silo_import_service::service::import::{ImportError, ImportOrchestrator};
use silo_import_service::service::shard_manager::{ShardManagerError, ShardManagerService};
use silo_import_service::service::worker::{InitiateResult, PollResult, WorkerShardService};
use silo_import_service::service::worker_pool::WorkerPool;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

test_r::enable!();

#[derive(Debug)]
pub struct Tracing;

impl Tracing {
    pub fn init() -> Self {
        init_tracing_with_default_debug_env_filter(
            &TracingConfig::test_pretty_without_time("import-service-tests").with_env_overrides(),
        );
        Self
    }
}

#[test_dep]
fn tracing() -> Tracing {
    Tracing::init()
}

struct StubHiveSource {
    partitions: Vec<String>,
    chunks: HashMap<String, Vec<Bytes>>,
    failing_partitions: HashSet<String>,
    partition_names_calls: AtomicUsize,
    chunk_calls: AtomicUsize,
}

impl StubHiveSource {
    fn new(partitions: &[&str]) -> Self {
        Self {
            partitions: partitions.iter().map(|p| p.to_string()).collect(),
            chunks: HashMap::new(),
            failing_partitions: HashSet::new(),
            partition_names_calls: AtomicUsize::new(0),
            chunk_calls: AtomicUsize::new(0),
        }
    }

    fn with_chunks(mut self, partition: &str, chunks: &[&'static [u8]]) -> Self {
        self.chunks.insert(
            partition.to_string(),
            chunks.iter().map(|&chunk| Bytes::from_static(chunk)).collect(),
        );
        self
    }

    fn with_failing_partition(mut self, partition: &str) -> Self {
        self.failing_partitions.insert(partition.to_string());
        self
    }
}

#[async_trait]
impl HiveSourceService for StubHiveSource {
    async fn partition_names(
        &self,
        _database_name: &str,
        _table_name: &str,
    ) -> Result<Vec<String>, HiveSourceError> {
        self.partition_names_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.partitions.clone())
    }

    async fn partition_chunks(
        &self,
        _database_name: &str,
        _table_name: &str,
        partition_name: &str,
    ) -> Result<Vec<Bytes>, HiveSourceError> {
        self.chunk_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_partitions.contains(partition_name) {
            Err(HiveSourceError::UnexpectedPayload(
                "scripted failure".to_string(),
            ))
        } else {
            Ok(self
                .chunks
                .get(partition_name)
                .cloned()
                .unwrap_or_default())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct RecordedCommit {
    shard_id: ShardId,
    node_id: String,
    worker_was_done: bool,
}

struct StubShardManager {
    next_shard_id: AtomicU64,
    fail_create_table: bool,
    created_tables: Mutex<Vec<(TableId, String, String, String)>>,
    created_partitions: Mutex<Vec<(TableId, String, usize)>>,
    commits: Mutex<Vec<RecordedCommit>>,
    worker_service: Arc<StubWorkerService>,
}

impl StubShardManager {
    fn new(first_shard_id: u64, worker_service: Arc<StubWorkerService>) -> Self {
        Self {
            next_shard_id: AtomicU64::new(first_shard_id),
            fail_create_table: false,
            created_tables: Mutex::new(vec![]),
            created_partitions: Mutex::new(vec![]),
            commits: Mutex::new(vec![]),
            worker_service,
        }
    }

    fn failing_create_table(mut self) -> Self {
        self.fail_create_table = true;
        self
    }

    fn commits(&self) -> Vec<RecordedCommit> {
        self.commits.lock().unwrap().clone()
    }

    fn commit_count(&self, shard_id: ShardId) -> usize {
        self.commits()
            .iter()
            .filter(|commit| commit.shard_id == shard_id)
            .count()
    }
}

#[async_trait]
impl ShardManagerService for StubShardManager {
    async fn create_import_table(
        &self,
        table_id: TableId,
        source_name: &str,
        database_name: &str,
        table_name: &str,
    ) -> Result<(), ShardManagerError> {
        if self.fail_create_table {
            return Err(ShardManagerError::Server {
                status: 500,
                details: "scripted failure".to_string(),
            });
        }
        self.created_tables.lock().unwrap().push((
            table_id,
            source_name.to_string(),
            database_name.to_string(),
            table_name.to_string(),
        ));
        Ok(())
    }

    async fn create_import_partition(
        &self,
        table_id: TableId,
        partition_name: &str,
        chunks: &[Bytes],
    ) -> Result<Vec<ShardId>, ShardManagerError> {
        self.created_partitions.lock().unwrap().push((
            table_id,
            partition_name.to_string(),
            chunks.len(),
        ));
        let base = self
            .next_shard_id
            .fetch_add(chunks.len() as u64, Ordering::SeqCst);
        Ok((base..base + chunks.len() as u64).map(ShardId).collect())
    }

    async fn commit_shard(
        &self,
        shard_id: ShardId,
        node_id: &str,
    ) -> Result<(), ShardManagerError> {
        let worker_was_done = self
            .worker_service
            .done_shards
            .lock()
            .unwrap()
            .contains(&shard_id);
        self.commits.lock().unwrap().push(RecordedCommit {
            shard_id,
            node_id: node_id.to_string(),
            worker_was_done,
        });
        Ok(())
    }
}

#[derive(Default)]
struct StubWorkerService {
    rejections_left: Mutex<HashMap<ShardId, u32>>,
    polls_until_done: Mutex<HashMap<ShardId, u32>>,
    initiations: Mutex<Vec<(ShardId, String, Bytes)>>,
    poll_counts: Mutex<HashMap<ShardId, u32>>,
    done_shards: Mutex<HashSet<ShardId>>,
}

impl StubWorkerService {
    fn rejecting_first_initiations(self, shard_id: ShardId, rejections: u32) -> Self {
        self.rejections_left.lock().unwrap().insert(shard_id, rejections);
        self
    }

    fn polling_in_progress(self, shard_id: ShardId, in_progress_polls: u32) -> Self {
        self.polls_until_done
            .lock()
            .unwrap()
            .insert(shard_id, in_progress_polls);
        self
    }

    fn initiations(&self) -> Vec<(ShardId, String, Bytes)> {
        self.initiations.lock().unwrap().clone()
    }

    fn initiation_count(&self, shard_id: ShardId) -> usize {
        self.initiations()
            .iter()
            .filter(|(id, _, _)| *id == shard_id)
            .count()
    }

    fn poll_count(&self, shard_id: ShardId) -> u32 {
        self.poll_counts
            .lock()
            .unwrap()
            .get(&shard_id)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl WorkerShardService for StubWorkerService {
    async fn initiate(
        &self,
        worker: &WorkerNode,
        shard_id: ShardId,
        import: &ShardImport,
    ) -> InitiateResult {
        {
            let mut rejections_left = self.rejections_left.lock().unwrap();
            if let Some(remaining) = rejections_left.get_mut(&shard_id) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return InitiateResult::Rejected { status: 500 };
                }
            }
        }
        self.initiations.lock().unwrap().push((
            shard_id,
            worker.node_id.clone(),
            import.chunk.clone(),
        ));
        InitiateResult::Accepted
    }

    async fn poll(&self, _worker: &WorkerNode, shard_id: ShardId) -> PollResult {
        let count = {
            let mut poll_counts = self.poll_counts.lock().unwrap();
            let count = poll_counts.entry(shard_id).or_insert(0);
            *count += 1;
            *count
        };
        let in_progress_polls = self
            .polls_until_done
            .lock()
            .unwrap()
            .get(&shard_id)
            .copied()
            .unwrap_or(1);
        if count > in_progress_polls {
            self.done_shards.lock().unwrap().insert(shard_id);
            PollResult::Done
        } else {
            PollResult::InProgress
        }
    }
}

fn test_pipeline_config() -> ImportPipelineConfig {
    ImportPipelineConfig {
        partition_parallelism: 4,
        chunk_parallelism: 4,
        shard_poll_parallelism: 4,
        shard_poll_interval: Duration::from_millis(10),
        initial_shard_poll_delay: Duration::from_millis(10),
    }
}

fn worker_nodes(count: usize) -> Vec<WorkerNode> {
    (1..=count)
        .map(|n| WorkerNode {
            node_id: format!("node-{n}"),
            http_uri: Url::parse(&format!("http://localhost:{}", 9020 + n)).unwrap(),
        })
        .collect()
}

fn fields() -> Vec<ImportField> {
    vec![ImportField {
        source_column: "v".to_string(),
        target_column: "value".to_string(),
        target_type: ColumnType::Long,
    }]
}

struct TestDeps {
    hive: Arc<StubHiveSource>,
    shard_manager: Arc<StubShardManager>,
    worker_service: Arc<StubWorkerService>,
    worker_pool: Arc<WorkerPool>,
    orchestrator: ImportOrchestrator,
}

fn start(
    hive: StubHiveSource,
    worker_service: StubWorkerService,
    first_shard_id: u64,
    workers: usize,
) -> TestDeps {
    let hive = Arc::new(hive);
    let worker_service = Arc::new(worker_service);
    let shard_manager = Arc::new(StubShardManager::new(first_shard_id, worker_service.clone()));
    let worker_pool = Arc::new(WorkerPool::new(worker_nodes(workers)));
    let orchestrator = ImportOrchestrator::new(
        test_pipeline_config(),
        hive.clone(),
        shard_manager.clone(),
        worker_service.clone(),
        worker_pool.clone(),
    );
    TestDeps {
        hive,
        shard_manager,
        worker_service,
        worker_pool,
        orchestrator,
    }
}

async fn wait_until(description: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("Timed out waiting until {description}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// At quiescence every acquired worker must be back in the pool: exactly
/// `expected` workers can be drained and one more acquire blocks.
async fn check_pool_is_full(pool: &WorkerPool, expected: usize) {
    let token = CancellationToken::new();
    let mut drained = Vec::new();
    for _ in 0..expected {
        let node = tokio::time::timeout(Duration::from_secs(1), pool.acquire(&token))
            .await
            .expect("a worker is missing from the pool")
            .unwrap();
        drained.push(node);
    }
    let extra = tokio::time::timeout(Duration::from_millis(50), pool.acquire(&token)).await;
    check!(extra.is_err(), "the pool holds more workers than it was seeded with");
    for node in drained {
        pool.release(node);
    }
}

#[test]
async fn happy_path_commits_every_shard_once(_tracing: &Tracing) {
    let deps = start(
        StubHiveSource::new(&["p1"]).with_chunks("p1", &[b"A", b"B"]),
        StubWorkerService::default(),
        7,
        2,
    );

    deps.orchestrator
        .import_table(TableId(42), "hive", "db", "t", fields())
        .await
        .unwrap();

    wait_until("both shards are committed", || {
        deps.shard_manager.commits().len() == 2
    })
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    check!(
        deps.shard_manager.created_tables.lock().unwrap().clone()
            == vec![(
                TableId(42),
                "hive".to_string(),
                "db".to_string(),
                "t".to_string()
            )]
    );
    check!(
        deps.shard_manager.created_partitions.lock().unwrap().clone()
            == vec![(TableId(42), "p1".to_string(), 2)]
    );

    check!(deps.shard_manager.commit_count(ShardId(7)) == 1);
    check!(deps.shard_manager.commit_count(ShardId(8)) == 1);

    // each chunk job carried a unique (shard id, chunk) pair
    let pairs: HashSet<(ShardId, Bytes)> = deps
        .worker_service
        .initiations()
        .into_iter()
        .map(|(shard_id, _, chunk)| (shard_id, chunk))
        .collect();
    check!(
        pairs
            == HashSet::from([
                (ShardId(7), Bytes::from_static(b"A")),
                (ShardId(8), Bytes::from_static(b"B"))
            ])
    );

    check_pool_is_full(&deps.worker_pool, 2).await;
}

#[test]
async fn rejected_initiation_is_requeued_with_the_same_shard_id(_tracing: &Tracing) {
    let deps = start(
        StubHiveSource::new(&["p1"]).with_chunks("p1", &[b"A", b"B"]),
        StubWorkerService::default().rejecting_first_initiations(ShardId(7), 1),
        7,
        2,
    );

    deps.orchestrator
        .import_table(TableId(42), "hive", "db", "t", fields())
        .await
        .unwrap();

    wait_until("both shards are committed", || {
        deps.shard_manager.commits().len() == 2
    })
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    check!(deps.shard_manager.commit_count(ShardId(7)) == 1);

    // the first attempt was rejected, the second one was accepted
    check!(*deps.worker_service.rejections_left.lock().unwrap().get(&ShardId(7)).unwrap() == 0);
    check!(deps.worker_service.initiation_count(ShardId(7)) == 1);

    // the retry reused the shard id, the catalog was not asked again
    check!(deps.shard_manager.created_partitions.lock().unwrap().len() == 1);

    check_pool_is_full(&deps.worker_pool, 2).await;
}

#[test]
async fn stalling_poll_delays_the_commit(_tracing: &Tracing) {
    let deps = start(
        StubHiveSource::new(&["p1"]).with_chunks("p1", &[b"A"]),
        StubWorkerService::default().polling_in_progress(ShardId(7), 5),
        7,
        1,
    );

    deps.orchestrator
        .import_table(TableId(42), "hive", "db", "t", fields())
        .await
        .unwrap();

    wait_until("the shard is committed", || {
        deps.shard_manager.commits().len() == 1
    })
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    check!(deps.worker_service.poll_count(ShardId(7)) >= 5);
    check!(deps.shard_manager.commit_count(ShardId(7)) == 1);
    check!(deps.shard_manager.commits()[0].worker_was_done);

    check_pool_is_full(&deps.worker_pool, 1).await;
}

#[test]
async fn commits_happen_only_after_a_done_poll(_tracing: &Tracing) {
    let deps = start(
        StubHiveSource::new(&["p1"]).with_chunks("p1", &[b"A", b"B"]),
        StubWorkerService::default().polling_in_progress(ShardId(8), 3),
        7,
        2,
    );

    deps.orchestrator
        .import_table(TableId(42), "hive", "db", "t", fields())
        .await
        .unwrap();

    wait_until("both shards are committed", || {
        deps.shard_manager.commits().len() == 2
    })
    .await;

    for commit in deps.shard_manager.commits() {
        check!(
            commit.worker_was_done,
            "shard {} was committed before the worker reported completion",
            commit.shard_id
        );
    }
}

#[test]
async fn empty_fields_are_rejected_without_side_effects(_tracing: &Tracing) {
    let deps = start(
        StubHiveSource::new(&["p1"]).with_chunks("p1", &[b"A"]),
        StubWorkerService::default(),
        7,
        1,
    );

    let result = deps
        .orchestrator
        .import_table(TableId(1), "hive", "d", "t", vec![])
        .await;

    let error = result.err().expect("import_table must fail");
    check!(error.is_invalid_argument());
    check!(matches!(error, ImportError::EmptyFields));

    check!(deps.hive.partition_names_calls.load(Ordering::SeqCst) == 0);
    check!(deps.shard_manager.created_tables.lock().unwrap().is_empty());
    check!(deps.worker_service.initiations().is_empty());
}

#[test]
async fn unsupported_sources_are_rejected_without_side_effects(_tracing: &Tracing) {
    let deps = start(
        StubHiveSource::new(&["p1"]).with_chunks("p1", &[b"A"]),
        StubWorkerService::default(),
        7,
        1,
    );

    let result = deps
        .orchestrator
        .import_table(TableId(1), "mysql", "d", "t", fields())
        .await;

    let error = result.err().expect("import_table must fail");
    check!(error.is_invalid_argument());
    check!(matches!(error, ImportError::UnsupportedSource(_)));

    check!(deps.hive.partition_names_calls.load(Ordering::SeqCst) == 0);
    check!(deps.shard_manager.created_tables.lock().unwrap().is_empty());
    check!(deps.worker_service.initiations().is_empty());
}

#[test]
async fn a_failing_partition_does_not_affect_the_others(_tracing: &Tracing) {
    let deps = start(
        StubHiveSource::new(&["p1", "p2"])
            .with_chunks("p1", &[b"A"])
            .with_failing_partition("p2"),
        StubWorkerService::default(),
        7,
        2,
    );

    deps.orchestrator
        .import_table(TableId(42), "hive", "db", "t", fields())
        .await
        .unwrap();

    wait_until("the good partition is committed", || {
        deps.shard_manager.commits().len() == 1
    })
    .await;
    wait_until("the failing partition was attempted", || {
        deps.hive.chunk_calls.load(Ordering::SeqCst) == 2
    })
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    check!(deps.shard_manager.commit_count(ShardId(7)) == 1);
    check!(
        deps.shard_manager.created_partitions.lock().unwrap().clone()
            == vec![(TableId(42), "p1".to_string(), 1)]
    );
    check!(deps.shard_manager.commits().len() == 1);

    check_pool_is_full(&deps.worker_pool, 2).await;
}

#[test]
async fn table_registration_failures_propagate_synchronously(_tracing: &Tracing) {
    let hive = Arc::new(StubHiveSource::new(&["p1"]).with_chunks("p1", &[b"A"]));
    let worker_service = Arc::new(StubWorkerService::default());
    let shard_manager =
        Arc::new(StubShardManager::new(7, worker_service.clone()).failing_create_table());
    let worker_pool = Arc::new(WorkerPool::new(worker_nodes(1)));
    let orchestrator = ImportOrchestrator::new(
        test_pipeline_config(),
        hive.clone(),
        shard_manager.clone(),
        worker_service.clone(),
        worker_pool,
    );

    let result = orchestrator
        .import_table(TableId(42), "hive", "db", "t", fields())
        .await;

    check!(matches!(result, Err(ImportError::Catalog(_))));
    check!(hive.partition_names_calls.load(Ordering::SeqCst) == 0);
    check!(worker_service.initiations().is_empty());
}

#[test]
async fn stopping_with_an_inflight_shard_job_returns_the_worker(_tracing: &Tracing) {
    // the worker never reports completion, so the shard job keeps cycling
    // between the poll queue, its reschedule timer and the poll itself
    let deps = start(
        StubHiveSource::new(&["p1"]).with_chunks("p1", &[b"A"]),
        StubWorkerService::default().polling_in_progress(ShardId(7), u32::MAX),
        7,
        1,
    );

    deps.orchestrator
        .import_table(TableId(42), "hive", "db", "t", fields())
        .await
        .unwrap();

    wait_until("the shard has been polled at least once", || {
        deps.worker_service.poll_count(ShardId(7)) >= 1
    })
    .await;

    deps.orchestrator.stop().await;

    // the shard was never committed, but its worker must be back in the
    // pool: shutdown abandons the job, it does not leak the checkout
    check!(deps.shard_manager.commits().is_empty());
    check_pool_is_full(&deps.worker_pool, 1).await;
}

#[test]
async fn imports_are_rejected_after_stop(_tracing: &Tracing) {
    let deps = start(
        StubHiveSource::new(&["p1"]).with_chunks("p1", &[b"A"]),
        StubWorkerService::default(),
        7,
        1,
    );

    deps.orchestrator.stop().await;

    let result = deps
        .orchestrator
        .import_table(TableId(42), "hive", "db", "t", fields())
        .await;

    check!(matches!(result, Err(ImportError::ShuttingDown)));
    check!(deps.shard_manager.created_tables.lock().unwrap().is_empty());
}
