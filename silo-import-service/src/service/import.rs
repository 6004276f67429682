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

use crate::config::ImportPipelineConfig;
use crate::metrics;
use crate::model::ShardImport;
use crate::service::hive::{HiveSourceError, HiveSourceService};
use crate::service::shard_manager::{ShardManagerError, ShardManagerService};
use crate::service::worker::{InitiateResult, PollResult, WorkerShardService};
use crate::service::worker_pool::{WorkerPool, WorkerPoolError};
use silo_common::model::{ImportField, ShardId, TableId, WorkerNode, HIVE_SOURCE};
use silo_common::SafeDisplay;
use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// The import pipeline.
///
/// `import_table` registers the table in the catalog, discovers its
/// partitions and fans each one out as a [`PartitionJob`]; the actual
/// import continues asynchronously on three stages with independent
/// concurrency budgets:
///
///   partition stage: fetch chunks, register them, fan out chunk jobs
///   chunk stage:     acquire a worker, ask it to build the shard
///   shard stage:     poll the worker, commit the shard on completion
///
/// Each stage is an unbounded queue drained by a dispatcher that bounds
/// concurrency with a semaphore; the shard stage additionally supports
/// delayed submission for poll ticks.
pub struct ImportOrchestrator {
    pipeline: Arc<Pipeline>,
    dispatchers: Mutex<Vec<JoinHandle<()>>>,
}

impl ImportOrchestrator {
    pub fn new(
        config: ImportPipelineConfig,
        hive: Arc<dyn HiveSourceService + Send + Sync>,
        shard_manager: Arc<dyn ShardManagerService + Send + Sync>,
        workers: Arc<dyn WorkerShardService + Send + Sync>,
        worker_pool: Arc<WorkerPool>,
    ) -> Self {
        let (partition_sender, partition_receiver) = mpsc::unbounded_channel();
        let (chunk_sender, chunk_receiver) = mpsc::unbounded_channel();
        let (shard_sender, shard_receiver) = mpsc::unbounded_channel();

        let pipeline = Arc::new(Pipeline {
            hive,
            shard_manager,
            workers,
            worker_pool,
            partition_sender,
            chunk_sender,
            shard_sender,
            cancellation: CancellationToken::new(),
            config: config.clone(),
        });

        let dispatchers = vec![
            start_stage(
                "partition",
                config.partition_parallelism,
                partition_receiver,
                pipeline.clone(),
                |pipeline, job| async move { pipeline.run_partition_job(job).await },
                |_, job| {
                    warn!(
                        partition = %job.partition_name,
                        "Shutting down, abandoning partition job"
                    );
                },
            ),
            start_stage(
                "chunk",
                config.chunk_parallelism,
                chunk_receiver,
                pipeline.clone(),
                |pipeline, job| async move { pipeline.run_chunk_job(job).await },
                |_, job| {
                    warn!(shard_id = %job.shard_id, "Shutting down, abandoning chunk job");
                },
            ),
            start_stage(
                "shard",
                config.shard_poll_parallelism,
                shard_receiver,
                pipeline.clone(),
                |pipeline, job| async move { pipeline.run_shard_job(job).await },
                |pipeline, job| pipeline.abandon_shard_job(job),
            ),
        ];

        Self {
            pipeline,
            dispatchers: Mutex::new(dispatchers),
        }
    }

    /// Registers the table in the catalog and schedules the import of all
    /// of its partitions. Returns as soon as every partition job is
    /// submitted; the import itself is asynchronous.
    pub async fn import_table(
        &self,
        table_id: TableId,
        source_name: &str,
        database_name: &str,
        table_name: &str,
        fields: Vec<ImportField>,
    ) -> Result<(), ImportError> {
        if fields.is_empty() {
            return Err(ImportError::EmptyFields);
        }
        if source_name != HIVE_SOURCE {
            return Err(ImportError::UnsupportedSource(source_name.to_string()));
        }
        if self.pipeline.cancellation.is_cancelled() {
            return Err(ImportError::ShuttingDown);
        }

        metrics::record_import_started();

        self.pipeline
            .shard_manager
            .create_import_table(table_id, source_name, database_name, table_name)
            .await?;

        let partitions = self
            .pipeline
            .hive
            .partition_names(database_name, table_name)
            .await?;

        info!(
            %table_id,
            "Importing {} partitions of {database_name}.{table_name}",
            partitions.len()
        );

        for partition_name in partitions {
            self.pipeline.submit_partition_job(PartitionJob {
                table_id,
                source_name: source_name.to_string(),
                database_name: database_name.to_string(),
                table_name: table_name.to_string(),
                partition_name,
                fields: fields.clone(),
            });
        }

        Ok(())
    }

    /// Orderly shutdown: no new work is accepted, in-flight jobs run to
    /// their next observable state transition and exit, pending poll timers
    /// never fire. Uncommitted shard records are left to the catalog.
    pub async fn stop(&self) {
        self.pipeline.cancellation.cancel();
        let dispatchers = std::mem::take(
            &mut *self
                .dispatchers
                .lock()
                .expect("import dispatcher list lock poisoned"),
        );
        for dispatcher in dispatchers {
            let _ = dispatcher.await;
        }
        info!("Import pipeline stopped");
    }
}

struct Pipeline {
    hive: Arc<dyn HiveSourceService + Send + Sync>,
    shard_manager: Arc<dyn ShardManagerService + Send + Sync>,
    workers: Arc<dyn WorkerShardService + Send + Sync>,
    worker_pool: Arc<WorkerPool>,
    partition_sender: mpsc::UnboundedSender<PartitionJob>,
    chunk_sender: mpsc::UnboundedSender<ChunkJob>,
    shard_sender: mpsc::UnboundedSender<ShardJob>,
    cancellation: CancellationToken,
    config: ImportPipelineConfig,
}

/// Imports one partition: fetches its chunks, registers them with the
/// catalog and fans out one chunk job per (chunk, shard id) pair.
struct PartitionJob {
    table_id: TableId,
    source_name: String,
    database_name: String,
    table_name: String,
    partition_name: String,
    fields: Vec<ImportField>,
}

/// Builds one shard: acquires a worker and asks it to start building. On
/// rejection or transport failure the worker is surrendered and the same
/// job is queued again.
struct ChunkJob {
    table_id: TableId,
    partition_name: String,
    shard_id: ShardId,
    import: ShardImport,
}

/// Polls one worker until the shard it is building is complete, then
/// commits the shard and returns the worker to the pool.
struct ShardJob {
    table_id: TableId,
    partition_name: String,
    shard_id: ShardId,
    worker: WorkerNode,
}

impl Pipeline {
    async fn run_partition_job(&self, job: PartitionJob) {
        debug!(
            table_id = %job.table_id,
            partition = %job.partition_name,
            "Fetching partition chunks"
        );

        let chunks = match self
            .hive
            .partition_chunks(&job.database_name, &job.table_name, &job.partition_name)
            .await
        {
            Ok(chunks) => chunks,
            Err(error) => {
                error!(
                    table_id = %job.table_id,
                    partition = %job.partition_name,
                    "Failed to fetch chunks, abandoning partition: {error}"
                );
                metrics::record_partition_abandoned();
                return;
            }
        };

        let shard_ids = match self
            .shard_manager
            .create_import_partition(job.table_id, &job.partition_name, &chunks)
            .await
        {
            Ok(shard_ids) => shard_ids,
            Err(error) => {
                error!(
                    table_id = %job.table_id,
                    partition = %job.partition_name,
                    "Failed to register partition, abandoning it: {error}"
                );
                metrics::record_partition_abandoned();
                return;
            }
        };

        debug!(
            table_id = %job.table_id,
            partition = %job.partition_name,
            "Fanning out {} chunks",
            chunks.len()
        );

        for (chunk, shard_id) in chunks.into_iter().zip(shard_ids) {
            self.submit_chunk_job(ChunkJob {
                table_id: job.table_id,
                partition_name: job.partition_name.clone(),
                shard_id,
                import: ShardImport {
                    source_name: job.source_name.clone(),
                    chunk,
                    fields: job.fields.clone(),
                },
            });
        }
    }

    async fn run_chunk_job(self: &Arc<Self>, job: ChunkJob) {
        let worker = match self.worker_pool.acquire(&self.cancellation).await {
            Ok(worker) => worker,
            Err(WorkerPoolError::Cancelled) => {
                warn!(
                    shard_id = %job.shard_id,
                    "Shutting down while awaiting a worker, abandoning shard"
                );
                return;
            }
            Err(WorkerPoolError::Closed) => {
                error!(shard_id = %job.shard_id, "Worker pool is closed, abandoning shard");
                return;
            }
        };

        match self.workers.initiate(&worker, job.shard_id, &job.import).await {
            InitiateResult::Accepted => {
                debug!(
                    shard_id = %job.shard_id,
                    worker = %worker,
                    "Shard build initiated"
                );
                self.submit_shard_job_after(
                    ShardJob {
                        table_id: job.table_id,
                        partition_name: job.partition_name,
                        shard_id: job.shard_id,
                        worker,
                    },
                    self.config.initial_shard_poll_delay,
                );
            }
            InitiateResult::Rejected { status } => {
                warn!(
                    shard_id = %job.shard_id,
                    worker = %worker,
                    "Worker rejected shard build with status {status}, requeueing"
                );
                metrics::record_initiate_retry();
                self.worker_pool.release(worker);
                self.submit_chunk_job(job);
            }
            InitiateResult::TransportError { details } => {
                warn!(
                    shard_id = %job.shard_id,
                    worker = %worker,
                    "Shard build initiation failed ({details}), requeueing"
                );
                metrics::record_initiate_retry();
                self.worker_pool.release(worker);
                self.submit_chunk_job(job);
            }
        }
    }

    async fn run_shard_job(self: &Arc<Self>, job: ShardJob) {
        metrics::record_poll_tick();
        match self.workers.poll(&job.worker, job.shard_id).await {
            PollResult::InProgress => {
                self.reschedule_poll(job);
            }
            PollResult::TransportError { details } => {
                warn!(
                    shard_id = %job.shard_id,
                    worker = %job.worker,
                    "Shard poll failed ({details}), treating as in progress"
                );
                self.reschedule_poll(job);
            }
            PollResult::UnexpectedStatus { status } => {
                warn!(
                    shard_id = %job.shard_id,
                    worker = %job.worker,
                    "Shard poll returned status {status}, treating as in progress"
                );
                self.reschedule_poll(job);
            }
            PollResult::Done => {
                match self
                    .shard_manager
                    .commit_shard(job.shard_id, &job.worker.node_id)
                    .await
                {
                    Ok(()) => {
                        info!(
                            table_id = %job.table_id,
                            partition = %job.partition_name,
                            shard_id = %job.shard_id,
                            worker = %job.worker,
                            "Shard committed"
                        );
                        metrics::record_shard_committed();
                    }
                    Err(error) => {
                        // the shard stays pending in the catalog
                        error!(
                            shard_id = %job.shard_id,
                            worker = %job.worker,
                            "Failed to commit shard: {error}"
                        );
                    }
                }
                self.worker_pool.release(job.worker);
            }
        }
    }

    fn reschedule_poll(self: &Arc<Self>, job: ShardJob) {
        self.submit_shard_job_after(job, self.config.shard_poll_interval);
    }

    fn submit_partition_job(&self, job: PartitionJob) {
        if self.partition_sender.send(job).is_err() {
            error!("Partition stage is shut down, dropping partition job");
        }
    }

    fn submit_chunk_job(&self, job: ChunkJob) {
        if self.chunk_sender.send(job).is_err() {
            error!("Chunk stage is shut down, dropping chunk job");
        }
    }

    /// Schedules a shard poll after `delay`. The timer holds the job's
    /// worker; if the pipeline shuts down before it fires, the job is
    /// abandoned and the worker is returned to the pool.
    fn submit_shard_job_after(self: &Arc<Self>, job: ShardJob, delay: Duration) {
        let pipeline = self.clone();
        tokio::spawn(async move {
            let cancelled = tokio::select! {
                biased;
                _ = pipeline.cancellation.cancelled() => true,
                _ = tokio::time::sleep(delay) => false,
            };
            if cancelled {
                pipeline.abandon_shard_job(job);
            } else if let Err(err) = pipeline.shard_sender.send(job) {
                pipeline.abandon_shard_job(err.0);
            }
        });
    }

    /// Shutdown path for a shard job: the held worker goes back to the pool
    /// so every acquire stays paired with a release; the shard itself stays
    /// pending in the catalog.
    fn abandon_shard_job(&self, job: ShardJob) {
        warn!(
            shard_id = %job.shard_id,
            worker = %job.worker,
            "Shutting down before the shard is committed, abandoning it"
        );
        self.worker_pool.release(job.worker);
    }
}

/// Drains one stage queue with bounded concurrency. On shutdown, jobs that
/// were dequeued but not yet scheduled, and jobs still buffered in the
/// queue, are handed to `abandon` instead of being dropped.
fn start_stage<J, F, Fut, A>(
    name: &'static str,
    parallelism: usize,
    mut receiver: mpsc::UnboundedReceiver<J>,
    pipeline: Arc<Pipeline>,
    run: F,
    abandon: A,
) -> JoinHandle<()>
where
    J: Send + 'static,
    F: Fn(Arc<Pipeline>, J) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
    A: Fn(&Pipeline, J) + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let semaphore = Arc::new(Semaphore::new(parallelism));
        let run = Arc::new(run);
        loop {
            let job = tokio::select! {
                _ = pipeline.cancellation.cancelled() => break,
                job = receiver.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };
            let permit = tokio::select! {
                _ = pipeline.cancellation.cancelled() => {
                    abandon(&pipeline, job);
                    break;
                }
                permit = semaphore.clone().acquire_owned() => {
                    permit.expect("stage semaphore closed")
                }
            };
            let pipeline = pipeline.clone();
            let run = run.clone();
            tokio::spawn(async move {
                run(pipeline, job).await;
                drop(permit);
            });
        }
        // jobs that were already queued when the shutdown started; closing
        // first makes racing submissions fail at the sender instead of
        // landing in a queue nobody reads
        receiver.close();
        while let Ok(job) = receiver.try_recv() {
            abandon(&pipeline, job);
        }
        debug!("{name} stage dispatcher stopped");
    })
}

#[derive(Debug)]
pub enum ImportError {
    EmptyFields,
    UnsupportedSource(String),
    Catalog(ShardManagerError),
    Source(HiveSourceError),
    ShuttingDown,
}

impl ImportError {
    pub fn is_invalid_argument(&self) -> bool {
        matches!(
            self,
            ImportError::EmptyFields | ImportError::UnsupportedSource(_)
        )
    }
}

impl From<ShardManagerError> for ImportError {
    fn from(value: ShardManagerError) -> Self {
        Self::Catalog(value)
    }
}

impl From<HiveSourceError> for ImportError {
    fn from(value: HiveSourceError) -> Self {
        Self::Source(value)
    }
}

impl Display for ImportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImportError::EmptyFields => write!(f, "Import field list must not be empty"),
            ImportError::UnsupportedSource(source_name) => {
                write!(f, "Unsupported source: {source_name}")
            }
            ImportError::Catalog(error) => write!(f, "Catalog error: {error}"),
            ImportError::Source(error) => write!(f, "Source metadata error: {error}"),
            ImportError::ShuttingDown => write!(f, "Import service is shutting down"),
        }
    }
}

impl SafeDisplay for ImportError {
    fn to_safe_string(&self) -> String {
        match self {
            ImportError::EmptyFields => self.to_string(),
            ImportError::UnsupportedSource(_) => self.to_string(),
            ImportError::Catalog(error) => format!("Catalog error: {}", error.to_safe_string()),
            ImportError::Source(error) => {
                format!("Source metadata error: {}", error.to_safe_string())
            }
            ImportError::ShuttingDown => self.to_string(),
        }
    }
}

impl std::error::Error for ImportError {}
