use lazy_static::lazy_static;
use prometheus::{register_int_counter, IntCounter, Registry};

lazy_static! {
    static ref IMPORTS_STARTED_TOTAL: IntCounter = register_int_counter!(
        "silo_imports_started_total",
        "Number of table imports started"
    )
    .unwrap();
    static ref PARTITIONS_ABANDONED_TOTAL: IntCounter = register_int_counter!(
        "silo_partitions_abandoned_total",
        "Number of partitions abandoned because of source or catalog failures"
    )
    .unwrap();
    static ref SHARDS_COMMITTED_TOTAL: IntCounter = register_int_counter!(
        "silo_shards_committed_total",
        "Number of shards committed to the catalog"
    )
    .unwrap();
    static ref SHARD_INITIATE_RETRIES_TOTAL: IntCounter = register_int_counter!(
        "silo_shard_initiate_retries_total",
        "Number of shard build initiations that were rejected or failed and requeued"
    )
    .unwrap();
    static ref SHARD_POLL_TICKS_TOTAL: IntCounter = register_int_counter!(
        "silo_shard_poll_ticks_total",
        "Number of shard poll requests issued to workers"
    )
    .unwrap();
}

pub fn record_import_started() {
    IMPORTS_STARTED_TOTAL.inc();
}

pub fn record_partition_abandoned() {
    PARTITIONS_ABANDONED_TOTAL.inc();
}

pub fn record_shard_committed() {
    SHARDS_COMMITTED_TOTAL.inc();
}

pub fn record_initiate_retry() {
    SHARD_INITIATE_RETRIES_TOTAL.inc();
}

pub fn record_poll_tick() {
    SHARD_POLL_TICKS_TOTAL.inc();
}

pub fn register_all() -> Registry {
    lazy_static::initialize(&IMPORTS_STARTED_TOTAL);
    lazy_static::initialize(&PARTITIONS_ABANDONED_TOTAL);
    lazy_static::initialize(&SHARDS_COMMITTED_TOTAL);
    lazy_static::initialize(&SHARD_INITIATE_RETRIES_TOTAL);
    lazy_static::initialize(&SHARD_POLL_TICKS_TOTAL);
    prometheus::default_registry().clone()
}
