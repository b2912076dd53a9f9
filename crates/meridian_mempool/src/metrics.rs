//! Mempool metrics, emitted through the `metrics` facade.

use metrics::{counter, describe_counter, describe_gauge, gauge};
use strum::IntoEnumIterator;
use strum_macros::{EnumIter, IntoStaticStr};

pub const MEMPOOL_TRANSACTIONS_RECEIVED: &str = "mempool_transactions_received";
pub const MEMPOOL_TRANSACTIONS_DROPPED: &str = "mempool_transactions_dropped";
pub const MEMPOOL_POOL_SIZE: &str = "mempool_pool_size";
pub const MEMPOOL_TOTAL_SIZE_BYTES: &str = "mempool_total_size_bytes";
pub const MEMPOOL_UNCONNECTED_POOL_SIZE: &str = "mempool_unconnected_pool_size";
pub const MEMPOOL_SNAPSHOT_REGENERATIONS: &str = "mempool_snapshot_regenerations";

pub const LABEL_NAME_DROP_REASON: &str = "drop_reason";

#[derive(Clone, Copy, Debug, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub(crate) enum DropReason {
    FailedAddTxChecks,
    Expired,
    DoubleSpendOrphan,
}

pub(crate) fn count_received() {
    counter!(MEMPOOL_TRANSACTIONS_RECEIVED).increment(1);
}

pub(crate) fn count_dropped(reason: DropReason, n_txs: u64) {
    counter!(MEMPOOL_TRANSACTIONS_DROPPED, LABEL_NAME_DROP_REASON => <&'static str>::from(reason))
        .increment(n_txs);
}

pub(crate) fn count_snapshot_regeneration() {
    counter!(MEMPOOL_SNAPSHOT_REGENERATIONS).increment(1);
}

pub(crate) fn set_pool_gauges(pool_len: usize, total_size_bytes: u64, unconnected_len: usize) {
    gauge!(MEMPOOL_POOL_SIZE).set(pool_len as f64);
    gauge!(MEMPOOL_TOTAL_SIZE_BYTES).set(total_size_bytes as f64);
    gauge!(MEMPOOL_UNCONNECTED_POOL_SIZE).set(unconnected_len as f64);
}

/// Registers descriptions for every mempool metric.
pub fn register_metrics() {
    describe_counter!(
        MEMPOOL_TRANSACTIONS_RECEIVED,
        "Transactions submitted to the mempool"
    );
    describe_counter!(
        MEMPOOL_TRANSACTIONS_DROPPED,
        "Transactions dropped by the mempool, labeled by reason"
    );
    describe_counter!(
        MEMPOOL_SNAPSHOT_REGENERATIONS,
        "Times the read snapshot has been republished"
    );
    describe_gauge!(MEMPOOL_POOL_SIZE, "Admitted transactions currently pooled");
    describe_gauge!(MEMPOOL_TOTAL_SIZE_BYTES, "Total serialized bytes pooled");
    describe_gauge!(
        MEMPOOL_UNCONNECTED_POOL_SIZE,
        "Unconnected transactions awaiting parents"
    );
    for reason in DropReason::iter() {
        let _ = counter!(
            MEMPOOL_TRANSACTIONS_DROPPED,
            LABEL_NAME_DROP_REASON => <&'static str>::from(reason)
        );
    }
}
