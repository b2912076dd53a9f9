use std::time::Duration;

use meridian_api::test_utils::{deterministic_signing_key, public_key_of};
use rstest::rstest;
use tempfile::TempDir;

use crate::config::MempoolConfig;
use crate::persistence::LATEST_MEMPOOL_DUMP_DIR;
use crate::runner::start_workers;
use crate::test_utils::{add_tx, signed_transfer, test_mempool, TestChain};

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn workers_tick_and_shut_down_cleanly() {
    let dump_dir = TempDir::new().unwrap();
    let test_chain = TestChain::new();
    let config = MempoolConfig {
        snapshot_regeneration_interval_secs: 0.05,
        dump_dir: Some(dump_dir.path().to_path_buf()),
        dump_interval_secs: 1,
        ..MempoolConfig::default()
    };
    let (mempool, _clock) = test_mempool(&test_chain, config);

    let key = deterministic_signing_key(1);
    let funded = test_chain.fund(public_key_of(&key), 10_000);
    let tx = signed_transfer(&key, vec![funded], &[(public_key_of(&key), 9_900)]);
    add_tx(&mempool, &tx);
    let sequence_after_add = mempool.snapshot_sequence_number();

    let workers = start_workers(mempool.clone());

    // The regenerator republishes on its own once the pool goes quiet, and
    // the dumper writes a complete dump.
    tokio::time::sleep(Duration::from_millis(1_300)).await;
    assert!(mempool.snapshot_sequence_number() > sequence_after_add);
    assert!(dump_dir.path().join(LATEST_MEMPOOL_DUMP_DIR).exists());

    workers.shutdown().await;
}
