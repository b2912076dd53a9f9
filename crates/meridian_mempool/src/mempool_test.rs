use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use meridian_api::block::Block;
use meridian_api::core::Outpoint;
use meridian_api::test_utils::{deterministic_signing_key, public_key_of};
use meridian_api::transaction::{Transaction, TxPayload, TxType};
use meridian_api::tx_hash;
use meridian_mempool_types::errors::MempoolError;
use pretty_assertions::assert_eq;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rstest::rstest;

use crate::config::MempoolConfig;
use crate::test_utils::{
    add_tx,
    add_tx_expect_error,
    mature_exchange,
    signed_transfer,
    test_mempool,
    unmined_exchange,
    TestChain,
};
use crate::LOW_FEE_TX_LIMIT_BYTES_PER_TEN_MINUTES;

fn reward_tx() -> Transaction {
    Transaction {
        inputs: vec![],
        outputs: vec![],
        public_key: public_key_of(&deterministic_signing_key(999)),
        payload: TxPayload::BlockReward,
        signature: vec![],
    }
}

// Admission.

#[rstest]
fn simple_admit_indexes_every_way() {
    // Setup: one mature output of 10_000 nanos to key A.
    let test_chain = TestChain::new();
    let key_a = deterministic_signing_key(1);
    let key_b = public_key_of(&deterministic_signing_key(2));
    let funded = test_chain.fund(public_key_of(&key_a), 10_000);
    let (mempool, _clock) = test_mempool(&test_chain, MempoolConfig::default());

    // Test: spend it, paying a 100-nano fee.
    let tx1 = signed_transfer(&key_a, vec![funded], &[(key_b, 9_900)]);
    let admitted = add_tx(&mempool, &tx1);

    // Assert.
    assert_eq!(admitted.len(), 1);
    let entry = &admitted[0];
    assert_eq!(entry.fee_nanos, 100);
    assert_eq!(entry.fee_per_kb, 100 * 1000 / entry.size_bytes);
    assert_eq!(entry.height, 2);

    mempool.regenerate_read_snapshot();
    assert!(mempool.contains(&tx1.hash()));
    assert_eq!(mempool.spender_of(&funded), Some(tx1.clone()));
    assert_eq!(mempool.count(), 1);
    assert_eq!(mempool.entries_for_public_key(&key_b)[0].hash, tx1.hash());
    mempool.with_core(|core| core.assert_consistent());
}

#[rstest]
fn duplicate_submission_is_rejected_without_mutation() {
    let test_chain = TestChain::new();
    let key = deterministic_signing_key(1);
    let funded = test_chain.fund(public_key_of(&key), 10_000);
    let (mempool, _clock) = test_mempool(&test_chain, MempoolConfig::default());

    let tx = signed_transfer(&key, vec![funded], &[(public_key_of(&key), 9_900)]);
    add_tx(&mempool, &tx);

    add_tx_expect_error(&mempool, &tx, MempoolError::Duplicate { tx_hash: tx.hash() });
    mempool.with_core(|core| {
        core.assert_consistent();
        assert_eq!(core.index.len(), 1);
    });
}

#[rstest]
fn individual_block_reward_is_rejected() {
    let test_chain = TestChain::new();
    let (mempool, _clock) = test_mempool(&test_chain, MempoolConfig::default());

    add_tx_expect_error(&mempool, &reward_tx(), MempoolError::IndividualBlockReward);
}

#[rstest]
fn min_fee_floor_rejects_cheap_transactions() {
    let test_chain = TestChain::new();
    let key = deterministic_signing_key(1);
    let funded = test_chain.fund(public_key_of(&key), 10_000);
    let config =
        MempoolConfig { min_fee_rate_nanos_per_kb: 1_000_000, ..MempoolConfig::default() };
    let (mempool, _clock) = test_mempool(&test_chain, config);

    let cheap = signed_transfer(&key, vec![funded], &[(public_key_of(&key), 9_900)]);
    let err = mempool.process(&cheap, true, true, 0, true).unwrap_err();
    assert_matches!(err, MempoolError::InsufficientFeeMinFee { .. });

    // The candidate must not have leaked into any index.
    mempool.with_core(|core| {
        core.assert_consistent();
        assert_eq!(core.index.len(), 0);
    });

    // Without rate limiting the same transaction is fine.
    add_tx(&mempool, &cheap);
}

// Orphans.

#[rstest]
fn orphan_reports_missing_parents_then_promotes() {
    // Setup.
    let test_chain = TestChain::new();
    let key_a = deterministic_signing_key(1);
    let key_b = deterministic_signing_key(2);
    let funded = test_chain.fund(public_key_of(&key_a), 10_000);
    let (mempool, _clock) = test_mempool(&test_chain, MempoolConfig::default());

    let tx1 = signed_transfer(&key_a, vec![funded], &[(public_key_of(&key_b), 9_900)]);
    let tx2 = signed_transfer(
        &key_b,
        vec![Outpoint::new(tx1.hash(), 0)],
        &[(public_key_of(&key_b), 9_800)],
    );

    // Test: the child arrives first.
    let err = mempool.process(&tx2, false, false, 0, true).unwrap_err();
    assert_eq!(err, MempoolError::UnconnectedNotAllowed { missing_parents: vec![tx1.hash()] });

    assert_eq!(mempool.process(&tx2, true, false, 7, true).unwrap(), vec![]);
    mempool.with_core(|core| assert!(core.orphans.contains(&tx2.hash())));

    // The parent lands: both admit, parent first.
    let admitted = add_tx(&mempool, &tx1);

    // Assert.
    let admitted_hashes: Vec<_> = admitted.iter().map(|entry| entry.hash).collect();
    assert_eq!(admitted_hashes, vec![tx1.hash(), tx2.hash()]);
    mempool.with_core(|core| {
        core.assert_consistent();
        assert_eq!(core.orphans.len(), 0);
        assert_eq!(core.index.len(), 2);
    });
}

#[rstest]
fn direct_spend_invalidates_double_spending_orphan() {
    // Setup: tx2 waits on a missing parent while also claiming a confirmed
    // output; tx3 takes that output directly.
    let test_chain = TestChain::new();
    let key = deterministic_signing_key(1);
    let contested = test_chain.fund(public_key_of(&key), 10_000);
    let (mempool, _clock) = test_mempool(&test_chain, MempoolConfig::default());

    let missing_parent = Outpoint::new(tx_hash!(4_242u64), 0);
    let tx2 = signed_transfer(
        &key,
        vec![missing_parent, contested],
        &[(public_key_of(&key), 9_000)],
    );
    assert_eq!(mempool.process(&tx2, true, false, 0, true).unwrap(), vec![]);

    let tx3 = signed_transfer(&key, vec![contested], &[(public_key_of(&key), 9_900)]);

    // Test.
    let admitted = add_tx(&mempool, &tx3);

    // Assert.
    assert_eq!(admitted[0].hash, tx3.hash());
    mempool.with_core(|core| {
        core.assert_consistent();
        assert!(!core.orphans.contains(&tx2.hash()));
        assert_eq!(core.index.len(), 1);
    });
}

#[rstest]
fn missing_parent_hashes_are_deduplicated() {
    let test_chain = TestChain::new();
    let key = deterministic_signing_key(1);
    let (mempool, _clock) = test_mempool(&test_chain, MempoolConfig::default());

    // Two inputs from the same unseen parent must report it once.
    let parent = tx_hash!(77u64);
    let tx = signed_transfer(
        &key,
        vec![Outpoint::new(parent, 0), Outpoint::new(parent, 1)],
        &[(public_key_of(&key), 1)],
    );
    let err = mempool.process(&tx, false, false, 0, true).unwrap_err();
    assert_eq!(err, MempoolError::UnconnectedNotAllowed { missing_parents: vec![parent] });
}

// Rate limiting.

#[rstest]
fn low_fee_flood_trips_rate_limit_and_decays() {
    // Setup: every transfer is "low fee" against a very high soft floor.
    let test_chain = TestChain::new();
    let key = deterministic_signing_key(1);
    let config = MempoolConfig {
        rate_limit_fee_rate_nanos_per_kb: 1_000_000,
        ..MempoolConfig::default()
    };
    let (mempool, clock) = test_mempool(&test_chain, config);

    let mut admitted_bytes = 0u64;
    let mut tripped = None;
    for _ in 0..3000 {
        let funded = test_chain.fund(public_key_of(&key), 10_000);
        let tx = signed_transfer(&key, vec![funded], &[(public_key_of(&key), 9_900)]);
        match mempool.process(&tx, true, true, 0, true) {
            Ok(admitted) => admitted_bytes += admitted[0].size_bytes,
            Err(err) => {
                tripped = Some(err);
                break;
            }
        }
    }

    // Assert: the flood tripped the limiter right at the window.
    assert_eq!(tripped, Some(MempoolError::InsufficientFeeRateLimit));
    assert!(admitted_bytes as f64 >= LOW_FEE_TX_LIMIT_BYTES_PER_TEN_MINUTES);

    // Ten half-lives later the accumulator has decayed to nothing.
    clock.advance(Duration::from_secs(6_000));
    let funded = test_chain.fund(public_key_of(&key), 10_000);
    let late = signed_transfer(&key, vec![funded], &[(public_key_of(&key), 9_900)]);
    mempool.process(&late, true, true, 0, true).unwrap();
}

// Reorg reconciliation.

#[rstest]
fn reorg_round_trip_preserves_the_pool() {
    // Setup: two independent admitted transfers.
    let test_chain = TestChain::new();
    let key_a = deterministic_signing_key(1);
    let key_b = deterministic_signing_key(2);
    let funded_a = test_chain.fund(public_key_of(&key_a), 10_000);
    let funded_b = test_chain.fund(public_key_of(&key_b), 10_000);
    let (mempool, _clock) = test_mempool(&test_chain, MempoolConfig::default());

    let tx1 = signed_transfer(&key_a, vec![funded_a], &[(public_key_of(&key_a), 9_900)]);
    let tx2 = signed_transfer(&key_b, vec![funded_b], &[(public_key_of(&key_b), 9_900)]);
    add_tx(&mempool, &tx1);
    add_tx(&mempool, &tx2);

    // Test: a block confirms tx1.
    let block = Block { height: 2, txns: vec![reward_tx(), tx1.clone()] };
    let undo = test_chain.db.connect_block(&block);
    let newly_admitted = mempool.on_block_connect(&block);

    // Assert: only tx2 remains and nothing is newly connected.
    assert!(newly_admitted.is_empty());
    mempool.with_core(|core| {
        core.assert_consistent();
        assert_eq!(core.index.len(), 1);
        assert!(core.index.contains(&tx2.hash()));
    });

    // Test: the block is disconnected again.
    test_chain.db.disconnect_block(&block, &undo);
    mempool.on_block_disconnect(&block);

    // Assert: both are back, the block's transaction first.
    mempool.regenerate_read_snapshot();
    let order: Vec<_> =
        mempool.entries_ordered_by_time().iter().map(|entry| entry.hash).collect();
    assert_eq!(order, vec![tx1.hash(), tx2.hash()]);
    mempool.with_core(|core| core.assert_consistent());
}

#[rstest]
fn block_connect_promotes_orphans_waiting_on_it() {
    // Setup: an orphan whose parent never reaches the pool but arrives in a
    // block.
    let test_chain = TestChain::new();
    let key_a = deterministic_signing_key(1);
    let key_b = deterministic_signing_key(2);
    let funded = test_chain.fund(public_key_of(&key_a), 10_000);
    let (mempool, _clock) = test_mempool(&test_chain, MempoolConfig::default());

    let parent = signed_transfer(&key_a, vec![funded], &[(public_key_of(&key_b), 9_900)]);
    let child = signed_transfer(
        &key_b,
        vec![Outpoint::new(parent.hash(), 0)],
        &[(public_key_of(&key_b), 9_800)],
    );
    assert_eq!(mempool.process(&child, true, false, 0, true).unwrap(), vec![]);

    // Test.
    let block = Block { height: 2, txns: vec![reward_tx(), parent.clone()] };
    test_chain.db.connect_block(&block);
    let newly_admitted = mempool.on_block_connect(&block);

    // Assert: the orphan graduated and is reported for rebroadcast.
    let newly: Vec<_> = newly_admitted.iter().map(|entry| entry.hash).collect();
    assert_eq!(newly, vec![child.hash()]);
    mempool.with_core(|core| {
        assert_eq!(core.orphans.len(), 0);
        assert!(core.index.contains(&child.hash()));
    });
}

#[rstest]
fn remove_transaction_rebuilds_without_it() {
    let test_chain = TestChain::new();
    let key_a = deterministic_signing_key(1);
    let key_b = deterministic_signing_key(2);
    let funded_a = test_chain.fund(public_key_of(&key_a), 10_000);
    let funded_b = test_chain.fund(public_key_of(&key_b), 10_000);
    let (mempool, _clock) = test_mempool(&test_chain, MempoolConfig::default());

    let tx1 = signed_transfer(&key_a, vec![funded_a], &[(public_key_of(&key_a), 9_900)]);
    let tx2 = signed_transfer(&key_b, vec![funded_b], &[(public_key_of(&key_b), 9_900)]);
    add_tx(&mempool, &tx1);
    add_tx(&mempool, &tx2);

    mempool.remove_transaction(&tx1);

    mempool.with_core(|core| {
        core.assert_consistent();
        assert_eq!(core.index.len(), 1);
        assert!(core.index.contains(&tx2.hash()));
    });
    // Dependents of the removed transaction fall out with it.
}

// Cross-chain exchange.

#[rstest]
fn cross_chain_upgrade_in_place_preserves_position_and_time() {
    // Setup: an unmined exchange in a pool with another entry around it.
    let test_chain = TestChain::new();
    let key = deterministic_signing_key(1);
    let funded = test_chain.fund(public_key_of(&key), 10_000);
    let (mempool, clock) = test_mempool(&test_chain, MempoolConfig::default());

    let exchange = unmined_exchange(7, 50_000, &test_chain.params);
    let admitted = add_tx(&mempool, &exchange);
    let added_at = admitted[0].added;
    let hash = exchange.hash();

    let transfer = signed_transfer(&key, vec![funded], &[(public_key_of(&key), 9_900)]);
    add_tx(&mempool, &transfer);

    let position_before = mempool.with_core(|core| core.index.heap_position(&hash)).unwrap();

    // Test: the proof matures later.
    clock.advance(Duration::from_secs(90));
    let matured = mature_exchange(&exchange, &test_chain.db);
    assert_eq!(matured.hash(), hash);
    let upgraded = add_tx(&mempool, &matured);

    // Assert: same identity, same heap position, same admission time, new
    // payload.
    assert_eq!(upgraded.len(), 1);
    assert_eq!(upgraded[0].hash, hash);
    assert_eq!(upgraded[0].added, added_at);
    assert_eq!(mempool.with_core(|core| core.index.heap_position(&hash)), Some(position_before));
    let stored = mempool.with_core(|core| core.index.get(&hash).unwrap().clone());
    assert!(!stored.tx.cross_chain_payload().unwrap().is_unmined());
    mempool.with_core(|core| core.assert_consistent());
}

#[rstest]
fn mined_duplicate_of_mined_exchange_is_rejected() {
    let test_chain = TestChain::new();
    let (mempool, _clock) = test_mempool(&test_chain, MempoolConfig::default());

    let exchange = unmined_exchange(7, 50_000, &test_chain.params);
    let matured = mature_exchange(&exchange, &test_chain.db);
    add_tx(&mempool, &matured);

    add_tx_expect_error(
        &mempool,
        &matured,
        MempoolError::DuplicateCrossChainExchange { tx_hash: matured.hash() },
    );
}

#[rstest]
fn nuked_foreign_transaction_is_rejected() {
    let test_chain = TestChain::new();
    let exchange = unmined_exchange(7, 50_000, &test_chain.params);
    let foreign_tx_hash = exchange.cross_chain_payload().unwrap().burn_tx.hash();

    let mut params = (*test_chain.params).clone();
    params.nuked_foreign_txns.insert(foreign_tx_hash);
    let nuked_chain = TestChain::with_params(params);
    let exchange = unmined_exchange(7, 50_000, &nuked_chain.params);
    let (mempool, _clock) = test_mempool(&nuked_chain, MempoolConfig::default());

    add_tx_expect_error(
        &mempool,
        &exchange,
        MempoolError::NukedCrossChainTransaction { foreign_tx_hash },
    );
}

#[rstest]
fn dust_foreign_output_is_rejected() {
    let test_chain = TestChain::new();
    let (mempool, _clock) = test_mempool(&test_chain, MempoolConfig::default());

    let dusty = unmined_exchange(7, 999, &test_chain.params);
    add_tx_expect_error(
        &mempool,
        &dusty,
        MempoolError::CrossChainDustOutput { amount_units: 999, dust_threshold: 1000 },
    );
}

#[rstest]
fn evict_unmined_cross_chain_honors_dry_run() {
    // Setup: two unmined exchanges.
    let test_chain = TestChain::new();
    let (mempool, _clock) = test_mempool(&test_chain, MempoolConfig::default());
    let keep = unmined_exchange(7, 50_000, &test_chain.params);
    let evict = unmined_exchange(8, 60_000, &test_chain.params);
    add_tx(&mempool, &keep);
    add_tx(&mempool, &evict);
    mempool.regenerate_read_snapshot();

    let evict_foreign = evict.cross_chain_payload().unwrap().burn_tx.hash();

    // Test: dry run reports but does not mutate.
    let report = mempool.evict_unmined_cross_chain(&[evict_foreign], true);
    assert_eq!(report.remaining_count, 1);
    assert_eq!(report.evicted, vec![evict.hash()]);
    assert_eq!(report.evicted_by_type.get(&TxType::CrossChainExchange), Some(&1));
    assert_eq!(report.unmined_foreign.len(), 2);
    mempool.with_core(|core| assert_eq!(core.index.len(), 2));

    // Test: the real sweep rebuilds the pool.
    let report = mempool.evict_unmined_cross_chain(&[evict_foreign], false);
    assert_eq!(report.remaining_count, 1);
    mempool.with_core(|core| {
        assert!(core.index.contains(&keep.hash()));
        assert!(!core.index.contains(&evict.hash()));
    });
}

// Read snapshot.

#[rstest]
fn snapshot_is_stale_until_regenerated() {
    let test_chain = TestChain::new();
    let key = deterministic_signing_key(1);
    let funded = test_chain.fund(public_key_of(&key), 10_000);
    // Automatic regeneration off, so only explicit regeneration publishes.
    let config = MempoolConfig { generate_read_snapshot: false, ..MempoolConfig::default() };
    let (mempool, _clock) = test_mempool(&test_chain, config);

    let tx = signed_transfer(&key, vec![funded], &[(public_key_of(&key), 9_900)]);
    add_tx(&mempool, &tx);

    assert!(!mempool.contains(&tx.hash()));
    let sequence_before = mempool.snapshot_sequence_number();

    mempool.regenerate_read_snapshot();
    assert!(mempool.contains(&tx.hash()));
    assert_eq!(mempool.snapshot_sequence_number(), sequence_before + 1);
    assert_eq!(mempool.summary_by_type().get(&TxType::BasicTransfer).unwrap().count, 1);

    // The augmented view reflects the pooled spend.
    let view = mempool.augmented_view();
    assert!(view.get_utxo(&funded).is_none());
    assert!(view.get_utxo(&Outpoint::new(tx.hash(), 0)).is_some());
}

#[rstest]
fn block_until_snapshot_regenerated_observes_the_bump() {
    let test_chain = TestChain::new();
    let (mempool, _clock) = test_mempool(&test_chain, MempoolConfig::default());

    let waiter = mempool.clone();
    let handle = std::thread::spawn(move || waiter.block_until_snapshot_regenerated());
    std::thread::sleep(Duration::from_millis(150));
    mempool.regenerate_read_snapshot();
    handle.join().unwrap();
}

// Invariants over a random stream.

#[rstest]
fn random_stream_preserves_all_invariants() {
    let test_chain = TestChain::new();
    let key = deterministic_signing_key(1);
    let owner = public_key_of(&key);
    let (mempool, _clock) = test_mempool(&test_chain, MempoolConfig::default());

    let mut rng = StdRng::seed_from_u64(99);
    let mut spendable: Vec<(Outpoint, u64)> =
        (0..40).map(|_| (test_chain.fund(owner, 1_000_000), 1_000_000)).collect();
    let mut spent: Vec<Outpoint> = Vec::new();
    let mut admitted: Vec<Transaction> = Vec::new();
    let mut seen_outpoints: HashSet<Outpoint> = HashSet::new();

    for round in 0u64..200 {
        match rng.gen_range(0..4) {
            // Valid spend of a live outpoint.
            0 if !spendable.is_empty() => {
                let (outpoint, amount) = spendable.swap_remove(rng.gen_range(0..spendable.len()));
                let tx = signed_transfer(&key, vec![outpoint], &[(owner, amount - 100)]);
                let entries = add_tx(&mempool, &tx);
                assert_eq!(entries[0].fee_nanos, 100);
                spendable.push((Outpoint::new(tx.hash(), 0), amount - 100));
                spent.push(outpoint);
                admitted.push(tx);
            }
            // A consumed outpoint is no longer resolvable, so the double
            // spend parks as an unconnected transaction and never admits.
            1 if !spent.is_empty() => {
                let outpoint = spent[rng.gen_range(0..spent.len())];
                let tx = signed_transfer(&key, vec![outpoint], &[(owner, 200 + round)]);
                assert_eq!(mempool.process(&tx, true, false, 0, true).unwrap(), vec![]);
            }
            // Re-submission of an admitted transaction is idempotent.
            2 if !admitted.is_empty() => {
                let tx = admitted[rng.gen_range(0..admitted.len())].clone();
                add_tx_expect_error(&mempool, &tx, MempoolError::Duplicate { tx_hash: tx.hash() });
            }
            // Orphan referencing a parent nobody has seen.
            _ => {
                let parent = tx_hash!(1_000_000 + round);
                let tx = signed_transfer(
                    &key,
                    vec![Outpoint::new(parent, 0)],
                    &[(owner, rng.gen_range(1..1_000))],
                );
                assert_eq!(mempool.process(&tx, true, false, 0, true).unwrap(), vec![]);
            }
        }

        mempool.with_core(|core| core.assert_consistent());
    }

    // No two admitted entries ever share an input outpoint.
    mempool.with_core(|core| {
        for entry in core.index.entries_in_admission_order() {
            for input in &entry.tx.inputs {
                assert!(seen_outpoints.insert(*input), "double spend in the pool");
            }
        }
    });

    // The published snapshot is a consistent copy of the writer state.
    mempool.regenerate_read_snapshot();
    let snapshot_order: Vec<_> =
        mempool.entries_ordered_by_time().iter().map(|entry| entry.hash).collect();
    let core_order: Vec<_> = mempool.with_core(|core| {
        core.index.entries_in_admission_order().iter().map(|entry| entry.hash).collect()
    });
    assert_eq!(snapshot_order, core_order);
}
