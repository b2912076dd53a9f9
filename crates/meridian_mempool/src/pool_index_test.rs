use std::sync::Arc;
use std::time::SystemTime;

use assert_matches::assert_matches;
use meridian_api::core::Outpoint;
use meridian_api::transaction::{Transaction, TxOutput, TxPayload};
use meridian_api::{public_key, tx_hash};
use meridian_mempool_types::errors::MempoolError;
use meridian_mempool_types::mempool_types::PoolEntry;
use pretty_assertions::assert_eq;
use rstest::rstest;

use crate::pool_index::PoolIndex;
use crate::MAX_TOTAL_TRANSACTION_SIZE_BYTES;

fn spending_tx(input_tag: u64, output_tag: u64) -> Transaction {
    Transaction {
        inputs: vec![Outpoint::new(tx_hash!(input_tag), 0)],
        outputs: vec![TxOutput { public_key: public_key!(output_tag), amount_nanos: 100 }],
        public_key: public_key!(1u64),
        payload: TxPayload::BasicTransfer,
        signature: vec![],
    }
}

fn entry_with_size(tx: Transaction, fee_per_kb: u64, size_bytes: u64) -> Arc<PoolEntry> {
    let hash = tx.hash();
    Arc::new(PoolEntry {
        raw: tx.to_bytes(true),
        tx,
        hash,
        size_bytes,
        added: SystemTime::UNIX_EPOCH,
        height: 2,
        fee_nanos: fee_per_kb,
        fee_per_kb,
        metadata: None,
    })
}

#[rstest]
fn insert_updates_every_dictionary() {
    let mut index = PoolIndex::new();
    let tx = spending_tx(1, 10);
    let entry = entry_with_size(tx.clone(), 500, 200);

    index.insert(entry.clone(), &[public_key!(10u64), public_key!(1u64)]).unwrap();
    index.assert_consistent();

    assert!(index.contains(&entry.hash));
    assert_eq!(index.len(), 1);
    assert_eq!(index.total_size_bytes(), 200);
    assert_eq!(index.spender_of(&tx.inputs[0]).unwrap().hash, entry.hash);
    assert_eq!(index.hashes_for_public_key(&public_key!(10u64)), vec![entry.hash]);
    assert_eq!(index.entries_in_admission_order(), vec![entry]);
}

#[rstest]
fn remove_cleans_every_dictionary() {
    let mut index = PoolIndex::new();
    let tx_a = spending_tx(1, 10);
    let tx_b = spending_tx(2, 10);
    let entry_a = entry_with_size(tx_a.clone(), 500, 200);
    let entry_b = entry_with_size(tx_b.clone(), 600, 300);
    index.insert(entry_a.clone(), &[public_key!(10u64)]).unwrap();
    index.insert(entry_b.clone(), &[public_key!(10u64)]).unwrap();

    let removed = index.remove(&entry_a.hash).unwrap();
    index.assert_consistent();

    assert_eq!(removed.hash, entry_a.hash);
    assert!(!index.contains(&entry_a.hash));
    assert!(index.spender_of(&tx_a.inputs[0]).is_none());
    assert_eq!(index.total_size_bytes(), 300);
    assert_eq!(index.hashes_for_public_key(&public_key!(10u64)), vec![entry_b.hash]);
    assert_eq!(index.entries_in_admission_order(), vec![entry_b]);
}

#[rstest]
fn byte_cap_rejects_at_equality_only() {
    let mut index = PoolIndex::new();
    let giant = entry_with_size(spending_tx(1, 10), 1, MAX_TOTAL_TRANSACTION_SIZE_BYTES);
    index.insert(giant, &[]).unwrap();
    assert_eq!(index.total_size_bytes(), MAX_TOTAL_TRANSACTION_SIZE_BYTES);

    let one_more = entry_with_size(spending_tx(2, 10), 1, 1);
    let err = index.insert(one_more, &[]);
    assert_matches!(err, Err(MempoolError::InsufficientFeePriorityQueue { .. }));
    index.assert_consistent();
}

#[rstest]
fn replace_entry_preserves_heap_position_and_order() {
    let mut index = PoolIndex::new();
    let tx_cheap = spending_tx(1, 10);
    let tx_rich = spending_tx(2, 11);
    index.insert(entry_with_size(tx_cheap.clone(), 5, 100), &[]).unwrap();
    index.insert(entry_with_size(tx_rich, 1000, 100), &[]).unwrap();

    let hash = tx_cheap.hash();
    let position_before = index.heap_position(&hash).unwrap();

    let upgraded = Arc::new(PoolEntry {
        height: 99,
        ..(*entry_with_size(tx_cheap, 5, 100)).clone()
    });
    assert!(index.replace_entry(upgraded));
    index.assert_consistent();

    assert_eq!(index.heap_position(&hash), Some(position_before));
    assert_eq!(index.entries_in_admission_order()[0].hash, hash);
    assert_eq!(index.get(&hash).unwrap().height, 99);
}

#[rstest]
fn replace_entry_of_unknown_hash_is_rejected() {
    let mut index = PoolIndex::new();
    let stranger = entry_with_size(spending_tx(1, 10), 5, 100);
    assert!(!index.replace_entry(stranger));
}
