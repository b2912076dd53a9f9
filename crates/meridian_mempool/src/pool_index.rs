//! The primary index over admitted transactions.
//!
//! Four dictionaries plus the size accumulator, mutated only through atomic
//! insert/remove so their mutual consistency never escapes this module:
//! hash → entry, spent outpoint → spender, public key → entries, and the
//! admission-order list. The fee min-heap lives here too, so an insert is one
//! call for the admission engine.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexSet;
use meridian_api::core::{Outpoint, PublicKey, TxHash};
use meridian_mempool_types::errors::MempoolError;
use meridian_mempool_types::mempool_types::{MempoolResult, PoolEntry};

use crate::fee_heap::FeeMinHeap;
use crate::MAX_TOTAL_TRANSACTION_SIZE_BYTES;

#[derive(Debug, Default)]
pub(crate) struct PoolIndex {
    entries: HashMap<TxHash, Arc<PoolEntry>>,
    /// Hashes in admission order; temporal order is load-bearing for
    /// dependency-safe replay during reorgs.
    admission_order: Vec<TxHash>,
    outpoints: HashMap<Outpoint, TxHash>,
    by_public_key: HashMap<PublicKey, IndexSet<TxHash>>,
    fee_heap: FeeMinHeap,
    total_size_bytes: u64,
}

impl PoolIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn total_size_bytes(&self) -> u64 {
        self.total_size_bytes
    }

    pub fn contains(&self, hash: &TxHash) -> bool {
        self.entries.contains_key(hash)
    }

    pub fn get(&self, hash: &TxHash) -> Option<&Arc<PoolEntry>> {
        self.entries.get(hash)
    }

    pub fn spender_of(&self, outpoint: &Outpoint) -> Option<&Arc<PoolEntry>> {
        self.outpoints.get(outpoint).and_then(|hash| self.entries.get(hash))
    }

    /// Inserts an entry into every dictionary and the heap, bumping the size
    /// accumulator. Fails when the pool byte cap would be exceeded; the
    /// current policy is to reject rather than evict the heap minimum.
    pub fn insert(
        &mut self,
        entry: Arc<PoolEntry>,
        affected_keys: &[PublicKey],
    ) -> MempoolResult<()> {
        if entry.size_bytes + self.total_size_bytes > MAX_TOTAL_TRANSACTION_SIZE_BYTES {
            return Err(MempoolError::InsufficientFeePriorityQueue {
                tx_size_bytes: entry.size_bytes,
                pool_size_bytes: self.total_size_bytes,
            });
        }

        let hash = entry.hash;
        for input in &entry.tx.inputs {
            self.outpoints.insert(*input, hash);
        }
        for key in affected_keys {
            self.by_public_key.entry(*key).or_default().insert(hash);
        }
        self.fee_heap.push(hash, entry.fee_per_kb);
        self.total_size_bytes += entry.size_bytes;
        self.admission_order.push(hash);
        self.entries.insert(hash, entry);
        Ok(())
    }

    /// Removes an entry from every dictionary and the heap.
    pub fn remove(&mut self, hash: &TxHash) -> Option<Arc<PoolEntry>> {
        let entry = self.entries.remove(hash)?;
        self.admission_order.retain(|h| h != hash);
        for input in &entry.tx.inputs {
            self.outpoints.remove(input);
        }
        self.by_public_key.retain(|_, hashes| {
            hashes.shift_remove(hash);
            !hashes.is_empty()
        });
        self.fee_heap.remove(hash);
        self.total_size_bytes -= entry.size_bytes;
        Some(entry)
    }

    /// Swaps in an upgraded entry for an existing hash, leaving the heap,
    /// outpoint map and admission order untouched. Used when a cross-chain
    /// exchange matures in place.
    pub fn replace_entry(&mut self, entry: Arc<PoolEntry>) -> bool {
        match self.entries.get_mut(&entry.hash) {
            Some(slot) => {
                *slot = entry;
                true
            }
            None => false,
        }
    }

    pub fn entries_in_admission_order(&self) -> Vec<Arc<PoolEntry>> {
        self.admission_order
            .iter()
            .map(|hash| self.entries.get(hash).expect("admission order out of sync").clone())
            .collect()
    }

    pub fn hashes_for_public_key(&self, key: &PublicKey) -> Vec<TxHash> {
        self.by_public_key
            .get(key)
            .map(|hashes| hashes.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn outpoint_map(&self) -> &HashMap<Outpoint, TxHash> {
        &self.outpoints
    }

    pub fn public_key_map(&self) -> &HashMap<PublicKey, IndexSet<TxHash>> {
        &self.by_public_key
    }

    #[cfg(test)]
    pub fn heap_position(&self, hash: &TxHash) -> Option<usize> {
        self.fee_heap.position(hash)
    }

    /// Cross-checks every dictionary against the others.
    #[cfg(test)]
    pub fn assert_consistent(&self) {
        self.fee_heap.assert_consistent();
        assert_eq!(self.entries.len(), self.admission_order.len());
        assert_eq!(self.entries.len(), self.fee_heap.len());

        let mut summed_sizes = 0u64;
        for (hash, entry) in &self.entries {
            assert_eq!(hash, &entry.hash);
            assert!(self.fee_heap.contains(hash));
            assert!(self.admission_order.contains(hash));
            summed_sizes += entry.size_bytes;
            for input in &entry.tx.inputs {
                assert_eq!(self.outpoints.get(input), Some(hash));
            }
        }
        assert_eq!(summed_sizes, self.total_size_bytes);

        for (outpoint, spender) in &self.outpoints {
            let entry = self.entries.get(spender).expect("dangling outpoint spender");
            assert!(entry.tx.inputs.contains(outpoint));
        }
        for hashes in self.by_public_key.values() {
            for hash in hashes {
                assert!(self.entries.contains_key(hash), "dangling public-key index entry");
            }
        }
    }
}

#[cfg(test)]
#[path = "pool_index_test.rs"]
mod pool_index_test;
