//! Unconnected transactions waiting for their parents.
//!
//! Holds the transaction payload in exactly one place (the orphan record);
//! the reverse parent index and all callers work with value copies of hashes
//! and outpoints. Expiry is deadline-driven and checked at most once per
//! scan interval, on `add`.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, SystemTime};

use meridian_api::core::{Outpoint, TxHash};
use meridian_api::transaction::Transaction;
use meridian_mempool_types::errors::MempoolError;
use meridian_mempool_types::mempool_types::MempoolResult;
use tracing::{debug, error};

use crate::metrics::{count_dropped, DropReason};
use crate::{
    MAX_UNCONNECTED_TRANSACTIONS,
    MAX_UNCONNECTED_TX_SIZE_BYTES,
    UNCONNECTED_TXN_EXPIRATION,
};

#[derive(Clone, Debug)]
pub(crate) struct OrphanEntry {
    pub tx: Transaction,
    /// Peer that delivered the transaction; lets us drop a disconnecting
    /// peer's orphans.
    pub peer_id: u64,
    pub expires_at: SystemTime,
}

#[derive(Debug)]
pub(crate) struct OrphanPool {
    orphans: HashMap<TxHash, OrphanEntry>,
    /// Missing parent outpoint → hashes of orphans waiting on it.
    by_prev: HashMap<Outpoint, HashSet<TxHash>>,
    next_expire_scan: SystemTime,
    scan_interval: Duration,
}

impl OrphanPool {
    pub fn new(scan_interval: Duration) -> Self {
        OrphanPool {
            orphans: HashMap::new(),
            by_prev: HashMap::new(),
            next_expire_scan: SystemTime::UNIX_EPOCH,
            scan_interval,
        }
    }

    pub fn len(&self) -> usize {
        self.orphans.len()
    }

    pub fn contains(&self, hash: &TxHash) -> bool {
        self.orphans.contains_key(hash)
    }

    pub fn entries(&self) -> Vec<OrphanEntry> {
        self.orphans.values().cloned().collect()
    }

    /// Orphans waiting on the given outpoint. Returns clones so the caller
    /// can re-validate while mutating the pool.
    pub fn children_of(&self, outpoint: &Outpoint) -> Vec<Transaction> {
        let Some(hashes) = self.by_prev.get(outpoint) else {
            return Vec::new();
        };
        hashes
            .iter()
            .filter_map(|hash| self.orphans.get(hash).map(|orphan| orphan.tx.clone()))
            .collect()
    }

    /// Admits a transaction to the orphan pool.
    ///
    /// Oversized transactions are rejected. When the pool is full an
    /// arbitrary orphan is evicted; only the cap is guaranteed, not which
    /// one goes.
    pub fn add(&mut self, tx: Transaction, peer_id: u64, now: SystemTime) -> MempoolResult<()> {
        let tx_size_bytes = tx.serialized_len();
        if tx_size_bytes > MAX_UNCONNECTED_TX_SIZE_BYTES {
            return Err(MempoolError::TooLarge {
                tx_size_bytes,
                max_size_bytes: MAX_UNCONNECTED_TX_SIZE_BYTES,
            });
        }

        self.limit_orphans(now);

        let hash = tx.hash();
        for input in &tx.inputs {
            self.by_prev.entry(*input).or_default().insert(hash);
        }
        self.orphans.insert(
            hash,
            OrphanEntry { tx, peer_id, expires_at: now + UNCONNECTED_TXN_EXPIRATION },
        );
        debug!(%hash, total = self.orphans.len(), "added unconnected transaction");
        Ok(())
    }

    /// Removes the transaction; with `cascade`, recursively removes every
    /// orphan spending any of its outputs.
    pub fn remove(&mut self, tx: &Transaction, cascade: bool) {
        let hash = tx.hash();
        let Some(orphan) = self.orphans.remove(&hash) else {
            return;
        };

        for input in &orphan.tx.inputs {
            if let Some(waiting) = self.by_prev.get_mut(input) {
                waiting.remove(&hash);
                if waiting.is_empty() {
                    self.by_prev.remove(input);
                }
            }
        }

        if cascade {
            for index in 0..orphan.tx.outputs.len() {
                let outpoint = Outpoint::new(hash, index as u32);
                for child in self.children_of(&outpoint) {
                    self.remove(&child, true);
                }
            }
        }
    }

    /// Removes every orphan that double-spends one of the given
    /// transaction's inputs. Called after an admission makes those inputs
    /// unavailable for good.
    pub fn remove_double_spends(&mut self, tx: &Transaction) {
        for input in &tx.inputs {
            for child in self.children_of(input) {
                count_dropped(DropReason::DoubleSpendOrphan, 1);
                self.remove(&child, true);
            }
        }
    }

    /// Drops all orphans delivered by a peer, e.g. on disconnect.
    pub fn remove_for_peer(&mut self, peer_id: u64) {
        let doomed: Vec<Transaction> = self
            .orphans
            .values()
            .filter(|orphan| orphan.peer_id == peer_id)
            .map(|orphan| orphan.tx.clone())
            .collect();
        for tx in doomed {
            self.remove(&tx, false);
        }
    }

    /// Expires overdue orphans, then evicts arbitrarily if the pool is still
    /// at capacity.
    fn limit_orphans(&mut self, now: SystemTime) {
        self.sweep_expired(now);

        while self.orphans.len() + 1 > MAX_UNCONNECTED_TRANSACTIONS {
            let Some(victim) = self.orphans.values().next().map(|orphan| orphan.tx.clone()) else {
                error!("orphan pool over capacity but empty; this should never happen");
                return;
            };
            self.remove(&victim, false);
        }
    }

    /// Removes every orphan whose expiration has passed (cascading to its
    /// dependents), walking the index at most once per scan interval.
    pub fn sweep_expired(&mut self, now: SystemTime) {
        if now < self.next_expire_scan {
            return;
        }
        self.next_expire_scan = now + self.scan_interval;

        let before = self.orphans.len();
        let expired: Vec<Transaction> = self
            .orphans
            .values()
            .filter(|orphan| now >= orphan.expires_at)
            .map(|orphan| orphan.tx.clone())
            .collect();
        for tx in expired {
            self.remove(&tx, true);
        }
        let n_expired = before - self.orphans.len();
        if n_expired > 0 {
            count_dropped(DropReason::Expired, n_expired as u64);
            debug!(n_expired, remaining = self.orphans.len(), "expired unconnected transactions");
        }
    }

    #[cfg(test)]
    pub fn assert_consistent(&self) {
        for (hash, orphan) in &self.orphans {
            for input in &orphan.tx.inputs {
                assert!(
                    self.by_prev.get(input).is_some_and(|waiting| waiting.contains(hash)),
                    "orphan missing from reverse parent index"
                );
            }
        }
        for (outpoint, waiting) in &self.by_prev {
            assert!(!waiting.is_empty());
            for hash in waiting {
                let orphan = self.orphans.get(hash).expect("dangling reverse index entry");
                assert!(orphan.tx.inputs.contains(outpoint));
            }
        }
    }
}

#[cfg(test)]
#[path = "orphan_pool_test.rs"]
mod orphan_pool_test;
