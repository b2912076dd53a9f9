//! On-disk persistence of the admitted set.
//!
//! Entries are written to a fresh store under `temp_mempool_dump/`, keyed by
//! admission timestamp so a reload replays them in time-ascending order. On
//! success the directories rotate temp → latest → previous; at least one
//! complete dump survives a crash mid-swap.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use meridian_api::transaction::Transaction;
use meridian_mempool_types::mempool_types::PoolEntry;
use tracing::{debug, info, warn};

use crate::utils::unix_nanos;

pub const TEMP_MEMPOOL_DUMP_DIR: &str = "temp_mempool_dump";
pub const PREVIOUS_MEMPOOL_DUMP_DIR: &str = "previous_mempool_dump";
pub const LATEST_MEMPOOL_DUMP_DIR: &str = "latest_mempool_dump";

/// Entries per write batch, to avoid overwhelming the store.
const DUMP_BATCH_SIZE: usize = 1000;

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error(transparent)]
    Store(#[from] sled::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Key layout: big-endian admission nanos, then the entry's ordinal in the
/// dump. Lexicographic key order is therefore chronological, with same-tick
/// admissions kept in admission order.
fn dump_key(entry: &PoolEntry, ordinal: u32) -> [u8; 12] {
    let mut key = [0u8; 12];
    key[..8].copy_from_slice(&unix_nanos(entry.added).to_be_bytes());
    key[8..].copy_from_slice(&ordinal.to_be_bytes());
    key
}

/// Writes all entries into a fresh temp store in batches, then rotates the
/// dump directories.
pub fn dump_entries(dump_root: &Path, entries: &[Arc<PoolEntry>]) -> Result<(), PersistenceError> {
    fs::create_dir_all(dump_root)?;
    let temp_dir = dump_root.join(TEMP_MEMPOOL_DUMP_DIR);
    if temp_dir.exists() {
        // Leftover from a run that died before the swap.
        fs::remove_dir_all(&temp_dir)?;
    }

    let db = sled::open(&temp_dir)?;
    let mut batch = sled::Batch::default();
    let mut batched = 0usize;
    for (ordinal, entry) in entries.iter().enumerate() {
        batch.insert(&dump_key(entry, ordinal as u32)[..], entry.raw.clone());
        batched += 1;
        if batched == DUMP_BATCH_SIZE {
            db.apply_batch(std::mem::take(&mut batch))?;
            batched = 0;
            debug!(through = ordinal, "dumped mempool batch");
        }
    }
    if batched > 0 {
        db.apply_batch(batch)?;
    }
    db.flush()?;
    drop(db);

    let latest_dir = dump_root.join(LATEST_MEMPOOL_DUMP_DIR);
    let previous_dir = dump_root.join(PREVIOUS_MEMPOOL_DUMP_DIR);
    if latest_dir.exists() {
        if previous_dir.exists() {
            fs::remove_dir_all(&previous_dir)?;
        }
        fs::rename(&latest_dir, &previous_dir)?;
    }
    fs::rename(&temp_dir, &latest_dir)?;

    info!(n_entries = entries.len(), "dumped mempool transactions; safe to reboot");
    Ok(())
}

/// Loads the newest complete dump, `latest` falling back to `previous` (the
/// process can die after moving latest aside), in time-ascending order.
/// Undecodable values are logged and skipped.
pub fn load_transactions(dump_root: &Path) -> Result<Vec<Transaction>, PersistenceError> {
    let latest_dir = dump_root.join(LATEST_MEMPOOL_DUMP_DIR);
    let previous_dir = dump_root.join(PREVIOUS_MEMPOOL_DUMP_DIR);
    let source = if latest_dir.exists() {
        latest_dir
    } else if previous_dir.exists() {
        previous_dir
    } else {
        return Ok(Vec::new());
    };

    let db = sled::open(&source)?;
    let mut transactions = Vec::new();
    for item in db.iter() {
        let (_key, value) = item?;
        match Transaction::from_bytes(&value) {
            Ok(tx) => transactions.push(tx),
            Err(err) => warn!(%err, "skipping undecodable persisted transaction"),
        }
    }
    Ok(transactions)
}

#[cfg(test)]
#[path = "persistence_test.rs"]
mod persistence_test;
