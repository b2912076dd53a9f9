use std::collections::HashMap;
use std::fmt;
use std::time::SystemTime;

use meridian_api::core::{PublicKey, TxHash};
use meridian_api::transaction::{Transaction, TxType};
use serde::{Deserialize, Serialize};

use crate::errors::MempoolError;

pub type MempoolResult<T> = Result<T, MempoolError>;

/// An admitted transaction together with the data the pool caches for it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolEntry {
    pub tx: Transaction,
    /// The canonical serialized bytes, cached for persistence.
    pub raw: Vec<u8>,
    pub hash: TxHash,
    pub size_bytes: u64,
    /// Wall-clock time of admission; the miner consumes entries in this
    /// order.
    pub added: SystemTime,
    /// Chain height at admission, i.e. tip + 1.
    pub height: u32,
    pub fee_nanos: u64,
    /// fee × 1000 / size, integer nanos per kilobyte.
    pub fee_per_kb: u64,
    pub metadata: Option<TransactionMetadata>,
}

impl fmt::Display for PoolEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "< Added: {:?}, Fee: {}, Type: {}, Hash: {} >",
            self.added,
            self.fee_nanos,
            self.tx.tx_type(),
            self.hash
        )
    }
}

/// A public key touched by a transaction, with the role it plays.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct AffectedPublicKey {
    pub public_key: PublicKey,
    pub role: &'static str,
}

/// Metadata describing a transaction's effect, used by the indexer and the
/// JSON API. Serialized outward only; reloads recompute it from the raw
/// transaction.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct TransactionMetadata {
    pub tx_type: TxType,
    pub transactor_public_key: PublicKey,
    pub total_input_nanos: u64,
    pub total_output_nanos: u64,
    pub fee_nanos: u64,
    pub affected_public_keys: Vec<AffectedPublicKey>,
    pub cross_chain: Option<CrossChainExchangeMetadata>,
}

/// Extra metadata for cross-chain exchange transactions.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct CrossChainExchangeMetadata {
    pub foreign_tx_hash: TxHash,
    pub foreign_spend_address: String,
    pub units_burned: u64,
    pub nanos_created: u64,
    pub total_nanos_purchased_before: u64,
    pub total_nanos_purchased_after: u64,
}

/// Per-type summary of the pool's contents.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct SummaryStats {
    pub count: u32,
    pub total_bytes: u64,
}

/// Result of an `evict_unmined_cross_chain` sweep.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct UnminedEvictionReport {
    /// Transactions remaining in the rebuilt pool.
    pub remaining_count: usize,
    /// Evicted transaction counts keyed by transaction type.
    pub evicted_by_type: HashMap<TxType, u64>,
    /// Hashes of evicted pool transactions.
    pub evicted: Vec<TxHash>,
    /// Foreign hashes of every unmined cross-chain exchange seen during the
    /// sweep.
    pub unmined_foreign: Vec<TxHash>,
}

impl UnminedEvictionReport {
    pub fn record_eviction(&mut self, tx: &Transaction) {
        *self.evicted_by_type.entry(tx.tx_type()).or_insert(0) += 1;
        self.evicted.push(tx.hash());
    }
}
