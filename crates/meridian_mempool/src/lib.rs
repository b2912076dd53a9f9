//! The Meridian transaction mempool.
//!
//! Aggregates unconfirmed transactions, validates them against a speculative
//! view of the chain, keeps them indexed for miners and the JSON API, and
//! survives restarts by dumping the admitted set to disk.

pub mod config;
mod fee_heap;
mod indexer;
pub mod mempool;
pub mod metrics;
mod orphan_pool;
pub mod persistence;
mod pool_index;
pub mod runner;
#[cfg(any(feature = "testing", test))]
pub mod test_utils;
pub mod utils;

pub use config::MempoolConfig;
pub use mempool::{Mempool, ReadSnapshot};

use std::time::Duration;

/// Maximum number of bytes the pool can store across all of its
/// transactions. Once reached, further admissions are rejected.
pub const MAX_TOTAL_TRANSACTION_SIZE_BYTES: u64 = 250_000_000;

/// How long an unconnected transaction may wait for its parents before the
/// expiry sweep removes it.
pub const UNCONNECTED_TXN_EXPIRATION: Duration = Duration::from_secs(5 * 60);

/// Maximum number of unconnected transactions the pool will hold.
pub const MAX_UNCONNECTED_TRANSACTIONS: usize = 10_000;

/// Maximum serialized size of a single unconnected transaction.
pub const MAX_UNCONNECTED_TX_SIZE_BYTES: u64 = 100_000;

/// Bytes of low-fee transactions tolerated per ten-minute half-life window
/// before the rate limiter starts rejecting.
pub const LOW_FEE_TX_LIMIT_BYTES_PER_TEN_MINUTES: f64 = 150_000.0;

/// Half-life of the low-fee byte accumulator.
pub const LOW_FEE_DECAY_HALF_LIFE_SECS: f64 = 600.0;
