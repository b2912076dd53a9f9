//! Network parameters consumed by the mempool and the speculative view.

use std::collections::HashSet;

use meridian_api::core::{PublicKey, TxHash, PUBLIC_KEY_LEN, PUBLIC_KEY_PREFIX};

/// The well-known public key associated with the foreign burn address. No
/// private key exists for it; it only serves as an indexing sink for
/// cross-chain exchanges.
pub const BURN_PUBLIC_KEY: PublicKey = PublicKey({
    let mut bytes = [0xFFu8; PUBLIC_KEY_LEN];
    bytes[0] = PUBLIC_KEY_PREFIX;
    bytes
});

/// Derives the foreign chain's P2PKH-style address for a public key.
pub fn foreign_p2pkh_address(public_key: &PublicKey) -> String {
    let digest = blake3_hash20(public_key);
    format!("f1{}", hex::encode(digest))
}

fn blake3_hash20(public_key: &PublicKey) -> [u8; 20] {
    let digest = blake3::hash(public_key.as_bytes());
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest.as_bytes()[..20]);
    out
}

#[derive(Clone, Debug)]
pub struct ChainParams {
    /// The foreign-chain address whose spend keys are unknown; value sent to
    /// it is provably destroyed.
    pub foreign_burn_address: String,
    /// Foreign outputs below this many base units are considered dust.
    pub foreign_dust_threshold_units: u64,
    /// Exchange rate seeding the speculative view's purchase counters.
    pub initial_usd_cents_per_foreign_coin: u64,
    /// Hard-coded denylist of foreign burn transactions that must never be
    /// admitted again.
    pub nuked_foreign_txns: HashSet<TxHash>,
}

impl Default for ChainParams {
    fn default() -> Self {
        ChainParams {
            foreign_burn_address: foreign_p2pkh_address(&BURN_PUBLIC_KEY),
            foreign_dust_threshold_units: 1000,
            initial_usd_cents_per_foreign_coin: 5_000_000,
            nuked_foreign_txns: HashSet::new(),
        }
    }
}
