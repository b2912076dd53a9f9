//! Read-only view of the confirmed chain state.
//!
//! The mempool never writes here; mutators exist for the chain layer (and
//! tests) to apply and roll back blocks.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use meridian_api::block::Block;
use meridian_api::core::{Outpoint, PublicKey, TxHash, UtxoEntry};
use meridian_api::transaction::TxType;
use serde::{Deserialize, Serialize};

/// A registered on-chain profile, looked up by username when resolving post
/// mentions.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ProfileEntry {
    pub public_key: PublicKey,
    pub username: String,
}

/// A confirmed post, looked up when indexing likes, replies and reposts.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PostEntry {
    pub post_hash: TxHash,
    pub poster_public_key: PublicKey,
}

#[derive(Debug, Default)]
struct ChainDbInner {
    tip_height: u32,
    utxos: HashMap<Outpoint, UtxoEntry>,
    profiles_by_username: HashMap<String, ProfileEntry>,
    posts: HashMap<TxHash, PostEntry>,
    foreign_merkle_roots: HashSet<TxHash>,
    nanos_purchased: u64,
}

/// The confirmed chain database. Interior locking makes it shareable behind
/// an `Arc` between the chain layer and any number of speculative views.
#[derive(Debug, Default)]
pub struct ChainDb {
    inner: RwLock<ChainDbInner>,
}

impl ChainDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tip_height(&self) -> u32 {
        self.read().tip_height
    }

    pub fn get_utxo(&self, outpoint: &Outpoint) -> Option<UtxoEntry> {
        self.read().utxos.get(outpoint).cloned()
    }

    pub fn profile_for_username(&self, username: &str) -> Option<ProfileEntry> {
        self.read().profiles_by_username.get(&username.to_lowercase()).cloned()
    }

    pub fn post_for_hash(&self, post_hash: &TxHash) -> Option<PostEntry> {
        self.read().posts.get(post_hash).cloned()
    }

    pub fn has_foreign_merkle_root(&self, root: &TxHash) -> bool {
        self.read().foreign_merkle_roots.contains(root)
    }

    /// Total native units ever minted through cross-chain exchanges that have
    /// been confirmed.
    pub fn nanos_purchased(&self) -> u64 {
        self.read().nanos_purchased
    }

    pub fn set_tip_height(&self, height: u32) {
        self.write().tip_height = height;
    }

    pub fn add_utxo(&self, outpoint: Outpoint, entry: UtxoEntry) {
        self.write().utxos.insert(outpoint, entry);
    }

    pub fn remove_utxo(&self, outpoint: &Outpoint) -> Option<UtxoEntry> {
        self.write().utxos.remove(outpoint)
    }

    pub fn register_profile(&self, profile: ProfileEntry) {
        self.write()
            .profiles_by_username
            .insert(profile.username.to_lowercase(), profile);
    }

    pub fn register_post(&self, post: PostEntry) {
        self.write().posts.insert(post.post_hash, post);
    }

    pub fn register_foreign_merkle_root(&self, root: TxHash) {
        self.write().foreign_merkle_roots.insert(root);
    }

    /// Applies a block's UTXO effects and advances the tip. Returns the spent
    /// entries as undo data for [`ChainDb::disconnect_block`].
    pub fn connect_block(&self, block: &Block) -> Vec<(Outpoint, UtxoEntry)> {
        let mut inner = self.write();
        let mut undo = Vec::new();
        for tx in &block.txns {
            let tx_hash = tx.hash();
            for input in &tx.inputs {
                if let Some(spent) = inner.utxos.remove(input) {
                    undo.push((*input, spent));
                }
            }
            for (index, output) in tx.outputs.iter().enumerate() {
                inner.utxos.insert(
                    Outpoint::new(tx_hash, index as u32),
                    UtxoEntry {
                        public_key: output.public_key,
                        amount_nanos: output.amount_nanos,
                        block_height: block.height,
                        is_block_reward: tx.tx_type() == TxType::BlockReward,
                    },
                );
            }
        }
        inner.tip_height = block.height;
        undo
    }

    /// Rolls back a block applied with [`ChainDb::connect_block`].
    pub fn disconnect_block(&self, block: &Block, undo: &[(Outpoint, UtxoEntry)]) {
        let mut inner = self.write();
        for tx in &block.txns {
            let tx_hash = tx.hash();
            for index in 0..tx.outputs.len() {
                inner.utxos.remove(&Outpoint::new(tx_hash, index as u32));
            }
        }
        for (outpoint, entry) in undo {
            inner.utxos.insert(*outpoint, entry.clone());
        }
        inner.tip_height = block.height.saturating_sub(1);
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, ChainDbInner> {
        self.inner.read().expect("chain db lock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, ChainDbInner> {
        self.inner.write().expect("chain db lock poisoned")
    }
}
