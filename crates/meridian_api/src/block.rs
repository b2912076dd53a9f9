//! Minimal block representation consumed by the mempool's reorg handlers.

use serde::{Deserialize, Serialize};

use crate::transaction::Transaction;

/// A connected or disconnected block. By consensus rule the transaction at
/// position 0 is the block reward.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub height: u32,
    pub txns: Vec<Transaction>,
}

impl Block {
    /// The block's transactions minus the position-0 block reward.
    pub fn non_reward_txns(&self) -> &[Transaction] {
        if self.txns.is_empty() {
            &[]
        } else {
            &self.txns[1..]
        }
    }
}
