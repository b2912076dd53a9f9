//! Transactions, per-type payloads and the canonical byte codec.
//!
//! A transaction spends prior outputs (by [`Outpoint`]), creates new outputs,
//! and carries a type-specific payload. The canonical encoding is bincode;
//! the transaction hash and the signing message are both computed over the
//! encoding with the signature stripped.

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, IntoStaticStr};

use crate::core::{Outpoint, PublicKey, TxHash, HASH_LEN};
use crate::MeridianApiError;

/// Length of a transaction signature in bytes.
pub const SIGNATURE_LEN: usize = 64;

/// One newly created output.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TxOutput {
    pub public_key: PublicKey,
    pub amount_nanos: u64,
}

/// The transaction type, used for policy decisions and summary stats.
#[derive(
    Clone,
    Copy,
    Debug,
    Display,
    EnumIter,
    Eq,
    Hash,
    IntoStaticStr,
    PartialEq,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
pub enum TxType {
    BlockReward,
    BasicTransfer,
    CrossChainExchange,
    PrivateMessage,
    SubmitPost,
    UpdateProfile,
    Follow,
    Like,
    CreatorCoin,
    CreatorCoinTransfer,
    SwapIdentity,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum CreatorCoinOperation {
    Buy,
    Sell,
    Add,
}

/// An input of the wrapped foreign-chain burn transaction. P2PKH-style spends
/// expose the spender's public key in the unlocking data.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ForeignInput {
    pub prev_hash: TxHash,
    pub prev_index: u32,
    pub spend_public_key: Option<PublicKey>,
}

/// An output of the wrapped foreign-chain burn transaction, denominated in
/// foreign base units and addressed by the foreign chain's address encoding.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ForeignOutput {
    pub amount_units: u64,
    pub address: String,
}

/// The foreign-chain transaction whose burn output backs a cross-chain
/// exchange.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ForeignBurnTx {
    pub inputs: Vec<ForeignInput>,
    pub outputs: Vec<ForeignOutput>,
}

impl ForeignBurnTx {
    pub fn hash(&self) -> TxHash {
        let bytes = bincode::serialize(self).expect("foreign burn tx serialization");
        TxHash(*blake3::hash(&bytes).as_bytes())
    }
}

/// One step of a merkle inclusion proof. `is_right_sibling` states on which
/// side the sibling hash is concatenated.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct MerkleStep {
    pub hash: TxHash,
    pub is_right_sibling: bool,
}

/// Payload of a cross-chain exchange transaction.
///
/// While the foreign transaction is unmined the merkle root is all-zero and
/// the proof is empty; once mined, the payload is upgraded in place with the
/// real root and proof.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ForeignBurnPayload {
    pub burn_tx: ForeignBurnTx,
    pub merkle_root: TxHash,
    pub merkle_proof: Vec<MerkleStep>,
}

impl ForeignBurnPayload {
    pub fn is_unmined(&self) -> bool {
        self.merkle_root.is_zero()
    }

    /// Folds the burn transaction's hash through the proof steps, yielding
    /// the root the proof commits to.
    pub fn computed_merkle_root(&self) -> TxHash {
        let mut acc = self.burn_tx.hash();
        for step in &self.merkle_proof {
            let mut buf = [0u8; 2 * HASH_LEN];
            if step.is_right_sibling {
                buf[..HASH_LEN].copy_from_slice(acc.as_bytes());
                buf[HASH_LEN..].copy_from_slice(step.hash.as_bytes());
            } else {
                buf[..HASH_LEN].copy_from_slice(step.hash.as_bytes());
                buf[HASH_LEN..].copy_from_slice(acc.as_bytes());
            }
            acc = TxHash(*blake3::hash(&buf).as_bytes());
        }
        acc
    }
}

/// Type-specific transaction payload.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum TxPayload {
    BlockReward,
    BasicTransfer,
    CrossChainExchange(ForeignBurnPayload),
    PrivateMessage {
        recipient: PublicKey,
        encrypted_text: Vec<u8>,
        timestamp_nanos: u64,
    },
    SubmitPost {
        body: String,
        parent_post: Option<TxHash>,
        reposted_post: Option<TxHash>,
    },
    UpdateProfile {
        profile_public_key: Option<PublicKey>,
        new_username: String,
        new_description: String,
    },
    Follow {
        followed: PublicKey,
        is_unfollow: bool,
    },
    Like {
        liked_post: TxHash,
        is_unlike: bool,
    },
    CreatorCoin {
        creator: PublicKey,
        operation: CreatorCoinOperation,
        nanos_to_spend: u64,
        coins_to_sell: u64,
    },
    CreatorCoinTransfer {
        creator: PublicKey,
        receiver: PublicKey,
        coin_nanos: u64,
    },
    SwapIdentity {
        from: PublicKey,
        to: PublicKey,
    },
}

impl TxPayload {
    pub fn tx_type(&self) -> TxType {
        match self {
            TxPayload::BlockReward => TxType::BlockReward,
            TxPayload::BasicTransfer => TxType::BasicTransfer,
            TxPayload::CrossChainExchange(_) => TxType::CrossChainExchange,
            TxPayload::PrivateMessage { .. } => TxType::PrivateMessage,
            TxPayload::SubmitPost { .. } => TxType::SubmitPost,
            TxPayload::UpdateProfile { .. } => TxType::UpdateProfile,
            TxPayload::Follow { .. } => TxType::Follow,
            TxPayload::Like { .. } => TxType::Like,
            TxPayload::CreatorCoin { .. } => TxType::CreatorCoin,
            TxPayload::CreatorCoinTransfer { .. } => TxType::CreatorCoinTransfer,
            TxPayload::SwapIdentity { .. } => TxType::SwapIdentity,
        }
    }
}

/// A signed Meridian transaction.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub inputs: Vec<Outpoint>,
    pub outputs: Vec<TxOutput>,
    /// The transactor: owner of every spent input and signer of the
    /// transaction.
    pub public_key: PublicKey,
    pub payload: TxPayload,
    pub signature: Vec<u8>,
}

impl Transaction {
    /// Canonical byte encoding. With `with_signature = false` the signature
    /// is cleared and, for cross-chain exchanges, the merkle proof fields
    /// are zeroed; this form is the hashing and signing message. Excluding
    /// the proof from the identity lets a matured proof upgrade a pooled
    /// exchange without changing its hash.
    pub fn to_bytes(&self, with_signature: bool) -> Vec<u8> {
        if with_signature {
            bincode::serialize(self).expect("transaction serialization")
        } else {
            let mut stripped = self.clone();
            stripped.signature.clear();
            if let TxPayload::CrossChainExchange(payload) = &mut stripped.payload {
                payload.merkle_root = TxHash::ZERO;
                payload.merkle_proof.clear();
            }
            bincode::serialize(&stripped).expect("transaction serialization")
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Box<bincode::ErrorKind>> {
        bincode::deserialize(bytes)
    }

    /// Serialized size in bytes, signature included.
    pub fn serialized_len(&self) -> u64 {
        self.to_bytes(true).len() as u64
    }

    pub fn hash(&self) -> TxHash {
        TxHash(*blake3::hash(&self.to_bytes(false)).as_bytes())
    }

    pub fn tx_type(&self) -> TxType {
        self.payload.tx_type()
    }

    pub fn cross_chain_payload(&self) -> Option<&ForeignBurnPayload> {
        match &self.payload {
            TxPayload::CrossChainExchange(payload) => Some(payload),
            _ => None,
        }
    }

    /// Verifies the transactor signature over the no-signature encoding.
    pub fn verify_signature(&self) -> Result<(), MeridianApiError> {
        if !self.public_key.has_valid_prefix() {
            return Err(MeridianApiError::MalformedPublicKey);
        }
        let key_material: [u8; 32] = self
            .public_key
            .key_material()
            .try_into()
            .map_err(|_| MeridianApiError::MalformedPublicKey)?;
        let verifying_key = VerifyingKey::from_bytes(&key_material)
            .map_err(|_| MeridianApiError::MalformedPublicKey)?;
        let signature_bytes: [u8; SIGNATURE_LEN] = self
            .signature
            .as_slice()
            .try_into()
            .map_err(|_| MeridianApiError::MalformedSignature)?;
        let signature = Signature::from_bytes(&signature_bytes);
        verifying_key
            .verify(&self.to_bytes(false), &signature)
            .map_err(|_| MeridianApiError::SignatureVerification)
    }
}

#[cfg(test)]
#[path = "transaction_test.rs"]
mod transaction_test;
