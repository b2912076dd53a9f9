//! Core identifier types.

use std::fmt;

use serde::de::{Error as DeError, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Length of a transaction or block hash in bytes.
pub const HASH_LEN: usize = 32;

/// Length of a compressed public key: one prefix byte followed by the key
/// material.
pub const PUBLIC_KEY_LEN: usize = 33;

/// Prefix byte of a well-formed compressed public key.
pub const PUBLIC_KEY_PREFIX: u8 = 0x02;

/// A 32-byte transaction hash.
#[derive(
    Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize,
)]
pub struct TxHash(pub [u8; HASH_LEN]);

impl TxHash {
    pub const ZERO: TxHash = TxHash([0u8; HASH_LEN]);

    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; HASH_LEN]
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl From<[u8; HASH_LEN]> for TxHash {
    fn from(bytes: [u8; HASH_LEN]) -> Self {
        TxHash(bytes)
    }
}

/// A compressed public key identifying an account on the chain.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct PublicKey(pub [u8; PUBLIC_KEY_LEN]);

impl PublicKey {
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.0
    }

    /// The key material without the compression prefix.
    pub fn key_material(&self) -> &[u8] {
        &self.0[1..]
    }

    pub fn has_valid_prefix(&self) -> bool {
        self.0[0] == PUBLIC_KEY_PREFIX || self.0[0] == PUBLIC_KEY_PREFIX + 1
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.0))
    }
}

// Serde lacks blanket impls for 33-byte arrays, so the key serializes as a
// plain byte string.
impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.0)
    }
}

struct PublicKeyVisitor;

impl<'de> Visitor<'de> for PublicKeyVisitor {
    type Value = PublicKey;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "a {PUBLIC_KEY_LEN}-byte compressed public key")
    }

    fn visit_bytes<E: DeError>(self, v: &[u8]) -> Result<PublicKey, E> {
        let bytes: [u8; PUBLIC_KEY_LEN] =
            v.try_into().map_err(|_| E::invalid_length(v.len(), &self))?;
        Ok(PublicKey(bytes))
    }

    fn visit_seq<A: serde::de::SeqAccess<'de>>(self, mut seq: A) -> Result<PublicKey, A::Error> {
        let mut bytes = [0u8; PUBLIC_KEY_LEN];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = seq
                .next_element()?
                .ok_or_else(|| A::Error::invalid_length(i, &self))?;
        }
        Ok(PublicKey(bytes))
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_bytes(PublicKeyVisitor)
    }
}

/// A reference to a prior transaction output: the creating transaction's hash
/// and the output's position within it.
#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize,
)]
pub struct Outpoint {
    pub tx_hash: TxHash,
    pub index: u32,
}

impl Outpoint {
    pub fn new(tx_hash: TxHash, index: u32) -> Self {
        Outpoint { tx_hash, index }
    }
}

impl fmt::Display for Outpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tx_hash, self.index)
    }
}

/// An unspent output as stored by the chain and overlaid by speculative views.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct UtxoEntry {
    pub public_key: PublicKey,
    pub amount_nanos: u64,
    /// Height of the block that created the output; tip+1 for mempool-created
    /// outputs.
    pub block_height: u32,
    pub is_block_reward: bool,
}
