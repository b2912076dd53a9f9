//! Deterministic constructors for tests.

use ed25519_dalek::Signer;
pub use ed25519_dalek::SigningKey;

use crate::core::{PublicKey, PUBLIC_KEY_LEN, PUBLIC_KEY_PREFIX};
use crate::transaction::Transaction;

/// Derives a signing key from a seed, so tests get stable keys without an
/// RNG.
pub fn deterministic_signing_key(seed: u64) -> SigningKey {
    let seed_bytes = *blake3::hash(&seed.to_le_bytes()).as_bytes();
    SigningKey::from_bytes(&seed_bytes)
}

/// The compressed public key of a signing key.
pub fn public_key_of(signing_key: &SigningKey) -> PublicKey {
    let mut bytes = [0u8; PUBLIC_KEY_LEN];
    bytes[0] = PUBLIC_KEY_PREFIX;
    bytes[1..].copy_from_slice(signing_key.verifying_key().as_bytes());
    PublicKey(bytes)
}

/// Signs the transaction in place over its no-signature encoding.
pub fn sign_transaction(tx: &mut Transaction, signing_key: &SigningKey) {
    let message = tx.to_bytes(false);
    tx.signature = signing_key.sign(&message).to_bytes().to_vec();
}

/// A utility macro to create a [`TxHash`](crate::core::TxHash) from an
/// unsigned integer.
#[macro_export]
macro_rules! tx_hash {
    ($h:expr) => {{
        let mut bytes = [0u8; $crate::core::HASH_LEN];
        bytes[..8].copy_from_slice(&u64::from($h).to_le_bytes());
        $crate::core::TxHash(bytes)
    }};
}

/// A utility macro to create a [`PublicKey`](crate::core::PublicKey) from an
/// unsigned integer. The key is well-prefixed but not on the curve; use
/// [`public_key_of`] where signature verification matters.
#[macro_export]
macro_rules! public_key {
    ($k:expr) => {{
        let mut bytes = [0u8; $crate::core::PUBLIC_KEY_LEN];
        bytes[0] = $crate::core::PUBLIC_KEY_PREFIX;
        bytes[1..9].copy_from_slice(&u64::from($k).to_le_bytes());
        $crate::core::PublicKey(bytes)
    }};
}
