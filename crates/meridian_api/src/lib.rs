//! Representations of canonical Meridian components.
//!
//! Domain types shared by the chain, mempool and RPC layers: hashes, public
//! keys, outpoints, transactions with their per-type payloads, and the
//! canonical byte codec used for hashing and signing.

pub mod block;
pub mod core;
#[cfg(any(feature = "testing", test))]
pub mod test_utils;
pub mod transaction;

/// The error type returned by the Meridian API crate.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
pub enum MeridianApiError {
    #[error("public key is not a well-formed compressed key")]
    MalformedPublicKey,
    #[error("signature is missing or not {expected} bytes", expected = transaction::SIGNATURE_LEN)]
    MalformedSignature,
    #[error("signature does not verify against the transactor public key")]
    SignatureVerification,
}
