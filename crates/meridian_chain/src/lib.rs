//! The confirmed-chain side of the Meridian node, as seen by the mempool.
//!
//! Provides the network parameters, a read-only view of the confirmed chain
//! database, and the speculative UTXO view that layers pending transactions
//! on top of it.

pub mod chain;
pub mod db;
pub mod params;
pub mod view;

pub use chain::Chain;
pub use db::{ChainDb, PostEntry, ProfileEntry};
pub use params::ChainParams;
pub use view::{ConnectOutcome, SpeculativeView};

use meridian_api::core::{Outpoint, TxHash};

/// A rule violation detected while connecting a transaction to a speculative
/// view. Any of these leaves the view's overlay in an undefined state; the
/// caller must discard the view and re-clone.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
pub enum ViewError {
    #[error("input {0} does not exist or is already spent")]
    UtxoNotFound(Outpoint),
    #[error("output {0} already exists")]
    UtxoAlreadyExists(Outpoint),
    #[error("input {0} is not owned by the transactor key")]
    InputOwnership(Outpoint),
    #[error("total output {total_output} exceeds total input {total_input}")]
    OutputExceedsInput { total_input: u64, total_output: u64 },
    #[error("amount overflow while summing transaction values")]
    AmountOverflow,
    #[error("transactor public key is malformed")]
    MalformedPublicKey,
    #[error("transaction signature does not verify")]
    InvalidSignature,
    #[error("burn proof does not fold to the declared merkle root")]
    BurnProofInvalid,
    #[error("merkle root {0} is not a known foreign-chain block root")]
    UnknownForeignMerkleRoot(TxHash),
    #[error("no funding public key is extractable from the foreign inputs")]
    InvalidFundingPublicKey,
    #[error("the burn address cannot be credited for its own burn")]
    BurnAddressCannotBurn,
    #[error("overflow while summing foreign burn outputs")]
    BurnOutputOverflow,
    #[error("total burn output must be strictly positive")]
    NonPositiveBurnOutput,
}
