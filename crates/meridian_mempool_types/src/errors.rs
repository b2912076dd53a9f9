use meridian_api::core::TxHash;
use meridian_chain::ViewError;
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MempoolError {
    #[error("transaction {tx_hash} is already in the pool")]
    Duplicate { tx_hash: TxHash },
    #[error("a mined cross-chain exchange with hash {tx_hash} is already in the pool")]
    DuplicateCrossChainExchange { tx_hash: TxHash },
    #[error("block reward transactions are only valid at block position 0")]
    IndividualBlockReward,
    #[error(
        "fee rate {fee_per_kb} nanos/KB is below the required minimum {min_fee_rate_per_kb}"
    )]
    InsufficientFeeMinFee { fee_per_kb: u64, min_fee_rate_per_kb: u64 },
    #[error("low-fee transaction rejected by the rate limiter")]
    InsufficientFeeRateLimit,
    #[error(
        "pool holds {pool_size_bytes} bytes; adding {tx_size_bytes} more would exceed the cap"
    )]
    InsufficientFeePriorityQueue { tx_size_bytes: u64, pool_size_bytes: u64 },
    #[error("transaction of {tx_size_bytes} bytes exceeds the {max_size_bytes}-byte limit")]
    TooLarge { tx_size_bytes: u64, max_size_bytes: u64 },
    #[error("transaction has missing parents and unconnected admission is disabled")]
    UnconnectedNotAllowed { missing_parents: Vec<TxHash> },
    #[error("the burn address cannot burn to itself")]
    BurnAddressCannotBurn,
    #[error("no valid funding public key in the foreign burn transaction's inputs")]
    CrossChainExchangeInvalidPublicKey,
    #[error("failed to compute the foreign burn output total")]
    CrossChainExchangeComputeBurnOutput,
    #[error("total foreign output to the burn address must be strictly positive")]
    CrossChainExchangeTotalOutputNonPositive,
    #[error("foreign burn transaction {foreign_tx_hash} is on the nuked denylist")]
    NukedCrossChainTransaction { foreign_tx_hash: TxHash },
    #[error("foreign burn transaction spends input {prev_hash}:{prev_index} more than once")]
    CrossChainDuplicateForeignInput { prev_hash: TxHash, prev_index: u32 },
    #[error("foreign output of {amount_units} units is below the dust threshold {dust_threshold}")]
    CrossChainDustOutput { amount_units: u64, dust_threshold: u64 },
    #[error(transparent)]
    Validation(#[from] ViewError),
}
