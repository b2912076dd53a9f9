//! Shared fixtures for mempool tests: a controllable clock, a funded chain,
//! and transaction constructors.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use meridian_api::core::{Outpoint, PublicKey, TxHash, UtxoEntry};
use meridian_api::test_utils::{public_key_of, sign_transaction, SigningKey};
use meridian_api::transaction::{
    ForeignBurnPayload,
    ForeignBurnTx,
    ForeignInput,
    ForeignOutput,
    Transaction,
    TxOutput,
    TxPayload,
};
use meridian_api::tx_hash;
use meridian_chain::{Chain, ChainDb, ChainParams};
use meridian_mempool_types::errors::MempoolError;
use meridian_mempool_types::mempool_types::PoolEntry;

use crate::config::MempoolConfig;
use crate::mempool::Mempool;
use crate::utils::Clock;

/// A clock tests can advance by hand.
pub struct FakeClock {
    now: Mutex<SystemTime>,
}

impl FakeClock {
    pub fn new(start: SystemTime) -> Self {
        FakeClock { now: Mutex::new(start) }
    }

    pub fn advance(&self, duration: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += duration;
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        FakeClock::new(SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000))
    }
}

impl Clock for FakeClock {
    fn now(&self) -> SystemTime {
        *self.now.lock().unwrap()
    }
}

/// A chain fixture over an in-memory database, with helpers to mint
/// spendable outputs.
pub struct TestChain {
    pub chain: Arc<Chain>,
    pub db: Arc<ChainDb>,
    pub params: Arc<ChainParams>,
    next_funding_tag: AtomicU64,
}

impl TestChain {
    pub fn new() -> Self {
        Self::with_params(ChainParams::default())
    }

    pub fn with_params(params: ChainParams) -> Self {
        let db = Arc::new(ChainDb::new());
        db.set_tip_height(1);
        let params = Arc::new(params);
        let chain = Arc::new(Chain::new(db.clone(), params.clone()));
        TestChain { chain, db, params, next_funding_tag: AtomicU64::new(0xF000_0000) }
    }

    /// Mints a confirmed output owned by `public_key` and returns its
    /// outpoint.
    pub fn fund(&self, public_key: PublicKey, amount_nanos: u64) -> Outpoint {
        let tag = self.next_funding_tag.fetch_add(1, Ordering::Relaxed);
        let outpoint = Outpoint::new(tx_hash!(tag), 0);
        self.db.add_utxo(
            outpoint,
            UtxoEntry { public_key, amount_nanos, block_height: 1, is_block_reward: false },
        );
        outpoint
    }
}

impl Default for TestChain {
    fn default() -> Self {
        TestChain::new()
    }
}

/// Builds and signs a basic transfer.
pub fn signed_transfer(
    signing_key: &SigningKey,
    inputs: Vec<Outpoint>,
    outputs: &[(PublicKey, u64)],
) -> Transaction {
    signed_tx(signing_key, inputs, outputs, TxPayload::BasicTransfer)
}

/// Builds and signs a transaction with an arbitrary payload.
pub fn signed_tx(
    signing_key: &SigningKey,
    inputs: Vec<Outpoint>,
    outputs: &[(PublicKey, u64)],
    payload: TxPayload,
) -> Transaction {
    let mut tx = Transaction {
        inputs,
        outputs: outputs
            .iter()
            .map(|(public_key, amount_nanos)| TxOutput {
                public_key: *public_key,
                amount_nanos: *amount_nanos,
            })
            .collect(),
        public_key: public_key_of(signing_key),
        payload,
        signature: vec![],
    };
    sign_transaction(&mut tx, signing_key);
    tx
}

/// An unmined cross-chain exchange burning `burn_units` from the key derived
/// from `funding_seed`.
pub fn unmined_exchange(funding_seed: u64, burn_units: u64, params: &ChainParams) -> Transaction {
    let funding_key = public_key_of(&meridian_api::test_utils::deterministic_signing_key(
        funding_seed,
    ));
    Transaction {
        inputs: vec![],
        outputs: vec![],
        public_key: funding_key,
        payload: TxPayload::CrossChainExchange(ForeignBurnPayload {
            burn_tx: ForeignBurnTx {
                inputs: vec![ForeignInput {
                    prev_hash: tx_hash!(funding_seed),
                    prev_index: 0,
                    spend_public_key: Some(funding_key),
                }],
                outputs: vec![ForeignOutput {
                    amount_units: burn_units,
                    address: params.foreign_burn_address.clone(),
                }],
            },
            merkle_root: TxHash::ZERO,
            merkle_proof: vec![],
        }),
        signature: vec![],
    }
}

/// The matured form of an unmined exchange: the burn transaction's own hash
/// serves as the (single-leaf) merkle root, which is registered with the
/// chain database so proof checks pass.
pub fn mature_exchange(tx: &Transaction, db: &ChainDb) -> Transaction {
    let mut matured = tx.clone();
    let TxPayload::CrossChainExchange(payload) = &mut matured.payload else {
        panic!("not a cross-chain exchange");
    };
    payload.merkle_root = payload.burn_tx.hash();
    payload.merkle_proof = vec![];
    db.register_foreign_merkle_root(payload.merkle_root);
    matured
}

/// A mempool over the given chain with snapshot regeneration left to the
/// tests.
pub fn test_mempool(test_chain: &TestChain, config: MempoolConfig) -> (Arc<Mempool>, Arc<FakeClock>) {
    let clock = Arc::new(FakeClock::default());
    let mempool = Mempool::new(test_chain.chain.clone(), config, clock.clone());
    (mempool, clock)
}

/// Submits a transaction that must be admitted, returning the admitted
/// entries.
#[track_caller]
pub fn add_tx(mempool: &Mempool, tx: &Transaction) -> Vec<Arc<PoolEntry>> {
    mempool
        .process(tx, true, false, 0, true)
        .unwrap_or_else(|err| panic!("expected admission, got {err}"))
}

/// Submits a transaction and asserts the exact rejection.
#[track_caller]
pub fn add_tx_expect_error(mempool: &Mempool, tx: &Transaction, expected: MempoolError) {
    let err = mempool
        .process(tx, true, false, 0, true)
        .expect_err("expected the transaction to be rejected");
    assert_eq!(err, expected);
}
