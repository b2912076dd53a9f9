//! The mempool's central state machine.
//!
//! [`PoolCore`] owns the authoritative state behind one writer lock: the
//! primary index, the orphan pool, both speculative views and the low-fee
//! accumulator. [`Mempool`] wraps it with the lock, the lock-free read
//! snapshot and the public operations.
//!
//! Validation applies candidates to the *backup* view; because a failed
//! connect leaves a view undefined, the backup is simply re-cloned from the
//! *universal* view on any failure instead of rolling back. Reorgs rebuild a
//! fresh core by replaying the old entries in admission order and swap it in
//! under the writer lock.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread;
use std::time::Duration;

use arc_swap::ArcSwap;
use meridian_api::block::Block;
use meridian_api::core::{Outpoint, PublicKey, TxHash};
use meridian_api::transaction::{ForeignBurnPayload, Transaction, TxType};
use meridian_chain::params::foreign_p2pkh_address;
use meridian_chain::view::{compute_burn_output, extract_funding_public_key, ConnectOutcome};
use meridian_chain::{Chain, SpeculativeView};
use meridian_mempool_types::errors::MempoolError;
use meridian_mempool_types::mempool_types::{
    MempoolResult,
    PoolEntry,
    SummaryStats,
    UnminedEvictionReport,
};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::config::MempoolConfig;
use crate::indexer;
use crate::metrics::{
    count_dropped,
    count_received,
    count_snapshot_regeneration,
    set_pool_gauges,
    DropReason,
};
use crate::orphan_pool::OrphanPool;
use crate::persistence::{self, PersistenceError};
use crate::pool_index::PoolIndex;
use crate::utils::{unix_secs, Clock};
use crate::{LOW_FEE_DECAY_HALF_LIFE_SECS, LOW_FEE_TX_LIMIT_BYTES_PER_TEN_MINUTES};

#[cfg(test)]
#[path = "mempool_test.rs"]
pub mod mempool_test;

const SNAPSHOT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Outcome of validating one candidate: admitted, or missing parents the
/// caller may route to the orphan pool.
enum Acceptance {
    Accepted(Arc<PoolEntry>),
    MissingParents(Vec<TxHash>),
}

/// The authoritative mempool state, guarded by `Mempool`'s writer lock.
pub(crate) struct PoolCore {
    chain: Arc<Chain>,
    clock: Arc<dyn Clock>,
    min_fee_rate_nanos_per_kb: u64,
    rate_limit_fee_rate_nanos_per_kb: u64,
    pub(crate) index: PoolIndex,
    pub(crate) orphans: OrphanPool,
    /// The composition of the confirmed state and every admitted entry, in
    /// admission order.
    universal_view: SpeculativeView,
    /// Scratch clone candidates are applied to; discarded and re-cloned
    /// whenever a connect fails.
    backup_view: SpeculativeView,
    /// Exponentially decayed byte count of admitted low-fee transactions.
    low_fee_size_accumulator: f64,
    last_low_fee_unix_secs: u64,
}

impl PoolCore {
    fn new(
        chain: Arc<Chain>,
        clock: Arc<dyn Clock>,
        min_fee_rate_nanos_per_kb: u64,
        rate_limit_fee_rate_nanos_per_kb: u64,
        orphan_scan_interval: Duration,
    ) -> Self {
        let universal_view = chain.speculative_view();
        let backup_view = universal_view.clone();
        PoolCore {
            chain,
            clock,
            min_fee_rate_nanos_per_kb,
            rate_limit_fee_rate_nanos_per_kb,
            index: PoolIndex::new(),
            orphans: OrphanPool::new(orphan_scan_interval),
            universal_view,
            backup_view,
            low_fee_size_accumulator: 0.0,
            last_low_fee_unix_secs: 0,
        }
    }

    /// Validates a candidate and, on success, tries to promote orphans that
    /// were waiting on it. Returns every newly admitted entry, the candidate
    /// first; an empty list means the candidate went to the orphan pool.
    fn process_transaction(
        &mut self,
        tx: &Transaction,
        allow_orphan: bool,
        rate_limit: bool,
        peer_id: u64,
        verify_signatures: bool,
    ) -> MempoolResult<Vec<Arc<PoolEntry>>> {
        trace!(tx_hash = %tx.hash(), "processing transaction");
        match self.try_accept(tx, rate_limit, true, verify_signatures)? {
            Acceptance::Accepted(entry) => {
                let mut admitted = vec![entry];
                admitted.extend(self.promote_orphans(tx, rate_limit, verify_signatures));
                Ok(admitted)
            }
            Acceptance::MissingParents(missing_parents) => {
                if !allow_orphan {
                    trace!(tx_hash = %tx.hash(), "rejecting unconnected transaction");
                    return Err(MempoolError::UnconnectedNotAllowed { missing_parents });
                }
                self.orphans.add(tx.clone(), peer_id, self.clock.now())?;
                Ok(Vec::new())
            }
        }
    }

    /// The admission pipeline for a single candidate. The write lock must be
    /// held.
    fn try_accept(
        &mut self,
        tx: &Transaction,
        rate_limit: bool,
        reject_duplicate_orphans: bool,
        verify_signatures: bool,
    ) -> MempoolResult<Acceptance> {
        // Block rewards are only valid at block position 0.
        if tx.tx_type() == TxType::BlockReward {
            return Err(MempoolError::IndividualBlockReward);
        }

        // The cross-chain logic is customized enough to live on its own
        // path: it supports admission before the foreign proof matures.
        if let Some(payload) = tx.cross_chain_payload() {
            return self.try_accept_cross_chain(tx, payload);
        }

        let hash = tx.hash();
        if self.index.contains(&hash)
            || (reject_duplicate_orphans && self.orphans.contains(&hash))
        {
            return Err(MempoolError::Duplicate { tx_hash: hash });
        }

        // Any input without a resolvable output makes this an unconnected
        // transaction. Deduplicate the missing parent hashes.
        let mut missing_parents: Vec<TxHash> = Vec::new();
        for input in &tx.inputs {
            if self.universal_view.get_utxo(input).is_none()
                && !missing_parents.contains(&input.tx_hash)
            {
                missing_parents.push(input.tx_hash);
            }
        }
        if !missing_parents.is_empty() {
            return Ok(Acceptance::MissingParents(missing_parents));
        }

        let height = self.chain.tip_height() + 1;
        let nanos_purchased_before = self.backup_view.nanos_purchased();
        let usd_cents_before = self.backup_view.usd_cents_per_foreign_coin();
        let outcome = match self.backup_view.connect_transaction(
            tx,
            &hash,
            0,
            height,
            verify_signatures,
            false,
            false,
        ) {
            Ok(outcome) => outcome,
            Err(err) => {
                self.rebuild_backup_view();
                return Err(err.into());
            }
        };

        let raw = tx.to_bytes(true);
        let serialized_len = raw.len() as u64;
        let fee_per_kb = (u128::from(outcome.fee) * 1000 / u128::from(serialized_len)) as u64;

        // Fee floor: the first line of defense against mempool flooding.
        if rate_limit && fee_per_kb < self.min_fee_rate_nanos_per_kb {
            debug!(
                fee_per_kb,
                min = self.min_fee_rate_nanos_per_kb,
                tx_hash = %hash,
                "fee rate below required minimum"
            );
            self.rebuild_backup_view();
            return Err(MempoolError::InsufficientFeeMinFee {
                fee_per_kb,
                min_fee_rate_per_kb: self.min_fee_rate_nanos_per_kb,
            });
        }

        if rate_limit && fee_per_kb < self.rate_limit_fee_rate_nanos_per_kb {
            if let Err(err) = self.apply_low_fee_rate_limit(serialized_len) {
                self.rebuild_backup_view();
                return Err(err);
            }
        }

        match self.add_entry(
            tx,
            raw,
            hash,
            height,
            outcome,
            nanos_purchased_before,
            usd_cents_before,
        ) {
            Ok(entry) => {
                trace!(tx_hash = %hash, pool_size = self.index.len(), "accepted transaction");
                Ok(Acceptance::Accepted(entry))
            }
            Err(err) => {
                self.rebuild_backup_view();
                Err(err)
            }
        }
    }

    /// Decays the low-fee byte accumulator and charges the candidate's size
    /// against it. Errors when the window is saturated.
    fn apply_low_fee_rate_limit(&mut self, serialized_len: u64) -> MempoolResult<()> {
        let now_unix = unix_secs(self.clock.now());
        let elapsed_secs = now_unix.saturating_sub(self.last_low_fee_unix_secs);
        self.low_fee_size_accumulator /=
            2f64.powf(elapsed_secs as f64 / LOW_FEE_DECAY_HALF_LIFE_SECS);
        self.last_low_fee_unix_secs = now_unix;

        if self.low_fee_size_accumulator >= LOW_FEE_TX_LIMIT_BYTES_PER_TEN_MINUTES {
            return Err(MempoolError::InsufficientFeeRateLimit);
        }

        let old_total = self.low_fee_size_accumulator;
        self.low_fee_size_accumulator += serialized_len as f64;
        trace!(
            old_total,
            new_total = self.low_fee_size_accumulator,
            limit = LOW_FEE_TX_LIMIT_BYTES_PER_TEN_MINUTES,
            "charged low-fee accumulator"
        );
        Ok(())
    }

    /// The cross-chain exchange admission path.
    ///
    /// An exchange without a matured burn proof is admitted optimistically;
    /// once the proof arrives, the pooled entry is upgraded in place so the
    /// purchase keeps its admission time and heap position.
    fn try_accept_cross_chain(
        &mut self,
        tx: &Transaction,
        payload: &ForeignBurnPayload,
    ) -> MempoolResult<Acceptance> {
        let params = self.chain.params().clone();
        let foreign_tx_hash = payload.burn_tx.hash();

        if params.nuked_foreign_txns.contains(&foreign_tx_hash) {
            warn!(%foreign_tx_hash, "rejecting cross-chain exchange from the nuked list");
            return Err(MempoolError::NukedCrossChainTransaction { foreign_tx_hash });
        }

        let mut seen_inputs = HashSet::new();
        for input in &payload.burn_tx.inputs {
            if !seen_inputs.insert((input.prev_hash, input.prev_index)) {
                return Err(MempoolError::CrossChainDuplicateForeignInput {
                    prev_hash: input.prev_hash,
                    prev_index: input.prev_index,
                });
            }
        }

        for output in &payload.burn_tx.outputs {
            if output.amount_units < params.foreign_dust_threshold_units {
                return Err(MempoolError::CrossChainDustOutput {
                    amount_units: output.amount_units,
                    dust_threshold: params.foreign_dust_threshold_units,
                });
            }
        }

        let funding_key = extract_funding_public_key(&payload.burn_tx)
            .map_err(|_| MempoolError::CrossChainExchangeInvalidPublicKey)?;
        if foreign_p2pkh_address(&funding_key) == params.foreign_burn_address {
            return Err(MempoolError::BurnAddressCannotBurn);
        }
        let burn_units = compute_burn_output(&payload.burn_tx, &params.foreign_burn_address)
            .map_err(|_| MempoolError::CrossChainExchangeComputeBurnOutput)?;
        if burn_units == 0 {
            return Err(MempoolError::CrossChainExchangeTotalOutputNonPositive);
        }

        let hash = tx.hash();
        let height = self.chain.tip_height() + 1;

        if payload.is_unmined() {
            // Vanilla check-and-add against the backup view, proof not yet
            // required. No duplicate-hash rejection on this sub-path; a
            // re-submission fails in the view on the already-created output.
            let entry = self.connect_and_add(tx, hash, height, false)?;
            trace!(
                tx_hash = %hash,
                %foreign_tx_hash,
                pool_size = self.index.len(),
                "accepted unmined cross-chain exchange"
            );
            return Ok(Acceptance::Accepted(entry));
        }

        if let Some(existing) = self.index.get(&hash).cloned() {
            let existing_is_unmined =
                existing.tx.cross_chain_payload().is_some_and(|p| p.is_unmined());
            if !existing_is_unmined {
                return Err(MempoolError::DuplicateCrossChainExchange { tx_hash: hash });
            }

            self.quick_check_cross_chain(tx, &hash)?;

            // Replace the payload in place: admission time, height, fee and
            // heap position are all preserved.
            let upgraded = Arc::new(PoolEntry {
                tx: tx.clone(),
                raw: tx.to_bytes(true),
                ..(*existing).clone()
            });
            self.index.replace_entry(upgraded.clone());
            trace!(
                tx_hash = %hash,
                %foreign_tx_hash,
                "upgraded cross-chain exchange in place with matured proof"
            );
            return Ok(Acceptance::Accepted(upgraded));
        }

        let entry = self.connect_and_add(tx, hash, height, true)?;
        trace!(
            tx_hash = %hash,
            %foreign_tx_hash,
            pool_size = self.index.len(),
            "accepted mined cross-chain exchange"
        );
        Ok(Acceptance::Accepted(entry))
    }

    /// Connects on the backup view and records the entry, re-cloning the
    /// backup on any failure.
    fn connect_and_add(
        &mut self,
        tx: &Transaction,
        hash: TxHash,
        height: u32,
        check_burn_proof: bool,
    ) -> MempoolResult<Arc<PoolEntry>> {
        let nanos_purchased_before = self.backup_view.nanos_purchased();
        let usd_cents_before = self.backup_view.usd_cents_per_foreign_coin();
        let outcome = match self.backup_view.connect_transaction(
            tx,
            &hash,
            0,
            height,
            false,
            check_burn_proof,
            false,
        ) {
            Ok(outcome) => outcome,
            Err(err) => {
                self.rebuild_backup_view();
                return Err(err.into());
            }
        };
        match self.add_entry(
            tx,
            tx.to_bytes(true),
            hash,
            height,
            outcome,
            nanos_purchased_before,
            usd_cents_before,
        ) {
            Ok(entry) => Ok(entry),
            Err(err) => {
                self.rebuild_backup_view();
                Err(err)
            }
        }
    }

    /// Validates an already-pooled cross-chain exchange against a fresh view
    /// with the burn proof required. An exchange has no native inputs, so
    /// confirmed state alone suffices.
    fn quick_check_cross_chain(&self, tx: &Transaction, hash: &TxHash) -> MempoolResult<u64> {
        let mut view = self.chain.speculative_view();
        let height = self.chain.tip_height() + 1;
        let outcome = view.connect_transaction(tx, hash, 0, height, false, true, false)?;
        Ok(outcome.fee)
    }

    /// Records a validated entry: primary index (with the public keys it
    /// affects), fee heap, size accumulator, universal view, admission list.
    /// The backup view already holds the candidate's effect and is not
    /// touched.
    fn add_entry(
        &mut self,
        tx: &Transaction,
        raw: Vec<u8>,
        hash: TxHash,
        height: u32,
        outcome: ConnectOutcome,
        nanos_purchased_before: u64,
        usd_cents_before: u64,
    ) -> MempoolResult<Arc<PoolEntry>> {
        let size_bytes = raw.len() as u64;
        let fee_per_kb = (u128::from(outcome.fee) * 1000 / u128::from(size_bytes)) as u64;

        let metadata = indexer::compute_transaction_metadata(
            tx,
            &self.backup_view,
            outcome,
            nanos_purchased_before,
            usd_cents_before,
        )
        .map_err(|err| {
            debug!(tx_hash = %hash, %err, "metadata unavailable for transaction");
            err
        })
        .ok();

        let entry = Arc::new(PoolEntry {
            tx: tx.clone(),
            raw,
            hash,
            size_bytes,
            added: self.clock.now(),
            height,
            fee_nanos: outcome.fee,
            fee_per_kb,
            metadata,
        });

        let affected = indexer::affected_public_keys(tx, &self.universal_view);
        let affected_keys: Vec<PublicKey> =
            affected.iter().map(|affected| affected.public_key).collect();
        self.index.insert(entry.clone(), &affected_keys)?;

        if let Err(err) = self.universal_view.connect_transaction(
            tx,
            &hash,
            entry.size_bytes,
            height,
            false,
            false,
            false,
        ) {
            // Pre-flight already succeeded on the backup view, so the
            // universal view is now suspect.
            error!(
                tx_hash = %hash,
                %err,
                "connect failed on the universal view after pre-flight; this should never happen"
            );
            return Err(err.into());
        }

        Ok(entry)
    }

    fn rebuild_backup_view(&mut self) {
        self.backup_view = self.universal_view.clone();
    }

    /// Worklist cascade: seed with the just-admitted transaction, and for
    /// every output, retry the orphans waiting on it. Afterwards, invalidate
    /// orphans that double-spend anything the cascade claimed.
    fn promote_orphans(
        &mut self,
        accepted_tx: &Transaction,
        rate_limit: bool,
        verify_signatures: bool,
    ) -> Vec<Arc<PoolEntry>> {
        let mut promoted: Vec<Arc<PoolEntry>> = Vec::new();
        let mut worklist: VecDeque<Transaction> = VecDeque::from([accepted_tx.clone()]);

        while let Some(item) = worklist.pop_front() {
            let item_hash = item.hash();
            for output_index in 0..item.outputs.len() {
                let outpoint = Outpoint::new(item_hash, output_index as u32);
                for child in self.orphans.children_of(&outpoint) {
                    match self.try_accept(&child, rate_limit, false, verify_signatures) {
                        Err(err) => {
                            debug!(child = %child.hash(), %err, "removing invalid orphan");
                            self.orphans.remove(&child, true);
                            break;
                        }
                        Ok(Acceptance::MissingParents(_)) => continue,
                        Ok(Acceptance::Accepted(entry)) => {
                            promoted.push(entry);
                            self.orphans.remove(&child, false);
                            worklist.push_back(child);
                            break;
                        }
                    }
                }
            }
        }

        self.orphans.remove_double_spends(accepted_tx);
        for entry in &promoted {
            self.orphans.remove_double_spends(&entry.tx);
        }
        promoted
    }

    /// Swaps in a rebuilt core, carrying over the fields a rebuild must not
    /// reset: fee policy and the low-fee accumulator.
    fn replace_with(&mut self, mut new_core: PoolCore) {
        new_core.min_fee_rate_nanos_per_kb = self.min_fee_rate_nanos_per_kb;
        new_core.rate_limit_fee_rate_nanos_per_kb = self.rate_limit_fee_rate_nanos_per_kb;
        new_core.low_fee_size_accumulator = self.low_fee_size_accumulator;
        new_core.last_low_fee_unix_secs = self.last_low_fee_unix_secs;
        *self = new_core;
    }

    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        self.index.assert_consistent();
        self.orphans.assert_consistent();
        for entry in self.index.entries_in_admission_order() {
            assert!(
                !self.orphans.contains(&entry.hash),
                "hash present in both the pool and the orphan index"
            );
        }
    }
}

/// A consistent, lock-free copy of the pool published for readers: miners,
/// block builders and the JSON API. All fields derive from one atomic read
/// of the primary index.
pub struct ReadSnapshot {
    sequence_number: u64,
    view: SpeculativeView,
    entries: Vec<Arc<PoolEntry>>,
    by_hash: HashMap<TxHash, Arc<PoolEntry>>,
    outpoints: HashMap<Outpoint, TxHash>,
    by_public_key: HashMap<PublicKey, Vec<TxHash>>,
}

impl ReadSnapshot {
    fn empty(view: SpeculativeView) -> Self {
        ReadSnapshot {
            sequence_number: 0,
            view,
            entries: Vec::new(),
            by_hash: HashMap::new(),
            outpoints: HashMap::new(),
            by_public_key: HashMap::new(),
        }
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }
}

/// The mempool. One writer lock guards the authoritative state; readers only
/// ever touch the published [`ReadSnapshot`].
pub struct Mempool {
    chain: Arc<Chain>,
    config: MempoolConfig,
    clock: Arc<dyn Clock>,
    core: RwLock<PoolCore>,
    snapshot: ArcSwap<ReadSnapshot>,
    snapshot_sequence: AtomicU64,
    /// Serializes snapshot publication so sequence numbers match content
    /// order.
    regeneration_lock: Mutex<()>,
    total_process_calls: AtomicU64,
}

impl Mempool {
    /// Builds a pool over the given chain. If configured, replays the newest
    /// complete on-disk dump before returning.
    pub fn new(chain: Arc<Chain>, config: MempoolConfig, clock: Arc<dyn Clock>) -> Arc<Self> {
        let core = PoolCore::new(
            chain.clone(),
            clock.clone(),
            config.min_fee_rate_nanos_per_kb,
            config.rate_limit_fee_rate_nanos_per_kb,
            Duration::from_secs(config.orphan_expiry_scan_interval_secs),
        );
        let initial_snapshot = ReadSnapshot::empty(chain.speculative_view());
        let mempool = Arc::new(Mempool {
            chain,
            config,
            clock,
            core: RwLock::new(core),
            snapshot: ArcSwap::from_pointee(initial_snapshot),
            snapshot_sequence: AtomicU64::new(0),
            regeneration_lock: Mutex::new(()),
            total_process_calls: AtomicU64::new(0),
        });
        if mempool.config.load_dump_on_startup {
            mempool.load_dump();
        }
        mempool
    }

    pub fn config(&self) -> &MempoolConfig {
        &self.config
    }

    /// The main entry point for adding a transaction: full validation, then
    /// admission or orphan routing, then a promotion cascade. Returns every
    /// entry the call admitted, the candidate first; empty means the
    /// candidate is now an orphan.
    #[instrument(skip(self, tx), fields(tx_type = %tx.tx_type()), err)]
    pub fn process(
        &self,
        tx: &Transaction,
        allow_orphan: bool,
        rate_limit: bool,
        peer_id: u64,
        verify_signatures: bool,
    ) -> MempoolResult<Vec<Arc<PoolEntry>>> {
        count_received();
        let result = {
            let mut core = self.write_core();
            let result =
                core.process_transaction(tx, allow_orphan, rate_limit, peer_id, verify_signatures);
            set_pool_gauges(core.index.len(), core.index.total_size_bytes(), core.orphans.len());
            result
        };
        if result.is_err() {
            count_dropped(DropReason::FailedAddTxChecks, 1);
        }

        // Regenerate the read snapshot every Nth processed transaction; the
        // background worker covers the time-based trigger.
        let calls = self.total_process_calls.fetch_add(1, Ordering::Relaxed);
        let interval = self.config.snapshot_regeneration_interval_txns.max(1);
        if self.config.generate_read_snapshot && calls % interval == 0 {
            self.regenerate_read_snapshot();
        }

        result
    }

    // Reorg reconciliation.

    /// Rebuilds the pool after a block was connected, dropping everything
    /// the block confirmed. Returns entries that are newly admitted because
    /// the block resolved their dependencies — candidates for rebroadcast.
    /// The chain lock is assumed held.
    pub fn on_block_connect(&self, block: &Block) -> Vec<Arc<PoolEntry>> {
        let mut core = self.write_core();
        let confirmed: HashSet<TxHash> =
            block.non_reward_txns().iter().map(Transaction::hash).collect();
        info!(
            height = block.height,
            n_confirmed = confirmed.len(),
            "rebuilding mempool after block connect"
        );

        let mut new_core = self.fresh_core();
        for entry in core.index.entries_in_admission_order() {
            if confirmed.contains(&entry.hash) {
                continue;
            }
            match new_core.process_transaction(&entry.tx, true, false, 0, false) {
                Ok(admitted) if admitted.is_empty() => {
                    warn!(tx_hash = %entry.hash, "transaction became unconnected during replay")
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(tx_hash = %entry.hash, %err, "dropping transaction during replay")
                }
            }
        }
        for orphan in core.orphans.entries() {
            if confirmed.contains(&orphan.tx.hash()) {
                continue;
            }
            if let Err(err) =
                new_core.process_transaction(&orphan.tx, true, false, orphan.peer_id, false)
            {
                warn!(%err, "dropping unconnected transaction during replay");
            }
        }

        let newly_admitted: Vec<Arc<PoolEntry>> = new_core
            .index
            .entries_in_admission_order()
            .into_iter()
            .filter(|entry| !core.index.contains(&entry.hash))
            .collect();

        core.replace_with(new_core);
        drop(core);
        self.after_pool_reset();
        newly_admitted
    }

    /// Rebuilds the pool after a block was disconnected. The block's
    /// transactions are fed first so they claim admission precedence over
    /// the pool's entries, which minimizes dependency conflicts. The chain
    /// lock is assumed held.
    pub fn on_block_disconnect(&self, block: &Block) {
        let mut core = self.write_core();
        info!(height = block.height, "rebuilding mempool after block disconnect");

        let mut new_core = self.fresh_core();
        for tx in block.non_reward_txns() {
            if let Err(err) = new_core.process_transaction(tx, false, false, 0, false) {
                warn!(tx_hash = %tx.hash(), %err, "dropping disconnected block transaction");
            }
        }
        for entry in core.index.entries_in_admission_order() {
            match new_core.process_transaction(&entry.tx, true, false, 0, false) {
                Ok(admitted) if admitted.is_empty() => {
                    warn!(tx_hash = %entry.hash, "transaction became unconnected during replay")
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(tx_hash = %entry.hash, %err, "dropping transaction during replay")
                }
            }
        }
        for orphan in core.orphans.entries() {
            if let Err(err) =
                new_core.process_transaction(&orphan.tx, true, false, orphan.peer_id, false)
            {
                warn!(%err, "dropping unconnected transaction during replay");
            }
        }

        core.replace_with(new_core);
        drop(core);
        self.after_pool_reset();
    }

    /// Removes one transaction by rebuilding the pool without it. Slow; only
    /// for operator intervention.
    pub fn remove_transaction(&self, tx: &Transaction) {
        let doomed = tx.hash();
        let mut core = self.write_core();

        let mut new_core = self.fresh_core();
        for entry in core.index.entries_in_admission_order() {
            if entry.hash == doomed {
                continue;
            }
            match new_core.process_transaction(&entry.tx, false, false, 0, false) {
                Ok(admitted) if admitted.is_empty() => {
                    warn!(tx_hash = %entry.hash, "transaction became unconnected during replay")
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(tx_hash = %entry.hash, %err, "dropping transaction during replay")
                }
            }
        }
        for orphan in core.orphans.entries() {
            if orphan.tx.hash() == doomed {
                continue;
            }
            if let Err(err) =
                new_core.process_transaction(&orphan.tx, true, false, orphan.peer_id, false)
            {
                warn!(%err, "dropping unconnected transaction during replay");
            }
        }

        core.replace_with(new_core);
        drop(core);
        self.after_pool_reset();
    }

    /// Rebuilds the pool without the unmined cross-chain exchanges whose
    /// foreign hashes are listed. With `dry_run` the current pool is left
    /// untouched and the report is computed from the read snapshot.
    pub fn evict_unmined_cross_chain(
        &self,
        foreign_tx_hashes: &[TxHash],
        dry_run: bool,
    ) -> UnminedEvictionReport {
        let mut report = UnminedEvictionReport::default();

        let mut core = if dry_run { None } else { Some(self.write_core()) };
        let entries = match &core {
            Some(core) => core.index.entries_in_admission_order(),
            None => self.snapshot().entries.clone(),
        };

        let mut new_core = self.fresh_core();
        for entry in &entries {
            if let Some(payload) = entry.tx.cross_chain_payload() {
                if payload.is_unmined() {
                    let foreign_tx_hash = payload.burn_tx.hash();
                    report.unmined_foreign.push(foreign_tx_hash);
                    if foreign_tx_hashes.contains(&foreign_tx_hash) {
                        report.record_eviction(&entry.tx);
                        continue;
                    }
                }
            }
            match new_core.process_transaction(&entry.tx, true, false, 0, false) {
                Ok(admitted) if !admitted.is_empty() => {}
                _ => report.record_eviction(&entry.tx),
            }
        }
        report.remaining_count = new_core.index.len();

        if let Some(core) = core.as_mut() {
            core.replace_with(new_core);
        }
        drop(core);
        if !dry_run {
            self.after_pool_reset();
        }
        report
    }

    // Read snapshot.

    /// Publishes a fresh read snapshot: clone of the universal view, the
    /// admission-ordered entry list and the lookup maps, stamped with the
    /// next sequence number.
    pub fn regenerate_read_snapshot(&self) {
        let _serialize = self.regeneration_lock.lock().expect("regeneration lock poisoned");
        let (view, entries, outpoints, by_public_key) = {
            let core = self.read_core();
            let entries = core.index.entries_in_admission_order();
            let outpoints = core.index.outpoint_map().clone();
            let by_public_key: HashMap<PublicKey, Vec<TxHash>> = core
                .index
                .public_key_map()
                .iter()
                .map(|(key, hashes)| (*key, hashes.iter().copied().collect()))
                .collect();
            (core.universal_view.clone(), entries, outpoints, by_public_key)
        };
        let by_hash: HashMap<TxHash, Arc<PoolEntry>> =
            entries.iter().map(|entry| (entry.hash, entry.clone())).collect();

        let sequence_number = self.snapshot_sequence.load(Ordering::SeqCst) + 1;
        self.snapshot.store(Arc::new(ReadSnapshot {
            sequence_number,
            view,
            entries,
            by_hash,
            outpoints,
            by_public_key,
        }));
        self.snapshot_sequence.store(sequence_number, Ordering::SeqCst);
        count_snapshot_regeneration();
    }

    /// The currently published snapshot's sequence number.
    pub fn snapshot_sequence_number(&self) -> u64 {
        self.snapshot_sequence.load(Ordering::SeqCst)
    }

    /// Blocks until the snapshot has been republished at least once,
    /// polling the sequence number.
    pub fn block_until_snapshot_regenerated(&self) {
        let observed = self.snapshot_sequence.load(Ordering::SeqCst);
        while self.snapshot_sequence.load(Ordering::SeqCst) == observed {
            thread::sleep(SNAPSHOT_POLL_INTERVAL);
        }
    }

    fn snapshot(&self) -> Arc<ReadSnapshot> {
        self.snapshot.load_full()
    }

    // Readers. All of these consult only the published snapshot and accept
    // its bounded staleness.

    pub fn contains(&self, hash: &TxHash) -> bool {
        self.snapshot().by_hash.contains_key(hash)
    }

    pub fn get(&self, hash: &TxHash) -> Option<Arc<PoolEntry>> {
        self.snapshot().by_hash.get(hash).cloned()
    }

    /// The pooled transaction spending the given outpoint, if any.
    pub fn spender_of(&self, outpoint: &Outpoint) -> Option<Transaction> {
        let snapshot = self.snapshot();
        let hash = snapshot.outpoints.get(outpoint)?;
        snapshot.by_hash.get(hash).map(|entry| entry.tx.clone())
    }

    pub fn entries_ordered_by_time(&self) -> Vec<Arc<PoolEntry>> {
        self.snapshot().entries.clone()
    }

    /// All pooled entries, in no particular order.
    pub fn pool_entries(&self) -> Vec<Arc<PoolEntry>> {
        self.snapshot().by_hash.values().cloned().collect()
    }

    pub fn tx_hashes(&self) -> Vec<TxHash> {
        self.snapshot().by_hash.keys().copied().collect()
    }

    /// Entries that create an output for, spend from, or otherwise name the
    /// given key, in admission order.
    pub fn entries_for_public_key(&self, public_key: &PublicKey) -> Vec<Arc<PoolEntry>> {
        let snapshot = self.snapshot();
        snapshot
            .by_public_key
            .get(public_key)
            .into_iter()
            .flatten()
            .filter_map(|hash| snapshot.by_hash.get(hash).cloned())
            .collect()
    }

    /// An estimate of the pool size; exact up to snapshot staleness.
    pub fn count(&self) -> usize {
        self.snapshot().entries.len()
    }

    pub fn summary_by_type(&self) -> HashMap<TxType, SummaryStats> {
        let mut summary: HashMap<TxType, SummaryStats> = HashMap::new();
        for entry in &self.snapshot().entries {
            let stats = summary.entry(entry.tx.tx_type()).or_default();
            stats.count += 1;
            stats.total_bytes += entry.size_bytes;
        }
        summary
    }

    /// A read-only clone of the snapshot view with every pooled transaction
    /// connected; used for balance computations over pending state.
    pub fn augmented_view(&self) -> SpeculativeView {
        self.snapshot().view.clone()
    }

    /// The per-key variant is the same universal view; the key only matters
    /// to callers.
    pub fn augmented_view_for_public_key(&self, _public_key: &PublicKey) -> SpeculativeView {
        self.augmented_view()
    }

    /// Drops every orphan delivered by the given peer.
    pub fn remove_orphans_for_peer(&self, peer_id: u64) {
        let mut core = self.write_core();
        core.orphans.remove_for_peer(peer_id);
    }

    // Persistence.

    /// Dumps the admission-ordered entry list to disk through the three-slot
    /// rotation. The writer lock is held only while the list is cloned.
    pub fn dump_to_disk(&self) -> Result<(), PersistenceError> {
        let Some(dump_dir) = &self.config.dump_dir else {
            return Ok(());
        };
        let entries = {
            let core = self.read_core();
            core.index.entries_in_admission_order()
        };
        persistence::dump_entries(dump_dir, &entries)
    }

    /// Replays the newest complete dump. Failures are logged and skipped so
    /// one bad entry does not void the batch; the lock is held exclusively
    /// for the whole load.
    fn load_dump(&self) {
        let Some(dump_dir) = &self.config.dump_dir else {
            return;
        };
        let transactions = match persistence::load_transactions(dump_dir) {
            Ok(transactions) => transactions,
            Err(err) => {
                warn!(%err, "could not load mempool dump");
                return;
            }
        };

        let n_loaded = transactions.len();
        let mut core = self.write_core();
        let mut n_admitted = 0usize;
        for tx in transactions {
            match core.process_transaction(&tx, false, false, 0, false) {
                Ok(_) => n_admitted += 1,
                Err(err) => warn!(%err, "skipping persisted transaction"),
            }
        }
        drop(core);
        info!(n_loaded, n_admitted, "loaded mempool transactions from disk");

        if self.config.generate_read_snapshot {
            self.regenerate_read_snapshot();
        }
    }

    fn fresh_core(&self) -> PoolCore {
        PoolCore::new(
            self.chain.clone(),
            self.clock.clone(),
            0,
            0,
            Duration::from_secs(self.config.orphan_expiry_scan_interval_secs),
        )
    }

    /// Housekeeping after a rebuilt core was swapped in.
    fn after_pool_reset(&self) {
        {
            let core = self.read_core();
            set_pool_gauges(core.index.len(), core.index.total_size_bytes(), core.orphans.len());
        }
        if self.config.generate_read_snapshot {
            self.regenerate_read_snapshot();
        }
    }

    fn read_core(&self) -> RwLockReadGuard<'_, PoolCore> {
        self.core.read().expect("mempool lock poisoned")
    }

    fn write_core(&self) -> RwLockWriteGuard<'_, PoolCore> {
        self.core.write().expect("mempool lock poisoned")
    }

    #[cfg(test)]
    pub(crate) fn with_core<R>(&self, f: impl FnOnce(&PoolCore) -> R) -> R {
        f(&self.read_core())
    }
}
