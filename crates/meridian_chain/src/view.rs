//! The speculative UTXO view.
//!
//! A copy-on-write overlay over the confirmed [`ChainDb`]. Connecting a
//! transaction mutates only the overlay; `Clone` is cheap because the
//! underlying database is shared read-only. On any connect error the overlay
//! is left in an undefined state and the view must be discarded — callers
//! keep a backup clone instead of rolling back.

use std::collections::HashMap;
use std::sync::Arc;

use meridian_api::core::{Outpoint, PublicKey, TxHash, UtxoEntry};
use meridian_api::transaction::{ForeignBurnPayload, ForeignBurnTx, Transaction, TxPayload};
use meridian_api::MeridianApiError;
use tracing::trace;

use crate::db::{ChainDb, PostEntry, ProfileEntry};
use crate::params::{foreign_p2pkh_address, ChainParams};
use crate::ViewError;

/// Foreign base units per foreign coin.
pub const FOREIGN_UNITS_PER_COIN: u64 = 100_000_000;

/// Native nanos minted per USD cent of burned foreign value.
pub const NANOS_PER_USD_CENT: u64 = 1_000_000;

/// The value totals produced by connecting one transaction.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ConnectOutcome {
    pub total_input: u64,
    pub total_output: u64,
    pub fee: u64,
}

#[derive(Clone, Debug)]
enum OverlayState {
    Created(UtxoEntry),
    Spent,
}

#[derive(Clone, Debug)]
pub struct SpeculativeView {
    db: Arc<ChainDb>,
    params: Arc<ChainParams>,
    overlay: HashMap<Outpoint, OverlayState>,
    nanos_purchased: u64,
    usd_cents_per_foreign_coin: u64,
}

impl SpeculativeView {
    pub fn new(db: Arc<ChainDb>, params: Arc<ChainParams>) -> Self {
        let nanos_purchased = db.nanos_purchased();
        let usd_cents_per_foreign_coin = params.initial_usd_cents_per_foreign_coin;
        SpeculativeView { db, params, overlay: HashMap::new(), nanos_purchased, usd_cents_per_foreign_coin }
    }

    /// The output for an outpoint, unless it has been spent by a connected
    /// transaction.
    pub fn get_utxo(&self, outpoint: &Outpoint) -> Option<UtxoEntry> {
        match self.overlay.get(outpoint) {
            Some(OverlayState::Created(entry)) => Some(entry.clone()),
            Some(OverlayState::Spent) => None,
            None => self.db.get_utxo(outpoint),
        }
    }

    pub fn nanos_purchased(&self) -> u64 {
        self.nanos_purchased
    }

    pub fn usd_cents_per_foreign_coin(&self) -> u64 {
        self.usd_cents_per_foreign_coin
    }

    pub fn params(&self) -> &Arc<ChainParams> {
        &self.params
    }

    pub fn profile_for_username(&self, username: &str) -> Option<ProfileEntry> {
        self.db.profile_for_username(username)
    }

    pub fn post_for_hash(&self, post_hash: &TxHash) -> Option<PostEntry> {
        self.db.post_for_hash(post_hash)
    }

    /// Applies a transaction to the overlay.
    ///
    /// `declared_size` is the block-context serialized size; the mempool
    /// passes 0 and size policy is enforced by the caller. On `Err` the
    /// overlay is undefined and the view must be discarded.
    #[allow(clippy::too_many_arguments)]
    pub fn connect_transaction(
        &mut self,
        tx: &Transaction,
        tx_hash: &TxHash,
        declared_size: u64,
        height: u32,
        verify_signatures: bool,
        check_burn_proof: bool,
        ignore_utxos: bool,
    ) -> Result<ConnectOutcome, ViewError> {
        trace!(%tx_hash, declared_size, height, tx_type = %tx.tx_type(), "connecting transaction");
        match &tx.payload {
            TxPayload::BlockReward => self.connect_block_reward(tx, tx_hash, height),
            TxPayload::CrossChainExchange(payload) => {
                self.connect_cross_chain(payload, tx_hash, height, check_burn_proof)
            }
            _ => self.connect_standard(tx, tx_hash, height, verify_signatures, ignore_utxos),
        }
    }

    fn connect_standard(
        &mut self,
        tx: &Transaction,
        tx_hash: &TxHash,
        height: u32,
        verify_signatures: bool,
        ignore_utxos: bool,
    ) -> Result<ConnectOutcome, ViewError> {
        if verify_signatures {
            tx.verify_signature().map_err(|err| match err {
                MeridianApiError::MalformedPublicKey => ViewError::MalformedPublicKey,
                _ => ViewError::InvalidSignature,
            })?;
        }

        let mut total_input: u64 = 0;
        if !ignore_utxos {
            for input in &tx.inputs {
                let spent = self.spend_utxo(input)?;
                if spent.public_key != tx.public_key {
                    return Err(ViewError::InputOwnership(*input));
                }
                total_input = total_input
                    .checked_add(spent.amount_nanos)
                    .ok_or(ViewError::AmountOverflow)?;
            }
        }

        let total_output = self.create_outputs(tx, tx_hash, height)?;
        if ignore_utxos {
            total_input = total_output;
        }
        if total_output > total_input {
            return Err(ViewError::OutputExceedsInput { total_input, total_output });
        }

        Ok(ConnectOutcome { total_input, total_output, fee: total_input - total_output })
    }

    fn connect_block_reward(
        &mut self,
        tx: &Transaction,
        tx_hash: &TxHash,
        height: u32,
    ) -> Result<ConnectOutcome, ViewError> {
        let total_output = self.create_outputs(tx, tx_hash, height)?;
        Ok(ConnectOutcome { total_input: 0, total_output, fee: 0 })
    }

    fn connect_cross_chain(
        &mut self,
        payload: &ForeignBurnPayload,
        tx_hash: &TxHash,
        height: u32,
        check_burn_proof: bool,
    ) -> Result<ConnectOutcome, ViewError> {
        if check_burn_proof {
            if payload.computed_merkle_root() != payload.merkle_root {
                return Err(ViewError::BurnProofInvalid);
            }
            if !self.db.has_foreign_merkle_root(&payload.merkle_root) {
                return Err(ViewError::UnknownForeignMerkleRoot(payload.merkle_root));
            }
        }

        let funding_key = extract_funding_public_key(&payload.burn_tx)?;
        if foreign_p2pkh_address(&funding_key) == self.params.foreign_burn_address {
            return Err(ViewError::BurnAddressCannotBurn);
        }
        let burn_units = compute_burn_output(&payload.burn_tx, &self.params.foreign_burn_address)?;
        if burn_units == 0 {
            return Err(ViewError::NonPositiveBurnOutput);
        }

        let nanos_created = calc_nanos_to_create(burn_units, self.usd_cents_per_foreign_coin)?;
        self.add_utxo(
            Outpoint::new(*tx_hash, 0),
            UtxoEntry {
                public_key: funding_key,
                amount_nanos: nanos_created,
                block_height: height,
                is_block_reward: false,
            },
        )?;
        self.nanos_purchased = self
            .nanos_purchased
            .checked_add(nanos_created)
            .ok_or(ViewError::AmountOverflow)?;

        Ok(ConnectOutcome {
            total_input: nanos_created,
            total_output: nanos_created,
            fee: 0,
        })
    }

    fn create_outputs(
        &mut self,
        tx: &Transaction,
        tx_hash: &TxHash,
        height: u32,
    ) -> Result<u64, ViewError> {
        let is_block_reward = tx.payload.tx_type() == meridian_api::transaction::TxType::BlockReward;
        let mut total_output: u64 = 0;
        for (index, output) in tx.outputs.iter().enumerate() {
            total_output = total_output
                .checked_add(output.amount_nanos)
                .ok_or(ViewError::AmountOverflow)?;
            self.add_utxo(
                Outpoint::new(*tx_hash, index as u32),
                UtxoEntry {
                    public_key: output.public_key,
                    amount_nanos: output.amount_nanos,
                    block_height: height,
                    is_block_reward,
                },
            )?;
        }
        Ok(total_output)
    }

    fn spend_utxo(&mut self, outpoint: &Outpoint) -> Result<UtxoEntry, ViewError> {
        let entry = self.get_utxo(outpoint).ok_or(ViewError::UtxoNotFound(*outpoint))?;
        self.overlay.insert(*outpoint, OverlayState::Spent);
        Ok(entry)
    }

    fn add_utxo(&mut self, outpoint: Outpoint, entry: UtxoEntry) -> Result<(), ViewError> {
        if self.get_utxo(&outpoint).is_some() {
            return Err(ViewError::UtxoAlreadyExists(outpoint));
        }
        self.overlay.insert(outpoint, OverlayState::Created(entry));
        Ok(())
    }
}

/// Extracts the funding public key from the first P2PKH-style foreign input.
/// The extracted key is credited with the minted nanos.
pub fn extract_funding_public_key(burn_tx: &ForeignBurnTx) -> Result<PublicKey, ViewError> {
    burn_tx
        .inputs
        .iter()
        .find_map(|input| input.spend_public_key)
        .ok_or(ViewError::InvalidFundingPublicKey)
}

/// Sums the foreign value sent to the burn address, guarding against
/// overflow.
pub fn compute_burn_output(burn_tx: &ForeignBurnTx, burn_address: &str) -> Result<u64, ViewError> {
    let mut total: u64 = 0;
    for output in &burn_tx.outputs {
        if output.address == burn_address {
            total = total
                .checked_add(output.amount_units)
                .ok_or(ViewError::BurnOutputOverflow)?;
        }
    }
    Ok(total)
}

/// Native nanos minted for a burn of `burn_units` foreign base units at the
/// given exchange rate. Flat conversion.
pub fn calc_nanos_to_create(
    burn_units: u64,
    usd_cents_per_foreign_coin: u64,
) -> Result<u64, ViewError> {
    let nanos = u128::from(burn_units)
        * u128::from(usd_cents_per_foreign_coin)
        * u128::from(NANOS_PER_USD_CENT)
        / u128::from(FOREIGN_UNITS_PER_COIN);
    nanos.try_into().map_err(|_| ViewError::AmountOverflow)
}

#[cfg(test)]
#[path = "view_test.rs"]
mod view_test;
