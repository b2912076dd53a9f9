//! Derives the public keys a transaction affects, and the metadata record
//! attached to admitted entries.
//!
//! One routine feeds both the primary index's public-key map and the
//! metadata's affected-key list, so a key is never indexed in one place and
//! missed in the other. Index derivation is infallible (unresolvable
//! look-ups are skipped); metadata computation reports them.

use meridian_api::core::{PublicKey, TxHash};
use meridian_api::transaction::{Transaction, TxPayload};
use meridian_chain::params::BURN_PUBLIC_KEY;
use meridian_chain::view::{
    calc_nanos_to_create,
    compute_burn_output,
    extract_funding_public_key,
    ConnectOutcome,
};
use meridian_chain::{SpeculativeView, ViewError};
use meridian_mempool_types::mempool_types::{
    AffectedPublicKey,
    CrossChainExchangeMetadata,
    TransactionMetadata,
};
use tracing::warn;

#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
pub(crate) enum MetadataError {
    #[error("referenced post {0} does not exist")]
    MissingPost(TxHash),
    #[error(transparent)]
    CrossChain(#[from] ViewError),
}

/// Characters ending a mention tag inside a post body.
const MENTION_TERMINATORS: &[char] = &[
    ' ', ',', '.', '\n', '&', '*', '(', ')', '-', '_', '+', '~', '\'', '"', '[', ']', '{', '}',
];

/// Extracts the unique `@name` and `$name` tags from a post body, lowercased
/// for profile lookup.
fn parse_mention_tags(body: &str) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for sigil in ['@', '$'] {
        for (position, _) in body.match_indices(sigil) {
            let rest = &body[position + 1..];
            let tag: String = rest
                .chars()
                .take_while(|c| !MENTION_TERMINATORS.contains(c))
                .collect::<String>()
                .to_lowercase();
            if !tag.is_empty() && !tags.contains(&tag) {
                tags.push(tag);
            }
        }
    }
    tags
}

/// Every public key the transaction creates an output for, spends from, or
/// names inside its payload.
pub(crate) fn affected_public_keys(
    tx: &Transaction,
    view: &SpeculativeView,
) -> Vec<AffectedPublicKey> {
    let mut keys: Vec<AffectedPublicKey> = Vec::new();
    let mut push = |public_key: PublicKey, role: &'static str| {
        keys.push(AffectedPublicKey { public_key, role });
    };

    for output in &tx.outputs {
        push(output.public_key, "BasicTransferOutput");
    }
    // The transactor key also covers inputs: spends reference it.
    push(tx.public_key, "TransactorPublicKey");

    match &tx.payload {
        TxPayload::PrivateMessage { recipient, .. } => push(*recipient, "RecipientPublicKey"),
        TxPayload::Follow { followed, .. } => push(*followed, "FollowedPublicKey"),
        TxPayload::SwapIdentity { from, to } => {
            push(*from, "FromPublicKey");
            push(*to, "ToPublicKey");
        }
        TxPayload::CreatorCoin { creator, .. } => push(*creator, "CreatorPublicKey"),
        TxPayload::CreatorCoinTransfer { creator, receiver, .. } => {
            push(*creator, "CreatorPublicKey");
            push(*receiver, "ReceiverPublicKey");
        }
        TxPayload::UpdateProfile { profile_public_key, .. } => {
            if let Some(profile_key) = profile_public_key {
                push(*profile_key, "ProfilePublicKey");
            }
        }
        TxPayload::Like { liked_post, .. } => {
            if let Some(post) = view.post_for_hash(liked_post) {
                push(post.poster_public_key, "PosterPublicKey");
            }
        }
        TxPayload::SubmitPost { body, parent_post, reposted_post } => {
            if let Some(parent) = parent_post.as_ref().and_then(|hash| view.post_for_hash(hash)) {
                push(parent.poster_public_key, "ParentPosterPublicKey");
            }
            for tag in parse_mention_tags(body) {
                // Tags that don't line up with a profile are ignored.
                if let Some(profile) = view.profile_for_username(&tag) {
                    push(profile.public_key, "MentionedPublicKey");
                }
            }
            if let Some(reposted) = reposted_post.as_ref().and_then(|hash| view.post_for_hash(hash))
            {
                push(reposted.poster_public_key, "RepostedPublicKey");
            }
        }
        TxPayload::CrossChainExchange(payload) => {
            match extract_funding_public_key(&payload.burn_tx) {
                Ok(funding_key) => push(funding_key, "FundingPublicKey"),
                Err(err) => {
                    warn!(%err, "could not extract funding key while indexing cross-chain exchange")
                }
            }
            // Every burn indexes under the well-known sink key, so the
            // explorer can enumerate them.
            push(BURN_PUBLIC_KEY, "BurnPublicKey");
        }
        TxPayload::BlockReward | TxPayload::BasicTransfer => {}
    }

    keys
}

/// Builds the metadata record for an admitted transaction. The view must
/// already reflect the transaction's own effect; the purchase counters from
/// before the connect are passed in.
pub(crate) fn compute_transaction_metadata(
    tx: &Transaction,
    view: &SpeculativeView,
    outcome: ConnectOutcome,
    nanos_purchased_before: u64,
    usd_cents_per_foreign_coin_before: u64,
) -> Result<TransactionMetadata, MetadataError> {
    let mut transactor_public_key = tx.public_key;
    let mut cross_chain = None;

    match &tx.payload {
        TxPayload::CrossChainExchange(payload) => {
            let funding_key = extract_funding_public_key(&payload.burn_tx)?;
            let units_burned =
                compute_burn_output(&payload.burn_tx, &view.params().foreign_burn_address)?;
            let nanos_created =
                calc_nanos_to_create(units_burned, usd_cents_per_foreign_coin_before)?;
            transactor_public_key = funding_key;
            cross_chain = Some(CrossChainExchangeMetadata {
                foreign_tx_hash: payload.burn_tx.hash(),
                foreign_spend_address: meridian_chain::params::foreign_p2pkh_address(&funding_key),
                units_burned,
                nanos_created,
                total_nanos_purchased_before: nanos_purchased_before,
                total_nanos_purchased_after: view.nanos_purchased(),
            });
        }
        TxPayload::Like { liked_post, .. } => {
            if view.post_for_hash(liked_post).is_none() {
                return Err(MetadataError::MissingPost(*liked_post));
            }
        }
        TxPayload::SubmitPost { parent_post: Some(parent), .. } => {
            if view.post_for_hash(parent).is_none() {
                return Err(MetadataError::MissingPost(*parent));
            }
        }
        _ => {}
    }

    Ok(TransactionMetadata {
        tx_type: tx.tx_type(),
        transactor_public_key,
        total_input_nanos: outcome.total_input,
        total_output_nanos: outcome.total_output,
        fee_nanos: outcome.fee,
        affected_public_keys: affected_public_keys(tx, view),
        cross_chain,
    })
}

#[cfg(test)]
#[path = "indexer_test.rs"]
mod indexer_test;
