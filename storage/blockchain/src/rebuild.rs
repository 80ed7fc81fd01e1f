//! Schema versioning and the one-shot index rebuild.
//!
//! The raw-block records under `'4'` are the ground truth; every other
//! index can be regenerated from them. A store written by an older
//! schema is wiped (raw blocks aside) and re-pushed block by block.

//---------------------------------------------------------------------------------------------------- Import
use std::sync::Arc;

use azurite_consensus_rules::{difficulty::next_difficulty, Currency};
use azurite_database::{Database, RawWriteBatch};
use azurite_types::{from_blob, CachedBlock, CachedTransaction, RawBlock};

use crate::{
    cache::BlockchainCache,
    error::CacheError,
    read_batch::BlockchainReadBatch,
    schema,
    types::ValidatorState,
    write_batch::BlockchainWriteBatch,
    DB_SCHEME_VERSION,
};

//---------------------------------------------------------------------------------------------------- Version
/// The stored schema version, if any.
pub(crate) fn stored_scheme_version<D: Database>(db: &D) -> Result<Option<u32>, CacheError> {
    let mut batch = BlockchainReadBatch::new().request_db_scheme_version();
    db.read(&mut batch)?;
    let result = batch.extract_result()?;
    let (version, present) = result.db_scheme_version();
    Ok(present.then_some(version))
}

//---------------------------------------------------------------------------------------------------- Rebuild
/// Drop every derived index and regenerate it from the raw blocks.
pub(crate) fn rebuild_from_raw_blocks<D: Database>(
    currency: &Arc<Currency>,
    db: &D,
) -> Result<(), CacheError> {
    // Collect the ground truth first; big-endian keys hand the blocks
    // over in height order.
    let mut raw_blocks: Vec<RawBlock> = Vec::new();
    let mut decode_error = None;
    db.for_each_prefixed(&[schema::RAW_BLOCK_BY_INDEX], &mut |_, value| {
        if decode_error.is_some() {
            return;
        }
        match from_blob(value) {
            Ok(raw) => raw_blocks.push(raw),
            Err(e) => decode_error = Some(e),
        }
    })?;
    if let Some(e) = decode_error {
        return Err(e.into());
    }

    tracing::info!(blocks = raw_blocks.len(), "rebuilding indexes from raw blocks");

    // Wipe everything, then stamp the new schema version.
    let mut keys = Vec::new();
    db.for_each_prefixed(&[], &mut |key, _| keys.push(key.to_vec()))?;
    db.write(RawWriteBatch {
        to_insert: Vec::new(),
        to_remove: keys,
    })?;

    let mut version_batch = BlockchainWriteBatch::new();
    version_batch.insert_db_scheme_version(DB_SCHEME_VERSION)?;
    db.write(version_batch)?;

    // Re-push each block through a cache borrowing the same store.
    // The cache adds the genesis itself on open; blocks past it replay
    // with recomputed difficulties.
    let cache = BlockchainCache::open(Arc::clone(currency), db)?;
    for raw_block in raw_blocks.into_iter().skip(1) {
        replay_block(&cache, raw_block)?;
    }
    Ok(())
}

fn replay_block<D: Database>(
    cache: &BlockchainCache<&D>,
    raw_block: RawBlock,
) -> Result<(), CacheError> {
    let block = CachedBlock::from_blob(raw_block.block.clone())?;
    let transactions = raw_block
        .transactions
        .iter()
        .map(|blob| CachedTransaction::from_blob(blob.clone()))
        .collect::<Result<Vec<_>, _>>()?;

    let mut validator_state = ValidatorState::default();
    let mut fees = 0_u64;
    for transaction in &transactions {
        validator_state
            .spent_key_images
            .extend(transaction.transaction().key_images().copied());
        fees += transaction
            .transaction()
            .fee()
            .ok_or(CacheError::InvariantViolation(
                "stored transaction has an invalid fee",
            ))?;
    }

    // reward = penalized base + penalized fee, and the emission change
    // is always reward − fees, so generated coins come straight from
    // the coinbase outputs.
    let coinbase_outputs = block
        .block()
        .coinbase
        .outputs_amount()
        .ok_or(CacheError::InvariantViolation(
            "stored coinbase overflows",
        ))?;
    let generated_coins = coinbase_outputs.saturating_sub(fees);

    let top = cache.top_block_index()?;
    let currency = cache.currency();
    let window = currency.difficulty_blocks_count();
    let timestamps = cache.last_timestamps(window, top, true)?;
    let cumulative_difficulties = cache.last_cumulative_difficulties(window, top, true)?;
    let block_difficulty = next_difficulty(currency, timestamps, cumulative_difficulties);

    let block_size = raw_block.size() as u64;
    cache.push_block_at(
        Some((top, cache.block_info(top)?)),
        &block,
        &transactions,
        validator_state,
        block_size,
        generated_coins,
        block_difficulty,
        raw_block,
    )
}
