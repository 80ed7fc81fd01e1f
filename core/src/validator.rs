//! Contextual transaction-input verification against the chain.

//---------------------------------------------------------------------------------------------------- Import
use azurite_blockchain::BlockchainCache;
use azurite_consensus_rules::{
    transactions::check_input_signatures, RingSignatureVerifier,
};
use azurite_database::Database;
use azurite_types::{
    absolute_output_indexes, BlockIndex, Hash, PublicKey, Transaction, TransactionInput,
};

use crate::error::CoreError;

//---------------------------------------------------------------------------------------------------- Checks
/// Verify a transaction's inputs against the current chain: every
/// ring member exists and is unlocked, no key image is already spent,
/// and every ring signature holds.
///
/// Success returns the highest main-chain block any ring member lives
/// in, with its hash; a reorg past that block invalidates the check.
pub(crate) fn check_transaction_inputs<D: Database, R: RingSignatureVerifier>(
    cache: &BlockchainCache<D>,
    verifier: &R,
    tx: &Transaction,
) -> Result<(BlockIndex, Hash), CoreError> {
    let top = cache.top_block_index()?;

    let mut max_used_index = 0;
    let mut rings: Vec<Vec<PublicKey>> = Vec::new();

    for input in &tx.inputs {
        match input {
            TransactionInput::Coinbase { .. } => {
                // Statics already refused coinbase inputs here.
            }
            TransactionInput::KeySpend {
                amount,
                output_indexes,
                key_image,
            } => {
                let absolute = absolute_output_indexes(output_indexes);

                let keys = cache.extract_key_output_keys(*amount, &absolute, top)?;

                for &index in &absolute {
                    let reference = cache.key_output(*amount, index)?;
                    max_used_index = max_used_index.max(reference.block_index);
                }

                if cache.is_spent_at_top(key_image)? {
                    return Err(CoreError::DoubleSpend(*key_image));
                }

                rings.push(keys);
            }
        }
    }

    check_input_signatures(tx, &rings, verifier)?;

    let max_used_hash = cache.block_hash(max_used_index)?;
    Ok((max_used_index, max_used_hash))
}

//---------------------------------------------------------------------------------------------------- Pool seam
/// The chain's answers to the pool's admission questions.
pub struct ChainInputValidator<'a, D, R> {
    pub(crate) cache: &'a BlockchainCache<D>,
    pub(crate) verifier: &'a R,
}

impl<D: Database, R: RingSignatureVerifier> azurite_txpool::TransactionValidator
    for ChainInputValidator<'_, D, R>
{
    fn check_transaction_inputs(&self, tx: &Transaction) -> Option<(BlockIndex, Hash)> {
        check_transaction_inputs(self.cache, self.verifier, tx).ok()
    }

    fn have_spent_key_images(&self, tx: &Transaction) -> bool {
        tx.key_images()
            .any(|image| self.cache.is_spent_at_top(image).unwrap_or(true))
    }
}
