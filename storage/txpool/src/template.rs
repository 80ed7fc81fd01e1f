//! Per-template collision tracking.

//---------------------------------------------------------------------------------------------------- Import
use std::collections::HashSet;

use azurite_types::{Hash, KeyImage, Transaction, TransactionInput};

//---------------------------------------------------------------------------------------------------- BlockTemplate
/// Tracks key-image collisions among the transactions already chosen
/// for a template; two pool transactions can be individually valid
/// yet spend the same output.
#[derive(Debug, Default)]
pub struct BlockTemplate {
    key_images: HashSet<KeyImage>,
    transactions: Vec<Hash>,
}

impl BlockTemplate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit the transaction unless it collides with one already
    /// chosen.
    pub fn add_transaction(&mut self, hash: &Hash, transaction: &Transaction) -> bool {
        for input in &transaction.inputs {
            match input {
                TransactionInput::KeySpend { key_image, .. } => {
                    if self.key_images.contains(key_image) {
                        return false;
                    }
                }
                TransactionInput::Coinbase { .. } => {}
            }
        }

        self.key_images
            .extend(transaction.key_images().copied());
        self.transactions.push(*hash);
        true
    }

    /// Chosen hashes in pick order.
    pub fn transactions(&self) -> &[Hash] {
        &self.transactions
    }

    pub fn into_transactions(self) -> Vec<Hash> {
        self.transactions
    }
}
