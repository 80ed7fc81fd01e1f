//! Transactions.

//---------------------------------------------------------------------------------------------------- Import
use bincode::{Decode, Encode};

use crate::{
    blob::{from_blob, hash_bytes, to_blob, BlobError},
    Amount, BlockIndex, GlobalOutputIndex, Hash, KeyImage, PublicKey, Signature,
};

//---------------------------------------------------------------------------------------------------- Input
/// A transaction input.
///
/// Match sites are exhaustive on purpose; adding a variant must surface
/// every location that has to handle it.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub enum TransactionInput {
    /// The synthetic input of a coinbase transaction, carrying the
    /// height it mints into.
    Coinbase { height: BlockIndex },
    /// Spend of a key output through a ring.
    KeySpend {
        amount: Amount,
        /// Ring member positions as deltas: the first is a global
        /// output index for `amount`, each later one is relative to the
        /// previous. Must be sorted ascending after accumulation.
        output_indexes: Vec<GlobalOutputIndex>,
        key_image: KeyImage,
    },
}

impl TransactionInput {
    /// The amount this input spends (the minted reward is accounted
    /// for on the output side).
    pub fn amount(&self) -> Amount {
        match self {
            Self::Coinbase { .. } => 0,
            Self::KeySpend { amount, .. } => *amount,
        }
    }
}

/// Turn relative ring member offsets into absolute global indexes.
pub fn absolute_output_indexes(relative: &[GlobalOutputIndex]) -> Vec<GlobalOutputIndex> {
    let mut absolute = Vec::with_capacity(relative.len());
    let mut sum = 0;
    for offset in relative {
        sum += offset;
        absolute.push(sum);
    }
    absolute
}

//---------------------------------------------------------------------------------------------------- Output
/// What a transaction output pays to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum TransactionOutputTarget {
    /// A one-time key.
    Key(PublicKey),
}

/// A transaction output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct TransactionOutput {
    pub amount: Amount,
    pub target: TransactionOutputTarget,
}

//---------------------------------------------------------------------------------------------------- Transaction
/// A parsed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Transaction {
    pub version: u8,
    /// Below the maximum block number this is a block index, otherwise
    /// a Unix timestamp.
    pub unlock_time: u64,
    pub inputs: Vec<TransactionInput>,
    pub outputs: Vec<TransactionOutput>,
    pub extra: Vec<u8>,
    /// One signature group per input; each group has one signature per
    /// ring member. Empty for coinbase transactions.
    pub signatures: Vec<Vec<Signature>>,
}

impl Transaction {
    /// Checked sum of input amounts.
    pub fn inputs_amount(&self) -> Option<Amount> {
        self.inputs
            .iter()
            .try_fold(0_u64, |sum, input| sum.checked_add(input.amount()))
    }

    /// Checked sum of output amounts.
    pub fn outputs_amount(&self) -> Option<Amount> {
        self.outputs
            .iter()
            .try_fold(0_u64, |sum, output| sum.checked_add(output.amount))
    }

    /// `inputs − outputs`; [`None`] on overflow or if outputs exceed
    /// inputs. Coinbase transactions mint, so their fee is 0.
    pub fn fee(&self) -> Option<Amount> {
        if matches!(self.inputs.first(), Some(TransactionInput::Coinbase { .. })) {
            return Some(0);
        }
        self.inputs_amount()?.checked_sub(self.outputs_amount()?)
    }

    /// Hash of the transaction without its signatures; the message
    /// every ring signature commits to.
    pub fn prefix_hash(&self) -> Result<Hash, BlobError> {
        let blob = to_blob(&(
            self.version,
            self.unlock_time,
            &self.inputs,
            &self.outputs,
            &self.extra,
        ))?;
        Ok(hash_bytes(&blob))
    }

    /// All key images referenced by this transaction's inputs.
    pub fn key_images(&self) -> impl Iterator<Item = &KeyImage> {
        self.inputs.iter().filter_map(|input| match input {
            TransactionInput::KeySpend { key_image, .. } => Some(key_image),
            TransactionInput::Coinbase { .. } => None,
        })
    }
}

//---------------------------------------------------------------------------------------------------- CachedTransaction
/// A transaction plus its memoized blob, size and hash.
#[derive(Debug, Clone)]
pub struct CachedTransaction {
    transaction: Transaction,
    blob: Vec<u8>,
    hash: Hash,
}

impl CachedTransaction {
    /// Parse a transaction blob.
    pub fn from_blob(blob: Vec<u8>) -> Result<Self, BlobError> {
        let transaction = from_blob(&blob)?;
        let hash = hash_bytes(&blob);
        Ok(Self {
            transaction,
            blob,
            hash,
        })
    }

    pub fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    pub fn blob(&self) -> &[u8] {
        &self.blob
    }

    pub fn blob_size(&self) -> usize {
        self.blob.len()
    }

    pub fn hash(&self) -> &Hash {
        &self.hash
    }

    /// Give the parts back to the caller.
    pub fn into_parts(self) -> (Transaction, Vec<u8>, Hash) {
        (self.transaction, self.blob, self.hash)
    }
}

impl TryFrom<Transaction> for CachedTransaction {
    type Error = BlobError;

    fn try_from(transaction: Transaction) -> Result<Self, BlobError> {
        let blob = to_blob(&transaction)?;
        let hash = hash_bytes(&blob);
        Ok(Self {
            transaction,
            blob,
            hash,
        })
    }
}
