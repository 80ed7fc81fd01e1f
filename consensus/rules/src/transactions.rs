//! Transaction rules.
//!
//! Static checks need nothing but the transaction; contextual input
//! verification additionally needs the ring member keys, which the
//! chain manager extracts from the blockchain cache and passes in.

//---------------------------------------------------------------------------------------------------- Import
use std::collections::HashSet;

use azurite_constants::tx::MAX_TX_SIZE;
use azurite_types::{
    Hash, KeyImage, PublicKey, Signature, Transaction, TransactionInput, TransactionOutputTarget,
};

mod ring_signatures;

pub use ring_signatures::{
    generate_key_image, generate_ring_signature, hash_to_point, RingVerifier,
};

//---------------------------------------------------------------------------------------------------- Error
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TransactionError {
    #[error("the transaction version is not supported")]
    VersionInvalid,
    #[error("the transaction is too big")]
    TooBig,
    #[error("the transaction has no inputs")]
    NoInputs,
    #[error("a non-coinbase transaction carries a coinbase input")]
    InputNotSupported,
    #[error("the transaction inputs overflow when summed")]
    InputsOverflow,
    #[error("the transaction outputs overflow when summed")]
    OutputsOverflow,
    #[error("the transaction outputs more than it spends")]
    OutputsTooHigh,
    #[error("the transaction has a zero-amount output")]
    ZeroAmountOutput,
    #[error("an input has an empty ring")]
    EmptyRing,
    #[error("an input's ring member offsets are not strictly increasing")]
    RingMembersNotSorted,
    #[error("the transaction spends the same key image twice")]
    DuplicateKeyImage,
    #[error("the signature groups do not match the inputs")]
    SignatureShapeInvalid,
    #[error("a ring signature failed verification")]
    RingSignatureIncorrect,
}

//---------------------------------------------------------------------------------------------------- Statics
/// Checks everything about a non-coinbase transaction that needs no
/// chain context.
pub fn check_transaction_statics(
    tx: &Transaction,
    blob_size: usize,
) -> Result<(), TransactionError> {
    if tx.version != 1 {
        return Err(TransactionError::VersionInvalid);
    }

    if blob_size > MAX_TX_SIZE {
        return Err(TransactionError::TooBig);
    }

    if tx.inputs.is_empty() {
        return Err(TransactionError::NoInputs);
    }

    let mut key_images = HashSet::with_capacity(tx.inputs.len());
    for input in &tx.inputs {
        match input {
            TransactionInput::Coinbase { .. } => {
                return Err(TransactionError::InputNotSupported);
            }
            TransactionInput::KeySpend {
                output_indexes,
                key_image,
                ..
            } => {
                if output_indexes.is_empty() {
                    return Err(TransactionError::EmptyRing);
                }
                // Relative offsets after the first must be positive or
                // the absolute indexes collide.
                if output_indexes[1..].iter().any(|&offset| offset == 0) {
                    return Err(TransactionError::RingMembersNotSorted);
                }
                if !key_images.insert(*key_image) {
                    return Err(TransactionError::DuplicateKeyImage);
                }
            }
        }
    }

    for output in &tx.outputs {
        if output.amount == 0 {
            return Err(TransactionError::ZeroAmountOutput);
        }
        match output.target {
            TransactionOutputTarget::Key(_) => {}
        }
    }

    let inputs = tx
        .inputs_amount()
        .ok_or(TransactionError::InputsOverflow)?;
    let outputs = tx
        .outputs_amount()
        .ok_or(TransactionError::OutputsOverflow)?;
    if outputs > inputs {
        return Err(TransactionError::OutputsTooHigh);
    }

    check_signature_shape(tx)?;

    Ok(())
}

/// One signature group per input, one signature per ring member.
fn check_signature_shape(tx: &Transaction) -> Result<(), TransactionError> {
    if tx.signatures.len() != tx.inputs.len() {
        return Err(TransactionError::SignatureShapeInvalid);
    }

    for (input, group) in tx.inputs.iter().zip(&tx.signatures) {
        let ring_size = match input {
            TransactionInput::KeySpend { output_indexes, .. } => output_indexes.len(),
            TransactionInput::Coinbase { .. } => 0,
        };
        if group.len() != ring_size {
            return Err(TransactionError::SignatureShapeInvalid);
        }
    }
    Ok(())
}

//---------------------------------------------------------------------------------------------------- Signatures
/// Verification seam for ring signatures, so tests can substitute a
/// recording stub for the curve math.
pub trait RingSignatureVerifier: Send + Sync {
    /// Check one input's ring signature over `prefix_hash`.
    fn check_ring_signature(
        &self,
        prefix_hash: &Hash,
        key_image: &KeyImage,
        ring: &[PublicKey],
        signatures: &[Signature],
    ) -> bool;
}

/// Verify every input signature of a transaction against its resolved
/// rings.
///
/// `rings` holds the ring member keys per key-spend input, in input
/// order, as resolved by the caller from the chain.
pub fn check_input_signatures<V: RingSignatureVerifier>(
    tx: &Transaction,
    rings: &[Vec<PublicKey>],
    verifier: &V,
) -> Result<(), TransactionError> {
    let prefix_hash = tx
        .prefix_hash()
        .map_err(|_| TransactionError::SignatureShapeInvalid)?;

    let spends: Vec<(&KeyImage, &Vec<Signature>)> = tx
        .inputs
        .iter()
        .zip(&tx.signatures)
        .filter_map(|(input, group)| match input {
            TransactionInput::KeySpend { key_image, .. } => Some((key_image, group)),
            TransactionInput::Coinbase { .. } => None,
        })
        .collect();

    if spends.len() != rings.len() {
        return Err(TransactionError::SignatureShapeInvalid);
    }

    let check = |((key_image, group), ring): (&(&KeyImage, &Vec<Signature>), &Vec<PublicKey>)| {
        if ring.len() != group.len() {
            return Err(TransactionError::SignatureShapeInvalid);
        }
        if verifier.check_ring_signature(&prefix_hash, key_image, ring, group) {
            Ok(())
        } else {
            Err(TransactionError::RingSignatureIncorrect)
        }
    };

    #[cfg(feature = "rayon")]
    {
        use rayon::prelude::*;
        spends.par_iter().zip(rings.par_iter()).try_for_each(check)
    }
    #[cfg(not(feature = "rayon"))]
    {
        spends.iter().zip(rings).try_for_each(check)
    }
}

//---------------------------------------------------------------------------------------------------- Tests
#[cfg(test)]
mod tests {
    use super::*;
    use azurite_types::{TransactionOutput, TransactionOutputTarget};

    fn spend(amount: u64, offsets: Vec<u32>, image: u8) -> TransactionInput {
        TransactionInput::KeySpend {
            amount,
            output_indexes: offsets,
            key_image: KeyImage([image; 32]),
        }
    }

    fn tx(inputs: Vec<TransactionInput>, out_amount: u64) -> Transaction {
        let signatures = inputs
            .iter()
            .map(|input| match input {
                TransactionInput::KeySpend { output_indexes, .. } => {
                    vec![
                        Signature {
                            c: [0; 32],
                            r: [0; 32]
                        };
                        output_indexes.len()
                    ]
                }
                TransactionInput::Coinbase { .. } => vec![],
            })
            .collect();
        Transaction {
            version: 1,
            unlock_time: 0,
            inputs,
            outputs: vec![TransactionOutput {
                amount: out_amount,
                target: TransactionOutputTarget::Key(PublicKey::ZERO),
            }],
            extra: vec![],
            signatures,
        }
    }

    #[test]
    fn valid_statics_pass() {
        let t = tx(vec![spend(100, vec![0, 1, 2], 1)], 90);
        assert!(check_transaction_statics(&t, 100).is_ok());
    }

    #[test]
    fn coinbase_input_is_rejected() {
        let t = tx(vec![TransactionInput::Coinbase { height: 1 }], 10);
        assert_eq!(
            check_transaction_statics(&t, 100),
            Err(TransactionError::InputNotSupported)
        );
    }

    #[test]
    fn duplicate_key_image_is_rejected() {
        let t = tx(vec![spend(50, vec![0], 1), spend(60, vec![1], 1)], 90);
        assert_eq!(
            check_transaction_statics(&t, 100),
            Err(TransactionError::DuplicateKeyImage)
        );
    }

    #[test]
    fn zero_relative_offset_is_rejected() {
        let t = tx(vec![spend(100, vec![3, 0], 1)], 90);
        assert_eq!(
            check_transaction_statics(&t, 100),
            Err(TransactionError::RingMembersNotSorted)
        );
    }

    #[test]
    fn outputs_over_inputs_are_rejected() {
        let t = tx(vec![spend(100, vec![0], 1)], 101);
        assert_eq!(
            check_transaction_statics(&t, 100),
            Err(TransactionError::OutputsTooHigh)
        );
    }

    #[test]
    fn signature_shape_must_match_rings() {
        let mut t = tx(vec![spend(100, vec![0, 1], 1)], 90);
        t.signatures[0].pop();
        assert_eq!(
            check_transaction_statics(&t, 100),
            Err(TransactionError::SignatureShapeInvalid)
        );
    }

    #[test]
    fn ring_mismatch_is_reported() {
        struct AlwaysTrue;
        impl RingSignatureVerifier for AlwaysTrue {
            fn check_ring_signature(
                &self,
                _: &Hash,
                _: &KeyImage,
                _: &[PublicKey],
                _: &[Signature],
            ) -> bool {
                true
            }
        }

        let t = tx(vec![spend(100, vec![0, 1], 1)], 90);
        // One ring of the wrong size.
        let rings = vec![vec![PublicKey::ZERO]];
        assert_eq!(
            check_input_signatures(&t, &rings, &AlwaysTrue),
            Err(TransactionError::SignatureShapeInvalid)
        );

        let rings = vec![vec![PublicKey::ZERO, PublicKey::ZERO]];
        assert!(check_input_signatures(&t, &rings, &AlwaysTrue).is_ok());
    }
}
