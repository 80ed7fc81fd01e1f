//! Coinbase transaction rules and construction.

//---------------------------------------------------------------------------------------------------- Import
use azurite_types::{
    build_extra, Amount, BlockIndex, PublicKey, Transaction, TransactionInput, TransactionOutput,
    TransactionOutputTarget,
};

use crate::currency::{Currency, RewardError};

//---------------------------------------------------------------------------------------------------- Error
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MinerTxError {
    #[error("the coinbase does not have exactly one input")]
    IncorrectNumberOfInputs,
    #[error("the coinbase input is not of the coinbase variant")]
    InputNotCoinbase,
    #[error("the coinbase input carries the wrong block height")]
    InputHeightIncorrect,
    #[error("the coinbase has an incorrect unlock time")]
    InvalidUnlockTime,
    #[error("the coinbase must not carry signatures")]
    HasSignatures,
    #[error("the coinbase outputs overflow when summed")]
    OutputsOverflow,
    #[error("the coinbase outputs the wrong amount")]
    OutputAmountIncorrect,
    #[error("the block is too big for a reward at this median")]
    BlockTooBig,
}

impl From<RewardError> for MinerTxError {
    fn from(RewardError::BlockTooBig: RewardError) -> Self {
        Self::BlockTooBig
    }
}

//---------------------------------------------------------------------------------------------------- Checks
/// Prevalidate a block's coinbase against its height and the reward it
/// may claim, returning the emission change on success.
pub fn check_coinbase(
    currency: &Currency,
    coinbase: &Transaction,
    block_index: BlockIndex,
    median_size: usize,
    cumulative_block_size: usize,
    fee: Amount,
    already_generated: Amount,
    penalize_fee: bool,
) -> Result<i64, MinerTxError> {
    let [input] = coinbase.inputs.as_slice() else {
        return Err(MinerTxError::IncorrectNumberOfInputs);
    };

    match input {
        TransactionInput::Coinbase { height } => {
            if *height != block_index {
                return Err(MinerTxError::InputHeightIncorrect);
            }
        }
        TransactionInput::KeySpend { .. } => return Err(MinerTxError::InputNotCoinbase),
    }

    if coinbase.unlock_time
        != u64::from(block_index) + u64::from(currency.mined_money_unlock_window())
    {
        return Err(MinerTxError::InvalidUnlockTime);
    }

    if !coinbase.signatures.is_empty() {
        return Err(MinerTxError::HasSignatures);
    }

    let total_outputs = coinbase
        .outputs_amount()
        .ok_or(MinerTxError::OutputsOverflow)?;

    let (reward, emission_change) = currency.block_reward(
        median_size,
        cumulative_block_size,
        already_generated,
        fee,
        penalize_fee,
    )?;

    if total_outputs != reward {
        return Err(MinerTxError::OutputAmountIncorrect);
    }

    Ok(emission_change)
}

//---------------------------------------------------------------------------------------------------- Construction
/// Split an amount into power-of-ten digits, dust first.
pub fn decompose_amount(amount: Amount, dust_threshold: Amount) -> Vec<Amount> {
    let mut chunks = Vec::new();
    let mut dust = 0;
    let mut order = 1_u64;
    let mut remaining = amount;

    while remaining > 0 {
        let digit = (remaining % 10) * order;
        remaining /= 10;
        if order <= u64::MAX / 10 {
            order *= 10;
        }
        if digit == 0 {
            continue;
        }
        if dust + digit <= dust_threshold {
            dust += digit;
        } else {
            chunks.push(digit);
        }
    }

    let mut amounts = Vec::with_capacity(chunks.len() + 1);
    if dust > 0 {
        amounts.push(dust);
    }
    amounts.extend(chunks);
    amounts
}

/// Build the coinbase for a block template.
///
/// Outputs pay directly to `miner_key`; one-time key derivation is the
/// wallet's side of the contract. `max_outs` bounds the decomposition,
/// folding excess digits into the largest one.
pub fn construct_coinbase_tx(
    currency: &Currency,
    block_index: BlockIndex,
    median_size: usize,
    already_generated: Amount,
    current_block_size: usize,
    fee: Amount,
    miner_key: &PublicKey,
    extra_nonce: &[u8],
    max_outs: usize,
    penalize_fee: bool,
) -> Result<Transaction, MinerTxError> {
    debug_assert!(max_outs >= 1);

    let (reward, _) = currency.block_reward(
        median_size,
        current_block_size,
        already_generated,
        fee,
        penalize_fee,
    )?;

    let mut out_amounts = decompose_amount(reward, currency.default_dust_threshold());
    while out_amounts.len() > max_outs {
        let last = out_amounts.pop().unwrap();
        *out_amounts.last_mut().unwrap() += last;
    }

    let mut extra = build_extra(miner_key, None);
    if !extra_nonce.is_empty() {
        extra.push(0x02);
        extra.push(extra_nonce.len() as u8);
        extra.extend_from_slice(extra_nonce);
    }

    Ok(Transaction {
        version: 1,
        unlock_time: u64::from(block_index) + u64::from(currency.mined_money_unlock_window()),
        inputs: vec![TransactionInput::Coinbase {
            height: block_index,
        }],
        outputs: out_amounts
            .into_iter()
            .map(|amount| TransactionOutput {
                amount,
                target: TransactionOutputTarget::Key(*miner_key),
            })
            .collect(),
        extra,
        signatures: vec![],
    })
}

//---------------------------------------------------------------------------------------------------- Tests
#[cfg(test)]
mod tests {
    use azurite_constants::money::START_BLOCK_REWARD;
    use proptest::prelude::*;

    use super::*;
    use crate::CurrencyBuilder;

    fn currency() -> Currency {
        CurrencyBuilder::new().build()
    }

    fn valid_coinbase(c: &Currency, block_index: BlockIndex) -> Transaction {
        construct_coinbase_tx(
            c,
            block_index,
            0,
            0,
            0,
            0,
            &PublicKey([1; 32]),
            &[],
            10,
            false,
        )
        .unwrap()
    }

    #[test]
    fn constructed_coinbase_validates() {
        let c = currency();
        let coinbase = valid_coinbase(&c, 5);
        let emission = check_coinbase(&c, &coinbase, 5, 0, 0, 0, 0, false).unwrap();
        assert_eq!(emission, START_BLOCK_REWARD as i64);
    }

    #[test]
    fn wrong_height_is_rejected() {
        let c = currency();
        let coinbase = valid_coinbase(&c, 5);
        assert_eq!(
            check_coinbase(&c, &coinbase, 6, 0, 0, 0, 0, false),
            Err(MinerTxError::InputHeightIncorrect)
        );
    }

    #[test]
    fn wrong_unlock_time_is_rejected() {
        let c = currency();
        let mut coinbase = valid_coinbase(&c, 5);
        coinbase.unlock_time += 1;
        assert_eq!(
            check_coinbase(&c, &coinbase, 5, 0, 0, 0, 0, false),
            Err(MinerTxError::InvalidUnlockTime)
        );
    }

    #[test]
    fn wrong_reward_is_rejected() {
        let c = currency();
        let mut coinbase = valid_coinbase(&c, 5);
        coinbase.outputs[0].amount += 1;
        assert_eq!(
            check_coinbase(&c, &coinbase, 5, 0, 0, 0, 0, false),
            Err(MinerTxError::OutputAmountIncorrect)
        );
    }

    #[test]
    fn key_spend_input_is_rejected() {
        let c = currency();
        let mut coinbase = valid_coinbase(&c, 5);
        coinbase.inputs = vec![TransactionInput::KeySpend {
            amount: 1,
            output_indexes: vec![0],
            key_image: azurite_types::KeyImage::ZERO,
        }];
        assert_eq!(
            check_coinbase(&c, &coinbase, 5, 0, 0, 0, 0, false),
            Err(MinerTxError::InputNotCoinbase)
        );
    }

    #[test]
    fn decompose_keeps_dust_together() {
        // 123_456 with dust threshold 1000: 400 + 50 + 6 stay dust.
        let amounts = decompose_amount(123_456, 1_000);
        assert_eq!(amounts, vec![456, 3_000, 20_000, 100_000]);
    }

    proptest! {
        #[test]
        fn decompose_sums_back(amount in 0_u64..=u64::MAX / 2, dust in 0_u64..1_000_000) {
            let total: u64 = decompose_amount(amount, dust).iter().sum();
            prop_assert_eq!(total, amount);
        }

        #[test]
        fn max_outs_is_respected(amount in 1_u64..u64::MAX / 2, max_outs in 1_usize..20) {
            let c = currency();
            let mut amounts = decompose_amount(amount, c.default_dust_threshold());
            while amounts.len() > max_outs {
                let last = amounts.pop().unwrap();
                *amounts.last_mut().unwrap() += last;
            }
            prop_assert!(amounts.len() <= max_outs);
            prop_assert_eq!(amounts.iter().sum::<u64>(), amount);
        }
    }
}
