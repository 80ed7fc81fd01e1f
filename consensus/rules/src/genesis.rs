//! Genesis block construction.
//!
//! The genesis coinbase is fixed data, not a mined transaction: a
//! single output paying the start reward to a hard-coded one-time key.
//! Mainnet and testnet differ only by nonce, which is enough to give
//! them distinct hashes.

//---------------------------------------------------------------------------------------------------- Import
use hex_literal::hex;

use azurite_constants::money::START_BLOCK_REWARD;
use azurite_types::{
    build_extra, Block, BlockHeader, BlockIndex, CachedBlock, Hash, PublicKey, Transaction,
    TransactionInput, TransactionOutput, TransactionOutputTarget,
};

//---------------------------------------------------------------------------------------------------- Constants
/// The one-time key the genesis reward pays to.
const GENESIS_OUTPUT_KEY: [u8; 32] =
    hex!("9b2e4c0281c0b02e7c53291a94d1d0cbff8883f8024f5142ee494ffbbd088071");

/// The transaction public key embedded in the genesis coinbase extra.
const GENESIS_TX_PUBKEY: [u8; 32] =
    hex!("38dc57b313e2560fa75f5d7c9a6398800855220aefb3603bc70826adc83e0cc1");

const GENESIS_NONCE: u32 = 70;

const fn genesis_nonce(testnet: bool) -> u32 {
    if testnet {
        GENESIS_NONCE + 1
    } else {
        GENESIS_NONCE
    }
}

//---------------------------------------------------------------------------------------------------- Public API
fn genesis_coinbase(unlock_window: BlockIndex) -> Transaction {
    Transaction {
        version: 1,
        unlock_time: u64::from(unlock_window),
        inputs: vec![TransactionInput::Coinbase { height: 0 }],
        outputs: vec![TransactionOutput {
            amount: START_BLOCK_REWARD,
            target: TransactionOutputTarget::Key(PublicKey(GENESIS_OUTPUT_KEY)),
        }],
        extra: build_extra(&PublicKey(GENESIS_TX_PUBKEY), None),
        signatures: vec![],
    }
}

/// Generates the genesis block.
///
/// # Panics
/// Panics if the fixed genesis data fails to serialize, which would be
/// a build-breaking defect, not a runtime condition.
pub fn generate_genesis_block(testnet: bool, unlock_window: BlockIndex) -> CachedBlock {
    let block = Block {
        header: BlockHeader {
            major_version: 1,
            minor_version: 0,
            timestamp: 0,
            previous: Hash::ZERO,
            nonce: genesis_nonce(testnet),
        },
        coinbase: genesis_coinbase(unlock_window),
        transaction_hashes: vec![],
    };

    CachedBlock::try_from(block).expect("genesis block must serialize")
}
