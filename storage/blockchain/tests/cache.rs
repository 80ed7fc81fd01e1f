//! End-to-end tests over the cache with an in-memory store.

use std::sync::Arc;

use azurite_blockchain::{
    BlockchainCache, BlockchainWriteBatch, CacheError, ValidatorState,
};
use azurite_consensus_rules::{Currency, CurrencyBuilder};
use azurite_database::{Database, RedbDatabase};
use azurite_types::{
    build_extra, to_blob, Block, BlockHeader, CachedBlock, CachedTransaction, Hash, KeyImage,
    PaymentId, PublicKey, RawBlock, Transaction, TransactionInput, TransactionOutput,
    TransactionOutputTarget,
};

const TEST_AMOUNT: u64 = 1000;

fn currency() -> Arc<Currency> {
    Arc::new(CurrencyBuilder::new().build())
}

fn open_cache() -> BlockchainCache<RedbDatabase> {
    BlockchainCache::open(currency(), RedbDatabase::in_memory().unwrap()).unwrap()
}

fn coinbase(height: u32, amount: u64) -> Transaction {
    Transaction {
        version: 1,
        unlock_time: u64::from(height) + 6,
        inputs: vec![TransactionInput::Coinbase { height }],
        outputs: vec![TransactionOutput {
            amount,
            target: TransactionOutputTarget::Key(PublicKey([height as u8; 32])),
        }],
        extra: build_extra(&PublicKey([0xee; 32]), None),
        signatures: vec![],
    }
}

fn spend_tx(key_image: u8, amount: u64, payment_id: Option<PaymentId>) -> Transaction {
    Transaction {
        version: 1,
        unlock_time: 0,
        inputs: vec![TransactionInput::KeySpend {
            amount,
            output_indexes: vec![0],
            key_image: KeyImage([key_image; 32]),
        }],
        outputs: vec![TransactionOutput {
            amount: amount / 2,
            target: TransactionOutputTarget::Key(PublicKey([key_image; 32])),
        }],
        extra: build_extra(&PublicKey([0xdd; 32]), payment_id.as_ref()),
        signatures: vec![vec![]],
    }
}

/// Append one block carrying `txs` on top of the current chain.
fn push_next_block(cache: &mut BlockchainCache<RedbDatabase>, txs: Vec<Transaction>) -> Hash {
    let top = cache.top_block_index().unwrap();
    let height = top + 1;

    let cached_txs: Vec<CachedTransaction> = txs
        .into_iter()
        .map(|tx| CachedTransaction::try_from(tx).unwrap())
        .collect();

    let block = Block {
        header: BlockHeader {
            major_version: 1,
            minor_version: 0,
            timestamp: 1_000_000 + u64::from(height) * 240,
            previous: cache.top_block_hash().unwrap(),
            nonce: height,
        },
        coinbase: coinbase(height, TEST_AMOUNT),
        transaction_hashes: cached_txs.iter().map(|tx| *tx.hash()).collect(),
    };
    let cached_block = CachedBlock::try_from(block).unwrap();

    let raw_block = RawBlock {
        block: cached_block.blob().to_vec(),
        transactions: cached_txs.iter().map(|tx| tx.blob().to_vec()).collect(),
    };

    let mut validator_state = ValidatorState::default();
    let mut fees = 0;
    for tx in &cached_txs {
        validator_state
            .spent_key_images
            .extend(tx.transaction().key_images().copied());
        fees += tx.transaction().fee().unwrap();
    }

    let generated = TEST_AMOUNT.saturating_sub(fees);
    let size = raw_block.size() as u64;
    let hash = *cached_block.hash();

    cache
        .push_block(&cached_block, &cached_txs, validator_state, size, generated, 1, raw_block)
        .unwrap();
    hash
}

fn dump(db: &RedbDatabase) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut all = Vec::new();
    db.for_each_prefixed(&[], &mut |k, v| all.push((k.to_vec(), v.to_vec())))
        .unwrap();
    all
}

//---------------------------------------------------------------------------------------------------- Open / genesis

#[test]
fn fresh_store_holds_only_genesis() {
    let cache = open_cache();

    assert_eq!(cache.top_block_index().unwrap(), 0);
    assert_eq!(
        cache.top_block_hash().unwrap(),
        *cache.currency().genesis_block().hash()
    );

    // The genesis coinbase got global index 0 for its amount.
    let genesis_coinbase_hash = *cache
        .currency()
        .genesis_block()
        .cached_coinbase()
        .unwrap()
        .hash();
    assert_eq!(
        cache
            .transaction_global_indexes(&genesis_coinbase_hash)
            .unwrap(),
        vec![0]
    );
    assert_eq!(cache.transactions_count().unwrap(), 1);
}

#[test]
fn reopen_preserves_the_chain() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chain.redb");

    {
        let db = RedbDatabase::open(&path).unwrap();
        let mut cache = BlockchainCache::open(currency(), db).unwrap();
        for _ in 0..5 {
            push_next_block(&mut cache, vec![]);
        }
    }

    let db = RedbDatabase::open(&path).unwrap();
    let cache = BlockchainCache::open(currency(), db).unwrap();
    assert_eq!(cache.top_block_index().unwrap(), 5);
}

#[test]
fn newer_scheme_version_refuses_to_open() {
    let db = RedbDatabase::in_memory().unwrap();
    let mut batch = BlockchainWriteBatch::new();
    batch.insert_db_scheme_version(99).unwrap();
    db.write(batch).unwrap();

    assert!(matches!(
        BlockchainCache::open(currency(), db),
        Err(CacheError::SchemeVersionTooNew { found: 99, .. })
    ));
}

//---------------------------------------------------------------------------------------------------- Linear growth

#[test]
fn linear_growth_assigns_dense_global_indexes() {
    let mut cache = open_cache();

    for _ in 0..10 {
        push_next_block(&mut cache, vec![]);
    }

    assert_eq!(cache.top_block_index().unwrap(), 10);
    assert_eq!(cache.key_outputs_count_for_amount(TEST_AMOUNT).unwrap(), 10);

    // key_output(A, i) points at block i + 1.
    for i in 0..10 {
        let reference = cache.key_output(TEST_AMOUNT, i).unwrap();
        assert_eq!(reference.block_index, i + 1);
        assert_eq!(reference.transaction_index, 0);
    }
    // No record past the count.
    assert!(matches!(
        cache.key_output(TEST_AMOUNT, 10),
        Err(CacheError::NotFound)
    ));

    // Strictly increasing cumulative difficulty (newest three).
    let diffs = cache.last_cumulative_difficulties(3, 10, true).unwrap();
    assert_eq!(diffs.len(), 3);
    assert!(diffs.windows(2).all(|w| w[0] < w[1]));

    // Hash <-> index maps stay mutual inverses.
    for index in 0..=10 {
        let hash = cache.block_hash(index).unwrap();
        assert_eq!(cache.block_index(&hash).unwrap(), index);
    }
}

#[test]
fn raw_blocks_round_trip() {
    let mut cache = open_cache();
    let hash = push_next_block(&mut cache, vec![spend_tx(9, 500, None)]);

    let raw = cache.raw_block(1).unwrap();
    let reparsed = CachedBlock::from_blob(raw.block.clone()).unwrap();
    assert_eq!(*reparsed.hash(), hash);
    assert_eq!(raw.transactions.len(), 1);
}

//---------------------------------------------------------------------------------------------------- Split

#[test]
fn push_then_split_leaves_the_store_byte_identical() {
    let mut cache = open_cache();
    push_next_block(&mut cache, vec![]);

    let before = dump(cache.database());

    let payment_id = PaymentId([7; 32]);
    push_next_block(&mut cache, vec![spend_tx(1, 400, Some(payment_id))]);
    cache.split(2).unwrap();

    let after = dump(cache.database());
    assert_eq!(before, after);
}

#[test]
fn split_then_reapply_is_a_noop() {
    let mut cache = open_cache();
    for i in 0..6 {
        let txs = if i % 2 == 0 {
            vec![spend_tx(i, 300 + u64::from(i), None)]
        } else {
            vec![]
        };
        push_next_block(&mut cache, txs);
    }

    let before = dump(cache.database());

    let segment = cache.split(3).unwrap();
    assert_eq!(segment.start_index, 3);
    assert_eq!(segment.blocks.len(), 4);
    assert_eq!(cache.top_block_index().unwrap(), 2);

    for pushed in segment.blocks {
        cache.push_stored_block(pushed).unwrap();
    }

    assert_eq!(before, dump(cache.database()));
    assert_eq!(cache.top_block_index().unwrap(), 6);
}

#[test]
fn split_rolls_key_output_count_back_to_boundary() {
    let mut cache = open_cache();
    for _ in 0..5 {
        push_next_block(&mut cache, vec![]);
    }
    assert_eq!(cache.key_outputs_count_for_amount(TEST_AMOUNT).unwrap(), 5);

    cache.split(3).unwrap();

    // Outputs from blocks 3..=5 are gone; the count equals the lowest
    // removed global index.
    assert_eq!(cache.key_outputs_count_for_amount(TEST_AMOUNT).unwrap(), 2);
    assert!(cache.key_output(TEST_AMOUNT, 1).is_ok());
    assert!(matches!(
        cache.key_output(TEST_AMOUNT, 2),
        Err(CacheError::NotFound)
    ));
}

#[test]
fn split_forgets_spent_key_images() {
    let mut cache = open_cache();
    let key_image = KeyImage([3; 32]);

    push_next_block(&mut cache, vec![spend_tx(3, 200, None)]);
    assert!(cache.is_spent_at_top(&key_image).unwrap());

    cache.split(1).unwrap();
    assert!(!cache.is_spent_at_top(&key_image).unwrap());
}

#[test]
fn spent_check_respects_upto_index() {
    let mut cache = open_cache();
    push_next_block(&mut cache, vec![]);
    push_next_block(&mut cache, vec![spend_tx(5, 250, None)]);

    let key_image = KeyImage([5; 32]);
    assert!(cache.is_spent(&key_image, 2).unwrap());
    assert!(!cache.is_spent(&key_image, 1).unwrap());
}

//---------------------------------------------------------------------------------------------------- Payment ids

#[test]
fn payment_id_enumeration_follows_append_order() {
    let mut cache = open_cache();
    let payment_id = PaymentId([9; 32]);

    let mut expected = Vec::new();
    for i in 0..3 {
        let tx = spend_tx(10 + i, 500, Some(payment_id));
        expected.push(*CachedTransaction::try_from(tx.clone()).unwrap().hash());
        push_next_block(&mut cache, vec![tx]);
    }

    assert_eq!(
        cache.transactions_by_payment_id(&payment_id).unwrap(),
        expected
    );

    // Pop the last block: the enumeration shrinks to two.
    cache.split(3).unwrap();
    assert_eq!(
        cache.transactions_by_payment_id(&payment_id).unwrap(),
        expected[..2]
    );
    assert_eq!(
        cache.transactions_count_by_payment_id(&payment_id).unwrap(),
        2
    );
}

//---------------------------------------------------------------------------------------------------- Random outputs

#[test]
fn random_outputs_never_return_immature_coinbase() {
    let mut cache = open_cache();
    for _ in 0..20 {
        push_next_block(&mut cache, vec![]);
    }

    // At height 10, outputs from blocks above 10 − unlock window are
    // immature, and coinbase unlocks lag as well.
    let picked = cache
        .random_unlocked_outputs(TEST_AMOUNT, 20, 10)
        .unwrap();
    for index in &picked {
        let reference = cache.key_output(TEST_AMOUNT, *index).unwrap();
        assert!(reference.block_index <= 10 - 6);
    }
}

#[test]
fn random_outputs_cap_at_the_supply() {
    let mut cache = open_cache();
    for _ in 0..30 {
        push_next_block(&mut cache, vec![]);
    }

    let picked = cache
        .random_unlocked_outputs(TEST_AMOUNT, 1000, 30)
        .unwrap();
    // Supply is bounded; distinctness is part of the contract.
    let mut sorted = picked.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(sorted.len(), picked.len());
    assert!(picked.len() <= 30);
}

//---------------------------------------------------------------------------------------------------- Key output queries

#[test]
fn count_at_or_before_binary_search() {
    let mut cache = open_cache();
    for _ in 0..10 {
        push_next_block(&mut cache, vec![]);
    }

    // Outputs live in blocks 1..=10, one per block.
    assert_eq!(
        cache.key_outputs_count_at_or_before(TEST_AMOUNT, 0).unwrap(),
        0
    );
    assert_eq!(
        cache.key_outputs_count_at_or_before(TEST_AMOUNT, 4).unwrap(),
        4
    );
    assert_eq!(
        cache
            .key_outputs_count_at_or_before(TEST_AMOUNT, 10)
            .unwrap(),
        10
    );
}

#[test]
fn extract_key_output_keys_validates_indexes() {
    let mut cache = open_cache();
    for _ in 0..10 {
        push_next_block(&mut cache, vec![]);
    }

    // Mature outputs extract fine well past the unlock window.
    let keys = cache
        .extract_key_output_keys(TEST_AMOUNT, &[0, 1], 20)
        .unwrap();
    assert_eq!(keys.len(), 2);
    assert_eq!(keys[0], PublicKey([1; 32]));

    // Out of range index.
    assert!(matches!(
        cache.extract_key_output_keys(TEST_AMOUNT, &[99], 20),
        Err(azurite_blockchain::ExtractOutputKeysError::InvalidGlobalIndex)
    ));

    // Block 10's coinbase unlocks at 16; at height 10 it is locked.
    assert!(matches!(
        cache.extract_key_output_keys(TEST_AMOUNT, &[9], 10),
        Err(azurite_blockchain::ExtractOutputKeysError::OutputLocked)
    ));
}

//---------------------------------------------------------------------------------------------------- Timestamps

#[test]
fn timestamp_indexes_track_pushed_blocks() {
    let mut cache = open_cache();
    push_next_block(&mut cache, vec![]);
    push_next_block(&mut cache, vec![]);

    let first_ts = 1_000_000 + 240;
    let hashes = cache.block_hashes_by_timestamps(first_ts, 241).unwrap();
    assert_eq!(hashes.len(), 2);

    // Block 1 is the first block of its day; the genesis anchors day
    // zero.
    assert_eq!(cache.timestamp_lower_bound_block_index(first_ts).unwrap(), 1);
    assert_eq!(cache.timestamp_lower_bound_block_index(50_000).unwrap(), 0);
}

//---------------------------------------------------------------------------------------------------- Rebuild

#[test]
fn older_scheme_version_triggers_rebuild() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chain.redb");

    let expected_dump;
    {
        let db = RedbDatabase::open(&path).unwrap();
        let mut cache = BlockchainCache::open(currency(), db).unwrap();
        for i in 0..4 {
            push_next_block(&mut cache, vec![spend_tx(40 + i, 600, None)]);
        }
        expected_dump = dump(cache.database());
    }

    // Downgrade the stored version; reopening must rebuild.
    {
        let db = RedbDatabase::open(&path).unwrap();
        let mut batch = BlockchainWriteBatch::new();
        batch.insert_db_scheme_version(1).unwrap();
        db.write(batch).unwrap();
    }

    let db = RedbDatabase::open(&path).unwrap();
    let cache = BlockchainCache::open(currency(), db).unwrap();
    assert_eq!(cache.top_block_index().unwrap(), 4);
    assert_eq!(cache.transactions_count().unwrap(), 9);
    assert_eq!(dump(cache.database()), expected_dump);
}

//---------------------------------------------------------------------------------------------------- Coinbase reward sum (I5 support)

#[test]
fn generated_coins_accumulate() {
    let mut cache = open_cache();
    push_next_block(&mut cache, vec![]);

    let genesis_coins = cache.block_info(0).unwrap().already_generated_coins;
    let after = cache.block_info(1).unwrap().already_generated_coins;
    assert_eq!(after, genesis_coins + TEST_AMOUNT);
}

#[test]
fn raw_transactions_find_coinbase_and_plain() {
    let mut cache = open_cache();
    let tx = spend_tx(8, 700, None);
    let tx_hash = *CachedTransaction::try_from(tx.clone()).unwrap().hash();
    push_next_block(&mut cache, vec![tx.clone()]);

    let coinbase_hash = {
        let hashes = cache.transaction_hashes_by_block(1).unwrap();
        hashes[0]
    };

    let (found, missed) = cache
        .raw_transactions(&[coinbase_hash, tx_hash, Hash([0xab; 32])])
        .unwrap();
    assert_eq!(found.len(), 2);
    assert_eq!(missed, vec![Hash([0xab; 32])]);
    assert_eq!(found[1], to_blob(&tx).unwrap());
}
