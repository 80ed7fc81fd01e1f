//! The immutable [`Currency`] parameter set.
//!
//! Constructed once at startup through [`CurrencyBuilder`] and passed
//! by reference everywhere; there is no process-wide mutable currency
//! state.

//---------------------------------------------------------------------------------------------------- Import
use azurite_constants::{block, difficulty, money, tx, upgrade};
use azurite_types::{Amount, BlockIndex, CachedBlock};

use crate::genesis::generate_genesis_block;

//---------------------------------------------------------------------------------------------------- Error
/// The reward computation rejected the block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RewardError {
    #[error("block size is more than twice the effective median")]
    BlockTooBig,
}

//---------------------------------------------------------------------------------------------------- Currency
/// Chain parameters plus the genesis block they produce.
#[derive(Debug, Clone)]
pub struct Currency {
    max_block_number: BlockIndex,
    mined_money_unlock_window: BlockIndex,
    timestamp_check_window: usize,
    block_future_time_limit: u64,

    money_supply: u64,
    emission_speed_factor: u32,

    reward_blocks_window: usize,
    block_granted_full_reward_zone: usize,
    coinbase_blob_reserved_size: usize,
    minimum_fee: Amount,
    default_dust_threshold: Amount,

    difficulty_target: u64,
    difficulty_window: usize,
    difficulty_cut: usize,
    difficulty_lag: usize,

    max_block_size_initial: usize,
    max_block_size_growth_numerator: u64,
    max_block_size_growth_denominator: u64,

    locked_tx_allowed_delta_blocks: u64,
    locked_tx_allowed_delta_seconds: u64,

    mempool_tx_livetime: u64,
    mempool_tx_from_alt_block_livetime: u64,

    upgrade_height_v2: Option<BlockIndex>,
    upgrade_height_v3: Option<BlockIndex>,
    upgrade_voting_window: u32,
    upgrade_voting_threshold: u32,
    upgrade_window: u32,

    alt_block_depth_limit: u32,

    testnet: bool,
    genesis: CachedBlock,
}

impl Currency {
    pub const fn max_block_number(&self) -> BlockIndex {
        self.max_block_number
    }

    pub const fn mined_money_unlock_window(&self) -> BlockIndex {
        self.mined_money_unlock_window
    }

    pub const fn timestamp_check_window(&self) -> usize {
        self.timestamp_check_window
    }

    pub const fn block_future_time_limit(&self) -> u64 {
        self.block_future_time_limit
    }

    pub const fn money_supply(&self) -> u64 {
        self.money_supply
    }

    pub const fn reward_blocks_window(&self) -> usize {
        self.reward_blocks_window
    }

    pub const fn block_granted_full_reward_zone(&self) -> usize {
        self.block_granted_full_reward_zone
    }

    pub const fn coinbase_blob_reserved_size(&self) -> usize {
        self.coinbase_blob_reserved_size
    }

    pub const fn minimum_fee(&self) -> Amount {
        self.minimum_fee
    }

    pub const fn default_dust_threshold(&self) -> Amount {
        self.default_dust_threshold
    }

    pub const fn difficulty_target(&self) -> u64 {
        self.difficulty_target
    }

    pub const fn difficulty_window(&self) -> usize {
        self.difficulty_window
    }

    pub const fn difficulty_cut(&self) -> usize {
        self.difficulty_cut
    }

    pub const fn difficulty_lag(&self) -> usize {
        self.difficulty_lag
    }

    /// Total blocks the retarget window needs, lag included.
    pub const fn difficulty_blocks_count(&self) -> usize {
        self.difficulty_window + self.difficulty_lag
    }

    pub const fn locked_tx_allowed_delta_blocks(&self) -> u64 {
        self.locked_tx_allowed_delta_blocks
    }

    pub const fn locked_tx_allowed_delta_seconds(&self) -> u64 {
        self.locked_tx_allowed_delta_seconds
    }

    pub const fn mempool_tx_livetime(&self) -> u64 {
        self.mempool_tx_livetime
    }

    pub const fn mempool_tx_from_alt_block_livetime(&self) -> u64 {
        self.mempool_tx_from_alt_block_livetime
    }

    pub const fn upgrade_height(&self, major_version: u8) -> Option<BlockIndex> {
        match major_version {
            2 => self.upgrade_height_v2,
            3 => self.upgrade_height_v3,
            _ => None,
        }
    }

    pub const fn upgrade_voting_window(&self) -> u32 {
        self.upgrade_voting_window
    }

    pub const fn upgrade_voting_threshold(&self) -> u32 {
        self.upgrade_voting_threshold
    }

    pub const fn upgrade_window(&self) -> u32 {
        self.upgrade_window
    }

    pub const fn alt_block_depth_limit(&self) -> u32 {
        self.alt_block_depth_limit
    }

    pub const fn is_testnet(&self) -> bool {
        self.testnet
    }

    pub const fn genesis_block(&self) -> &CachedBlock {
        &self.genesis
    }

    /// Block reward and emission change for a block of
    /// `current_block_size` bytes mined against `median_size`.
    ///
    /// The base reward halves the remaining supply geometrically; a
    /// block larger than the effective median is penalized
    /// quadratically, and one over twice the median is rejected.
    pub fn block_reward(
        &self,
        median_size: usize,
        current_block_size: usize,
        already_generated: Amount,
        fee: Amount,
        penalize_fee: bool,
    ) -> Result<(Amount, i64), RewardError> {
        debug_assert!(already_generated <= self.money_supply);

        let base_reward = (self.money_supply - already_generated) >> self.emission_speed_factor;

        let effective_median = median_size.max(self.block_granted_full_reward_zone);
        if current_block_size > 2 * effective_median {
            tracing::debug!(
                current_block_size,
                limit = 2 * effective_median,
                "block cumulative size is too big"
            );
            return Err(RewardError::BlockTooBig);
        }

        let penalized_base = penalized_amount(base_reward, effective_median, current_block_size);
        let penalized_fee = if penalize_fee {
            penalized_amount(fee, effective_median, current_block_size)
        } else {
            fee
        };

        let emission_change = penalized_base as i64 - (fee - penalized_fee) as i64;
        let reward = penalized_base + penalized_fee;

        Ok((reward, emission_change))
    }

    /// The dynamic block size limit at `height`.
    pub fn max_block_cumulative_size(&self, height: u64) -> usize {
        self.max_block_size_initial
            + ((height * self.max_block_size_growth_numerator)
                / self.max_block_size_growth_denominator) as usize
    }

    /// Whether an output with `unlock_time` is spendable at
    /// `at_block_index` / `now_seconds`.
    ///
    /// An unlock time below [`Self::max_block_number`] is a block
    /// index; anything at or above it is a Unix timestamp.
    pub fn is_unlocked(&self, unlock_time: u64, at_block_index: BlockIndex, now_seconds: u64) -> bool {
        if unlock_time < u64::from(self.max_block_number) {
            u64::from(at_block_index) + self.locked_tx_allowed_delta_blocks >= unlock_time
        } else {
            now_seconds + self.locked_tx_allowed_delta_seconds >= unlock_time
        }
    }
}

/// The CryptoNote penalty curve: `amount × (2·m·s − s²) / m²` for a
/// block of size `s` against effective median `m`, clamped to the full
/// amount when `s ≤ m`.
fn penalized_amount(amount: u64, effective_median: usize, block_size: usize) -> u64 {
    debug_assert!(block_size <= 2 * effective_median);

    if block_size <= effective_median {
        return amount;
    }

    let amount = u128::from(amount);
    let median = effective_median as u128;
    let size = block_size as u128;

    let product = amount * (2 * median * size - size * size);
    ((product / median) / median) as u64
}

//---------------------------------------------------------------------------------------------------- CurrencyBuilder
/// Builder for [`Currency`]; defaults come from `azurite-constants`.
pub struct CurrencyBuilder {
    currency: CurrencyParams,
}

/// [`Currency`] minus the genesis block, which is derived at build
/// time.
struct CurrencyParams {
    max_block_number: BlockIndex,
    mined_money_unlock_window: BlockIndex,
    timestamp_check_window: usize,
    block_future_time_limit: u64,
    money_supply: u64,
    emission_speed_factor: u32,
    reward_blocks_window: usize,
    block_granted_full_reward_zone: usize,
    coinbase_blob_reserved_size: usize,
    minimum_fee: Amount,
    default_dust_threshold: Amount,
    difficulty_target: u64,
    difficulty_window: usize,
    difficulty_cut: usize,
    difficulty_lag: usize,
    max_block_size_initial: usize,
    max_block_size_growth_numerator: u64,
    max_block_size_growth_denominator: u64,
    locked_tx_allowed_delta_blocks: u64,
    locked_tx_allowed_delta_seconds: u64,
    mempool_tx_livetime: u64,
    mempool_tx_from_alt_block_livetime: u64,
    upgrade_height_v2: Option<BlockIndex>,
    upgrade_height_v3: Option<BlockIndex>,
    upgrade_voting_window: u32,
    upgrade_voting_threshold: u32,
    upgrade_window: u32,
    alt_block_depth_limit: u32,
    testnet: bool,
}

impl Default for CurrencyBuilder {
    fn default() -> Self {
        Self {
            currency: CurrencyParams {
                max_block_number: block::MAX_BLOCK_NUMBER,
                mined_money_unlock_window: block::MINED_MONEY_UNLOCK_WINDOW,
                timestamp_check_window: block::TIMESTAMP_CHECK_WINDOW,
                block_future_time_limit: block::BLOCK_FUTURE_TIME_LIMIT,
                money_supply: money::MONEY_SUPPLY,
                emission_speed_factor: money::EMISSION_SPEED_FACTOR,
                reward_blocks_window: block::REWARD_BLOCKS_WINDOW,
                block_granted_full_reward_zone: block::BLOCK_GRANTED_FULL_REWARD_ZONE,
                coinbase_blob_reserved_size: block::COINBASE_BLOB_RESERVED_SIZE,
                minimum_fee: money::MINIMUM_FEE,
                default_dust_threshold: money::DEFAULT_DUST_THRESHOLD,
                difficulty_target: difficulty::DIFFICULTY_TARGET,
                difficulty_window: difficulty::DIFFICULTY_WINDOW,
                difficulty_cut: difficulty::DIFFICULTY_CUT,
                difficulty_lag: difficulty::DIFFICULTY_LAG,
                max_block_size_initial: block::MAX_BLOCK_SIZE_INITIAL,
                max_block_size_growth_numerator: block::MAX_BLOCK_SIZE_GROWTH_SPEED_NUMERATOR,
                max_block_size_growth_denominator: block::MAX_BLOCK_SIZE_GROWTH_SPEED_DENOMINATOR,
                locked_tx_allowed_delta_blocks: tx::LOCKED_TX_ALLOWED_DELTA_BLOCKS,
                locked_tx_allowed_delta_seconds: tx::LOCKED_TX_ALLOWED_DELTA_SECONDS,
                mempool_tx_livetime: tx::MEMPOOL_TX_LIVETIME,
                mempool_tx_from_alt_block_livetime: tx::MEMPOOL_TX_FROM_ALT_BLOCK_LIVETIME,
                upgrade_height_v2: None,
                upgrade_height_v3: None,
                upgrade_voting_window: upgrade::UPGRADE_VOTING_WINDOW,
                upgrade_voting_threshold: upgrade::UPGRADE_VOTING_THRESHOLD,
                upgrade_window: upgrade::UPGRADE_WINDOW,
                alt_block_depth_limit: block::ALT_BLOCK_DEPTH_LIMIT,
                testnet: false,
            },
        }
    }
}

impl CurrencyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn testnet(mut self, testnet: bool) -> Self {
        self.currency.testnet = testnet;
        self
    }

    pub fn mined_money_unlock_window(mut self, window: BlockIndex) -> Self {
        self.currency.mined_money_unlock_window = window;
        self
    }

    pub fn minimum_fee(mut self, fee: Amount) -> Self {
        self.currency.minimum_fee = fee;
        self
    }

    pub fn difficulty_window(mut self, window: usize) -> Self {
        self.currency.difficulty_window = window;
        self
    }

    pub fn difficulty_cut(mut self, cut: usize) -> Self {
        self.currency.difficulty_cut = cut;
        self
    }

    pub fn timestamp_check_window(mut self, window: usize) -> Self {
        self.currency.timestamp_check_window = window;
        self
    }

    pub fn upgrade_height_v2(mut self, height: Option<BlockIndex>) -> Self {
        self.currency.upgrade_height_v2 = height;
        self
    }

    pub fn upgrade_height_v3(mut self, height: Option<BlockIndex>) -> Self {
        self.currency.upgrade_height_v3 = height;
        self
    }

    pub fn upgrade_voting_window(mut self, window: u32) -> Self {
        self.currency.upgrade_voting_window = window;
        self
    }

    pub fn upgrade_window(mut self, window: u32) -> Self {
        self.currency.upgrade_window = window;
        self
    }

    /// Finalize the parameters and derive the genesis block.
    ///
    /// # Panics
    /// Panics if the difficulty cut does not fit the window; this is a
    /// configuration error caught at startup.
    pub fn build(self) -> Currency {
        let p = self.currency;
        assert!(
            2 * p.difficulty_cut <= p.difficulty_window.saturating_sub(2),
            "bad difficulty window or cut"
        );

        let genesis = generate_genesis_block(p.testnet, p.mined_money_unlock_window);

        Currency {
            max_block_number: p.max_block_number,
            mined_money_unlock_window: p.mined_money_unlock_window,
            timestamp_check_window: p.timestamp_check_window,
            block_future_time_limit: p.block_future_time_limit,
            money_supply: p.money_supply,
            emission_speed_factor: p.emission_speed_factor,
            reward_blocks_window: p.reward_blocks_window,
            block_granted_full_reward_zone: p.block_granted_full_reward_zone,
            coinbase_blob_reserved_size: p.coinbase_blob_reserved_size,
            minimum_fee: p.minimum_fee,
            default_dust_threshold: p.default_dust_threshold,
            difficulty_target: p.difficulty_target,
            difficulty_window: p.difficulty_window,
            difficulty_cut: p.difficulty_cut,
            difficulty_lag: p.difficulty_lag,
            max_block_size_initial: p.max_block_size_initial,
            max_block_size_growth_numerator: p.max_block_size_growth_numerator,
            max_block_size_growth_denominator: p.max_block_size_growth_denominator,
            locked_tx_allowed_delta_blocks: p.locked_tx_allowed_delta_blocks,
            locked_tx_allowed_delta_seconds: p.locked_tx_allowed_delta_seconds,
            mempool_tx_livetime: p.mempool_tx_livetime,
            mempool_tx_from_alt_block_livetime: p.mempool_tx_from_alt_block_livetime,
            upgrade_height_v2: p.upgrade_height_v2,
            upgrade_height_v3: p.upgrade_height_v3,
            upgrade_voting_window: p.upgrade_voting_window,
            upgrade_voting_threshold: p.upgrade_voting_threshold,
            upgrade_window: p.upgrade_window,
            alt_block_depth_limit: p.alt_block_depth_limit,
            testnet: p.testnet,
            genesis,
        }
    }
}
