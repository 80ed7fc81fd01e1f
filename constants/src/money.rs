//! Emission related.

/// COIN - number of smallest units in one coin.
pub const COIN: u64 = 100_000_000; // pow(10, 8)

/// Decimal places shown when formatting an [`COIN`] amount.
pub const DISPLAY_DECIMAL_POINT: usize = 8;

/// Reward of the first block.
pub const START_BLOCK_REWARD: u64 = 320_000 * COIN;

/// Right-shift applied to the remaining supply to get the base reward.
pub const EMISSION_SPEED_FACTOR: u32 = 18;

/// Total number of smallest units to ever be generated.
///
/// Chosen so the emission curve starts at exactly
/// [`START_BLOCK_REWARD`]:
///
/// ```rust
/// # use azurite_constants::money::*;
/// assert_eq!(MONEY_SUPPLY >> EMISSION_SPEED_FACTOR, START_BLOCK_REWARD);
/// ```
pub const MONEY_SUPPLY: u64 = START_BLOCK_REWARD << EMISSION_SPEED_FACTOR;

/// Minimum fee for a pool transaction that was not restored from a
/// popped block.
pub const MINIMUM_FEE: u64 = 100_000; // pow(10, 5)

/// Outputs below this amount are dust and are not split into
/// power-of-ten digits when decomposing a reward.
pub const DEFAULT_DUST_THRESHOLD: u64 = 100_000; // pow(10, 5)
