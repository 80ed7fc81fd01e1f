//! Time related.

//---------------------------------------------------------------------------------------------------- Use
use std::time::{SystemTime, UNIX_EPOCH};

//---------------------------------------------------------------------------------------------------- Constants
/// Seconds in a day.
pub const ONE_DAY_SECONDS: u64 = 60 * 60 * 24;

//---------------------------------------------------------------------------------------------------- Public API
/// Returns the current system time as a UNIX timestamp.
///
/// ```rust
/// # use azurite_helper::time::*;
/// assert!(current_unix_timestamp() > 0);
/// ```
///
/// # Panics
/// This function panics if the call to get the system time fails.
pub fn current_unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

/// Rounds a UNIX timestamp down to midnight of the same day.
///
/// ```rust
/// # use azurite_helper::time::*;
/// // October 20th 2023 - 10:18:30 PM
/// assert_eq!(round_to_midnight(1697840310), 1697760000);
/// // Already midnight.
/// assert_eq!(round_to_midnight(1697760000), 1697760000);
/// ```
pub const fn round_to_midnight(timestamp: u64) -> u64 {
    timestamp - (timestamp % ONE_DAY_SECONDS)
}

//---------------------------------------------------------------------------------------------------- Tests
#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn midnight_steps_by_whole_days() {
        let midnight = round_to_midnight(1_697_840_310);
        assert_eq!(round_to_midnight(midnight + ONE_DAY_SECONDS - 1), midnight);
        assert_eq!(
            round_to_midnight(midnight + ONE_DAY_SECONDS),
            midnight + ONE_DAY_SECONDS
        );
    }
}
