//! Difficulty retargeting.

//---------------------------------------------------------------------------------------------------- Import
use azurite_types::Difficulty;

use crate::Currency;

//---------------------------------------------------------------------------------------------------- Public API
/// Compute the difficulty required of the next block from the trailing
/// window of timestamps and cumulative difficulties.
///
/// Both vectors run oldest to newest and must be the same length.
/// Entries past `difficulty_window` are dropped from the newest end,
/// which is what makes the retarget lag behind the tip when the caller
/// passes `difficulty_window + difficulty_lag` blocks. Returns 0 when
/// the accumulated work overflows 64 bits, which upstream treats as a
/// hard failure.
pub fn next_difficulty(
    currency: &Currency,
    mut timestamps: Vec<u64>,
    mut cumulative_difficulties: Vec<Difficulty>,
) -> Difficulty {
    let window = currency.difficulty_window();
    debug_assert!(window >= 2);
    debug_assert_eq!(timestamps.len(), cumulative_difficulties.len());

    if timestamps.len() > window {
        timestamps.truncate(window);
        cumulative_difficulties.truncate(window);
    }

    let length = timestamps.len();
    if length <= 1 {
        return 1;
    }

    timestamps.sort_unstable();

    let kept = window - 2 * currency.difficulty_cut();
    let (cut_begin, cut_end) = if length <= kept {
        (0, length)
    } else {
        let begin = (length - kept + 1) / 2;
        (begin, begin + kept)
    };
    debug_assert!(cut_begin + 2 <= cut_end && cut_end <= length);

    let time_span = match timestamps[cut_end - 1] - timestamps[cut_begin] {
        0 => 1,
        span => span,
    };

    let total_work = cumulative_difficulties[cut_end - 1] - cumulative_difficulties[cut_begin];
    debug_assert!(total_work > 0);

    // 64×64 product with a ceiling division; overflow past u64 is
    // reported as 0 for the caller to reject.
    let adjusted =
        u128::from(total_work) * u128::from(currency.difficulty_target()) + u128::from(time_span)
            - 1;
    if adjusted > u128::from(u64::MAX) {
        return 0;
    }

    (adjusted / u128::from(time_span)) as u64
}
