use proptest::prelude::*;

use crate::{CurrencyBuilder, UpgradeDetector, UpgradeManager};

const TEST_WINDOW: u32 = 10;

fn currency() -> crate::Currency {
    CurrencyBuilder::new()
        .upgrade_voting_window(TEST_WINDOW)
        .upgrade_window(5)
        .build()
}

fn voted_detector() -> UpgradeDetector {
    UpgradeDetector::new(&currency(), 2)
}

#[test]
fn hardcoded_height_ignores_votes() {
    let c = CurrencyBuilder::new().upgrade_height_v2(Some(100)).build();
    let mut detector = UpgradeDetector::new(&c, 2);

    for h in 0..50 {
        detector.block_pushed(h, 1, 1);
    }
    assert_eq!(detector.upgrade_height(), Some(100));
    assert!(!detector.is_active_at(100));
    assert!(detector.is_active_at(101));
}

#[test]
fn voting_completes_at_threshold() {
    let mut detector = voted_detector();

    // 90% of a 10-block window: nine votes needed.
    for h in 0..9 {
        detector.block_pushed(h, 1, 1);
    }
    assert_eq!(detector.voting_complete_height(), None);

    detector.block_pushed(9, 1, 1);
    assert_eq!(detector.voting_complete_height(), Some(9));
    // Switch is `upgrade_window` later.
    assert_eq!(detector.upgrade_height(), Some(14));
    assert!(detector.is_active_at(15));
    assert!(!detector.is_active_at(14));
}

#[test]
fn non_votes_do_not_count() {
    let mut detector = voted_detector();

    // Right major version but minor 0 is not a vote.
    for h in 0..20 {
        detector.block_pushed(h, 1, 0);
    }
    assert_eq!(detector.voting_complete_height(), None);
}

#[test]
fn one_dissenter_in_window_still_passes_ninety_percent() {
    let mut detector = voted_detector();

    detector.block_pushed(0, 1, 0);
    for h in 1..10 {
        detector.block_pushed(h, 1, 1);
    }
    // 9 of 10.
    assert_eq!(detector.voting_complete_height(), Some(9));
}

#[test]
fn pop_at_completion_height_cancels() {
    let mut detector = voted_detector();

    for h in 0..10 {
        detector.block_pushed(h, 1, 1);
    }
    assert_eq!(detector.voting_complete_height(), Some(9));

    detector.block_popped(9);
    assert_eq!(detector.voting_complete_height(), None);
    assert_eq!(detector.upgrade_height(), None);
}

#[test]
fn rescan_rebuilds_state() {
    let mut detector = voted_detector();
    for h in 0..10 {
        detector.block_pushed(h, 1, 1);
    }

    let history: Vec<(u32, u8, u8)> = (0..5).map(|h| (h, 1, 0)).collect();
    detector.rescan(history.into_iter());
    assert_eq!(detector.voting_complete_height(), None);
}

#[test]
fn manager_reports_stacked_versions() {
    let c = CurrencyBuilder::new()
        .upgrade_height_v2(Some(10))
        .upgrade_height_v3(Some(20))
        .build();
    let manager = UpgradeManager::new(&c);

    assert_eq!(manager.block_major_version_for_height(10), 1);
    assert_eq!(manager.block_major_version_for_height(11), 2);
    assert_eq!(manager.block_major_version_for_height(20), 2);
    assert_eq!(manager.block_major_version_for_height(21), 3);

    assert!(!manager.penalize_fee_at(10));
    assert!(manager.penalize_fee_at(11));
}

proptest! {
    #[test]
    fn incremental_pushes_match_rescan(flags in proptest::collection::vec(any::<bool>(), 0..40)) {
        let mut detector = voted_detector();
        for (h, &vote) in flags.iter().enumerate() {
            detector.block_pushed(h as u32, 1, u8::from(vote));
        }

        let mut fresh = voted_detector();
        fresh.rescan(
            flags
                .iter()
                .enumerate()
                .map(|(h, &vote)| (h as u32, 1, u8::from(vote))),
        );
        prop_assert_eq!(detector.voting_complete_height(), fresh.voting_complete_height());
    }
}
