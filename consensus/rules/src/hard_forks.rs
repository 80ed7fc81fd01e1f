//! Protocol upgrades.
//!
//! Each major version above 1 gets an [`UpgradeDetector`] that either
//! carries a hard-coded switch height or tallies votes over a sliding
//! window of recent blocks. The [`UpgradeManager`] aggregates them
//! into the single question the chain manager asks: which major
//! version must a block at height `h` carry?

//---------------------------------------------------------------------------------------------------- Import
use std::collections::VecDeque;

use azurite_constants::upgrade::BLOCK_MINOR_VERSION_VOTE;
use azurite_types::BlockIndex;

use crate::Currency;

#[cfg(test)]
mod tests;

//---------------------------------------------------------------------------------------------------- UpgradeDetector
/// Tracks when one target major version activates.
#[derive(Debug, Clone)]
pub struct UpgradeDetector {
    target_version: u8,
    /// Hard-coded switch height; [`None`] means the voted
    /// configuration.
    configured_height: Option<BlockIndex>,
    voting_window: u32,
    voting_threshold: u32,
    upgrade_window: u32,

    /// Sliding window of vote flags for the last `voting_window`
    /// blocks, oldest first. Only maintained in the voted
    /// configuration.
    votes: VecDeque<bool>,
    vote_count: u32,
    voting_complete_height: Option<BlockIndex>,
}

impl UpgradeDetector {
    pub fn new(currency: &Currency, target_version: u8) -> Self {
        Self {
            target_version,
            configured_height: currency.upgrade_height(target_version),
            voting_window: currency.upgrade_voting_window(),
            voting_threshold: currency.upgrade_voting_threshold(),
            upgrade_window: currency.upgrade_window(),
            votes: VecDeque::new(),
            vote_count: 0,
            voting_complete_height: None,
        }
    }

    pub const fn target_version(&self) -> u8 {
        self.target_version
    }

    pub const fn voting_complete_height(&self) -> Option<BlockIndex> {
        self.voting_complete_height
    }

    /// The last height that still carries the previous version, if
    /// known yet. Blocks at `height + 1` and beyond must carry the
    /// target.
    pub fn upgrade_height(&self) -> Option<BlockIndex> {
        match self.configured_height {
            Some(height) => Some(height),
            None => self
                .voting_complete_height
                .map(|complete| complete + self.upgrade_window),
        }
    }

    /// Whether a block at `height` must already carry the target
    /// version.
    pub fn is_active_at(&self, height: BlockIndex) -> bool {
        self.upgrade_height()
            .is_some_and(|upgrade| height > upgrade)
    }

    /// Account for a new top block.
    ///
    /// `height` is the pushed block's index; `major`/`minor` its
    /// header versions.
    pub fn block_pushed(&mut self, height: BlockIndex, major: u8, minor: u8) {
        if self.configured_height.is_some() {
            return;
        }

        let vote = major == self.target_version - 1 && minor == BLOCK_MINOR_VERSION_VOTE;
        self.votes.push_back(vote);
        self.vote_count += u32::from(vote);
        if self.votes.len() > self.voting_window as usize {
            let expired = self.votes.pop_front().unwrap();
            self.vote_count -= u32::from(expired);
        }

        if self.voting_complete_height.is_none()
            && self.votes.len() == self.voting_window as usize
            && u64::from(self.vote_count) * 100
                >= u64::from(self.voting_threshold) * u64::from(self.voting_window)
        {
            tracing::info!(
                target_version = self.target_version,
                height,
                upgrade_after = height + self.upgrade_window,
                "upgrade voting complete"
            );
            self.voting_complete_height = Some(height);
        }
    }

    /// Account for the top block being popped.
    ///
    /// `height` is the index the popped block had; the votes it
    /// contributed leave the window. Re-voting on deeper reorgs is the
    /// chain manager's job via [`Self::rescan`].
    pub fn block_popped(&mut self, height: BlockIndex) {
        if self.configured_height.is_some() {
            return;
        }

        if let Some(vote) = self.votes.pop_back() {
            self.vote_count -= u32::from(vote);
        }

        if self.voting_complete_height == Some(height) {
            tracing::info!(
                target_version = self.target_version,
                "upgrade vote cancelled by pop"
            );
            self.voting_complete_height = None;
        }
    }

    /// Rebuild the window from scratch, feeding block versions oldest
    /// to newest. Used at startup and after deep reorgs.
    pub fn rescan<I: Iterator<Item = (BlockIndex, u8, u8)>>(&mut self, blocks: I) {
        if self.configured_height.is_some() {
            return;
        }

        self.votes.clear();
        self.vote_count = 0;
        self.voting_complete_height = None;
        for (height, major, minor) in blocks {
            self.block_pushed(height, major, minor);
        }
    }
}

//---------------------------------------------------------------------------------------------------- UpgradeManager
/// All configured detectors, one per major version above 1.
#[derive(Debug, Clone)]
pub struct UpgradeManager {
    detectors: Vec<UpgradeDetector>,
}

impl UpgradeManager {
    /// Detectors for major versions 2 and 3, the versions this chain
    /// knows about.
    pub fn new(currency: &Currency) -> Self {
        Self {
            detectors: vec![
                UpgradeDetector::new(currency, 2),
                UpgradeDetector::new(currency, 3),
            ],
        }
    }

    /// The major version a block at `height` must carry.
    pub fn block_major_version_for_height(&self, height: BlockIndex) -> u8 {
        let mut version = 1;
        for detector in &self.detectors {
            if detector.is_active_at(height) {
                version = detector.target_version();
            }
        }
        version
    }

    /// Whether fees are penalized alongside the base reward, active
    /// from major version 2 on.
    pub fn penalize_fee_at(&self, height: BlockIndex) -> bool {
        self.block_major_version_for_height(height) >= 2
    }

    pub fn block_pushed(&mut self, height: BlockIndex, major: u8, minor: u8) {
        for detector in &mut self.detectors {
            detector.block_pushed(height, major, minor);
        }
    }

    pub fn block_popped(&mut self, height: BlockIndex) {
        for detector in &mut self.detectors {
            detector.block_popped(height);
        }
    }

    pub fn rescan(&mut self, blocks: &[(BlockIndex, u8, u8)]) {
        for detector in &mut self.detectors {
            detector.rescan(blocks.iter().copied());
        }
    }
}
