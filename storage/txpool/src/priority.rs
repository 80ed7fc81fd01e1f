//! The fee-density order block templates consume.

//---------------------------------------------------------------------------------------------------- Import
use std::cmp::Ordering;

use azurite_types::Hash;

//---------------------------------------------------------------------------------------------------- PriorityKey
/// Sort key of the pool's secondary index.
///
/// Higher fee per byte orders first; ties break toward the smaller
/// blob, then the older arrival, then the hash so the order is total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityKey {
    pub fee: u64,
    pub blob_size: u64,
    pub receive_time: u64,
    pub hash: Hash,
}

impl Ord for PriorityKey {
    fn cmp(&self, other: &Self) -> Ordering {
        // fee_a / size_a > fee_b / size_b, cross-multiplied so no
        // precision is lost.
        let self_density = u128::from(self.fee) * u128::from(other.blob_size);
        let other_density = u128::from(other.fee) * u128::from(self.blob_size);

        other_density
            .cmp(&self_density)
            .then_with(|| self.blob_size.cmp(&other.blob_size))
            .then_with(|| self.receive_time.cmp(&other.receive_time))
            .then_with(|| self.hash.cmp(&other.hash))
    }
}

impl PartialOrd for PriorityKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
