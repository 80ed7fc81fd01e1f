//! Lazy without-replacement draws over `0..count`.

//---------------------------------------------------------------------------------------------------- Import
use std::collections::HashMap;

use rand::Rng;

//---------------------------------------------------------------------------------------------------- ShuffleGenerator
/// Yields each value of `0..count` exactly once, in random order,
/// without materializing the range: a sparse Fisher-Yates that only
/// remembers displaced slots.
pub(crate) struct ShuffleGenerator<R> {
    swaps: HashMap<u32, u32>,
    remaining: u32,
    rng: R,
}

impl<R: Rng> ShuffleGenerator<R> {
    pub(crate) fn new(count: u32, rng: R) -> Self {
        Self {
            swaps: HashMap::new(),
            remaining: count,
            rng,
        }
    }
}

impl<R: Rng> Iterator for ShuffleGenerator<R> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        if self.remaining == 0 {
            return None;
        }

        let slot = self.rng.gen_range(0..self.remaining);
        self.remaining -= 1;

        let value = self.swaps.remove(&slot).unwrap_or(slot);
        let tail = self
            .swaps
            .remove(&self.remaining)
            .unwrap_or(self.remaining);
        if slot != self.remaining {
            self.swaps.insert(slot, tail);
        }

        Some(value)
    }
}
