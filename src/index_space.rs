//! Global linear index space under a uniform block partition.
//!
//! Every rank owns the same number of consecutive indices, so rank `r` owns
//! `[r * block, (r + 1) * block)` and owner resolution is a single integer
//! division. There is no lookup table and no mutable state.

use crate::update_error::UpdateError;
use std::ops::Range;

/// Uniformly partitioned index space shared by all ranks of a plan.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct IndexSpace {
    num_ranks: usize,
    block: u64,
}

impl IndexSpace {
    /// `num_ranks` ranks, each owning `block` indices.
    pub fn uniform(num_ranks: usize, block: usize) -> Self {
        Self {
            num_ranks,
            block: block as u64,
        }
    }

    #[inline]
    pub fn num_ranks(&self) -> usize {
        self.num_ranks
    }

    /// Number of indices owned by each rank.
    #[inline]
    pub fn block(&self) -> u64 {
        self.block
    }

    /// Total number of global indices (`Σ` per-rank owned counts).
    #[inline]
    pub fn total(&self) -> u64 {
        self.block * self.num_ranks as u64
    }

    /// Global indices owned by `rank`.
    pub fn owned_range(&self, rank: usize) -> Range<u64> {
        let start = rank as u64 * self.block;
        start..start + self.block
    }

    /// Resolve the rank that owns `global`.
    ///
    /// # Errors
    /// [`UpdateError::OutOfRangeIndex`] if `global` is negative or not below
    /// [`IndexSpace::total`].
    pub fn resolve_owner(&self, global: i64) -> Result<usize, UpdateError> {
        let total = self.total();
        if global < 0 || global as u64 >= total {
            log::error!("index {global} is outside the global index space [0, {total})");
            return Err(UpdateError::OutOfRangeIndex {
                index: global,
                total,
            });
        }
        Ok((global as u64 / self.block) as usize)
    }

    /// Offset of `global` inside `rank`'s block, or `None` if `rank` does not own it.
    pub fn to_local(&self, rank: usize, global: u64) -> Option<usize> {
        let range = self.owned_range(rank);
        range
            .contains(&global)
            .then(|| (global - range.start) as usize)
    }

    /// Check that a rank's declared start index agrees with the uniform partition.
    pub fn check_start(&self, rank: usize, start: u64) -> Result<(), UpdateError> {
        let expected = self.owned_range(rank).start;
        if start != expected {
            return Err(UpdateError::InvalidPartition {
                rank,
                start,
                expected,
            });
        }
        Ok(())
    }
}
