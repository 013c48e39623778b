//! Erase-count index.
//!
//! Blocks are kept in `order`, sorted into contiguous runs by erase count.
//! `bound[i]` is the end of the run of blocks erased exactly `i` times, so
//! `order[bound[i - 1]..bound[i]]` (with `bound[-1] = 0`) is that run.
//!
//! ```text
//! order: [1, 3, 2, 4, 5, 6, 7]    bound: [1, 5, 6, 7, 7, ..]
//! count:  0  1  1  1  1  2  3
//! ```
//!
//! Incrementing the count of one block swaps it with the last member of its
//! run and shrinks the run by one, which is O(1).

use std::ops::Range;

use crate::config::BlockId;
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct WearIndex {
    order: Vec<BlockId>,
    position: Vec<usize>,
    bound: Vec<usize>,
}

impl WearIndex {
    pub fn new(blocks: BlockId, width: u32) -> Self {
        WearIndex {
            order: (0..blocks).collect(),
            position: (0..blocks).collect(),
            bound: vec![blocks; width as usize],
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn block_at(&self, position: usize) -> BlockId {
        self.order[position]
    }

    pub fn position_of(&self, block: BlockId) -> usize {
        self.position[block]
    }

    /// Erase count of the block at `position`; `width()` once the block has
    /// left the tracked range.
    pub fn erase_count_of(&self, position: usize) -> u32 {
        self.bound.partition_point(|&end| end <= position) as u32
    }

    pub fn erase_count(&self, block: BlockId) -> u32 {
        self.erase_count_of(self.position[block])
    }

    /// Smallest erase count that has a member.
    pub fn min_wear(&self) -> Option<u32> {
        let count = self.bound.partition_point(|&end| end == 0);
        (count < self.bound.len()).then_some(count as u32)
    }

    /// Smallest erase count every block is at or below.
    pub fn max_wear(&self) -> Option<u32> {
        let blocks = self.order.len();
        let count = self.bound.partition_point(|&end| end < blocks);
        (count < self.bound.len()).then_some(count as u32)
    }

    /// Positions holding the blocks erased exactly `count` times.
    pub fn bucket(&self, count: u32) -> Range<usize> {
        let count = count as usize;
        let start = match count {
            0 => 0,
            c => self.bound.get(c - 1).copied().unwrap_or(self.order.len()),
        };
        let end = self.bound.get(count).copied().unwrap_or(self.order.len());
        start..end
    }

    pub fn blocks_with(&self, count: u32) -> &[BlockId] {
        &self.order[self.bucket(count)]
    }

    /// Record one more erase of the block at `position`.
    ///
    /// The block trades places with the last member of its run. Every anchor
    /// holding one of the two swapped positions is moved along with its block,
    /// so positions kept outside the index keep naming the same block id.
    pub fn bump(&mut self, position: usize, anchors: &mut [&mut usize]) -> Result<u32> {
        let count = self.erase_count_of(position);
        let Some(end) = self.bound.get_mut(count as usize) else {
            return Err(Error::WearLimit { block: self.order[position], limit: count });
        };
        let last = *end - 1;
        *end -= 1;

        for anchor in anchors.iter_mut() {
            if **anchor == last {
                **anchor = position;
            } else if **anchor == position {
                **anchor = last;
            }
        }

        self.order.swap(position, last);
        self.position[self.order[position]] = position;
        self.position[self.order[last]] = last;

        Ok(count + 1)
    }

    pub fn verify(&self) -> Result<()> {
        let blocks = self.order.len();
        let mut seen = vec![false; blocks];
        for (pos, &block) in self.order.iter().enumerate() {
            if block >= blocks || seen[block] {
                return Err(Error::InvariantViolation("erase-count order is not a permutation"));
            }
            seen[block] = true;
            if self.position[block] != pos {
                return Err(Error::InvariantViolation("erase-count positions out of sync"));
            }
        }
        if self.bound.windows(2).any(|w| w[0] > w[1]) || self.bound.iter().any(|&end| end > blocks) {
            return Err(Error::InvariantViolation("erase-count bounds are not monotone"));
        }
        Ok(())
    }
}
