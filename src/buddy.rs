//! Binary-buddy bookkeeping.
//!
//! A [`BuddyCore`] tracks which parts of a power-of-two region are free. It
//! holds one free list per order; a block of order `o` spans
//! `min_block << o` bytes, and the single block of the highest order spans
//! the whole region. The core never touches the region itself, so it can be
//! driven and inspected on its own.
//!
//! ## Characteristics
//!
//! #### Time complexity
//!
//! | Operation                | Best-case | Worst-case                     |
//! |--------------------------|-----------|--------------------------------|
//! | Allocate                 | O(1)      | O(max order)                   |
//! | Release                  | O(1)      | O(max order × free list len)   |
//! | Available bytes          | O(orders) | O(orders)                      |
//!
//! #### Fragmentation
//!
//! Every block is a power of two, so a request wastes at most half of the
//! block that serves it. External fragmentation is limited to free blocks
//! whose buddies are still allocated; blocks are never merged across buddy
//! boundaries.

use alloc::vec::Vec;
use core::cmp;

use crate::{free_list::FreeList, order, AllocError, AllocInitError};

/// A block of the managed region.
///
/// A `Block` is only a description: it carries no ownership of the bytes it
/// names.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Block {
    /// Offset of the first byte of the block from the start of the region.
    ///
    /// This is always a multiple of the block's size.
    pub offset: usize,
    /// Order of the block; its size is `min_block << order`.
    pub order: usize,
}

struct BuddyLevel {
    block_size: usize,
    free_list: FreeList,
}

impl BuddyLevel {
    /// Retrieves the offset of the buddy of the block which starts
    /// `block_ofs` bytes from the base.
    #[inline]
    fn buddy_ofs(&self, block_ofs: usize) -> usize {
        block_ofs ^ self.block_size
    }
}

/// The free-list index of a binary-buddy allocator.
///
/// Initially the whole region is a single free block of order
/// [`max_order()`](Self::max_order).
pub struct BuddyCore {
    min_block: usize,
    max_order: usize,
    /// Indexed by order.
    levels: Vec<BuddyLevel>,
}

impl BuddyCore {
    /// Constructs the bookkeeping for a region of `max_total` bytes with a
    /// minimum block size of `min_block` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`AllocInitError::InvalidConfig`] unless both sizes are powers
    /// of two and `max_total > min_block`.
    pub fn new(min_block: usize, max_total: usize) -> Result<BuddyCore, AllocInitError> {
        if !order::is_pow2(min_block) || !order::is_pow2(max_total) || max_total <= min_block {
            return Err(AllocInitError::InvalidConfig);
        }

        let max_order = order::log2(min_block, max_total);

        let mut levels: Vec<BuddyLevel> = (0..=max_order)
            .map(|o| BuddyLevel {
                block_size: order::block_size(min_block, o),
                free_list: FreeList::new(),
            })
            .collect();

        levels[max_order].free_list.push(0);

        Ok(BuddyCore {
            min_block,
            max_order,
            levels,
        })
    }

    /// Returns the size of the smallest block.
    #[inline]
    pub fn min_block(&self) -> usize {
        self.min_block
    }

    /// Returns the order of the block spanning the whole region.
    #[inline]
    pub fn max_order(&self) -> usize {
        self.max_order
    }

    /// Returns the size of the managed region.
    #[inline]
    pub fn max_total(&self) -> usize {
        self.levels[self.max_order].block_size
    }

    /// Returns the size of a block of order `order`.
    #[inline]
    pub fn block_size(&self, order: usize) -> usize {
        order::block_size(self.min_block, order)
    }

    /// Allocates a block of order `order`.
    ///
    /// If no block of that order is free, the smallest larger free block is
    /// split in halves until one of the right order remains. The lower half
    /// is kept at each step and the upper half is made free.
    ///
    /// # Errors
    ///
    /// Returns `Err(AllocError)` if `order` exceeds the maximum order or no
    /// free block is large enough.
    pub fn allocate(&mut self, order: usize) -> Result<Block, AllocError> {
        if order > self.max_order {
            return Err(AllocError);
        }

        // Scan increasing block sizes until a free block is found.
        let (offset, init_order) = (order..=self.max_order)
            .find_map(|o| self.levels[o].free_list.pop().map(|ofs| (ofs, o)))
            .ok_or(AllocError)?;

        // Split the block repeatedly. The address of the front half does not
        // change.
        for o in (order..init_order).rev() {
            let back_half = offset + self.levels[o].block_size;
            self.levels[o].free_list.push(back_half);
        }

        Ok(Block { offset, order })
    }

    /// Returns `block` to the free lists, coalescing it with its buddy for as
    /// long as the buddy is free.
    ///
    /// `block` must have been returned by [`allocate()`](Self::allocate) and
    /// not released since. This is not checked: releasing any other block
    /// corrupts the free lists.
    pub fn release(&mut self, block: Block) {
        debug_assert!(block.order <= self.max_order, "order out of range");
        debug_assert_eq!(
            block.offset % self.block_size(block.order),
            0,
            "misaligned block"
        );

        let Block {
            mut offset,
            mut order,
        } = block;

        while order < self.max_order {
            let level = &mut self.levels[order];
            let buddy = level.buddy_ofs(offset);

            if level.free_list.find_remove(buddy).is_none() {
                break;
            }

            offset = cmp::min(offset, buddy);
            order += 1;
        }

        self.levels[order].free_list.push(offset);
    }

    /// Returns the number of free bytes.
    pub fn avail(&self) -> usize {
        self.levels
            .iter()
            .map(|level| level.free_list.len() * level.block_size)
            .sum()
    }

    /// Returns an iterator over the offsets of the free blocks of order
    /// `order`, most recently freed first.
    ///
    /// # Panics
    ///
    /// Panics if `order` exceeds the maximum order.
    pub fn free_list(&self, order: usize) -> impl Iterator<Item = usize> + '_ {
        self.levels[order].free_list.iter()
    }

    /// Asserts that the free lists describe a consistent, fully coalesced set
    /// of blocks.
    #[cfg(test)]
    pub(crate) fn check_invariants(&self) {
        let mut spans = Vec::new();

        for (o, level) in self.levels.iter().enumerate() {
            for ofs in level.free_list.iter() {
                assert_eq!(ofs % level.block_size, 0, "misaligned free block");
                assert!(ofs + level.block_size <= self.max_total(), "block past end");

                if o < self.max_order {
                    let buddy = level.buddy_ofs(ofs);
                    assert!(
                        level.free_list.iter().all(|other| other != buddy),
                        "free buddies at order {o} were not coalesced"
                    );
                }

                spans.push((ofs, ofs + level.block_size));
            }
        }

        spans.sort_unstable();
        for pair in spans.windows(2) {
            assert!(pair[0].1 <= pair[1].0, "free blocks overlap");
        }
    }
}

impl core::fmt::Debug for BuddyCore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BuddyCore")
            .field("min_block", &self.min_block)
            .field("max_order", &self.max_order)
            .field("avail", &self.avail())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn free_lists(core: &BuddyCore) -> Vec<Vec<usize>> {
        (0..=core.max_order())
            .map(|o| core.free_list(o).collect())
            .collect()
    }

    #[test]
    fn rejects_invalid_geometry() {
        assert!(matches!(
            BuddyCore::new(0, 1024),
            Err(AllocInitError::InvalidConfig)
        ));
        assert!(matches!(
            BuddyCore::new(48, 1024),
            Err(AllocInitError::InvalidConfig)
        ));
        assert!(matches!(
            BuddyCore::new(64, 1000),
            Err(AllocInitError::InvalidConfig)
        ));
        assert!(matches!(
            BuddyCore::new(64, 64),
            Err(AllocInitError::InvalidConfig)
        ));
        assert!(matches!(
            BuddyCore::new(128, 64),
            Err(AllocInitError::InvalidConfig)
        ));
    }

    #[test]
    fn starts_as_one_free_block() {
        let core = BuddyCore::new(64, 1024).unwrap();

        assert_eq!(core.max_order(), 4);
        assert_eq!(core.max_total(), 1024);
        assert_eq!(core.avail(), 1024);

        let lists = free_lists(&core);
        assert!(lists[..4].iter().all(Vec::is_empty));
        assert_eq!(lists[4], [0]);
    }

    #[test]
    fn allocate_splits_down_to_order() {
        let mut core = BuddyCore::new(64, 1024).unwrap();

        let block = core.allocate(0).unwrap();
        assert_eq!(block, Block { offset: 0, order: 0 });

        // One upper half is left behind at every order below the top.
        let lists = free_lists(&core);
        assert_eq!(lists[0], [64]);
        assert_eq!(lists[1], [128]);
        assert_eq!(lists[2], [256]);
        assert_eq!(lists[3], [512]);
        assert!(lists[4].is_empty());
        assert_eq!(core.avail(), 1024 - 64);

        core.check_invariants();
    }

    #[test]
    fn allocate_prefers_exact_order() {
        let mut core = BuddyCore::new(64, 1024).unwrap();

        let a = core.allocate(0).unwrap();
        let b = core.allocate(0).unwrap();
        assert_eq!(a.offset, 0);
        assert_eq!(b.offset, 64);

        let c = core.allocate(1).unwrap();
        assert_eq!(c.offset, 128);
        assert_eq!(core.avail(), 1024 - 64 - 64 - 128);
    }

    #[test]
    fn allocated_offsets_are_aligned() {
        let mut core = BuddyCore::new(16, 4096).unwrap();

        for order in [0, 3, 1, 2, 0, 4] {
            let block = core.allocate(order).unwrap();
            assert_eq!(block.offset % core.block_size(order), 0);
        }

        core.check_invariants();
    }

    #[test]
    fn allocate_past_max_order_fails() {
        let mut core = BuddyCore::new(64, 1024).unwrap();

        assert_eq!(core.allocate(5), Err(AllocError));
        assert_eq!(core.avail(), 1024);
    }

    #[test]
    fn exhaustion() {
        let mut core = BuddyCore::new(64, 128).unwrap();
        assert_eq!(core.max_order(), 1);

        let a = core.allocate(0).unwrap();
        let b = core.allocate(0).unwrap();
        assert_eq!(core.allocate(0), Err(AllocError));
        assert_eq!(core.allocate(1), Err(AllocError));
        assert_eq!(core.avail(), 0);

        core.release(a);
        assert_eq!(core.allocate(1), Err(AllocError));

        core.release(b);
        assert_eq!(core.allocate(1), Ok(Block { offset: 0, order: 1 }));
    }

    #[test]
    fn whole_region() {
        let mut core = BuddyCore::new(64, 1024).unwrap();

        let block = core.allocate(4).unwrap();
        assert_eq!(block, Block { offset: 0, order: 4 });
        assert_eq!(core.avail(), 0);

        core.release(block);
        assert_eq!(free_lists(&core)[4], [0]);
        assert_eq!(core.avail(), 1024);
    }

    fn check_coalesce(first: Block, second: Block) {
        let mut core = BuddyCore::new(64, 1024).unwrap();

        assert_eq!(core.allocate(2).unwrap().offset, 0);
        assert_eq!(core.allocate(2).unwrap().offset, 256);

        // Keep the other half of the region busy so the merge stops at order 3.
        let c = core.allocate(3).unwrap();
        assert_eq!(c.offset, 512);

        core.release(first);
        let lists = free_lists(&core);
        assert_eq!(lists[2], [first.offset]);
        assert!(lists[3].is_empty());

        core.release(second);
        let lists = free_lists(&core);
        assert!(lists[2].is_empty());
        assert_eq!(lists[3], [0]);

        core.check_invariants();
    }

    #[test]
    fn coalesce_lower_first() {
        check_coalesce(
            Block { offset: 0, order: 2 },
            Block {
                offset: 256,
                order: 2,
            },
        );
    }

    #[test]
    fn coalesce_upper_first() {
        check_coalesce(
            Block {
                offset: 256,
                order: 2,
            },
            Block { offset: 0, order: 2 },
        );
    }

    #[test]
    fn coalescing_propagates_to_top() {
        let mut core = BuddyCore::new(64, 1024).unwrap();

        let blocks: Vec<Block> = (0..16).map(|_| core.allocate(0).unwrap()).collect();
        assert_eq!(core.avail(), 0);

        for block in blocks.into_iter().rev() {
            core.release(block);
            core.check_invariants();
        }

        let lists = free_lists(&core);
        assert!(lists[..4].iter().all(Vec::is_empty));
        assert_eq!(lists[4], [0]);
    }

    #[test]
    fn non_buddies_do_not_merge() {
        let mut core = BuddyCore::new(64, 256).unwrap();

        let blocks: Vec<Block> = (0..4).map(|_| core.allocate(0).unwrap()).collect();

        // Offsets 64 and 128 are neighbours but not buddies.
        core.release(blocks[1]);
        core.release(blocks[2]);

        let lists = free_lists(&core);
        assert_eq!(lists[0].len(), 2);
        assert!(lists[1].is_empty());
        core.check_invariants();
    }
}
