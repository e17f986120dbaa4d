use alloc::vec::Vec;

/// A list of free block offsets for a single order.
///
/// Offsets are stored out of line, so the list never reads or writes the pool
/// memory it describes. The head of the list is the most recently pushed
/// offset.
#[derive(Clone, Debug, Default)]
pub struct FreeList {
    // The head of the list is the last element.
    offsets: Vec<usize>,
}

impl FreeList {
    /// Creates an empty free list.
    pub const fn new() -> FreeList {
        FreeList {
            offsets: Vec::new(),
        }
    }

    /// Returns the number of blocks in the list.
    #[inline]
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Returns `true` if the list holds no blocks.
    #[cfg(test)]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Pushes a block onto the head of the list.
    #[inline]
    pub fn push(&mut self, offset: usize) {
        self.offsets.push(offset);
    }

    /// Pops the block at the head of the list.
    ///
    /// If the list is empty, returns `None`.
    #[inline]
    pub fn pop(&mut self) -> Option<usize> {
        self.offsets.pop()
    }

    /// Removes the specified block from the list.
    ///
    /// If the block is not present, returns `None`.
    pub fn find_remove(&mut self, offset: usize) -> Option<usize> {
        let idx = self.offsets.iter().rposition(|&o| o == offset)?;

        Some(self.offsets.remove(idx))
    }

    /// Returns an iterator over the offsets in the list, head first.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.offsets.iter().rev().copied()
    }
}
