//! A small library for ~~hating on~~ evaluating the correctness of pool
//! allocators.
//!
//! An [`Evaluator`] drives a [`Subject`] through a sequence of
//! [`AllocatorOp`]s. Every allocation is painted with the ID of the operation
//! that created it, and the paint is verified before the allocation is
//! returned, so overlapping allocations are detected.
#![forbid(unsafe_code)]

use std::ops::DerefMut;

/// Upper bound on generated allocation sizes.
pub const MAX_SIZE: usize = 1 << 20;

/// An allocation size which implements `Arbitrary`.
///
/// Sizes are always in `1..=MAX_SIZE`.
#[derive(Clone, Copy, Debug)]
pub struct ArbSize(pub usize);

impl arbitrary::Arbitrary<'_> for ArbSize {
    fn arbitrary(u: &mut arbitrary::Unstructured<'_>) -> arbitrary::Result<Self> {
        // Select a random bit index first so that small sizes are as likely as
        // large ones.
        let shift = u8::arbitrary(u)? % (MAX_SIZE.trailing_zeros() as u8 + 1);
        let size = 1 + usize::arbitrary(u)? % (1 << shift);

        Ok(ArbSize(size))
    }
}

#[derive(arbitrary::Arbitrary)]
enum AllocatorOpTag {
    Alloc,
    Dealloc,
}

#[derive(Clone, Debug)]
pub enum AllocatorOp {
    Alloc(usize),
    Dealloc(usize),
}

impl arbitrary::Arbitrary<'_> for AllocatorOp {
    fn arbitrary(u: &mut arbitrary::Unstructured<'_>) -> arbitrary::Result<Self> {
        let tag = AllocatorOpTag::arbitrary(u)?;

        let op = match tag {
            AllocatorOpTag::Alloc => AllocatorOp::Alloc(ArbSize::arbitrary(u)?.0),
            AllocatorOpTag::Dealloc => AllocatorOp::Dealloc(usize::arbitrary(u)?),
        };

        Ok(op)
    }
}

pub trait Subject {
    type Allocation: DerefMut<Target = [u8]>;
    type AllocError;

    /// Allocates `size` bytes.
    fn allocate(&mut self, size: usize) -> Result<Self::Allocation, Self::AllocError>;

    /// Returns an allocation made by this subject.
    fn deallocate(&mut self, allocation: Self::Allocation);

    /// Checks the subject's own accounting.
    ///
    /// `outstanding` holds every allocation the evaluator has not yet
    /// returned.
    fn check<'a, I>(&self, outstanding: I) -> bool
    where
        I: IntoIterator<Item = &'a Self::Allocation>,
        Self::Allocation: 'a,
    {
        let _ = outstanding;
        true
    }
}

/// A list of allocated blocks.
pub struct Blocks<A> {
    blocks: Vec<Block<A>>,
}

impl<A> Default for Blocks<A> {
    fn default() -> Self {
        Blocks::new()
    }
}

impl<A> Blocks<A> {
    pub fn new() -> Blocks<A> {
        Blocks { blocks: Vec::new() }
    }

    pub fn push(&mut self, block: Block<A>) {
        self.blocks.push(block);
    }

    pub fn remove_modulo(&mut self, idx: usize) -> Option<Block<A>> {
        let len = self.blocks.len();
        (len != 0).then(|| self.blocks.swap_remove(idx % len))
    }

    pub fn allocations(&self) -> impl Iterator<Item = &A> {
        self.blocks.iter().map(|b| &b.allocation)
    }
}

impl<A> IntoIterator for Blocks<A> {
    type Item = Block<A>;

    type IntoIter = std::vec::IntoIter<Block<A>>;

    fn into_iter(self) -> Self::IntoIter {
        self.blocks.into_iter()
    }
}

/// An allocated block of memory.
pub struct Block<A> {
    allocation: A,
    // The unique ID of the last operation that wrote to this allocation.
    id: u64,
}

fn paint(slice: &mut [u8], id: u64) {
    let id_bytes = id.to_le_bytes().into_iter().cycle();

    for (byte, value) in slice.iter_mut().zip(id_bytes) {
        *byte = value;
    }
}

impl<A: DerefMut<Target = [u8]>> Block<A> {
    /// Creates a block from `allocation` and paints it according to `id`.
    pub fn init(allocation: A, id: u64) -> Block<A> {
        let mut b = Block { allocation, id };
        b.paint(id);
        b
    }

    pub fn into_allocation(self) -> A {
        self.allocation
    }

    /// "Paints" the memory contained by `self` with the value of `id`.
    pub fn paint(&mut self, id: u64) {
        self.id = id;
        paint(&mut self.allocation, id);
    }

    /// Verifies that the memory contained by `self` has not been overwritten.
    pub fn verify(&self) -> bool {
        let id_bytes = self.id.to_le_bytes().into_iter().cycle();

        self.allocation
            .iter()
            .zip(id_bytes)
            .all(|(&byte, value)| byte == value)
    }
}

pub struct Evaluator<S: Subject> {
    subject: S,
}

#[derive(Clone, Debug)]
pub struct Failed {
    pub completed: Vec<AllocatorOp>,
    pub failed_op: Option<AllocatorOp>,
}

impl<S: Subject> Evaluator<S> {
    pub fn new(subject: S) -> Evaluator<S> {
        Evaluator { subject }
    }

    pub fn subject(&self) -> &S {
        &self.subject
    }

    pub fn evaluate<I>(&mut self, ops: I) -> Result<(), Failed>
    where
        I: IntoIterator<Item = AllocatorOp>,
    {
        let mut completed = Vec::new();
        let mut blocks = Blocks::new();

        for (op_id, op) in ops.into_iter().enumerate() {
            let op_id: u64 = op_id.try_into().unwrap();
            match op {
                AllocatorOp::Alloc(size) => {
                    let allocation = match self.subject.allocate(size) {
                        Ok(a) => a,
                        Err(_) => continue,
                    };

                    if allocation.len() != size {
                        return Err(Failed {
                            completed,
                            failed_op: Some(op),
                        });
                    }

                    blocks.push(Block::init(allocation, op_id));
                }

                AllocatorOp::Dealloc(raw_idx) => {
                    let mut block = match blocks.remove_modulo(raw_idx) {
                        Some(b) => b,
                        None => continue,
                    };

                    if !block.verify() {
                        return Err(Failed {
                            completed,
                            failed_op: Some(op),
                        });
                    }

                    block.paint(op_id);
                    self.subject.deallocate(block.into_allocation());
                }
            }

            if !self.subject.check(blocks.allocations()) {
                return Err(Failed {
                    completed,
                    failed_op: Some(op),
                });
            }

            completed.push(op);
        }

        for block in blocks {
            if !block.verify() {
                return Err(Failed {
                    completed,
                    failed_op: None,
                });
            }

            self.subject.deallocate(block.into_allocation());
        }

        if !self.subject.check(std::iter::empty()) {
            return Err(Failed {
                completed,
                failed_op: None,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A subject that serves every request from the heap.
    struct Heap;

    impl Subject for Heap {
        type Allocation = Vec<u8>;
        type AllocError = ();

        fn allocate(&mut self, size: usize) -> Result<Vec<u8>, ()> {
            Ok(vec![0; size])
        }

        fn deallocate(&mut self, allocation: Vec<u8>) {
            drop(allocation);
        }
    }

    #[test]
    fn paint_round_trips() {
        let mut block = Block::init(vec![0u8; 13], 0x0102_0304_0506_0708);
        assert!(block.verify());

        block.paint(7);
        assert!(block.verify());

        let mut allocation = block.into_allocation();
        allocation[3] ^= 0xFF;
        let block = Block {
            allocation,
            id: 7,
        };
        assert!(!block.verify());
    }

    #[test]
    fn heap_passes() {
        let ops = vec![
            AllocatorOp::Alloc(10),
            AllocatorOp::Alloc(1000),
            AllocatorOp::Dealloc(0),
            AllocatorOp::Alloc(3),
            AllocatorOp::Dealloc(5),
        ];

        Evaluator::new(Heap).evaluate(ops).unwrap();
    }

    #[test]
    fn arbitrary_sizes_are_bounded() {
        let data: Vec<u8> = (0..=255).cycle().take(4096).collect();
        let mut u = arbitrary::Unstructured::new(&data);

        while let Ok(ArbSize(size)) = <ArbSize as arbitrary::Arbitrary>::arbitrary(&mut u) {
            assert!((1..=MAX_SIZE).contains(&size));
            if u.is_empty() {
                break;
            }
        }
    }
}
