//! The thread-safe allocator facade.
//!
//! A [`Balloc`] pairs a [`BuddyCore`] with the region it describes. Byte-size
//! requests are rounded up to a block order, served from the region, and
//! handed back as [`Allocation`]s. All bookkeeping happens under a single
//! lock; the bytes of an allocation are accessed without it.
//!
//! What happens when the region cannot serve a request is decided by the
//! allocator's [`ExhaustionPolicy`]:
//! - [`Strict`] allocators return `Err(AllocError)`.
//! - [`Degrading`] allocators serve the request from the global allocator
//!   instead and log a warning.

use alloc::{boxed::Box, vec};
use core::{
    fmt,
    marker::PhantomData,
    ops::{Deref, DerefMut},
    ptr::NonNull,
    sync::atomic::{AtomicUsize, Ordering},
};

use spin::Mutex;

use crate::{
    buddy::{Block, BuddyCore},
    order,
    pool::Pool,
    AllocError, AllocInitError, Sealed,
};

/// Determines how an allocator responds to exhaustion of its region.
///
/// This trait is sealed; it is implemented by [`Strict`] and [`Degrading`].
pub trait ExhaustionPolicy: Sealed {}

/// Exhaustion is reported to the caller as an [`AllocError`].
#[derive(Clone, Copy, Debug, Default)]
pub struct Strict;
impl Sealed for Strict {}
impl ExhaustionPolicy for Strict {}

/// Exhaustion is absorbed by allocating from the global allocator.
#[derive(Clone, Copy, Debug, Default)]
pub struct Degrading;
impl Sealed for Degrading {}
impl ExhaustionPolicy for Degrading {}

/// A buddy allocator over a fixed region.
///
/// The region is `max_total` bytes long and is divided into blocks of
/// `min_block << order` bytes. A request of `size` bytes reserves the
/// smallest block that holds it, so its footprint in the region is
/// `max(min_block, size.next_power_of_two())`.
///
/// Allocations borrow the allocator and must be returned with
/// [`free()`](Self::free). An [`Allocation`] dropped without being freed keeps
/// its block reserved until the allocator itself is dropped.
pub struct Balloc<P: ExhaustionPolicy> {
    core: Mutex<BuddyCore>,
    pool: Pool,
    min_block: usize,
    max_order: usize,
    fallbacks: AtomicUsize,
    policy: PhantomData<P>,
}

impl<P: ExhaustionPolicy> Balloc<P> {
    /// Constructs an allocator over a new region of `max_total` bytes with a
    /// minimum block size of `min_block` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`AllocInitError::InvalidConfig`] unless both sizes are powers
    /// of two and `max_total > min_block`, and
    /// [`AllocInitError::AllocFailed`] if the region could not be allocated.
    pub fn try_new(min_block: usize, max_total: usize) -> Result<Balloc<P>, AllocInitError> {
        let core = BuddyCore::new(min_block, max_total)?;
        let pool = Pool::try_new(max_total, min_block)?;
        let max_order = core.max_order();

        log::debug!(
            "reserved {max_total} byte pool (min block {min_block}, max order {max_order})"
        );

        Ok(Balloc {
            core: Mutex::new(core),
            pool,
            min_block,
            max_order,
            fallbacks: AtomicUsize::new(0),
            policy: PhantomData,
        })
    }

    /// Constructs an allocator over a new region of `max_total` bytes with a
    /// minimum block size of `min_block` bytes.
    ///
    /// # Panics
    ///
    /// Panics unless both sizes are powers of two and `max_total >
    /// min_block`. If the region could not be allocated, this constructor
    /// invokes [`handle_alloc_error`].
    ///
    /// [`handle_alloc_error`]: alloc::alloc::handle_alloc_error
    pub fn new(min_block: usize, max_total: usize) -> Balloc<P> {
        match Self::try_new(min_block, max_total) {
            Ok(b) => b,
            Err(AllocInitError::InvalidConfig) => panic!(
                "invalid pool geometry: min_block = {min_block}, max_total = {max_total} \
                 (both must be powers of two and max_total > min_block)"
            ),
            Err(AllocInitError::AllocFailed(layout)) => alloc::alloc::handle_alloc_error(layout),
        }
    }

    /// Returns the size of the smallest block.
    #[inline]
    pub fn min_block(&self) -> usize {
        self.min_block
    }

    /// Returns the size of the region.
    #[inline]
    pub fn max_total(&self) -> usize {
        self.pool.size()
    }

    /// Returns the order of the block spanning the whole region.
    #[inline]
    pub fn max_order(&self) -> usize {
        self.max_order
    }

    /// Returns the number of bytes of the region that are free.
    ///
    /// Allocations served outside the region are not counted.
    pub fn avail(&self) -> usize {
        self.core.lock().avail()
    }

    /// Returns an allocation to the allocator.
    ///
    /// Allocations served outside the region are simply dropped. For
    /// allocations from the region, the block's order is recomputed from the
    /// allocation's length and the block is coalesced with its buddies.
    ///
    /// An allocation whose range lies outside this allocator's region is
    /// ignored. If it came from another allocator, its block stays reserved
    /// there.
    pub fn free(&self, allocation: Allocation<'_>) {
        let (ptr, offset) = match allocation.kind {
            Kind::Pool { ptr, offset } => (ptr, offset),
            Kind::Fallback(_) => return,
        };

        let base = self.pool.base();
        if !base.contains_range(ptr.cast(), ptr.len()) {
            return;
        }
        debug_assert_eq!(base.offset_to(ptr.cast()), offset);

        let order = order::order_for(self.min_block, ptr.len())
            .expect("region allocations are nonempty");

        self.core.lock().release(Block { offset, order });
    }

    fn alloc_in_pool(&self, size: usize) -> Result<Allocation<'_>, AllocError> {
        assert!(size > 0, "allocation size must be nonzero");

        let order = order::order_for(self.min_block, size).ok_or(AllocError)?;
        let block = self.core.lock().allocate(order)?;
        let ptr = self.pool.base().with_offset_and_len(block.offset, size);

        Ok(Allocation {
            kind: Kind::Pool {
                ptr,
                offset: block.offset,
            },
            pool: PhantomData,
        })
    }

    #[cfg(test)]
    pub(crate) fn core(&self) -> spin::MutexGuard<'_, BuddyCore> {
        self.core.lock()
    }
}

impl Balloc<Strict> {
    /// Allocates `size` bytes from the region.
    ///
    /// The returned allocation is exactly `size` bytes long. Its contents are
    /// whatever the previous holder of the block left behind.
    ///
    /// # Errors
    ///
    /// Returns `Err(AllocError)` if no free block can hold `size` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `size` is zero.
    pub fn alloc(&self, size: usize) -> Result<Allocation<'_>, AllocError> {
        self.alloc_in_pool(size)
    }

    /// Allocates `size` zeroed bytes from the region.
    ///
    /// # Errors
    ///
    /// Returns `Err(AllocError)` if no free block can hold `size` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `size` is zero.
    pub fn alloc_zeroed(&self, size: usize) -> Result<Allocation<'_>, AllocError> {
        let mut a = self.alloc(size)?;
        a.fill(0);
        Ok(a)
    }
}

impl Balloc<Degrading> {
    /// Allocates `size` bytes, from the region if possible.
    ///
    /// If the region cannot serve the request, a zeroed buffer is allocated
    /// from the global allocator instead. Such allocations do not count
    /// against [`avail()`](Self::avail).
    ///
    /// # Panics
    ///
    /// Panics if `size` is zero, or if the region cannot serve the request
    /// and `size` exceeds `isize::MAX`. If the global allocator fails, this
    /// method invokes [`handle_alloc_error`].
    ///
    /// [`handle_alloc_error`]: alloc::alloc::handle_alloc_error
    pub fn alloc(&self, size: usize) -> Allocation<'_> {
        match self.alloc_in_pool(size) {
            Ok(a) => a,
            Err(AllocError) => self.fall_back(size),
        }
    }

    /// Allocates `size` zeroed bytes, from the region if possible.
    ///
    /// # Panics
    ///
    /// Panics under the same conditions as [`alloc()`](Self::alloc).
    pub fn alloc_zeroed(&self, size: usize) -> Allocation<'_> {
        let mut a = self.alloc(size);
        if a.is_pool_backed() {
            a.fill(0);
        }
        a
    }

    /// Returns the number of allocations that were served outside the region.
    pub fn fallbacks(&self) -> usize {
        self.fallbacks.load(Ordering::Relaxed)
    }

    fn fall_back(&self, size: usize) -> Allocation<'_> {
        let count = self.fallbacks.fetch_add(1, Ordering::Relaxed) + 1;
        log::warn!("pool exhausted, allocating {size} bytes from the heap (fallback #{count})");

        Allocation {
            kind: Kind::Fallback(vec![0; size].into_boxed_slice()),
            pool: PhantomData,
        }
    }
}

impl<P: ExhaustionPolicy> fmt::Debug for Balloc<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Balloc")
            .field("min_block", &self.min_block)
            .field("max_total", &self.max_total())
            .field("avail", &self.avail())
            .field("fallbacks", &self.fallbacks.load(Ordering::Relaxed))
            .finish()
    }
}

enum Kind {
    Pool { ptr: NonNull<[u8]>, offset: usize },
    Fallback(Box<[u8]>),
}

/// A buffer handed out by a [`Balloc`].
///
/// An `Allocation` dereferences to exactly the number of bytes requested,
/// even though the block reserved for it may be larger.
#[must_use = "allocations must be returned with `Balloc::free`"]
pub struct Allocation<'a> {
    kind: Kind,
    pool: PhantomData<&'a Pool>,
}

// SAFETY: A pool-backed allocation is the only handle to its range of the
// region, so it may be moved to and shared with other threads like a
// `Box<[u8]>`. The region outlives it by the `'a` borrow.
unsafe impl Send for Allocation<'_> {}

// SAFETY: See above. Shared access only hands out `&[u8]`.
unsafe impl Sync for Allocation<'_> {}

impl Allocation<'_> {
    /// Returns `true` if the allocation lives in the allocator's region.
    #[inline]
    pub fn is_pool_backed(&self) -> bool {
        matches!(self.kind, Kind::Pool { .. })
    }

    /// Returns the offset of the allocation from the start of the region.
    ///
    /// Returns `None` if the allocation was served outside the region.
    #[inline]
    pub fn offset(&self) -> Option<usize> {
        match self.kind {
            Kind::Pool { offset, .. } => Some(offset),
            Kind::Fallback(_) => None,
        }
    }
}

impl Deref for Allocation<'_> {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        match &self.kind {
            // SAFETY: the range is initialized, lies in the region, and is
            // accessible only through this allocation.
            Kind::Pool { ptr, .. } => unsafe { ptr.as_ref() },
            Kind::Fallback(buf) => &buf[..],
        }
    }
}

impl DerefMut for Allocation<'_> {
    #[inline]
    fn deref_mut(&mut self) -> &mut [u8] {
        match &mut self.kind {
            // SAFETY: as for `deref`; `self` is borrowed mutably.
            Kind::Pool { ptr, .. } => unsafe { ptr.as_mut() },
            Kind::Fallback(buf) => &mut buf[..],
        }
    }
}

impl fmt::Debug for Allocation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            Kind::Pool { ptr, offset } => f
                .debug_struct("Allocation")
                .field("offset", &offset)
                .field("len", &ptr.len())
                .finish(),
            Kind::Fallback(ref buf) => f
                .debug_struct("Allocation")
                .field("fallback", &true)
                .field("len", &buf.len())
                .finish(),
        }
    }
}
