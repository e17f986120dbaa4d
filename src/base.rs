use core::{
    num::NonZeroUsize,
    ptr::{self, NonNull},
};

#[cfg(feature = "sptr")]
use sptr::Strict;

/// A pointer to the base of the region of memory managed by an allocator.
#[derive(Copy, Clone, Debug)]
pub struct BasePtr {
    ptr: NonNull<u8>,
    extent: usize,
}

impl BasePtr {
    /// Creates a `BasePtr` from `ptr`.
    ///
    /// The returned value assumes the provenance of `ptr`.
    #[inline]
    pub fn new(ptr: NonNull<u8>, extent: usize) -> BasePtr {
        ptr.as_ptr()
            .addr()
            .checked_add(extent)
            .expect("region limit overflows usize");

        BasePtr { ptr, extent }
    }

    /// Returns the base pointer as a `NonNull<u8>`.
    #[inline]
    pub fn ptr(self) -> NonNull<u8> {
        self.ptr
    }

    /// Returns the address of the base pointer.
    #[inline]
    pub fn addr(self) -> NonZeroUsize {
        // SAFETY: the pointer is non-null, so its address is nonzero.
        unsafe { NonZeroUsize::new_unchecked(self.ptr.as_ptr().addr()) }
    }

    /// Returns the address one past the end of the region.
    #[inline]
    pub fn limit(self) -> usize {
        self.addr().get() + self.extent
    }

    #[inline]
    pub fn contains_addr(self, addr: usize) -> bool {
        self.addr().get() <= addr && addr < self.limit()
    }

    /// Returns `true` if the `len` bytes starting at `ptr` lie inside the
    /// region.
    #[inline]
    pub fn contains_range(self, ptr: NonNull<u8>, len: usize) -> bool {
        let start = ptr.as_ptr().addr();

        self.contains_addr(start)
            && start
                .checked_add(len)
                .map_or(false, |end| end <= self.limit())
    }

    /// Calculates the offset from `self` to `ptr`.
    pub fn offset_to(self, ptr: NonNull<u8>) -> usize {
        ptr.as_ptr()
            .addr()
            .checked_sub(self.addr().get())
            .expect("pointer precedes region base")
    }

    /// Creates a new pointer to `len` bytes at the given offset.
    ///
    /// The returned pointer has the provenance of this pointer.
    #[inline]
    pub fn with_offset_and_len(self, offset: usize, len: usize) -> NonNull<[u8]> {
        debug_assert!(
            offset
                .checked_add(len)
                .map_or(false, |end| end <= self.extent),
            "range exceeds region"
        );

        let addr = self.addr().get() + offset;
        let ptr = self.ptr.as_ptr().with_addr(addr);
        let raw_slice = ptr::slice_from_raw_parts_mut(ptr, len);

        // SAFETY: `addr` is at least the (nonzero) base address.
        unsafe { NonNull::new_unchecked(raw_slice) }
    }
}
