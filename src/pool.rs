//! The backing region of an allocator.

use core::{alloc::Layout, ptr::NonNull};

use crate::{base::BasePtr, AllocInitError};

/// A fixed, zero-initialized byte region allocated from the global allocator.
///
/// The region is released when the `Pool` is dropped. It is never resized.
pub(crate) struct Pool {
    base: BasePtr,
    layout: Layout,
}

impl Pool {
    /// Reserves a region of `size` bytes aligned to `align`.
    ///
    /// # Errors
    ///
    /// Returns [`AllocInitError::InvalidConfig`] if `size` and `align` do not
    /// form a valid [`Layout`] or `size` is zero, and
    /// [`AllocInitError::AllocFailed`] if the global allocator fails.
    pub fn try_new(size: usize, align: usize) -> Result<Pool, AllocInitError> {
        let layout =
            Layout::from_size_align(size, align).map_err(|_| AllocInitError::InvalidConfig)?;

        if layout.size() == 0 {
            return Err(AllocInitError::InvalidConfig);
        }

        // SAFETY: `layout` has a nonzero size.
        let raw = unsafe { alloc::alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or(AllocInitError::AllocFailed(layout))?;

        Ok(Pool {
            base: BasePtr::new(ptr, layout.size()),
            layout,
        })
    }

    #[inline]
    pub fn base(&self) -> BasePtr {
        self.base
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.layout.size()
    }
}

// SAFETY: `Pool` owns its region outright; the base pointer is never used to
// create references except through allocations, which cover disjoint ranges.
unsafe impl Send for Pool {}

// SAFETY: Shared access only exposes the base pointer and the region size.
unsafe impl Sync for Pool {}

impl Drop for Pool {
    fn drop(&mut self) {
        // SAFETY: the region was allocated in `try_new` with `self.layout`.
        unsafe { alloc::alloc::dealloc(self.base.ptr().as_ptr(), self.layout) };
    }
}
