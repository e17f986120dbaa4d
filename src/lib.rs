//! A fixed-capacity buddy-block memory pool.
//!
//! A [`Balloc`] reserves a single power-of-two region up front and serves
//! byte buffers out of it. Requests are rounded up to power-of-two blocks;
//! larger free blocks are split to serve small requests, and freed blocks are
//! merged with their buddies whenever both halves are free. The region never
//! grows.
//!
//! When the region is exhausted, the allocator's [`ExhaustionPolicy`]
//! applies: a [`Balloc<Strict>`] reports [`AllocError`], while a
//! [`Balloc<Degrading>`] serves the request from the global allocator.
//!
//! ## Example
//!
//! ```
//! use balloc::{Balloc, Strict};
//!
//! // A 1 MiB region with blocks of at least 64 bytes.
//! let pool = Balloc::<Strict>::new(64, 1024 * 1024);
//!
//! let mut buf = pool.alloc(100).unwrap();
//! assert_eq!(buf.len(), 100);
//! buf.copy_from_slice(&[7; 100]);
//!
//! // The request was rounded up to a 128-byte block.
//! assert_eq!(pool.avail(), 1024 * 1024 - 128);
//!
//! pool.free(buf);
//! assert_eq!(pool.avail(), 1024 * 1024);
//! ```
//!
//! The bookkeeping is available on its own as [`BuddyCore`], which deals in
//! block offsets and orders rather than memory.

#![doc(html_root_url = "https://docs.rs/balloc/0.1.0")]
#![warn(missing_debug_implementations)]
#![warn(missing_docs)]
#![deny(unsafe_op_in_unsafe_fn)]
#![cfg_attr(not(feature = "std"), no_std)]
// This is necessary to allow `sptr` to shadow methods which have since been
// stabilized on raw pointers.
#![cfg_attr(feature = "sptr", allow(unstable_name_collisions))]

extern crate alloc;

mod balloc;
mod base;
pub mod buddy;
mod free_list;
pub mod order;
mod pool;


use core::{alloc::Layout, fmt};

pub use crate::{
    balloc::{Allocation, Balloc, Degrading, ExhaustionPolicy, Strict},
    buddy::BuddyCore,
};

/// The error type for allocator constructors.
#[derive(Clone, Debug)]
pub enum AllocInitError {
    /// A necessary allocation failed.
    ///
    /// This variant is returned when a constructor attempts to allocate the
    /// managed region, but the global allocator fails.
    ///
    /// The variant contains the [`Layout`] that could not be allocated.
    AllocFailed(Layout),

    /// The configuration of the allocator is invalid.
    ///
    /// This variant is returned when the minimum block size or the region
    /// size is not a power of two, or the region is not larger than one
    /// minimum block.
    InvalidConfig,
}

impl fmt::Display for AllocInitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocInitError::AllocFailed(layout) => write!(
                f,
                "failed to allocate a region of {} bytes aligned to {}",
                layout.size(),
                layout.align()
            ),
            AllocInitError::InvalidConfig => f.write_str("invalid allocator configuration"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for AllocInitError {}

/// Indicates an allocation failure due to exhaustion of the managed region.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct AllocError;

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("memory pool exhausted")
    }
}

#[cfg(feature = "std")]
impl std::error::Error for AllocError {}

#[doc(hidden)]
mod private {
    pub trait Sealed {}
}
use private::Sealed;
