//! Size and order arithmetic.
//!
//! Every block managed by the pool has a size of `min_block << order`, so a
//! request is served by rounding it up to a power of two and counting the
//! doublings above the minimum block size.

use core::cmp;

/// Returns `true` if `n` is a nonzero power of two.
#[inline]
pub const fn is_pow2(n: usize) -> bool {
    n != 0 && n & (n - 1) == 0
}

/// Rounds `x` up to the nearest power of two.
///
/// Returns `None` if `x` is zero or the result would overflow `usize`.
#[inline]
pub fn round_up_pow2(x: usize) -> Option<usize> {
    match x {
        0 => None,
        x => x.checked_next_power_of_two(),
    }
}

/// Returns the number of doublings from `min` to `n`.
///
/// Both arguments must be powers of two, and `min <= n`.
#[inline]
pub fn log2(min: usize, n: usize) -> usize {
    debug_assert!(is_pow2(min) && is_pow2(n));
    assert!(min <= n, "log2: {min} exceeds {n}");

    (n.trailing_zeros() - min.trailing_zeros()) as usize
}

/// Returns the order of the smallest block able to hold `size` bytes.
///
/// Returns `None` if `size` is zero or rounding it up overflows.
#[inline]
pub fn order_for(min_block: usize, size: usize) -> Option<usize> {
    let rounded = cmp::max(round_up_pow2(size)?, min_block);

    Some(log2(min_block, rounded))
}

/// Returns the size in bytes of a block of the given order.
#[inline]
pub const fn block_size(min_block: usize, order: usize) -> usize {
    min_block << order
}
