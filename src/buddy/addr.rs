//! Address arithmetic for buddy blocks.
//!
//! All of this assumes that frame `0` is aligned to [`MAX_ORDER`], which holds
//! because frame numbers are dense indices starting at zero.

use super::MAX_ORDER;
use crate::frame::Pfn;
use core::cmp;

/// Return the number of frames inside a block of the given order.
#[inline]
pub const fn pages_per_block(order: usize) -> usize {
    1 << order
}

/// Return the header of the other block that forms the `order + 1` block
/// together with the block starting at `pfn`.
///
/// `pfn` must be the header of an `order` block, otherwise the
/// result is meaningless.
#[inline]
pub const fn buddy_of(pfn: Pfn, order: usize) -> Pfn {
    // the addresses of two buddies only differ in the bit of their order
    pfn ^ pages_per_block(order)
}

/// Return the distance between `pfn` and the start of the `order` block
/// that contains it.
///
/// A non-zero offset means `pfn` can't be the header of an `order` block.
#[inline]
pub const fn block_offset(pfn: Pfn, order: usize) -> usize {
    pfn & (pages_per_block(order) - 1)
}

/// Check if `pfn` may start a block of the given order.
#[inline]
pub const fn is_aligned(pfn: Pfn, order: usize) -> bool {
    block_offset(pfn, order) == 0
}

/// Return the smallest order whose blocks hold at least `count` frames.
///
/// This function may return an order that is larger than [`MAX_ORDER`].
pub fn order_for_count(count: usize) -> usize {
    cmp::max(count, 1).next_power_of_two().trailing_zeros() as usize
}

/// Return the largest order `<= MAX_ORDER` whose block is aligned at
/// `cursor` and fits into `remaining` frames.
///
/// `remaining` must not be zero.
pub fn largest_fitting_order(cursor: Pfn, remaining: usize) -> usize {
    debug_assert!(remaining > 0, "no frames left to fit a block into");

    // alignment of the cursor, frame 0 is aligned to every order
    let align = if cursor == 0 {
        MAX_ORDER
    } else {
        cursor.trailing_zeros() as usize
    };
    // floor(log2(remaining))
    let fit = (usize::BITS - 1 - remaining.leading_zeros()) as usize;

    cmp::min(MAX_ORDER, cmp::min(align, fit))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buddy_addresses() {
        macro_rules! test {
            ($order:expr, $first:expr, $second:expr) => {
                assert_eq!(buddy_of($first, $order), $second);
                assert_eq!(buddy_of($second, $order), $first);
            };
        }

        test!(0, 0x0, 0x1);
        test!(0, 0x2, 0x3);
        test!(0, 0x170, 0x171);
        test!(1, 0x0, 0x2);
        test!(2, 0x0, 0x4);
        test!(3, 0x8, 0x0);
        test!(4, 0x160, 0x170);
        test!(MAX_ORDER, 0x0, 1 << MAX_ORDER);
    }

    #[test]
    fn buddy_is_an_involution() {
        for order in 0..=MAX_ORDER {
            for idx in 0..64 {
                let pfn = idx << order;
                assert_eq!(buddy_of(buddy_of(pfn, order), order), pfn);
            }
        }
    }

    #[test]
    fn offsets() {
        assert_eq!(block_offset(0, 3), 0);
        assert_eq!(block_offset(8, 3), 0);
        assert_eq!(block_offset(13, 3), 5);
        assert_eq!(block_offset(13, 0), 0);

        assert!(is_aligned(16, 4));
        assert!(!is_aligned(24, 4));
    }

    #[test]
    fn orders_for_counts() {
        assert_eq!(order_for_count(0), 0);
        assert_eq!(order_for_count(1), 0);
        assert_eq!(order_for_count(2), 1);
        assert_eq!(order_for_count(3), 2);
        assert_eq!(order_for_count(4), 2);
        assert_eq!(order_for_count(5), 3);
        assert_eq!(order_for_count(1 << MAX_ORDER), MAX_ORDER);
    }

    #[test]
    fn fitting_orders() {
        // limited by the remaining length
        assert_eq!(largest_fitting_order(0, 8), 3);
        assert_eq!(largest_fitting_order(0, 13), 3);
        // limited by the alignment of the cursor
        assert_eq!(largest_fitting_order(4, 100), 2);
        assert_eq!(largest_fitting_order(3, 100), 0);
        // limited by the maximum order
        assert_eq!(largest_fitting_order(0, usize::MAX), MAX_ORDER);
        assert_eq!(largest_fitting_order(1 << 30, 1 << 30), MAX_ORDER);
    }
}
