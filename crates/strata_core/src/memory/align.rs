//! # Alignment
//!
//! Build-time alignment constants shared by every allocator.

/// Alignment of every block, arena region and aligned push.
///
/// Matches the AVX2 register width so aligned loads and stores are legal on
/// any substrate address.
pub const ALIGNMENT: usize = 32;

/// Width of a free-chain link stored inside an unoccupied slot.
pub const POINTER_WIDTH: usize = std::mem::size_of::<usize>();

/// Rounds `size` up to the next multiple of [`ALIGNMENT`].
///
/// Returns `None` on overflow.
#[inline]
#[must_use]
pub const fn align_up(size: usize) -> Option<usize> {
    match size.checked_add(ALIGNMENT - 1) {
        Some(padded) => Some(padded & !(ALIGNMENT - 1)),
        None => None,
    }
}

/// Checks whether `value` is a multiple of [`ALIGNMENT`].
#[inline]
#[must_use]
pub const fn is_multiple(value: usize) -> bool {
    value & (ALIGNMENT - 1) == 0
}

/// Checks whether `ptr` satisfies [`ALIGNMENT`].
#[inline]
#[must_use]
pub fn is_aligned(ptr: *const u8) -> bool {
    is_multiple(ptr as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0), Some(0));
        assert_eq!(align_up(1), Some(ALIGNMENT));
        assert_eq!(align_up(ALIGNMENT), Some(ALIGNMENT));
        assert_eq!(align_up(ALIGNMENT + 1), Some(2 * ALIGNMENT));
        assert_eq!(align_up(usize::MAX), None);
    }

    #[test]
    fn test_is_multiple() {
        assert!(is_multiple(0));
        assert!(is_multiple(ALIGNMENT * 3));
        assert!(!is_multiple(ALIGNMENT + 8));
    }
}
