//! # Slot Handles
//!
//! Handles are lightweight identifiers consisting of:
//! - An index into a slot array
//! - The generation the slot had when the handle was issued

use super::generational::GenSlotAllocator;

/// Generation-checked reference to a slot.
///
/// The packed form (see [`Handle::to_bits`]) is:
/// - Lower 32 bits: slot index
/// - Upper 32 bits: generation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle {
    /// Generation of the slot when the handle was issued.
    pub generation: u32,
    /// Slot index.
    pub index: u32,
}

impl Handle {
    /// Null/invalid handle. Never issued by an allocator.
    pub const NULL: Self = Self {
        generation: u32::MAX,
        index: u32::MAX,
    };

    /// Creates a handle from index and generation.
    #[inline]
    #[must_use]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { generation, index }
    }

    /// Packs into `(generation << 32) | index`.
    #[inline]
    #[must_use]
    pub const fn to_bits(self) -> u64 {
        ((self.generation as u64) << 32) | (self.index as u64)
    }

    /// Unpacks a value produced by [`Handle::to_bits`].
    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self {
            generation: (bits >> 32) as u32,
            index: bits as u32,
        }
    }

    /// Checks if this handle is the null handle.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.generation == u32::MAX && self.index == u32::MAX
    }

    /// Checks whether this handle still refers to the slot it was issued
    /// for in `slots`.
    #[inline]
    #[must_use]
    pub fn is_valid_in(self, slots: &GenSlotAllocator<'_>) -> bool {
        slots.validated_address(self).is_some()
    }
}

impl Default for Handle {
    fn default() -> Self {
        Self::NULL
    }
}

impl From<Handle> for u64 {
    fn from(handle: Handle) -> Self {
        handle.to_bits()
    }
}

impl From<u64> for Handle {
    fn from(bits: u64) -> Self {
        Self::from_bits(bits)
    }
}
