//! # Aligned Heap Regions
//!
//! The single primitive through which the substrate obtains heap memory.

// SAFETY: This module owns raw allocations from the global allocator.
#![allow(unsafe_code)]

use std::alloc::{alloc, dealloc, Layout};
use std::ptr::NonNull;

use super::align::{is_aligned, ALIGNMENT};
use crate::error::{MemoryError, MemoryResult};

/// An owned, [`ALIGNMENT`]-aligned heap allocation.
///
/// Freed when dropped. The contents start uninitialized; callers that read
/// before writing must use [`AlignedRegion::allocate_zeroed`].
pub struct AlignedRegion {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl AlignedRegion {
    /// Allocates `size` bytes aligned to [`ALIGNMENT`].
    ///
    /// # Errors
    ///
    /// `ZeroSized` for `size == 0`, `AllocationFailed` if the system
    /// allocator returns null.
    pub fn allocate(size: usize) -> MemoryResult<Self> {
        Self::allocate_with(size, false)
    }

    /// Allocates `size` zero-filled bytes aligned to [`ALIGNMENT`].
    ///
    /// # Errors
    ///
    /// Same as [`AlignedRegion::allocate`].
    pub fn allocate_zeroed(size: usize) -> MemoryResult<Self> {
        Self::allocate_with(size, true)
    }

    fn allocate_with(size: usize, zeroed: bool) -> MemoryResult<Self> {
        if size == 0 {
            return Err(MemoryError::ZeroSized);
        }
        let layout = Layout::from_size_align(size, ALIGNMENT)
            .map_err(|_| MemoryError::CapacityOverflow)?;

        // SAFETY: layout has a non-zero size.
        let raw = unsafe {
            if zeroed {
                std::alloc::alloc_zeroed(layout)
            } else {
                alloc(layout)
            }
        };
        let ptr = NonNull::new(raw).ok_or(MemoryError::AllocationFailed {
            size,
            align: ALIGNMENT,
        })?;
        debug_assert!(is_aligned(ptr.as_ptr()), "system allocator ignored alignment");

        Ok(Self { ptr, layout })
    }

    /// Start of the region.
    #[inline]
    #[must_use]
    pub fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }
}

impl Drop for AlignedRegion {
    fn drop(&mut self) {
        // SAFETY: ptr was returned by `alloc` with exactly this layout.
        unsafe {
            dealloc(self.ptr.as_ptr(), self.layout);
        }
    }
}

// SAFETY: AlignedRegion uniquely owns its allocation.
unsafe impl Send for AlignedRegion {}
