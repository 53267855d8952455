//! # Arena Allocator
//!
//! A bump-pointer stack over one contiguous region: a view into a pool block
//! or an owned heap region.
//!
//! ```text
//! base                     stack pointer               base + capacity
//!  |------- used ------------|-------- remaining ---------|
//! ```
//!
//! Pushes advance the stack pointer, pops move it back. Pops must mirror
//! pushes in reverse order (LIFO); only popping more than is in use is
//! detected.

// SAFETY: The arena hands out raw addresses inside its region and copies
// into them.
#![allow(unsafe_code)]

use std::marker::PhantomData;
use std::ptr::NonNull;

use bytemuck::Pod;

use super::align::{align_up, is_aligned, is_multiple};
use super::block_pool::Block;
use super::copy::{copy_aligned, copy_bytes};
use super::region::AlignedRegion;
use crate::error::{MemoryError, MemoryResult};

/// Saved arena position for [`Arena::rewind`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArenaMark {
    remaining: usize,
}

/// How a push or pop accounts for its size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Padding {
    /// Round up to [`super::ALIGNMENT`].
    Aligned,
    /// Exact size, no padding.
    Packed,
}

impl Padding {
    #[inline]
    fn reserved(self, size: usize) -> MemoryResult<usize> {
        match self {
            Self::Aligned => align_up(size).ok_or(MemoryError::CapacityOverflow),
            Self::Packed => Ok(size),
        }
    }
}

/// A bump-pointer (stack) allocator.
///
/// Out of memory is fatal by default: arenas are sized for their worst case
/// up front. The `try_` variants report it instead.
///
/// # Thread Safety
///
/// This arena is NOT thread-safe. Use one arena per thread.
///
/// # Example
///
/// ```rust,ignore
/// let mut arena = Arena::alloc(1024 * 1024)?; // 1MB
///
/// let scratch = arena.push(100, None);
/// arena.pop(100);
///
/// // Discard everything
/// arena.flush();
/// ```
pub struct Arena<'a> {
    base: NonNull<u8>,
    remaining: usize,
    capacity: usize,
    /// Backing storage when standalone; `None` for block views.
    owned: Option<AlignedRegion>,
    _region: PhantomData<&'a mut [u8]>,
}

impl Arena<'static> {
    /// Creates a standalone arena owning `size` heap bytes.
    ///
    /// # Errors
    ///
    /// `ZeroSized` or `AllocationFailed`.
    pub fn alloc(size: usize) -> MemoryResult<Self> {
        let region = AlignedRegion::allocate(size)?;
        Ok(Self {
            base: region.as_ptr(),
            remaining: size,
            capacity: size,
            owned: Some(region),
            _region: PhantomData,
        })
    }
}

impl<'a> Arena<'a> {
    /// Creates an arena over `[payload + start_offset, +size)` of `block`.
    ///
    /// The arena does not own the block; it borrows it for `'a`.
    ///
    /// # Errors
    ///
    /// `InvalidView` if `start_offset` or `size` is not a multiple of
    /// [`super::ALIGNMENT`] or the range does not fit in the payload.
    pub fn view(block: &'a mut Block<'_>, start_offset: usize, size: usize) -> MemoryResult<Self> {
        let payload = block.payload_size();
        let fits = start_offset
            .checked_add(size)
            .is_some_and(|end| end <= payload);
        if !is_multiple(start_offset) || !is_multiple(size) || !fits {
            return Err(MemoryError::InvalidView {
                offset: start_offset,
                size,
                payload,
            });
        }

        // SAFETY: start_offset + size <= payload, checked above.
        let base = unsafe { NonNull::new_unchecked(block.payload_ptr().as_ptr().add(start_offset)) };
        debug_assert!(is_aligned(base.as_ptr()));

        Ok(Self {
            base,
            remaining: size,
            capacity: size,
            owned: None,
            _region: PhantomData,
        })
    }

    /// Creates an arena over the whole payload of `block`.
    #[must_use]
    pub fn from_block(block: &'a mut Block<'_>) -> Self {
        let capacity = block.payload_size();
        Self {
            base: block.payload_ptr(),
            remaining: capacity,
            capacity,
            owned: None,
            _region: PhantomData,
        }
    }

    /// Total bytes in the region.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes not yet pushed.
    #[inline]
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.remaining
    }

    /// Bytes currently pushed.
    #[inline]
    #[must_use]
    pub const fn used(&self) -> usize {
        self.capacity - self.remaining
    }

    /// Whether the arena owns its memory (standalone).
    #[inline]
    #[must_use]
    pub fn is_owned(&self) -> bool {
        self.owned.is_some()
    }

    /// Start of the region.
    #[inline]
    #[must_use]
    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    /// Address the next push will return.
    #[inline]
    #[must_use]
    pub fn stack_pointer(&self) -> NonNull<u8> {
        // SAFETY: used() <= capacity, so this stays inside or one past the region.
        unsafe { NonNull::new_unchecked(self.base.as_ptr().add(self.used())) }
    }

    fn reserve(&mut self, reserved: usize) -> MemoryResult<NonNull<u8>> {
        if reserved > self.remaining {
            return Err(MemoryError::OutOfMemory {
                requested: reserved,
                remaining: self.remaining,
            });
        }
        let top = self.stack_pointer();
        self.remaining -= reserved;
        Ok(top)
    }

    fn push_with(&mut self, size: usize, source: Option<&[u8]>, padding: Padding) -> MemoryResult<NonNull<u8>> {
        if let Some(src) = source {
            if src.len() < size {
                return Err(MemoryError::ShortSource {
                    needed: size,
                    provided: src.len(),
                });
            }
        }
        let reserved = padding.reserved(size)?;
        let top = self.reserve(reserved)?;
        if let Some(src) = source {
            // SAFETY: top has `reserved >= size` bytes inside the region and
            // src is a distinct borrow of at least `size` bytes.
            unsafe { copy_bytes(top.as_ptr(), src.as_ptr(), size) };
        }
        Ok(top)
    }

    fn pop_with(&mut self, size: usize, padding: Padding) -> MemoryResult<()> {
        let reserved = padding.reserved(size)?;
        if reserved > self.used() {
            return Err(MemoryError::Underflow {
                requested: reserved,
                used: self.used(),
            });
        }
        self.remaining += reserved;
        Ok(())
    }

    /// Reserves `round_up(size)` bytes, optionally copying `size` bytes from
    /// `source`, and returns the start of the reservation.
    ///
    /// # Errors
    ///
    /// `OutOfMemory` if the rounded size does not fit, `ShortSource` if
    /// `source` is shorter than `size`. The arena is unchanged on error.
    pub fn try_push(&mut self, size: usize, source: Option<&[u8]>) -> MemoryResult<NonNull<u8>> {
        self.push_with(size, source, Padding::Aligned)
    }

    /// Reserves exactly `size` bytes, optionally copying from `source`.
    ///
    /// Must be undone with [`Arena::pop_packed`] of the same size.
    ///
    /// # Errors
    ///
    /// Same as [`Arena::try_push`].
    pub fn try_push_packed(&mut self, size: usize, source: Option<&[u8]>) -> MemoryResult<NonNull<u8>> {
        self.push_with(size, source, Padding::Packed)
    }

    /// Aligned push copying all of `source`, which must itself be aligned.
    ///
    /// Uses the vectorized copy when the CPU has it. Pop with
    /// [`Arena::pop`] of `source.len()`.
    ///
    /// # Errors
    ///
    /// `MisalignedSource` if `source` is not aligned,
    /// `MisalignedDestination` if an earlier packed push left the top
    /// unaligned, otherwise as [`Arena::try_push`]. The arena is unchanged
    /// on error.
    pub fn try_push_aligned_copy(&mut self, source: &[u8]) -> MemoryResult<NonNull<u8>> {
        if !is_aligned(source.as_ptr()) {
            return Err(MemoryError::MisalignedSource);
        }
        if !is_aligned(self.stack_pointer().as_ptr()) {
            return Err(MemoryError::MisalignedDestination);
        }
        let reserved = Padding::Aligned.reserved(source.len())?;
        let top = self.reserve(reserved)?;
        // SAFETY: top has `reserved >= len` bytes; both ends are aligned.
        unsafe { copy_aligned(top.as_ptr(), source.as_ptr(), source.len()) };
        Ok(top)
    }

    /// Pops the most recent aligned push of `size` bytes.
    ///
    /// # Errors
    ///
    /// `Underflow` if that is more than is in use.
    pub fn try_pop(&mut self, size: usize) -> MemoryResult<()> {
        self.pop_with(size, Padding::Aligned)
    }

    /// Pops the most recent packed push of `size` bytes.
    ///
    /// # Errors
    ///
    /// `Underflow` if that is more than is in use.
    pub fn try_pop_packed(&mut self, size: usize) -> MemoryResult<()> {
        self.pop_with(size, Padding::Packed)
    }

    /// [`Arena::try_push`], fatal on failure.
    ///
    /// # Panics
    ///
    /// Panics when the push does not fit.
    pub fn push(&mut self, size: usize, source: Option<&[u8]>) -> NonNull<u8> {
        fatal(self.try_push(size, source))
    }

    /// [`Arena::try_push_packed`], fatal on failure.
    ///
    /// # Panics
    ///
    /// Panics when the push does not fit.
    pub fn push_packed(&mut self, size: usize, source: Option<&[u8]>) -> NonNull<u8> {
        fatal(self.try_push_packed(size, source))
    }

    /// [`Arena::try_push_aligned_copy`], fatal on failure.
    ///
    /// # Panics
    ///
    /// Panics when the push does not fit or either end is misaligned.
    pub fn push_aligned_copy(&mut self, source: &[u8]) -> NonNull<u8> {
        fatal(self.try_push_aligned_copy(source))
    }

    /// [`Arena::try_pop`], fatal on failure.
    ///
    /// # Panics
    ///
    /// Panics on underflow.
    pub fn pop(&mut self, size: usize) {
        fatal(self.try_pop(size));
    }

    /// [`Arena::try_pop_packed`], fatal on failure.
    ///
    /// # Panics
    ///
    /// Panics on underflow.
    pub fn pop_packed(&mut self, size: usize) {
        fatal(self.try_pop_packed(size));
    }

    /// Pushes a copy of `value` (aligned accounting).
    ///
    /// Pop with `pop(size_of::<T>())`.
    ///
    /// # Errors
    ///
    /// `OutOfMemory` if it does not fit.
    pub fn push_value<T: Pod>(&mut self, value: &T) -> MemoryResult<NonNull<T>> {
        Ok(self.try_push(std::mem::size_of::<T>(), Some(bytemuck::bytes_of(value)))?.cast())
    }

    /// Discards every allocation in O(1).
    ///
    /// Every address previously returned by this arena is invalidated.
    #[inline]
    pub fn flush(&mut self) {
        self.remaining = self.capacity;
    }

    /// Captures the current position.
    #[inline]
    #[must_use]
    pub const fn mark(&self) -> ArenaMark {
        ArenaMark {
            remaining: self.remaining,
        }
    }

    /// Pops everything pushed since `mark` was taken.
    ///
    /// # Errors
    ///
    /// `InvalidRewind` if the arena is already below the mark.
    pub fn rewind(&mut self, mark: ArenaMark) -> MemoryResult<()> {
        if mark.remaining < self.remaining || mark.remaining > self.capacity {
            return Err(MemoryError::InvalidRewind);
        }
        self.remaining = mark.remaining;
        Ok(())
    }

    /// Releases the owned region of a standalone arena.
    ///
    /// # Errors
    ///
    /// `NotOwned` for a block view; the view is simply dropped.
    pub fn free(self) -> MemoryResult<()> {
        if self.owned.is_none() {
            return Err(MemoryError::NotOwned);
        }
        drop(self);
        Ok(())
    }
}

fn fatal<T>(result: MemoryResult<T>) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            tracing::error!("arena: {e}");
            panic!("arena: {e}");
        }
    }
}

// SAFETY: The arena either owns its region or holds the only mutable borrow
// of the block it views.
unsafe impl Send for Arena<'_> {}
