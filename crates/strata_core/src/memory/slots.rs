//! # Slot Allocator
//!
//! Fixed-capacity array of fixed-size slots with O(1) reserve and release.
//!
//! ```text
//! storage: [ occupied | free -> 3 | occupied | free -> END | unused ... ]
//!            0          1          2          3             ^ high_water_mark
//! free_head = 1
//! ```
//!
//! Unoccupied slots host the free chain: the first machine word of a free
//! slot holds the index of the next free slot. Released slots are reused
//! most-recent-first; untouched capacity is promoted only once the chain is
//! empty.

// SAFETY: Slots are raw byte ranges inside storage owned (or borrowed) by
// the allocator.
#![allow(unsafe_code)]

use std::marker::PhantomData;
use std::ptr::NonNull;

use bytemuck::Pod;

use super::align::POINTER_WIDTH;
use super::arena::Arena;
use super::copy::copy_bytes;
use super::occupancy::{words_for, OccupancyBits};
use super::region::AlignedRegion;
use super::storage::{carve, read_link, write_link};
use crate::error::{MemoryError, MemoryResult};

/// Internal slot size for an element size: large enough to hold a
/// free-chain link.
#[inline]
#[must_use]
pub const fn slot_size_for(element_size: usize) -> usize {
    if element_size > POINTER_WIDTH {
        element_size
    } else {
        POINTER_WIDTH
    }
}

/// Fixed-capacity slot allocator over raw bytes.
///
/// Capacity exhaustion is recoverable: [`SlotAllocator::reserve`] returns
/// `None` and the caller decides whether to grow, evict or report.
///
/// # Thread Safety
///
/// NOT thread-safe. Wrap it in a caller-owned mutex to share it.
///
/// # Example
///
/// ```rust,ignore
/// let mut slots = SlotAllocator::new(1024, 12)?;
/// let a = slots.add(&[0u8; 12]).ok_or(Full)?;
/// slots.release(a)?;
/// ```
pub struct SlotAllocator<'a> {
    capacity: u64,
    high_water_mark: u64,
    occupied_count: u64,
    element_size: usize,
    slot_size: usize,
    storage: NonNull<u8>,
    free_head: Option<usize>,
    occupancy: OccupancyBits,
    _owned: Vec<AlignedRegion>,
    _region: PhantomData<&'a mut [u8]>,
}

impl SlotAllocator<'static> {
    /// Creates an allocator whose storage lives on the heap.
    ///
    /// # Errors
    ///
    /// `InvalidCapacity`, `InvalidElementSize`, `CapacityOverflow` or
    /// `AllocationFailed`.
    pub fn new(capacity: u64, element_size: usize) -> MemoryResult<Self> {
        Self::build(None, capacity, element_size)
    }
}

impl<'a> SlotAllocator<'a> {
    /// Creates an allocator whose storage is pushed onto `arena`.
    ///
    /// If any part of the storage does not fit, the arena is rolled back to
    /// its prior state.
    ///
    /// # Errors
    ///
    /// As [`SlotAllocator::new`], plus `OutOfMemory` from the arena.
    pub fn new_in(arena: &'a mut Arena<'_>, capacity: u64, element_size: usize) -> MemoryResult<Self> {
        Self::build(Some(arena), capacity, element_size)
    }

    fn build(arena: Option<&mut Arena<'_>>, capacity: u64, element_size: usize) -> MemoryResult<Self> {
        if capacity == 0 {
            return Err(MemoryError::InvalidCapacity);
        }
        if element_size == 0 {
            return Err(MemoryError::InvalidElementSize);
        }
        let slot_size = slot_size_for(element_size);
        let count = usize::try_from(capacity).map_err(|_| MemoryError::CapacityOverflow)?;
        let storage_bytes = count
            .checked_mul(slot_size)
            .ok_or(MemoryError::CapacityOverflow)?;
        let word_count = words_for(count);

        let carved = carve(arena, &[storage_bytes, word_count * std::mem::size_of::<u64>()])?;
        let storage = carved.regions[0];
        // SAFETY: the second region holds exactly word_count aligned u64 words
        // and belongs to this allocator alone.
        let occupancy = unsafe { OccupancyBits::new(carved.regions[1].cast::<u64>(), word_count) };

        tracing::trace!(
            "slot allocator: {capacity} x {slot_size}B slots (element {element_size}B)"
        );

        Ok(Self {
            capacity,
            high_water_mark: 0,
            occupied_count: 0,
            element_size,
            slot_size,
            storage,
            free_head: None,
            occupancy,
            _owned: carved.owned,
            _region: PhantomData,
        })
    }

    /// Maximum number of slots.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Number of slots ever promoted from unused capacity.
    #[inline]
    #[must_use]
    pub const fn high_water_mark(&self) -> u64 {
        self.high_water_mark
    }

    /// Number of currently occupied slots.
    #[inline]
    #[must_use]
    pub const fn occupied_count(&self) -> u64 {
        self.occupied_count
    }

    /// Number of slots `reserve` can still hand out.
    #[inline]
    #[must_use]
    pub const fn free_count(&self) -> u64 {
        self.capacity - self.occupied_count
    }

    /// Whether every slot is occupied.
    #[inline]
    #[must_use]
    pub const fn is_full(&self) -> bool {
        self.occupied_count == self.capacity
    }

    /// Element size requested at creation.
    #[inline]
    #[must_use]
    pub const fn element_size(&self) -> usize {
        self.element_size
    }

    /// Internal slot stride, `max(element_size, POINTER_WIDTH)`.
    #[inline]
    #[must_use]
    pub const fn slot_size(&self) -> usize {
        self.slot_size
    }

    #[inline]
    fn slot_ptr(&self, index: usize) -> NonNull<u8> {
        debug_assert!((index as u64) < self.capacity);
        // SAFETY: index < capacity, so the slot lies inside storage.
        unsafe { NonNull::new_unchecked(self.storage.as_ptr().add(index * self.slot_size)) }
    }

    /// Address of slot `index`, occupied or not.
    ///
    /// # Panics
    ///
    /// Panics if `index >= capacity`.
    #[inline]
    #[must_use]
    pub fn address_of(&self, index: u64) -> NonNull<u8> {
        assert!(index < self.capacity, "slot index {index} out of bounds");
        self.slot_ptr(index as usize)
    }

    /// Index of the slot starting at `address`.
    ///
    /// # Errors
    ///
    /// `OutOfBounds` if the address is outside storage,
    /// `MisalignedAddress` if it is not the start of a slot.
    pub fn index_of(&self, address: NonNull<u8>) -> MemoryResult<u64> {
        let offset = (address.as_ptr() as usize).wrapping_sub(self.storage.as_ptr() as usize);
        let index = (offset / self.slot_size) as u64;
        if index >= self.capacity {
            return Err(MemoryError::OutOfBounds {
                index,
                capacity: self.capacity,
            });
        }
        if offset % self.slot_size != 0 {
            return Err(MemoryError::MisalignedAddress);
        }
        Ok(index)
    }

    /// Whether slot `index` is currently occupied.
    #[inline]
    #[must_use]
    pub fn is_occupied(&self, index: u64) -> bool {
        index < self.capacity && self.occupancy.is_set(index as usize)
    }

    /// Reserves a slot, preferring the most recently released one.
    ///
    /// Returns `None` when all `capacity` slots are occupied.
    pub fn reserve(&mut self) -> Option<NonNull<u8>> {
        let index = if let Some(head) = self.free_head {
            // SAFETY: head is a free slot whose link we wrote on release.
            self.free_head = unsafe { read_link(self.slot_ptr(head)) };
            head
        } else if self.high_water_mark < self.capacity {
            let index = self.high_water_mark as usize;
            self.high_water_mark += 1;
            index
        } else {
            return None;
        };

        let newly_set = self.occupancy.set(index);
        debug_assert!(newly_set, "free chain handed out an occupied slot");
        self.occupied_count += 1;
        Some(self.slot_ptr(index))
    }

    /// Reserves a slot and copies `data` into it.
    ///
    /// Returns `None` when full; nothing is copied in that case.
    ///
    /// # Panics
    ///
    /// Panics if `data.len() != element_size`.
    pub fn add(&mut self, data: &[u8]) -> Option<NonNull<u8>> {
        assert_eq!(data.len(), self.element_size, "element size mismatch");
        let slot = self.reserve()?;
        // SAFETY: the slot has slot_size >= element_size bytes and is
        // disjoint from `data`, which the caller borrows elsewhere.
        unsafe { copy_bytes(slot.as_ptr(), data.as_ptr(), data.len()) };
        Some(slot)
    }

    /// [`SlotAllocator::add`] for a plain-old-data value.
    ///
    /// # Panics
    ///
    /// Panics if `size_of::<T>() != element_size`.
    pub fn add_pod<T: Pod>(&mut self, value: &T) -> Option<NonNull<u8>> {
        self.add(bytemuck::bytes_of(value))
    }

    fn release_index(&mut self, index: usize) -> MemoryResult<()> {
        if !self.occupancy.clear(index) {
            return Err(MemoryError::DoubleRelease { index: index as u64 });
        }
        // SAFETY: the slot was occupied until now and nobody else may use it.
        unsafe { write_link(self.slot_ptr(index), self.free_head) };
        self.free_head = Some(index);
        self.occupied_count -= 1;
        Ok(())
    }

    /// Releases the slot at `address` onto the head of the free chain.
    ///
    /// # Errors
    ///
    /// `OutOfBounds`, `MisalignedAddress`, or `DoubleRelease` if the slot is
    /// not occupied. The allocator is unchanged on error.
    pub fn release(&mut self, address: NonNull<u8>) -> MemoryResult<()> {
        let index = self.index_of(address)?;
        self.release_index(index as usize)
    }

    /// Releases slot `index`.
    ///
    /// # Errors
    ///
    /// `OutOfBounds` or `DoubleRelease`.
    pub fn release_by_index(&mut self, index: u64) -> MemoryResult<()> {
        if index >= self.capacity {
            return Err(MemoryError::OutOfBounds {
                index,
                capacity: self.capacity,
            });
        }
        self.release_index(index as usize)
    }

    /// Element bytes of an occupied slot.
    #[must_use]
    pub fn slot(&self, index: u64) -> Option<&[u8]> {
        if !self.is_occupied(index) {
            return None;
        }
        // SAFETY: occupied slot inside storage; element bytes were reserved
        // for the caller and &self prevents concurrent release.
        Some(unsafe { std::slice::from_raw_parts(self.slot_ptr(index as usize).as_ptr(), self.element_size) })
    }

    /// Mutable element bytes of an occupied slot.
    pub fn slot_mut(&mut self, index: u64) -> Option<&mut [u8]> {
        if !self.is_occupied(index) {
            return None;
        }
        // SAFETY: as in `slot`, with exclusive access through &mut self.
        Some(unsafe {
            std::slice::from_raw_parts_mut(self.slot_ptr(index as usize).as_ptr(), self.element_size)
        })
    }

    /// Iterates over occupied slot indices in ascending order.
    pub fn occupied_indices(&self) -> impl Iterator<Item = u64> + '_ {
        self.occupancy.iter_set().map(|index| index as u64)
    }

    /// Releases every slot and forgets the high-water mark.
    pub fn reset(&mut self) {
        self.occupancy.clear_all();
        self.high_water_mark = 0;
        self.occupied_count = 0;
        self.free_head = None;
    }
}

// SAFETY: The allocator owns its heap storage, or holds the only mutable
// borrow of the arena it was carved from.
unsafe impl Send for SlotAllocator<'_> {}
