//! # Generational Slot Allocator
//!
//! A slot allocator whose slots carry a generation counter, so index-based
//! references can be checked for staleness.
//!
//! ## Slot Lifecycle
//!
//! ```text
//! Unused --promote--> Free(0) --reserve--> Occupied(0) --release--> Free(1)
//!                                 ^                                    |
//!                                 +------------- reserve --------------+
//! ```
//!
//! Reserving never touches the generation; every release bumps it by one,
//! which invalidates every handle issued before that release.
//!
//! Counts and capacity are 32-bit here (64-bit in [`super::SlotAllocator`])
//! so that a handle's index and generation pack into one u64.

// SAFETY: Slots and generations live in raw storage owned (or borrowed) by
// the allocator.
#![allow(unsafe_code)]

use std::marker::PhantomData;
use std::ptr::NonNull;

use bytemuck::Pod;

use super::arena::Arena;
use super::copy::copy_bytes;
use super::handle::Handle;
use super::occupancy::{words_for, OccupancyBits};
use super::region::AlignedRegion;
use super::slots::slot_size_for;
use super::storage::{carve, read_link, write_link};
use crate::error::{MemoryError, MemoryResult};

/// Slot allocator with per-slot generations and stale-handle detection.
///
/// # Thread Safety
///
/// NOT thread-safe. Wrap it in a caller-owned mutex to share it.
///
/// # Example
///
/// ```rust,ignore
/// let mut textures = GenSlotAllocator::new(256, size_of::<TextureInfo>())?;
/// let (handle, _) = textures.add_pod(&info).ok_or(Full)?;
///
/// textures.release_handle(handle)?;
/// assert!(textures.validated_address(handle).is_none());
/// ```
pub struct GenSlotAllocator<'a> {
    capacity: u32,
    high_water_mark: u32,
    occupied_count: u32,
    element_size: usize,
    slot_size: usize,
    storage: NonNull<u8>,
    generations: NonNull<u32>,
    free_head: Option<usize>,
    occupancy: OccupancyBits,
    _owned: Vec<AlignedRegion>,
    _region: PhantomData<&'a mut [u8]>,
}

impl GenSlotAllocator<'static> {
    /// Creates an allocator whose storage lives on the heap.
    ///
    /// # Errors
    ///
    /// `InvalidCapacity`, `InvalidElementSize`, `CapacityOverflow` or
    /// `AllocationFailed`.
    pub fn new(capacity: u32, element_size: usize) -> MemoryResult<Self> {
        Self::build(None, capacity, element_size)
    }
}

impl<'a> GenSlotAllocator<'a> {
    /// Creates an allocator whose storage and generation table are pushed
    /// onto `arena`, rolling the arena back if either does not fit.
    ///
    /// # Errors
    ///
    /// As [`GenSlotAllocator::new`], plus `OutOfMemory` from the arena.
    pub fn new_in(arena: &'a mut Arena<'_>, capacity: u32, element_size: usize) -> MemoryResult<Self> {
        Self::build(Some(arena), capacity, element_size)
    }

    fn build(arena: Option<&mut Arena<'_>>, capacity: u32, element_size: usize) -> MemoryResult<Self> {
        if capacity == 0 {
            return Err(MemoryError::InvalidCapacity);
        }
        if element_size == 0 {
            return Err(MemoryError::InvalidElementSize);
        }
        let slot_size = slot_size_for(element_size);
        let count = capacity as usize;
        let storage_bytes = count
            .checked_mul(slot_size)
            .ok_or(MemoryError::CapacityOverflow)?;
        let generation_bytes = count * std::mem::size_of::<u32>();
        let word_count = words_for(count);

        let carved = carve(
            arena,
            &[storage_bytes, generation_bytes, word_count * std::mem::size_of::<u64>()],
        )?;
        let storage = carved.regions[0];
        let generations = carved.regions[1].cast::<u32>();
        // SAFETY: the third region holds exactly word_count aligned u64 words
        // and belongs to this allocator alone.
        let occupancy = unsafe { OccupancyBits::new(carved.regions[2].cast::<u64>(), word_count) };

        tracing::trace!(
            "generational slot allocator: {capacity} x {slot_size}B slots (element {element_size}B)"
        );

        Ok(Self {
            capacity,
            high_water_mark: 0,
            occupied_count: 0,
            element_size,
            slot_size,
            storage,
            generations,
            free_head: None,
            occupancy,
            _owned: carved.owned,
            _region: PhantomData,
        })
    }

    /// Maximum number of slots.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Number of slots ever promoted from unused capacity.
    #[inline]
    #[must_use]
    pub const fn high_water_mark(&self) -> u32 {
        self.high_water_mark
    }

    /// Number of currently occupied slots.
    #[inline]
    #[must_use]
    pub const fn occupied_count(&self) -> u32 {
        self.occupied_count
    }

    /// Number of slots `reserve` can still hand out.
    #[inline]
    #[must_use]
    pub const fn free_count(&self) -> u32 {
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

    /// Internal slot stride.
    #[inline]
    #[must_use]
    pub const fn slot_size(&self) -> usize {
        self.slot_size
    }

    #[inline]
    fn slot_ptr(&self, index: usize) -> NonNull<u8> {
        debug_assert!(index < self.capacity as usize);
        // SAFETY: index < capacity, so the slot lies inside storage.
        unsafe { NonNull::new_unchecked(self.storage.as_ptr().add(index * self.slot_size)) }
    }

    #[inline]
    fn generation_ptr(&self, index: usize) -> *mut u32 {
        debug_assert!(index < self.capacity as usize);
        // SAFETY: the generation table has `capacity` entries.
        unsafe { self.generations.as_ptr().add(index) }
    }

    /// Current generation of slot `index`, or `None` if the slot has never
    /// been promoted.
    #[must_use]
    pub fn generation(&self, index: u32) -> Option<u32> {
        if index >= self.high_water_mark {
            return None;
        }
        // SAFETY: promoted slots have an initialized generation.
        Some(unsafe { *self.generation_ptr(index as usize) })
    }

    /// Handle for the slot's current generation, if it is occupied.
    #[must_use]
    pub fn handle_at(&self, index: u32) -> Option<Handle> {
        if !self.is_occupied(index) {
            return None;
        }
        self.generation(index).map(|generation| Handle::new(index, generation))
    }

    /// Whether slot `index` is currently occupied.
    #[inline]
    #[must_use]
    pub fn is_occupied(&self, index: u32) -> bool {
        index < self.capacity && self.occupancy.is_set(index as usize)
    }

    /// Reserves a slot and returns its handle and address.
    ///
    /// Returns `None` when all `capacity` slots are occupied.
    pub fn reserve(&mut self) -> Option<(Handle, NonNull<u8>)> {
        let index = if let Some(head) = self.free_head {
            // SAFETY: head is a free slot whose link we wrote on release.
            self.free_head = unsafe { read_link(self.slot_ptr(head)) };
            head
        } else if self.high_water_mark < self.capacity {
            let index = self.high_water_mark as usize;
            // SAFETY: first promotion of this slot initializes its generation.
            unsafe { self.generation_ptr(index).write(0) };
            self.high_water_mark += 1;
            index
        } else {
            return None;
        };

        let newly_set = self.occupancy.set(index);
        debug_assert!(newly_set, "free chain handed out an occupied slot");
        self.occupied_count += 1;

        // SAFETY: promoted slot, generation initialized above or earlier.
        let generation = unsafe { *self.generation_ptr(index) };
        Some((Handle::new(index as u32, generation), self.slot_ptr(index)))
    }

    /// Reserves a slot and copies `data` into it.
    ///
    /// # Panics
    ///
    /// Panics if `data.len() != element_size`.
    pub fn add(&mut self, data: &[u8]) -> Option<(Handle, NonNull<u8>)> {
        assert_eq!(data.len(), self.element_size, "element size mismatch");
        let (handle, slot) = self.reserve()?;
        // SAFETY: the slot has slot_size >= element_size bytes and is
        // disjoint from `data`.
        unsafe { copy_bytes(slot.as_ptr(), data.as_ptr(), data.len()) };
        Some((handle, slot))
    }

    /// [`GenSlotAllocator::add`] for a plain-old-data value.
    ///
    /// # Panics
    ///
    /// Panics if `size_of::<T>() != element_size`.
    pub fn add_pod<T: Pod>(&mut self, value: &T) -> Option<(Handle, NonNull<u8>)> {
        self.add(bytemuck::bytes_of(value))
    }

    fn release_index(&mut self, index: usize) -> MemoryResult<()> {
        if !self.occupancy.clear(index) {
            return Err(MemoryError::DoubleRelease { index: index as u64 });
        }
        // SAFETY: the slot was occupied, so it was promoted and its
        // generation is initialized; it is ours to link now.
        unsafe {
            let generation = self.generation_ptr(index);
            *generation = (*generation).wrapping_add(1);
            write_link(self.slot_ptr(index), self.free_head);
        }
        self.free_head = Some(index);
        self.occupied_count -= 1;
        Ok(())
    }

    /// Index of the slot starting at `address`.
    ///
    /// # Errors
    ///
    /// `OutOfBounds` or `MisalignedAddress`.
    pub fn index_of(&self, address: NonNull<u8>) -> MemoryResult<u32> {
        let offset = (address.as_ptr() as usize).wrapping_sub(self.storage.as_ptr() as usize);
        let index = offset / self.slot_size;
        if index >= self.capacity as usize {
            return Err(MemoryError::OutOfBounds {
                index: index as u64,
                capacity: u64::from(self.capacity),
            });
        }
        if offset % self.slot_size != 0 {
            return Err(MemoryError::MisalignedAddress);
        }
        Ok(index as u32)
    }

    /// Releases the slot at `address`, bumping its generation.
    ///
    /// # Errors
    ///
    /// `OutOfBounds`, `MisalignedAddress` or `DoubleRelease`.
    pub fn release(&mut self, address: NonNull<u8>) -> MemoryResult<()> {
        let index = self.index_of(address)?;
        self.release_index(index as usize)
    }

    /// Releases slot `index` without looking at any generation.
    ///
    /// # Errors
    ///
    /// `OutOfBounds` or `DoubleRelease`.
    pub fn release_by_index(&mut self, index: u32) -> MemoryResult<()> {
        if index >= self.capacity {
            return Err(MemoryError::OutOfBounds {
                index: u64::from(index),
                capacity: u64::from(self.capacity),
            });
        }
        self.release_index(index as usize)
    }

    /// Releases the slot `handle` refers to, refusing stale handles.
    ///
    /// # Errors
    ///
    /// `StaleHandle` if the slot was released since the handle was issued,
    /// `OutOfBounds` for an index beyond capacity.
    pub fn release_handle(&mut self, handle: Handle) -> MemoryResult<()> {
        if handle.index >= self.capacity {
            return Err(MemoryError::OutOfBounds {
                index: u64::from(handle.index),
                capacity: u64::from(self.capacity),
            });
        }
        match self.generation(handle.index) {
            Some(current) if current == handle.generation => self.release_index(handle.index as usize),
            current => Err(MemoryError::StaleHandle {
                index: handle.index,
                generation: handle.generation,
                current: current.unwrap_or(0),
            }),
        }
    }

    /// Address of the slot `handle` refers to, if the handle is current.
    ///
    /// This is the check to run before dereferencing a handle.
    #[inline]
    #[must_use]
    pub fn validated_address(&self, handle: Handle) -> Option<NonNull<u8>> {
        (self.generation(handle.index)? == handle.generation).then(|| self.slot_ptr(handle.index as usize))
    }

    /// Address of the slot `handle` names, ignoring its generation.
    ///
    /// Only for callers that have guaranteed freshness some other way.
    ///
    /// # Panics
    ///
    /// Panics if the index is beyond capacity.
    #[inline]
    #[must_use]
    pub fn address_of(&self, handle: Handle) -> NonNull<u8> {
        assert!(handle.index < self.capacity, "slot index {} out of bounds", handle.index);
        self.slot_ptr(handle.index as usize)
    }

    /// Whether `handle` is current.
    #[inline]
    #[must_use]
    pub fn is_valid(&self, handle: Handle) -> bool {
        self.validated_address(handle).is_some()
    }

    /// Element bytes behind a current handle to an occupied slot.
    #[must_use]
    pub fn get(&self, handle: Handle) -> Option<&[u8]> {
        let ptr = self.validated_address(handle)?;
        if !self.is_occupied(handle.index) {
            return None;
        }
        // SAFETY: occupied slot inside storage, &self prevents release.
        Some(unsafe { std::slice::from_raw_parts(ptr.as_ptr(), self.element_size) })
    }

    /// Mutable element bytes behind a current handle to an occupied slot.
    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut [u8]> {
        let ptr = self.validated_address(handle)?;
        if !self.is_occupied(handle.index) {
            return None;
        }
        // SAFETY: as in `get`, with exclusive access through &mut self.
        Some(unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), self.element_size) })
    }

    /// Iterates over handles of occupied slots in index order.
    pub fn handles(&self) -> impl Iterator<Item = Handle> + '_ {
        self.occupancy
            .iter_set()
            .filter_map(move |index| self.handle_at(index as u32))
    }

    #[cfg(test)]
    fn force_generation(&mut self, index: u32, generation: u32) {
        assert!(index < self.high_water_mark);
        unsafe { *self.generation_ptr(index as usize) = generation };
    }
}

// SAFETY: The allocator owns its heap storage, or holds the only mutable
// borrow of the arena it was carved from.
unsafe impl Send for GenSlotAllocator<'_> {}
