//! # Typed Pool
//!
//! Fixed-capacity pool of typed objects addressed by generational handles.
//!
//! Each slot is a tagged union: it either holds a value or a link in the
//! free chain. Both states carry the slot's generation, so a handle to a
//! removed object stops resolving as soon as it is removed.

use super::handle::Handle;

/// One pool slot.
enum Slot<T> {
    Occupied { value: T, generation: u32 },
    Free { next: Option<u32>, generation: u32 },
}

impl<T> Slot<T> {
    #[inline]
    const fn generation(&self) -> u32 {
        match self {
            Self::Occupied { generation, .. } | Self::Free { generation, .. } => *generation,
        }
    }
}

/// A pool allocator for typed objects.
///
/// Storage grows up to `capacity` on demand and is never shrunk; removed
/// slots are reused most-recently-freed first.
///
/// # Thread Safety
///
/// This pool is NOT thread-safe. Use one pool per thread or wrap in a mutex.
///
/// # Example
///
/// ```rust,ignore
/// struct Particle { x: f32, y: f32, life: f32 }
///
/// let mut pool: TypedPool<Particle> = TypedPool::new(10000);
///
/// let handle = pool.insert(Particle { x: 0.0, y: 0.0, life: 1.0 })?;
/// pool.remove(handle);
/// assert!(pool.get(handle).is_none());
/// ```
pub struct TypedPool<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
    len: u32,
    capacity: u32,
}

impl<T> TypedPool<T> {
    /// Creates a pool for up to `capacity` objects.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero or `u32::MAX` (the null handle index).
    #[must_use]
    pub fn new(capacity: u32) -> Self {
        assert!(capacity > 0, "Capacity must be greater than zero");
        assert!(capacity < u32::MAX, "Capacity must leave room for the null handle");

        Self {
            slots: Vec::with_capacity(capacity as usize),
            free_head: None,
            len: 0,
            capacity,
        }
    }

    /// Returns the total capacity.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Returns the number of live objects.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> u32 {
        self.len
    }

    /// Returns `true` if the pool holds no objects.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Stores `value` and returns its handle, or `None` if the pool is full.
    pub fn insert(&mut self, value: T) -> Option<Handle> {
        let index = match self.free_head {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                let Slot::Free { next, generation } = *slot else {
                    unreachable!("free chain points at an occupied slot");
                };
                self.free_head = next;
                *slot = Slot::Occupied { value, generation };
                index
            }
            None if self.slots.len() < self.capacity as usize => {
                self.slots.push(Slot::Occupied { value, generation: 0 });
                (self.slots.len() - 1) as u32
            }
            None => return None,
        };

        self.len += 1;
        Some(Handle::new(index, self.slots[index as usize].generation()))
    }

    /// Removes and returns the object `handle` refers to.
    ///
    /// Returns `None` for stale, null or never-issued handles.
    pub fn remove(&mut self, handle: Handle) -> Option<T> {
        if !self.contains(handle) {
            return None;
        }
        let slot = &mut self.slots[handle.index as usize];
        let freed = Slot::Free {
            next: self.free_head,
            generation: handle.generation.wrapping_add(1),
        };
        let Slot::Occupied { value, .. } = std::mem::replace(slot, freed) else {
            unreachable!("contains() checked occupancy");
        };
        self.free_head = Some(handle.index);
        self.len -= 1;
        Some(value)
    }

    /// Checks whether `handle` refers to a live object.
    #[inline]
    #[must_use]
    pub fn contains(&self, handle: Handle) -> bool {
        matches!(
            self.slots.get(handle.index as usize),
            Some(Slot::Occupied { generation, .. }) if *generation == handle.generation
        )
    }

    /// Gets a reference to the object `handle` refers to.
    #[inline]
    #[must_use]
    pub fn get(&self, handle: Handle) -> Option<&T> {
        match self.slots.get(handle.index as usize)? {
            Slot::Occupied { value, generation } if *generation == handle.generation => Some(value),
            _ => None,
        }
    }

    /// Gets a mutable reference to the object `handle` refers to.
    #[inline]
    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        match self.slots.get_mut(handle.index as usize)? {
            Slot::Occupied { value, generation } if *generation == handle.generation => Some(value),
            _ => None,
        }
    }

    /// Removes every object, invalidating all outstanding handles.
    ///
    /// Storage is kept.
    pub fn clear(&mut self) {
        let mut next = None;
        for (index, slot) in self.slots.iter_mut().enumerate().rev() {
            let generation = match slot {
                Slot::Occupied { generation, .. } => generation.wrapping_add(1),
                Slot::Free { generation, .. } => *generation,
            };
            *slot = Slot::Free { next, generation };
            next = Some(index as u32);
        }
        self.free_head = next;
        self.len = 0;
    }

    /// Iterates over all live objects in index order.
    pub fn iter(&self) -> impl Iterator<Item = (Handle, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| match slot {
            Slot::Occupied { value, generation } => Some((Handle::new(index as u32, *generation), value)),
            Slot::Free { .. } => None,
        })
    }

    /// Iterates mutably over all live objects in index order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Handle, &mut T)> {
        self.slots.iter_mut().enumerate().filter_map(|(index, slot)| match slot {
            Slot::Occupied { value, generation } => Some((Handle::new(index as u32, *generation), value)),
            Slot::Free { .. } => None,
        })
    }
}
