//! # Occupancy Bitset
//!
//! One bit per slot: 1 = occupied, 0 = free or never promoted.
//! At 64 slots per u64, tracking 1M slots costs ~122KB.
//!
//! The words live in memory owned by the slot allocator (heap or arena), so
//! the bitset only borrows them through a raw pointer.

// SAFETY: The bitset reads and writes words owned by its allocator.
#![allow(unsafe_code)]

use std::ptr::NonNull;

/// Number of u64 words needed to track `capacity` slots.
#[inline]
#[must_use]
pub(crate) const fn words_for(capacity: usize) -> usize {
    (capacity + 63) / 64
}

/// Occupancy bitset over externally owned words.
pub(crate) struct OccupancyBits {
    words: NonNull<u64>,
    word_count: usize,
}

impl OccupancyBits {
    /// Wraps `word_count` words at `words` and clears them.
    ///
    /// # Safety
    ///
    /// `words` must be valid, u64-aligned and exclusively owned by the
    /// returned bitset's owner for `word_count` words.
    pub(crate) unsafe fn new(words: NonNull<u64>, word_count: usize) -> Self {
        std::ptr::write_bytes(words.as_ptr(), 0, word_count);
        Self { words, word_count }
    }

    #[inline]
    fn split(index: usize) -> (usize, u64) {
        (index / 64, 1u64 << (index % 64))
    }

    #[inline]
    fn word(&self, word: usize) -> u64 {
        debug_assert!(word < self.word_count, "occupancy word out of bounds");
        // SAFETY: word < word_count, checked by every caller via slot bounds.
        unsafe { *self.words.as_ptr().add(word) }
    }

    #[inline]
    fn word_mut(&mut self, word: usize) -> &mut u64 {
        debug_assert!(word < self.word_count, "occupancy word out of bounds");
        // SAFETY: as in `word`, and &mut self gives exclusive access.
        unsafe { &mut *self.words.as_ptr().add(word) }
    }

    /// Checks whether a slot is occupied.
    #[inline]
    pub(crate) fn is_set(&self, index: usize) -> bool {
        let (word, mask) = Self::split(index);
        self.word(word) & mask != 0
    }

    /// Marks a slot occupied. Returns `false` if it already was.
    #[inline]
    pub(crate) fn set(&mut self, index: usize) -> bool {
        let (word, mask) = Self::split(index);
        let slot = self.word_mut(word);
        let was_clear = *slot & mask == 0;
        *slot |= mask;
        was_clear
    }

    /// Marks a slot free. Returns `false` if it already was.
    #[inline]
    pub(crate) fn clear(&mut self, index: usize) -> bool {
        let (word, mask) = Self::split(index);
        let slot = self.word_mut(word);
        let was_set = *slot & mask != 0;
        *slot &= !mask;
        was_set
    }

    /// Clears every bit.
    ///
    /// O(n/64) where n = capacity.
    pub(crate) fn clear_all(&mut self) {
        // SAFETY: the words are owned for word_count words, see `new`.
        unsafe { std::ptr::write_bytes(self.words.as_ptr(), 0, self.word_count) };
    }

    /// Iterates over occupied slot indices, skipping empty words.
    pub(crate) fn iter_set(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.word_count).flat_map(move |word_idx| {
            let mut current = self.word(word_idx);
            std::iter::from_fn(move || {
                if current == 0 {
                    return None;
                }
                let bit = current.trailing_zeros() as usize;
                current &= current - 1;
                Some(word_idx * 64 + bit)
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bits(words: &mut [u64]) -> OccupancyBits {
        let len = words.len();
        unsafe { OccupancyBits::new(NonNull::new(words.as_mut_ptr()).unwrap(), len) }
    }

    #[test]
    fn test_words_for() {
        assert_eq!(words_for(1), 1);
        assert_eq!(words_for(64), 1);
        assert_eq!(words_for(65), 2);
    }

    #[test]
    fn test_set_and_clear() {
        let mut storage = [u64::MAX; 2];
        let mut occupancy = bits(&mut storage);
        assert!(!occupancy.is_set(70));

        assert!(occupancy.set(70));
        assert!(!occupancy.set(70));
        assert!(occupancy.is_set(70));

        assert!(occupancy.clear(70));
        assert!(!occupancy.clear(70));
    }

    #[test]
    fn test_iter_set() {
        let mut storage = [0u64; 2];
        let mut occupancy = bits(&mut storage);
        for index in [3, 63, 64, 100] {
            occupancy.set(index);
        }
        assert_eq!(occupancy.iter_set().collect::<Vec<_>>(), vec![3, 63, 64, 100]);
    }
}
