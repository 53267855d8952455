//! Backing memory for slot allocators.

// SAFETY: Free-chain links are read and written inside slot bytes.
#![allow(unsafe_code)]

use std::ptr::NonNull;

use super::align::POINTER_WIDTH;
use super::arena::Arena;
use super::region::AlignedRegion;
use crate::error::MemoryResult;

/// Link value meaning "end of the free chain".
const CHAIN_END: usize = usize::MAX;

/// Regions carved for one allocator, in request order.
pub(crate) struct Carved {
    pub(crate) regions: Vec<NonNull<u8>>,
    /// Heap regions to keep alive; empty when carved from an arena.
    pub(crate) owned: Vec<AlignedRegion>,
}

/// Carves one aligned, zero-filled region per entry of `sizes`, from `arena`
/// if given, otherwise from the heap.
///
/// All-or-nothing: if any carve fails the arena is rewound to where it was
/// and any heap regions already taken are freed.
pub(crate) fn carve(arena: Option<&mut Arena<'_>>, sizes: &[usize]) -> MemoryResult<Carved> {
    let mut carved = Carved {
        regions: Vec::with_capacity(sizes.len()),
        owned: Vec::new(),
    };

    match arena {
        Some(arena) => {
            let mark = arena.mark();
            for &size in sizes {
                match arena.try_push(size, None) {
                    Ok(ptr) => {
                        // SAFETY: the push reserved at least `size` bytes at ptr.
                        unsafe { std::ptr::write_bytes(ptr.as_ptr(), 0, size) };
                        carved.regions.push(ptr);
                    }
                    Err(e) => {
                        tracing::debug!(
                            "slot storage: carve of {size} bytes failed ({e}), rolling arena back"
                        );
                        arena.rewind(mark)?;
                        return Err(e);
                    }
                }
            }
        }
        None => {
            for &size in sizes {
                let region = AlignedRegion::allocate_zeroed(size)?;
                carved.regions.push(region.as_ptr());
                carved.owned.push(region);
            }
        }
    }

    Ok(carved)
}

/// Reads the free-chain link stored in a free slot.
///
/// # Safety
///
/// `slot` must point at a free slot of at least [`POINTER_WIDTH`] bytes
/// whose link was written by [`write_link`].
#[inline]
pub(crate) unsafe fn read_link(slot: NonNull<u8>) -> Option<usize> {
    let next = slot.as_ptr().cast::<usize>().read_unaligned();
    (next != CHAIN_END).then_some(next)
}

/// Writes a free-chain link into the first word of a slot.
///
/// # Safety
///
/// `slot` must point at a slot of at least [`POINTER_WIDTH`] bytes that is
/// not occupied.
#[inline]
pub(crate) unsafe fn write_link(slot: NonNull<u8>, next: Option<usize>) {
    const _: () = assert!(POINTER_WIDTH == std::mem::size_of::<usize>());
    slot.as_ptr().cast::<usize>().write_unaligned(next.unwrap_or(CHAIN_END));
}
