//! # Memory Error Types
//!
//! All errors that can occur in the memory substrate.
//!
//! Capacity exhaustion of a slot allocator is NOT an error: it is reported
//! as `None` and the caller decides what to do. Everything here is either a
//! resource failure or a caller contract violation caught before any state
//! was mutated.

use thiserror::Error;

use crate::memory::BlockClass;

/// Errors that can occur in the memory substrate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// The system allocator refused a request.
    #[error("allocation of {size} bytes aligned to {align} failed")]
    AllocationFailed {
        /// Requested size in bytes.
        size: usize,
        /// Requested alignment in bytes.
        align: usize,
    },

    /// A zero-byte region was requested.
    #[error("zero-sized region requested")]
    ZeroSized,

    /// A size computation overflowed `usize`.
    #[error("capacity computation overflowed")]
    CapacityOverflow,

    /// Capacity must be at least one slot.
    #[error("capacity must be greater than zero")]
    InvalidCapacity,

    /// Element size must be at least one byte.
    #[error("element size must be greater than zero")]
    InvalidElementSize,

    /// An arena push did not fit in the remaining bytes.
    #[error("arena exhausted: requested {requested} bytes, {remaining} remaining")]
    OutOfMemory {
        /// Bytes the push needed (after rounding).
        requested: usize,
        /// Bytes left in the arena.
        remaining: usize,
    },

    /// An arena pop released more than was ever pushed.
    #[error("arena underflow: popping {requested} bytes with only {used} in use")]
    Underflow {
        /// Bytes the pop tried to release (after rounding).
        requested: usize,
        /// Bytes currently in use.
        used: usize,
    },

    /// An arena view does not describe an aligned range inside its block.
    #[error("invalid arena view: offset {offset} size {size} in a {payload}-byte block")]
    InvalidView {
        /// Requested start offset.
        offset: usize,
        /// Requested view size.
        size: usize,
        /// Payload size of the block.
        payload: usize,
    },

    /// A copy source was shorter than the requested size.
    #[error("copy source too short: need {needed} bytes, got {provided}")]
    ShortSource {
        /// Bytes the push copies.
        needed: usize,
        /// Bytes the source provided.
        provided: usize,
    },

    /// The aligned copy path was given a misaligned source.
    #[error("copy source is not aligned to the substrate alignment")]
    MisalignedSource,

    /// The aligned copy path found the arena top misaligned by a packed push.
    #[error("arena top is not aligned to the substrate alignment")]
    MisalignedDestination,

    /// `free` was called on an arena that views memory it does not own.
    #[error("arena does not own its memory")]
    NotOwned,

    /// A mark was rewound after the arena had already moved below it.
    #[error("arena mark is ahead of the current stack pointer")]
    InvalidRewind,

    /// A slot index was beyond the allocator capacity.
    #[error("slot index {index} out of bounds (capacity {capacity})")]
    OutOfBounds {
        /// Offending index.
        index: u64,
        /// Allocator capacity.
        capacity: u64,
    },

    /// An address does not point at the start of a slot.
    #[error("address is not the start of a slot")]
    MisalignedAddress,

    /// A slot that is not occupied was released.
    #[error("slot {index} released while not occupied")]
    DoubleRelease {
        /// Offending index.
        index: u64,
    },

    /// A handle refers to a slot that has been released since it was issued.
    #[error("stale handle: slot {index} is at generation {current}, handle has {generation}")]
    StaleHandle {
        /// Slot index.
        index: u32,
        /// Generation carried by the handle.
        generation: u32,
        /// Current generation of the slot.
        current: u32,
    },

    /// A block was returned to a pool that did not lend it.
    #[error("block belongs to a different pool")]
    ForeignBlock,

    /// A released chain mixed small and large blocks.
    #[error("block chain mixes {expected:?} and {found:?} blocks")]
    MixedBlockClasses {
        /// Class of the chain head.
        expected: BlockClass,
        /// Class found further down the chain.
        found: BlockClass,
    },

    /// Pool teardown found blocks that were never returned.
    #[error("pool destroyed with blocks in use: {small} small, {large} large")]
    BlocksInUse {
        /// Small blocks still borrowed.
        small: usize,
        /// Large blocks still borrowed.
        large: usize,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for memory operations.
pub type MemoryResult<T> = Result<T, MemoryError>;
