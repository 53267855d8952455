//! # STRATA Core
//!
//! Memory substrate for engine subsystems that need predictable,
//! allocation-free hot paths:
//! - A two-class block pool (64K / 16M nominal blocks) that grows in batches
//! - Bump-pointer arenas, standalone or as views over borrowed blocks
//! - Fixed-capacity slot allocators with O(1) reserve and release
//! - Generation-checked handles that detect use after release
//!
//! ## Architecture Rules
//!
//! 1. **Allocate up front** - pools and arenas are sized at startup
//! 2. **Single owner** - no structure locks internally; callers synchronize
//! 3. **Errors are values** - contract violations come back as [`MemoryError`]
//!    before any state changes; only the fatal-by-default wrappers panic
//!
//! ## Example
//!
//! ```rust,ignore
//! use strata_core::{Arena, BlockClass, BlockPool, SlotAllocator};
//!
//! let pool = BlockPool::new(4, 1);
//! let mut block = pool.borrow(BlockClass::Small);
//! let mut arena = Arena::from_block(&mut block);
//! let mut slots = SlotAllocator::new_in(&mut arena, 128, 24)?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod error;
pub mod memory;

pub use config::{PoolConfig, SubstrateConfig};
pub use error::{MemoryError, MemoryResult};
pub use memory::{
    AlignedRegion, Arena, ArenaMark, Block, BlockClass, BlockPool, ClassStats, GenSlotAllocator,
    Handle, PoolStats, SlotAllocator, TypedPool, ALIGNMENT,
};
