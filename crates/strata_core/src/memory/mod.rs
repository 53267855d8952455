//! # Memory Management
//!
//! Pre-allocated memory pools and arenas with flat, predictable latency.
//!
//! ## Layers
//!
//! ```text
//! BlockPool ──borrow──> Block ──view──> Arena ──carve──> SlotAllocator
//!                                                    └──> GenSlotAllocator
//! ```
//!
//! Every layer can also stand alone: arenas and slot allocators can own
//! heap memory directly. [`TypedPool`] sits beside them for callers that
//! want typed objects rather than raw bytes.
//!
//! Nothing here is thread-safe. Each structure is owned by one thread or
//! guarded by a lock its owner chooses.

pub mod align;
mod arena;
mod block_pool;
mod copy;
mod generational;
mod handle;
mod occupancy;
mod pool;
mod region;
mod slots;
mod storage;

pub use align::{align_up, ALIGNMENT, POINTER_WIDTH};
pub use arena::{Arena, ArenaMark};
pub use block_pool::{Block, BlockClass, BlockPool, ClassStats, PoolStats, HEADER_SIZE};
pub use copy::{copy_path, CopyPath};
pub use generational::GenSlotAllocator;
pub use handle::Handle;
pub use pool::TypedPool;
pub use region::AlignedRegion;
pub use slots::{slot_size_for, SlotAllocator};
