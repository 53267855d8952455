//! # Block Pool
//!
//! Lends and reclaims fixed-size, aligned blocks of two classes without
//! per-block heap traffic.
//!
//! ## Layout
//!
//! ```text
//! batch (one AlignedRegion):
//! [Header|Payload........][Header|Payload........] ... x granularity
//!  ^ ALIGNMENT  ^ ALIGNMENT
//! ```
//!
//! Free blocks are threaded through their headers into one intrusive list per
//! class. Growing allocates one more batch; batches are only freed when the
//! pool itself goes away.

// SAFETY: Block headers are written into raw batch memory and linked by
// pointer. Every dereference targets a header inside a batch this pool owns.
#![allow(unsafe_code)]

use std::cell::RefCell;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};

use super::align::{align_up, is_aligned};
use super::region::AlignedRegion;
use crate::config::{PoolConfig, DEFAULT_LARGE_BLOCK_SIZE, DEFAULT_SMALL_BLOCK_SIZE};
use crate::error::{MemoryError, MemoryResult};

static NEXT_POOL_ID: AtomicU32 = AtomicU32::new(1);

/// Size class of a block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlockClass {
    /// Nominal "64K" block.
    Small,
    /// Nominal "16M" block.
    Large,
}

impl BlockClass {
    /// Both classes, small first.
    pub const ALL: [Self; 2] = [Self::Small, Self::Large];

    #[inline]
    const fn index(self) -> usize {
        match self {
            Self::Small => 0,
            Self::Large => 1,
        }
    }
}

#[repr(C)]
struct BlockHeader {
    next: Option<NonNull<BlockHeader>>,
    payload_size: usize,
    pool_id: u32,
    class: BlockClass,
}

/// Bytes reserved in front of every payload for the block header.
pub const HEADER_SIZE: usize = match align_up(std::mem::size_of::<BlockHeader>()) {
    Some(size) => size,
    None => panic!("block header size overflow"),
};

/// A borrowed block, or the head of a chain of borrowed blocks.
///
/// Blocks are move-only: releasing one consumes it, so a block cannot be
/// released twice. Dropping a block without releasing it leaks it from the
/// pool's accounting, which [`BlockPool::destroy`] reports.
pub struct Block<'pool> {
    header: NonNull<BlockHeader>,
    _pool: PhantomData<&'pool BlockPool>,
}

impl<'pool> Block<'pool> {
    #[inline]
    fn header(&self) -> &BlockHeader {
        // SAFETY: header points into a live batch for 'pool.
        unsafe { self.header.as_ref() }
    }

    /// Class of this block.
    #[inline]
    #[must_use]
    pub fn class(&self) -> BlockClass {
        self.header().class
    }

    /// Payload size in bytes.
    #[inline]
    #[must_use]
    pub fn payload_size(&self) -> usize {
        self.header().payload_size
    }

    /// Start of the payload, aligned to [`super::ALIGNMENT`].
    #[inline]
    #[must_use]
    pub fn payload_ptr(&self) -> NonNull<u8> {
        // SAFETY: the payload directly follows the header inside the batch.
        unsafe { NonNull::new_unchecked(self.header.as_ptr().cast::<u8>().add(HEADER_SIZE)) }
    }

    /// The payload as bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: batches are zero-initialized and this block is exclusively ours.
        unsafe { std::slice::from_raw_parts(self.payload_ptr().as_ptr(), self.payload_size()) }
    }

    /// The payload as mutable bytes.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: as in `as_bytes`, with exclusive access through &mut self.
        unsafe { std::slice::from_raw_parts_mut(self.payload_ptr().as_ptr(), self.payload_size()) }
    }

    /// Attaches `tail` (and whatever follows it) at the end of this chain.
    pub fn append(&mut self, tail: Block<'pool>) {
        let mut last = self.header;
        // SAFETY: every link in a chain points at a header owned by this chain.
        unsafe {
            while let Some(next) = last.as_ref().next {
                last = next;
            }
            last.as_mut().next = Some(tail.header);
        }
    }

    /// Detaches and returns the rest of the chain after this block.
    pub fn take_next(&mut self) -> Option<Block<'pool>> {
        // SAFETY: the header is exclusively owned through &mut self.
        let next = unsafe { self.header.as_mut().next.take() }?;
        Some(Block {
            header: next,
            _pool: PhantomData,
        })
    }

    /// Number of blocks in the chain starting here.
    #[must_use]
    pub fn chain_len(&self) -> usize {
        let mut len = 1;
        let mut cursor = self.header().next;
        while let Some(next) = cursor {
            len += 1;
            // SAFETY: chain links point at headers in live batches.
            cursor = unsafe { next.as_ref().next };
        }
        len
    }
}

/// Counters for one block class.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClassStats {
    /// Payload bytes per block.
    pub block_size: usize,
    /// Blocks on the free list.
    pub free: usize,
    /// Blocks currently borrowed.
    pub in_use: usize,
    /// Blocks ever allocated (`free + in_use`).
    pub total: usize,
    /// Growth batches allocated.
    pub batches: usize,
}

/// Counters for both block classes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Small block counters.
    pub small: ClassStats,
    /// Large block counters.
    pub large: ClassStats,
}

struct ClassState {
    payload_size: usize,
    granularity: usize,
    free_head: Option<NonNull<BlockHeader>>,
    free: usize,
    in_use: usize,
    batches: Vec<AlignedRegion>,
}

impl ClassState {
    fn new(payload_size: usize, granularity: usize) -> Self {
        Self {
            payload_size,
            granularity,
            free_head: None,
            free: 0,
            in_use: 0,
            batches: Vec::new(),
        }
    }

    /// Allocates one batch of `granularity` blocks and pushes them on the
    /// free list, first block of the batch on top.
    fn grow(&mut self, class: BlockClass, pool_id: u32) -> MemoryResult<()> {
        let stride = HEADER_SIZE
            .checked_add(self.payload_size)
            .ok_or(MemoryError::CapacityOverflow)?;
        let bytes = stride
            .checked_mul(self.granularity)
            .ok_or(MemoryError::CapacityOverflow)?;
        let region = AlignedRegion::allocate_zeroed(bytes)?;
        let base = region.as_ptr().as_ptr();

        for i in (0..self.granularity).rev() {
            // SAFETY: i * stride + stride <= bytes, and stride keeps every
            // header on an ALIGNMENT boundary.
            unsafe {
                let header = base.add(i * stride).cast::<BlockHeader>();
                assert!(
                    is_aligned(header.cast::<u8>()) && is_aligned(header.cast::<u8>().add(HEADER_SIZE)),
                    "block {i} of batch is misaligned"
                );
                header.write(BlockHeader {
                    next: self.free_head,
                    payload_size: self.payload_size,
                    pool_id,
                    class,
                });
                self.free_head = Some(NonNull::new_unchecked(header));
            }
        }

        self.free += self.granularity;
        self.batches.push(region);

        tracing::debug!(
            "block pool {pool_id}: grew {class:?} by {} blocks ({bytes} bytes, batch {})",
            self.granularity,
            self.batches.len()
        );
        Ok(())
    }

    fn stats(&self) -> ClassStats {
        ClassStats {
            block_size: self.payload_size,
            free: self.free,
            in_use: self.in_use,
            total: self.free + self.in_use,
            batches: self.batches.len(),
        }
    }
}

/// Pool of small and large blocks.
///
/// # Thread Safety
///
/// NOT thread-safe. The pool may be moved to another thread but shared
/// access needs a caller-owned mutex.
///
/// # Example
///
/// ```rust,ignore
/// let pool = BlockPool::new(8, 2);
/// let block = pool.borrow(BlockClass::Small);
/// pool.release(block)?;
/// pool.destroy();
/// ```
pub struct BlockPool {
    id: u32,
    classes: RefCell<[ClassState; 2]>,
}

impl BlockPool {
    /// Creates a pool with the default block sizes and one batch per class.
    ///
    /// # Panics
    ///
    /// Panics if a granularity is zero or the initial batches cannot be
    /// allocated. Use [`BlockPool::with_config`] to handle that instead.
    #[must_use]
    pub fn new(small_granularity: usize, large_granularity: usize) -> Self {
        let config = PoolConfig {
            small_block_size: DEFAULT_SMALL_BLOCK_SIZE,
            large_block_size: DEFAULT_LARGE_BLOCK_SIZE,
            small_granularity,
            large_granularity,
        };
        match Self::with_config(&config) {
            Ok(pool) => pool,
            Err(e) => panic!("block pool creation failed: {e}"),
        }
    }

    /// Creates a pool from a configuration, allocating one batch per class.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the configuration does not validate,
    /// `AllocationFailed` if an initial batch cannot be allocated.
    pub fn with_config(config: &PoolConfig) -> MemoryResult<Self> {
        config.validate()?;

        let id = NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed);
        let mut classes = [
            ClassState::new(config.small_block_size, config.small_granularity),
            ClassState::new(config.large_block_size, config.large_granularity),
        ];
        for class in BlockClass::ALL {
            classes[class.index()].grow(class, id)?;
        }

        tracing::debug!(
            "block pool {id}: created ({} x {}B small, {} x {}B large)",
            config.small_granularity,
            config.small_block_size,
            config.large_granularity,
            config.large_block_size
        );

        Ok(Self {
            id,
            classes: RefCell::new(classes),
        })
    }

    /// Borrows a block, growing the class by one batch if its free list is
    /// empty.
    ///
    /// # Panics
    ///
    /// Panics if growth fails. Out of blocks is fatal by default; use
    /// [`BlockPool::try_borrow`] to propagate instead.
    #[must_use]
    pub fn borrow(&self, class: BlockClass) -> Block<'_> {
        match self.try_borrow(class) {
            Ok(block) => block,
            Err(e) => {
                tracing::error!("block pool {}: cannot borrow {class:?} block: {e}", self.id);
                panic!("block pool exhausted: {e}");
            }
        }
    }

    /// Borrows a block, growing the class by one batch if needed.
    ///
    /// # Errors
    ///
    /// `AllocationFailed` or `CapacityOverflow` if a growth batch cannot be
    /// allocated.
    pub fn try_borrow(&self, class: BlockClass) -> MemoryResult<Block<'_>> {
        let mut classes = self.classes.borrow_mut();
        let state = &mut classes[class.index()];

        if state.free_head.is_none() {
            state.grow(class, self.id)?;
        }
        let Some(mut header) = state.free_head else {
            unreachable!("validated granularity >= 1, so a grown class has a free block");
        };

        // SAFETY: header is on our free list, so it lives in one of our batches.
        unsafe {
            state.free_head = header.as_ref().next;
            header.as_mut().next = None;
        }
        state.free -= 1;
        state.in_use += 1;

        let block = Block {
            header,
            _pool: PhantomData,
        };
        debug_assert!(is_aligned(block.payload_ptr().as_ptr()));
        Ok(block)
    }

    /// Returns a block, or a whole chain of blocks, to its class free list.
    ///
    /// The chain is walked once to count and validate it, then spliced onto
    /// the free list in O(1).
    ///
    /// # Errors
    ///
    /// `ForeignBlock` if any block came from another pool,
    /// `MixedBlockClasses` if the chain mixes classes. Nothing is returned to
    /// the pool in either case and the chain stays counted as in use.
    pub fn release(&self, block: Block<'_>) -> MemoryResult<()> {
        let head = block.header;
        let class = block.class();
        if block.header().pool_id != self.id {
            return Err(MemoryError::ForeignBlock);
        }

        let mut tail = head;
        let mut len = 1usize;
        // SAFETY: chain links point at headers in live batches.
        while let Some(next) = unsafe { tail.as_ref().next } {
            let next_header = unsafe { next.as_ref() };
            if next_header.pool_id != self.id {
                return Err(MemoryError::ForeignBlock);
            }
            if next_header.class != class {
                return Err(MemoryError::MixedBlockClasses {
                    expected: class,
                    found: next_header.class,
                });
            }
            tail = next;
            len += 1;
        }

        let mut classes = self.classes.borrow_mut();
        let state = &mut classes[class.index()];
        debug_assert!(len <= state.in_use, "released more blocks than borrowed");

        // SAFETY: tail is the last header of a chain we exclusively own.
        unsafe {
            tail.as_mut().next = state.free_head;
        }
        state.free_head = Some(head);
        state.in_use -= len;
        state.free += len;
        Ok(())
    }

    /// Blocks of `class` currently borrowed.
    #[must_use]
    pub fn in_use(&self, class: BlockClass) -> usize {
        self.classes.borrow()[class.index()].in_use
    }

    /// Blocks of `class` on the free list.
    #[must_use]
    pub fn free_count(&self, class: BlockClass) -> usize {
        self.classes.borrow()[class.index()].free
    }

    /// Payload size of a `class` block.
    #[must_use]
    pub fn block_size(&self, class: BlockClass) -> usize {
        self.classes.borrow()[class.index()].payload_size
    }

    /// Snapshot of both classes.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let classes = self.classes.borrow();
        PoolStats {
            small: classes[BlockClass::Small.index()].stats(),
            large: classes[BlockClass::Large.index()].stats(),
        }
    }

    /// Frees every batch.
    ///
    /// # Panics
    ///
    /// Panics if any block is still borrowed. This is a leak detector, not a
    /// forced reclaim.
    pub fn destroy(self) {
        if let Err(e) = self.try_destroy() {
            panic!("{e}");
        }
    }

    /// Frees every batch, reporting leaked blocks instead of panicking.
    ///
    /// The memory is freed either way: borrowed blocks cannot outlive the
    /// pool, so a non-zero in-use count only means blocks were dropped
    /// without being released.
    ///
    /// # Errors
    ///
    /// `BlocksInUse` if any class still counts borrowed blocks.
    pub fn try_destroy(self) -> MemoryResult<()> {
        let stats = self.stats();
        if stats.small.in_use != 0 || stats.large.in_use != 0 {
            tracing::error!(
                "block pool {}: destroyed with {} small and {} large blocks in use",
                self.id,
                stats.small.in_use,
                stats.large.in_use
            );
            return Err(MemoryError::BlocksInUse {
                small: stats.small.in_use,
                large: stats.large.in_use,
            });
        }
        Ok(())
    }
}

// SAFETY: BlockPool owns every batch its headers point into; moving it to
// another thread moves that ownership. RefCell keeps it !Sync.
unsafe impl Send for BlockPool {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ALIGNMENT;

    fn compact_pool() -> BlockPool {
        BlockPool::with_config(&PoolConfig::compact()).unwrap()
    }

    #[test]
    fn test_initial_batches() {
        let pool = compact_pool();
        let stats = pool.stats();
        assert_eq!(stats.small.free, 4);
        assert_eq!(stats.small.batches, 1);
        assert_eq!(stats.large.free, 1);
        assert_eq!(stats.small.in_use + stats.large.in_use, 0);
        assert_eq!(stats.small.block_size, 4 * 1024);
        pool.destroy();
    }

    #[test]
    fn test_borrow_grows_by_one_batch() {
        let pool = compact_pool();
        let mut first = pool.borrow(BlockClass::Small);
        for _ in 0..3 {
            first.append(pool.borrow(BlockClass::Small));
        }
        assert_eq!(pool.stats().small.batches, 1);
        assert_eq!(pool.free_count(BlockClass::Small), 0);

        let extra = pool.borrow(BlockClass::Small);
        let stats = pool.stats().small;
        assert_eq!(stats.batches, 2);
        assert_eq!(stats.free, 3);
        assert_eq!(stats.in_use, 5);
        assert_eq!(stats.total, 8);

        first.append(extra);
        pool.release(first).unwrap();
        assert_eq!(pool.in_use(BlockClass::Small), 0);
        assert_eq!(pool.free_count(BlockClass::Small), 8);
        pool.destroy();
    }

    #[test]
    fn test_release_then_borrow_reuses_block() {
        let pool = compact_pool();
        let block = pool.borrow(BlockClass::Large);
        let ptr = block.payload_ptr();
        pool.release(block).unwrap();

        let again = pool.borrow(BlockClass::Large);
        assert_eq!(again.payload_ptr(), ptr);
        assert_eq!(pool.stats().large.batches, 1);
        pool.release(again).unwrap();
        pool.destroy();
    }

    #[test]
    fn test_payload_alignment_and_size() {
        let pool = compact_pool();
        let mut chain = pool.borrow(BlockClass::Small);
        for _ in 0..6 {
            let block = pool.borrow(BlockClass::Small);
            assert_eq!(block.payload_ptr().as_ptr() as usize % ALIGNMENT, 0);
            assert_eq!(block.payload_size(), 4 * 1024);
            assert_eq!(block.class(), BlockClass::Small);
            chain.append(block);
        }
        assert_eq!(chain.chain_len(), 7);
        pool.release(chain).unwrap();
        pool.destroy();
    }

    #[test]
    fn test_borrowed_block_has_no_next() {
        let pool = compact_pool();
        let mut a = pool.borrow(BlockClass::Small);
        assert_eq!(a.chain_len(), 1);
        assert!(a.take_next().is_none());

        a.append(pool.borrow(BlockClass::Small));
        let b = a.take_next().unwrap();
        assert_eq!(a.chain_len(), 1);
        pool.release(a).unwrap();
        pool.release(b).unwrap();
        pool.destroy();
    }

    #[test]
    fn test_payload_is_writable() {
        let pool = compact_pool();
        let mut block = pool.borrow(BlockClass::Small);
        block.as_bytes_mut()[0] = 0xAB;
        block.as_bytes_mut()[4095] = 0xCD;
        assert_eq!(block.as_bytes()[0], 0xAB);
        assert_eq!(block.as_bytes()[4095], 0xCD);
        pool.release(block).unwrap();
        pool.destroy();
    }

    #[test]
    fn test_mixed_chain_rejected() {
        let pool = compact_pool();
        let mut small = pool.borrow(BlockClass::Small);
        small.append(pool.borrow(BlockClass::Large));
        let err = pool.release(small).unwrap_err();
        assert_eq!(
            err,
            MemoryError::MixedBlockClasses {
                expected: BlockClass::Small,
                found: BlockClass::Large,
            }
        );
        assert_eq!(pool.in_use(BlockClass::Small), 1);
        assert_eq!(pool.in_use(BlockClass::Large), 1);
    }

    #[test]
    fn test_foreign_block_rejected() {
        let a = compact_pool();
        let b = compact_pool();
        let block = a.borrow(BlockClass::Small);
        assert_eq!(b.release(block).unwrap_err(), MemoryError::ForeignBlock);
    }

    #[test]
    fn test_try_destroy_reports_leak() {
        let pool = compact_pool();
        let _ = pool.borrow(BlockClass::Small);
        assert_eq!(
            pool.try_destroy().unwrap_err(),
            MemoryError::BlocksInUse { small: 1, large: 0 }
        );
    }

    #[test]
    #[should_panic(expected = "blocks in use")]
    fn test_destroy_with_borrowed_block_is_fatal() {
        let pool = compact_pool();
        let _ = pool.borrow(BlockClass::Large);
        pool.destroy();
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = PoolConfig {
            small_granularity: 0,
            ..PoolConfig::compact()
        };
        assert!(matches!(
            BlockPool::with_config(&config),
            Err(MemoryError::InvalidConfig(_))
        ));
    }
}
