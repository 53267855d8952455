//! # Substrate Chain Tests
//!
//! End-to-end checks across the layers:
//!
//! 1. **Pool -> Arena -> Slots**: a slot allocator carved from an arena view
//!    over a pooled block
//! 2. **Growth**: the pool grows one batch at a time on demand
//! 3. **Caller synchronization**: allocators shared behind a mutex
//!
//! Run with: cargo test --package strata_core --test substrate_chain_test

use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use strata_core::{
    Arena, BlockClass, BlockPool, GenSlotAllocator, Handle, MemoryError, PoolConfig, SlotAllocator,
    SubstrateConfig, ALIGNMENT,
};

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
struct Particle {
    position: [f32; 3],
    life: f32,
}

#[test]
fn slot_allocator_inside_pooled_block() {
    let pool = BlockPool::with_config(&PoolConfig::compact()).unwrap();
    let mut block = pool.borrow(BlockClass::Small);
    assert_eq!(block.payload_size(), 4096);

    {
        let mut arena = Arena::view(&mut block, ALIGNMENT, 2048).unwrap();
        assert!(!arena.is_owned());

        let mut slots = SlotAllocator::new_in(&mut arena, 64, std::mem::size_of::<Particle>()).unwrap();
        let particle = Particle {
            position: [1.0, 2.0, 3.0],
            life: 0.5,
        };
        let address = slots.add_pod(&particle).unwrap();
        let index = slots.index_of(address).unwrap();
        assert_eq!(slots.slot(index).unwrap(), bytemuck::bytes_of(&particle));

        slots.release(address).unwrap();
        assert_eq!(slots.release(address), Err(MemoryError::DoubleRelease { index }));
    }

    // The view wrote into the block's payload, after the skipped prefix.
    assert!(block.as_bytes()[ALIGNMENT..ALIGNMENT + 8].iter().any(|&b| b != 0));

    pool.release(block).unwrap();
    pool.destroy();
}

#[test]
fn generational_handles_across_arena_views() {
    let pool = BlockPool::with_config(&PoolConfig::compact()).unwrap();
    let mut block = pool.borrow(BlockClass::Large);
    let mut arena = Arena::from_block(&mut block);

    let mut textures = GenSlotAllocator::new_in(&mut arena, 16, 32).unwrap();
    let (first, _) = textures.add(&[7u8; 32]).unwrap();
    textures.release_handle(first).unwrap();
    let (second, _) = textures.add(&[9u8; 32]).unwrap();

    assert_eq!(first.index, second.index);
    assert!(textures.get(first).is_none());
    assert_eq!(textures.get(second).unwrap(), &[9u8; 32]);

    let restored = Handle::from(u64::from(second));
    assert!(restored.is_valid_in(&textures));

    drop(textures);
    drop(arena);
    pool.release(block).unwrap();
    pool.destroy();
}

#[test]
fn pool_grows_one_batch_per_exhaustion() {
    let pool = BlockPool::new(1, 1);
    let a = pool.borrow(BlockClass::Small);
    let b = pool.borrow(BlockClass::Small);
    let c = pool.borrow(BlockClass::Small);

    let stats = pool.stats();
    assert_eq!(stats.small.batches, 3);
    assert_eq!(stats.small.in_use, 3);
    assert_eq!(stats.large.batches, 1);
    assert_ne!(a.payload_ptr(), b.payload_ptr());
    assert_ne!(b.payload_ptr(), c.payload_ptr());

    let mut chain = a;
    chain.append(b);
    chain.append(c);
    assert_eq!(chain.chain_len(), 3);
    pool.release(chain).unwrap();

    assert_eq!(pool.in_use(BlockClass::Small), 0);
    assert_eq!(pool.free_count(BlockClass::Small), 3);
    pool.destroy();
}

#[test]
fn config_from_toml_drives_pool() {
    let config = SubstrateConfig::from_toml_str(
        r"
        [pool]
        small_block_size = 8192
        large_block_size = 131072
        small_granularity = 2
        ",
    )
    .unwrap();
    assert_eq!(config.pool.large_granularity, PoolConfig::default().large_granularity);

    let pool = BlockPool::with_config(&config.pool).unwrap();
    assert_eq!(pool.block_size(BlockClass::Small), 8192);
    assert_eq!(pool.block_size(BlockClass::Large), 131_072);
    assert_eq!(pool.free_count(BlockClass::Small), 2);
    pool.destroy();
}

#[test]
fn leaked_block_is_reported_on_destroy() {
    let pool = BlockPool::with_config(&PoolConfig::compact()).unwrap();
    std::mem::forget(pool.borrow(BlockClass::Small));

    assert_eq!(
        pool.try_destroy(),
        Err(MemoryError::BlocksInUse { small: 1, large: 0 })
    );
}

#[test]
fn randomized_reserve_release_keeps_counts() {
    let mut rng = ChaCha8Rng::seed_from_u64(0x5EED);
    let mut slots = SlotAllocator::new(256, 16).unwrap();
    let mut live = Vec::new();

    for _ in 0..10_000 {
        if live.is_empty() || (rng.gen_bool(0.6) && !slots.is_full()) {
            live.push(slots.reserve().unwrap());
        } else {
            let victim = live.swap_remove(rng.gen_range(0..live.len()));
            slots.release(victim).unwrap();
        }
        assert_eq!(slots.occupied_count(), live.len() as u64);
        assert!(slots.high_water_mark() <= slots.capacity());
    }
}

#[test]
fn allocators_shared_behind_mutex() {
    const THREADS: u64 = 4;
    const ROUNDS: u64 = 500;

    let slots = Arc::new(Mutex::new(SlotAllocator::new(64, 8).unwrap()));

    let workers: Vec<_> = (0..THREADS)
        .map(|id| {
            let slots = Arc::clone(&slots);
            thread::spawn(move || {
                for round in 0..ROUNDS {
                    let value = id * ROUNDS + round;
                    let mut guard = slots.lock();
                    let address = guard.add_pod(&value).unwrap();
                    let index = guard.index_of(address).unwrap();
                    assert_eq!(guard.slot(index).unwrap(), &value.to_ne_bytes());
                    guard.release(address).unwrap();
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }

    let slots = slots.lock();
    assert_eq!(slots.occupied_count(), 0);
    assert_eq!(slots.high_water_mark(), 1);
}
