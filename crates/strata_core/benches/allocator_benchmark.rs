//! # Allocator Performance Benchmark
//!
//! REQUIREMENTS:
//! - Block borrow/release is O(1) once the pool has grown
//! - Arena push/pop is a pointer bump
//! - Slot reserve/release is O(1) with zero heap allocations
//!
//! Run with: `cargo bench --package strata_core`

// Benchmarks don't need docs
#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use strata_core::{Arena, BlockClass, BlockPool, GenSlotAllocator, PoolConfig, SlotAllocator, TypedPool};

/// Slots per allocator in the slot benchmarks.
const SLOT_COUNT: u32 = 65_536;

/// Benchmark: borrow and release one block from a warm pool.
fn bench_block_borrow_release(c: &mut Criterion) {
    let pool = BlockPool::with_config(&PoolConfig::compact()).unwrap();

    c.bench_function("block_borrow_release", |b| {
        b.iter(|| {
            let block = pool.borrow(BlockClass::Small);
            pool.release(black_box(block)).unwrap();
        });
    });
}

/// Benchmark: push/pop pairs of various sizes.
fn bench_arena_push_pop(c: &mut Criterion) {
    let mut group = c.benchmark_group("arena_push_pop");
    let mut arena = Arena::alloc(1 << 20).unwrap();

    for size in [32usize, 256, 4096] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                black_box(arena.push(size, None));
                arena.pop(size);
            });
        });
    }
    group.finish();
}

/// Benchmark: copying pushes, scalar-sized and AVX2-eligible.
fn bench_arena_copy(c: &mut Criterion) {
    let mut arena = Arena::alloc(1 << 20).unwrap();
    let source = vec![0xA5u8; 4096];

    c.bench_function("arena_push_copy_4k", |b| {
        b.iter(|| {
            black_box(arena.push(source.len(), Some(&source)));
            arena.flush();
        });
    });
}

/// Benchmark: fill an allocator then release every slot.
fn bench_slot_fill_drain(c: &mut Criterion) {
    let mut slots = SlotAllocator::new(u64::from(SLOT_COUNT), 32).unwrap();
    let mut addresses = Vec::with_capacity(SLOT_COUNT as usize);

    c.bench_function("slot_fill_drain_64k", |b| {
        b.iter(|| {
            while let Some(address) = slots.reserve() {
                addresses.push(address);
            }
            for address in addresses.drain(..) {
                slots.release(address).unwrap();
            }
        });
    });
}

/// Benchmark: release then reserve with the stale-handle check.
fn bench_generational_churn(c: &mut Criterion) {
    let mut slots = GenSlotAllocator::new(SLOT_COUNT, 32).unwrap();
    let (mut handle, _) = slots.reserve().unwrap();

    c.bench_function("generational_release_reserve", |b| {
        b.iter(|| {
            slots.release_handle(handle).unwrap();
            handle = slots.reserve().unwrap().0;
            black_box(slots.validated_address(handle));
        });
    });
}

/// Benchmark: typed insert/remove.
fn bench_typed_pool_churn(c: &mut Criterion) {
    let mut pool: TypedPool<[f32; 4]> = TypedPool::new(SLOT_COUNT);

    c.bench_function("typed_pool_insert_remove", |b| {
        b.iter(|| {
            let handle = pool.insert([1.0; 4]).unwrap();
            black_box(pool.remove(handle));
        });
    });
}

criterion_group!(
    benches,
    bench_block_borrow_release,
    bench_arena_push_pop,
    bench_arena_copy,
    bench_slot_fill_drain,
    bench_generational_churn,
    bench_typed_pool_churn,
);

criterion_main!(benches);
