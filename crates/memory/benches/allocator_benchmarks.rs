//! Allocator benchmarks
//!
//! Compares the free-list pool, the virtual arena, the temp allocator and the
//! scope registry against the system allocator.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::alloc::Layout;
use std::hint::black_box;
use strata_memory::allocator::Pool;
use strata_memory::arena::{TempAllocator, VirtualArena};
use strata_memory::scope::{NoopLeakSink, ScopeRegistry};

/// Single allocation/deallocation cycle
fn bench_single_allocation(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_allocation");

    group.bench_function("pool_64b", |b| {
        let mut pool = Pool::with_capacity(1024 * 1024).unwrap();
        b.iter(|| {
            let ptr = pool.malloc(64).unwrap();
            pool.free(black_box(ptr));
        });
    });

    group.bench_function("arena_64b", |b| {
        let mut arena = VirtualArena::new(64 * 1024 * 1024).unwrap();
        let mark = arena.mark();
        b.iter(|| {
            black_box(arena.alloc(64));
            arena.reset(mark);
        });
    });

    group.bench_function("temp_64b", |b| {
        let mut temp = TempAllocator::new();
        b.iter(|| {
            let ptr = temp.alloc(64);
            temp.free(black_box(ptr), 64);
        });
    });

    group.bench_function("scoped_pool_64b", |b| {
        let mut registry = ScopeRegistry::new(Pool::with_capacity(1024 * 1024).unwrap());
        registry.set_leak_report_sink(Box::new(NoopLeakSink));
        let scope = registry.create("bench", None);
        b.iter(|| {
            let ptr = registry.alloc(scope, 64).unwrap();
            // SAFETY: allocated through scope with 64 bytes
            unsafe { registry.free(scope, black_box(ptr), 64) };
        });
    });

    // System allocator (baseline)
    group.bench_function("system_64b", |b| {
        let layout = Layout::from_size_align(64, 8).unwrap();
        b.iter(|| unsafe {
            let ptr = std::alloc::alloc(layout);
            std::alloc::dealloc(black_box(ptr), layout);
        });
    });

    group.finish();
}

/// Many allocations followed by bulk release
fn bench_batch_allocations(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_allocations");
    group.throughput(Throughput::Elements(100));

    group.bench_function("pool_100x128b", |b| {
        let mut pool = Pool::with_capacity(1024 * 1024).unwrap();
        let mut ptrs = Vec::with_capacity(100);
        b.iter(|| {
            for _ in 0..100 {
                ptrs.push(pool.malloc(128).unwrap());
            }
            for ptr in ptrs.drain(..) {
                pool.free(ptr);
            }
        });
    });

    group.bench_function("arena_100x128b", |b| {
        let mut arena = VirtualArena::new(64 * 1024 * 1024).unwrap();
        b.iter(|| {
            let mark = arena.mark();
            for _ in 0..100 {
                black_box(arena.alloc(128));
            }
            arena.reset(mark);
        });
    });

    group.bench_function("temp_100x128b", |b| {
        let mut temp = TempAllocator::new();
        b.iter(|| {
            for _ in 0..100 {
                black_box(temp.alloc(128));
            }
            temp.reset();
        });
    });

    group.finish();
}

/// Pool cost across size classes
fn bench_allocation_sizes(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocation_sizes");

    for size in &[16usize, 128, 1024, 16 * 1024, 256 * 1024] {
        group.bench_with_input(BenchmarkId::new("pool", size), size, |b, &size| {
            let mut pool = Pool::with_capacity(4 * 1024 * 1024).unwrap();
            b.iter(|| {
                let ptr = pool.malloc(size).unwrap();
                pool.free(black_box(ptr));
            });
        });

        group.bench_with_input(BenchmarkId::new("system", size), size, |b, &size| {
            let layout = Layout::from_size_align(size, 8).unwrap();
            b.iter(|| unsafe {
                let ptr = std::alloc::alloc(layout);
                std::alloc::dealloc(black_box(ptr), layout);
            });
        });
    }

    group.finish();
}

/// Frees in shuffled order to exercise coalescing
fn bench_fragmentation(c: &mut Criterion) {
    let mut group = c.benchmark_group("fragmentation");
    let sizes: Vec<usize> = (0..256).map(|i| 16 + (i * 37) % 2000).collect();

    group.bench_function("pool_random_free_order", |b| {
        let mut pool = Pool::with_capacity(4 * 1024 * 1024).unwrap();
        let mut order: Vec<usize> = (0..sizes.len()).collect();
        for i in (1..order.len()).rev() {
            order.swap(i, rand::random::<u64>() as usize % (i + 1));
        }
        b.iter(|| {
            let ptrs: Vec<_> = sizes.iter().map(|&s| pool.malloc(s).unwrap()).collect();
            for &i in &order {
                pool.free(ptrs[i]);
            }
        });
    });

    group.bench_function("pool_realloc_growth", |b| {
        let mut pool = Pool::with_capacity(4 * 1024 * 1024).unwrap();
        b.iter(|| {
            let mut ptr = pool.malloc(16).unwrap();
            let mut size = 16;
            while size < 64 * 1024 {
                size *= 2;
                ptr = pool.realloc(Some(ptr), size).unwrap();
            }
            pool.free(black_box(ptr));
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_single_allocation,
    bench_batch_allocations,
    bench_allocation_sizes,
    bench_fragmentation
);

criterion_main!(benches);
