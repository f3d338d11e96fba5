//! Allocator benchmarks.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use poolalloc_core::Allocator;

fn bench_alloc_free_cycle(c: &mut Criterion) {
    let sizes: &[usize] = &[16, 64, 256, 1024, 4096, 32768];
    let mut group = c.benchmark_group("alloc_free_cycle");
    let alloc = Allocator::new();

    for &size in sizes {
        group.bench_with_input(BenchmarkId::new("poolalloc", size), &size, |b, &sz| {
            b.iter(|| {
                let ptr = alloc.allocate(sz).expect("allocation must succeed");
                criterion::black_box(ptr);
                alloc.free(Some(ptr));
            });
        });
    }
    group.finish();
}

fn bench_alloc_burst(c: &mut Criterion) {
    let mut group = c.benchmark_group("alloc_burst");
    let alloc = Allocator::new();

    group.bench_function("1000x64B", |b| {
        b.iter(|| {
            let allocs: Vec<_> = (0..1000)
                .map(|_| alloc.allocate(64).expect("allocation must succeed"))
                .collect();
            criterion::black_box(&allocs);
            for ptr in allocs {
                alloc.free(Some(ptr));
            }
        });
    });

    group.finish();
}

fn bench_large_arena_realloc(c: &mut Criterion) {
    let mut group = c.benchmark_group("large_realloc");
    let alloc = Allocator::new();

    group.bench_function("grow_16mib_to_32mib", |b| {
        b.iter(|| {
            let ptr = alloc.allocate(16 << 20).expect("allocation must succeed");
            let grown = alloc
                .reallocate(Some(ptr), 32 << 20)
                .expect("reallocation must succeed");
            criterion::black_box(grown);
            alloc.free(Some(grown));
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_alloc_free_cycle,
    bench_alloc_burst,
    bench_large_arena_realloc
);
criterion_main!(benches);
