//! Allocator benchmarks.

use std::ffi::c_void;

use criterion::{BatchSize, BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use tagheap_core::HeapState;
use tagheap_membrane::{ArenaConfig, HeapConfig, PageArena};

fn quiet_heap() -> HeapState {
    let arena = PageArena::new(ArenaConfig::default().with_max_pages(4096)).expect("arena");
    HeapState::new(arena, HeapConfig::default().with_lifecycle_logging(false))
}

fn bench_alloc_free_cycle(c: &mut Criterion) {
    let sizes: &[usize] = &[16, 64, 160, 256, 1024, 4096];
    let mut group = c.benchmark_group("alloc_free_cycle");

    for &size in sizes {
        group.bench_with_input(BenchmarkId::new("tagheap", size), &size, |b, &sz| {
            let mut heap = quiet_heap();
            b.iter(|| {
                let ptr = heap.allocate(black_box(sz)).expect("alloc");
                heap.deallocate(ptr);
            });
        });

        group.bench_with_input(BenchmarkId::new("host_libc", size), &size, |b, &sz| {
            b.iter(|| {
                // SAFETY: the pointer comes straight from malloc and is freed once.
                unsafe {
                    let ptr = libc::malloc(black_box(sz));
                    black_box(ptr);
                    libc::free(ptr.cast::<c_void>());
                }
            });
        });
    }
    group.finish();
}

fn bench_alloc_burst(c: &mut Criterion) {
    let mut group = c.benchmark_group("alloc_burst");

    group.bench_function("tagheap_1000x64B", |b| {
        b.iter_batched(
            quiet_heap,
            |mut heap| {
                let ptrs: Vec<usize> = (0..1000)
                    .map(|_| heap.allocate(64).expect("alloc"))
                    .collect();
                for ptr in ptrs {
                    heap.deallocate(ptr);
                }
                heap
            },
            BatchSize::SmallInput,
        );
    });

    group.bench_function("host_libc_1000x64B", |b| {
        b.iter(|| {
            // SAFETY: every pointer comes from malloc and is freed exactly once.
            unsafe {
                let ptrs: Vec<*mut c_void> = (0..1000).map(|_| libc::malloc(64)).collect();
                for ptr in ptrs {
                    libc::free(ptr);
                }
            }
        });
    });

    group.finish();
}

fn bench_resize_ladder(c: &mut Criterion) {
    let mut group = c.benchmark_group("resize_ladder");

    group.bench_function("tagheap_grow_then_shrink", |b| {
        let mut heap = quiet_heap();
        b.iter(|| {
            let mut ptr = heap.allocate(16).expect("alloc");
            for size in [64, 256, 1024, 4096, 1024, 256, 64, 16] {
                ptr = heap.resize(ptr, black_box(size)).expect("resize");
            }
            heap.deallocate(ptr);
        });
    });

    group.bench_function("host_libc_grow_then_shrink", |b| {
        b.iter(|| {
            // SAFETY: realloc keeps a single live pointer that is freed at the end.
            unsafe {
                let mut ptr = libc::malloc(16);
                for size in [64, 256, 1024, 4096, 1024, 256, 64, 16] {
                    ptr = libc::realloc(ptr, black_box(size));
                }
                libc::free(ptr);
            }
        });
    });

    group.finish();
}

criterion_group!(benches, bench_alloc_free_cycle, bench_alloc_burst, bench_resize_ladder);
criterion_main!(benches);
