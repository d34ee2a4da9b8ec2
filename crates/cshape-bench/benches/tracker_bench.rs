//! Ownership tracker overhead benchmarks.
//!
//! Measures the per-call cost of the lifecycle transitions every tracked
//! native call pays, at several live-table sizes, plus the contended case.

use std::sync::Arc;
use std::thread;

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use cshape_abi::Binding;
use cshape_membrane::{Handle, OwnershipTracker, ResourceClass};

/// Fake, distinct, 16-byte-aligned addresses.
fn addr(i: usize) -> usize {
    0x1000_0000 + i * 16
}

fn populated(live: usize) -> (OwnershipTracker, Vec<Handle>) {
    let tracker = OwnershipTracker::new();
    let handles = (0..live)
        .map(|i| {
            tracker
                .register(addr(i), ResourceClass::HeapBlock, Some(16))
                .unwrap()
        })
        .collect();
    (tracker, handles)
}

fn bench_register_release(c: &mut Criterion) {
    let mut group = c.benchmark_group("register_release");
    group.throughput(Throughput::Elements(1));
    for live in [0_usize, 1_000, 100_000] {
        let (tracker, _handles) = populated(live);
        let spare = addr(live + 1);
        group.bench_with_input(BenchmarkId::from_parameter(live), &spare, |b, &spare| {
            b.iter(|| {
                let h = tracker
                    .register(black_box(spare), ResourceClass::HeapBlock, None)
                    .unwrap();
                black_box(tracker.release(h).unwrap());
            });
        });
    }
    group.finish();
}

fn bench_check_live(c: &mut Criterion) {
    let mut group = c.benchmark_group("check_live");
    for live in [1_usize, 1_000, 100_000] {
        let (tracker, handles) = populated(live);
        let target = handles[live / 2];
        group.bench_with_input(BenchmarkId::new("live", live), &target, |b, &target| {
            b.iter(|| black_box(tracker.check_live(black_box(target))));
        });
    }

    // Rejection path: the handle was released long ago.
    let (tracker, handles) = populated(1_000);
    let dead = handles[0];
    tracker.release(dead).unwrap();
    group.bench_function("released", |b| {
        b.iter(|| black_box(tracker.check_live(black_box(dead)).is_err()));
    });
    group.finish();
}

fn bench_leak_checkpoint(c: &mut Criterion) {
    let mut group = c.benchmark_group("leak_checkpoint");
    for live in [10_usize, 10_000] {
        let (tracker, _handles) = populated(live);
        group.bench_with_input(BenchmarkId::from_parameter(live), &live, |b, _| {
            b.iter(|| black_box(tracker.leak_checkpoint().leaks.len()));
        });
    }
    group.finish();
}

fn bench_contended(c: &mut Criterion) {
    let threads = 4_usize;
    let per_thread = 256_usize;
    let mut group = c.benchmark_group("contended");
    group.throughput(Throughput::Elements((threads * per_thread) as u64));
    group.bench_function(BenchmarkId::new("register_release", threads), |b| {
        let tracker = Arc::new(OwnershipTracker::new());
        b.iter(|| {
            let workers: Vec<_> = (0..threads)
                .map(|t| {
                    let tracker = Arc::clone(&tracker);
                    thread::spawn(move || {
                        for i in 0..per_thread {
                            let h = tracker
                                .register(addr(t * per_thread + i), ResourceClass::FileStream, None)
                                .unwrap();
                            tracker.release(h).unwrap();
                        }
                    })
                })
                .collect();
            for w in workers {
                w.join().unwrap();
            }
        });
    });
    group.finish();
}

fn bench_heap_round_trip(c: &mut Criterion) {
    let tracker = OwnershipTracker::new();
    let binding = Binding::new(&tracker);
    let mut group = c.benchmark_group("heap_round_trip");
    for size in [16_usize, 4096] {
        group.bench_with_input(BenchmarkId::new("malloc_free", size), &size, |b, &size| {
            b.iter(|| {
                let block = binding.malloc(black_box(size)).unwrap();
                binding.free(Some(block)).unwrap();
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_register_release,
    bench_check_live,
    bench_leak_checkpoint,
    bench_contended,
    bench_heap_round_trip
);
criterion_main!(benches);
