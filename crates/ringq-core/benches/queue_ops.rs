//! Criterion benchmarks for the queue engine's traversal-heavy operations.

use criterion::{Criterion, criterion_group, criterion_main};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use ringq_core::{ExecGuard, FaultAllocator, Queue};

fn build(alloc: &mut FaultAllocator, n: usize) -> Queue {
    let mut q = Queue::new(alloc).expect("sentinel grant");
    for i in 0..n {
        assert!(q.insert_tail(alloc, &format!("payload-{:06}", (n - i) * 7 % n.max(1))));
    }
    q
}

fn bench_insert_tail(c: &mut Criterion) {
    c.bench_function("insert_tail_1k", |b| {
        b.iter(|| {
            let mut alloc = FaultAllocator::new(1);
            let mut q = Queue::new(&mut alloc).expect("sentinel grant");
            for i in 0..1000 {
                assert!(q.insert_tail(&mut alloc, &format!("payload-{i:06}")));
            }
            q
        });
    });
}

fn bench_sort(c: &mut Criterion) {
    let guard = ExecGuard::new();
    c.bench_function("sort_1k", |b| {
        b.iter_with_setup(
            || {
                let mut alloc = FaultAllocator::new(1);
                let q = build(&mut alloc, 1000);
                (alloc, q)
            },
            |(alloc, mut q)| {
                q.sort(&guard).expect("unguarded sort");
                (alloc, q)
            },
        );
    });
}

fn bench_shuffle(c: &mut Criterion) {
    let guard = ExecGuard::new();
    c.bench_function("shuffle_1k", |b| {
        b.iter_with_setup(
            || {
                let mut alloc = FaultAllocator::new(1);
                let q = build(&mut alloc, 1000);
                let rng = ChaCha20Rng::seed_from_u64(17);
                (alloc, q, rng)
            },
            |(alloc, mut q, mut rng)| {
                q.shuffle(&mut rng, &guard).expect("unguarded shuffle");
                (alloc, q, rng)
            },
        );
    });
}

criterion_group!(benches, bench_insert_tail, bench_sort, bench_shuffle);
criterion_main!(benches);
