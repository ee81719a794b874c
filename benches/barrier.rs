use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use cpubind::prelude::*;

/// `n - 1` background threads keep arriving until told to stop; the bench
/// thread is the n-th arrival of every cycle.
fn bench_barrier(c: &mut Criterion) {
    let mut group = c.benchmark_group("rendezvous_cycle");
    group.measurement_time(Duration::from_secs(8));
    group.warm_up_time(Duration::from_millis(500));

    for n in [2usize, 4, 8] {
        group.bench_function(BenchmarkId::new("arrive_and_wait", n), |b| {
            b.iter_custom(|iters| {
                let barrier = RendezvousBarrier::new(n);
                let stop = AtomicBool::new(false);
                thread::scope(|s| {
                    for _ in 1..n {
                        s.spawn(|| {
                            loop {
                                barrier.arrive_and_wait();
                                if stop.load(Ordering::Acquire) {
                                    break;
                                }
                            }
                        });
                    }
                    let start = Instant::now();
                    for _ in 0..iters {
                        barrier.arrive_and_wait();
                    }
                    let elapsed = start.elapsed();
                    stop.store(true, Ordering::Release);
                    barrier.arrive_and_wait();
                    elapsed
                })
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_barrier);
criterion_main!(benches);
