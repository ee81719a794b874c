use std::thread;
use std::time::Duration;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

use cpubind::prelude::*;

fn fixed() -> Result<BindingReport, QueryError> {
    Ok(BindingReport::from_cpus([0]))
}

fn ring_round(world: usize) {
    let sink = MemorySink::new();
    thread::scope(|s| {
        for ep in mesh(world) {
            let sink = &sink;
            s.spawn(move || run_rank(ep, fixed, sink, None));
        }
    });
    std::hint::black_box(sink.participants());
}

fn bench_handoff(c: &mut Criterion) {
    let sizes: &[usize] = &[2, 4, 8];

    let mut group = c.benchmark_group("ordered_round");
    group.measurement_time(Duration::from_secs(10));
    group.warm_up_time(Duration::from_millis(800));

    for &n in sizes {
        group.throughput(Throughput::Elements(n as u64));

        // 1) spin token, counter published before spawn
        group.bench_with_input(BenchmarkId::new("spin_pool", n), &n, |b, &n| {
            let team = ThreadTeam::new(n).unwrap();
            b.iter(|| team.run(fixed, MemorySink::new()).unwrap());
        });

        // 2) spin token behind the N+1 rendezvous
        group.bench_with_input(BenchmarkId::new("spin_rendezvous", n), &n, |b, &n| {
            let team = ThreadTeam::new(n).unwrap().launch(Launch::Rendezvous);
            b.iter(|| team.run(fixed, MemorySink::new()).unwrap());
        });

        // 3) same, yielding while off turn
        group.bench_with_input(BenchmarkId::new("hot_pool", n), &n, |b, &n| {
            let team = ThreadTeam::new(n).unwrap().wait(WaitBudget::hot());
            b.iter(|| team.run(fixed, MemorySink::new()).unwrap());
        });

        // 4) token ring over the channel mesh
        group.bench_with_input(BenchmarkId::new("ring_mesh", n), &n, |b, &n| {
            b.iter(|| ring_round(n));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_handoff);
criterion_main!(benches);
