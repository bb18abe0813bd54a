//! Benchmarks for scheduler throughput and observer notification.
//!
//! Run with: cargo bench -p trellis-runtime --bench scheduler_bench

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use trellis_core::{CancellationTokenSource, Clock, ManualClock};
use trellis_runtime::{Object, Priority, Scheduler, SchedulerConfig};

fn manual_scheduler() -> Scheduler {
    Scheduler::with_clock(SchedulerConfig::immediate(), Clock::manual(&ManualClock::new()))
}

fn bench_flush(c: &mut Criterion) {
    let mut group = c.benchmark_group("scheduler/flush");
    for &count in &[100usize, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::new("mixed_priorities", count), &count, |b, &count| {
            let scheduler = manual_scheduler();
            b.iter(|| {
                for i in 0..count {
                    let priority = Priority::ALL[i % 3];
                    scheduler.enqueue(move || { black_box(i); Ok(()) }, priority, None);
                }
                black_box(scheduler.flush())
            });
        });
        group.bench_with_input(BenchmarkId::new("half_cancelled", count), &count, |b, &count| {
            let scheduler = manual_scheduler();
            b.iter(|| {
                let source = CancellationTokenSource::new();
                for i in 0..count {
                    let token = (i % 2 == 0).then(|| source.token());
                    scheduler.enqueue(move || { black_box(i); Ok(()) }, Priority::Normal, token);
                }
                source.cancel();
                black_box(scheduler.flush())
            });
        });
    }
    group.finish();
}

fn bench_notify(c: &mut Criterion) {
    let mut group = c.benchmark_group("observer/notify");
    group.bench_function("sync_deep_path", |b| {
        let leaf = Object::from_pairs([("v", 0)]);
        let mid = Object::from_pairs([("leaf", leaf.clone())]);
        let root = Object::from_pairs([("mid", mid)]);
        let _sub = root.observe("mid.leaf.v").subscribe_fn(|v| {
            black_box(v);
        });
        let mut n = 0;
        b.iter(|| {
            n += 1;
            leaf.set("v", n);
        });
    });
    group.bench_function("async_burst_of_100", |b| {
        let scheduler = manual_scheduler();
        let root = Object::from_pairs([("v", 0)]);
        let _sub = root.observe_async("v", &scheduler).subscribe_fn(|v| {
            black_box(v);
        });
        let mut n = 0;
        b.iter(|| {
            for _ in 0..100 {
                n += 1;
                root.set("v", n);
            }
            black_box(scheduler.flush())
        });
    });
    group.finish();
}

criterion_group!(benches, bench_flush, bench_notify);
criterion_main!(benches);
