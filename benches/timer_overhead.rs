/// Timer Overhead Benchmarks
///
/// Measures what a timed scope costs on top of the work it wraps, with and
/// without query correlation and call statistics. No subscriber is installed,
/// so event construction is skipped and only bookkeeping is measured.
use blocktimer::{
    callable_meta, InMemoryLedger, ProfileOptions, ProfilerConfig, ProfilerContext, Timer,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use std::time::Duration;

fn work(n: u64) -> u64 {
    (0..n).fold(0, |acc, x| acc.wrapping_add(x * x))
}

/// Baseline: the workload alone
fn bench_native_baseline(c: &mut Criterion) {
    let mut group = c.benchmark_group("native");
    group.measurement_time(Duration::from_secs(5));

    group.bench_function("work_1000", |b| {
        b.iter(|| black_box(work(black_box(1_000))));
    });

    group.finish();
}

/// Timed scope without a ledger
fn bench_timer_scope(c: &mut Criterion) {
    let mut group = c.benchmark_group("timer_scope");
    group.measurement_time(Duration::from_secs(5));

    group.bench_function("run", |b| {
        b.iter(|| {
            let mut timer = Timer::new("bench").unwrap();
            black_box(timer.run(|| work(black_box(1_000))))
        });
    });

    group.bench_function("guard", |b| {
        b.iter(|| {
            let mut timer = Timer::new("bench").unwrap();
            let _guard = timer.enter();
            black_box(work(black_box(1_000)))
        });
    });

    group.finish();
}

/// Correlated scope, varying the number of configured connections
fn bench_correlated_scope(c: &mut Criterion) {
    let mut group = c.benchmark_group("correlated_scope");
    group.measurement_time(Duration::from_secs(5));

    for connections in [1usize, 4, 16] {
        let names: Vec<String> = (0..connections).map(|i| format!("db{}", i)).collect();
        let ledger = Arc::new(InMemoryLedger::new());
        let context = ProfilerContext::new(ProfilerConfig::default().with_connection_names(names))
            .with_ledger(ledger.clone());

        group.bench_with_input(
            BenchmarkId::from_parameter(connections),
            &connections,
            |b, _| {
                b.iter(|| {
                    let mut timer = context.timer("bench").unwrap();
                    timer.run(|| ledger.record("db0", "SELECT 1", 0.001));
                });
                ledger.clear("db0");
            },
        );
    }

    group.finish();
}

/// Instrumented function, with and without call statistics
fn bench_instrumented_call(c: &mut Criterion) {
    let mut group = c.benchmark_group("instrumented_call");
    group.measurement_time(Duration::from_secs(5));

    let context = ProfilerContext::default();
    let plain = context.profile().function(callable_meta!(work), work);
    let with_stats = context
        .profile_with(ProfileOptions::default().collect_stats(true))
        .function(callable_meta!(work), work);

    group.bench_function("plain", |b| {
        b.iter(|| black_box(plain.call(black_box(1_000))));
    });

    group.bench_function("collect_stats", |b| {
        b.iter(|| black_box(with_stats.call(black_box(1_000))));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_native_baseline,
    bench_timer_scope,
    bench_correlated_scope,
    bench_instrumented_call
);
criterion_main!(benches);
