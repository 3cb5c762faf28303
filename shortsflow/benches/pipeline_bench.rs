//! Benchmarks for retry delay computation, graph queries and leases.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use shortsflow::core::StageId;
use shortsflow::pipeline::StageGraph;
use shortsflow::resource::{ResourceClaim, ResourceLeaseManager};
use shortsflow::retry::{JitterPolicy, RetrySpec};

fn retry_benchmark(c: &mut Criterion) {
    let spec = RetrySpec::new();
    let jittered = RetrySpec::new().with_jitter(JitterPolicy::Fraction(0.1));

    c.bench_function("backoff_delay", |b| {
        b.iter(|| {
            for attempt in 1..=8 {
                black_box(spec.backoff_delay(black_box(attempt)));
            }
        });
    });
    c.bench_function("delay_for_with_jitter", |b| {
        b.iter(|| black_box(jittered.delay_for(black_box(3))));
    });
}

fn graph_benchmark(c: &mut Criterion) {
    c.bench_function("stage_graph_precedes", |b| {
        b.iter(|| {
            for before in StageId::ALL {
                for after in StageId::ALL {
                    black_box(StageGraph::precedes(before, after));
                }
            }
        });
    });
}

fn lease_benchmark(c: &mut Criterion) {
    let leases = ResourceLeaseManager::new();
    let claim = ResourceClaim::new("avatar").with_evict_previous(false);

    c.bench_function("lease_try_acquire_release", |b| {
        b.iter(|| {
            let mut lease = leases.try_acquire(&claim);
            if let Some(lease) = lease.as_mut() {
                lease.release();
            }
            black_box(lease.is_some())
        });
    });
}

criterion_group!(benches, retry_benchmark, graph_benchmark, lease_benchmark);
criterion_main!(benches);
