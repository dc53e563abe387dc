use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use fxrates_core::Pair;
use fxrates_infra::jobs::{InMemoryJobStore, JobStore};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("build tokio runtime")
}

fn seeded_store(rt: &tokio::runtime::Runtime, jobs: usize) -> InMemoryJobStore {
    let store = InMemoryJobStore::new();
    let pair = Pair::parse("EUR/USD").expect("valid pair");
    rt.block_on(async {
        for _ in 0..jobs {
            store.create_queued(pair).await.expect("create job");
        }
    });
    store
}

/// Claim everything in batches of `limit` from a store of `size` queued jobs.
fn bench_claim_queued(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("claim_queued");

    for size in [100usize, 1_000, 10_000] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("drain_batch_10", size), &size, |b, &size| {
            b.iter_batched(
                || seeded_store(&rt, size),
                |store| {
                    rt.block_on(async {
                        loop {
                            let claimed = store.claim_queued(10).await.expect("claim");
                            if claimed.is_empty() {
                                break;
                            }
                            black_box(claimed);
                        }
                    })
                },
                criterion::BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

/// Single-job CAS claim, the channel and delegate path.
fn bench_claim_by_id(c: &mut Criterion) {
    let rt = runtime();
    let pair = Pair::parse("USD/MXN").expect("valid pair");

    c.bench_function("claim_by_id", |b| {
        b.iter_batched(
            || {
                let store = InMemoryJobStore::new();
                let id = rt.block_on(store.create_queued(pair)).expect("create job");
                (store, id)
            },
            |(store, id)| black_box(rt.block_on(store.claim(&id)).expect("claim")),
            criterion::BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, bench_claim_queued, bench_claim_by_id);
criterion_main!(benches);
