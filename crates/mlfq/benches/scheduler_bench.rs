use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use mlfq::{DefaultPolicy, DefaultPolicyConfig, Feedback, Scheduler, SubmitOptions};

fn bench_submit(c: &mut Criterion) {
    let mut group = c.benchmark_group("submit");

    for levels in [4, 8, 16].iter() {
        group.throughput(Throughput::Elements(10_000));
        group.bench_with_input(BenchmarkId::from_parameter(levels), levels, |b, &levels| {
            b.iter(|| {
                let scheduler: Scheduler<u64, DefaultPolicy<u64>> =
                    Scheduler::new_default(levels).unwrap();
                for i in 0..10_000u64 {
                    black_box(scheduler.submit(i, SubmitOptions::default()).unwrap());
                }
            });
        });
    }

    group.finish();
}

fn bench_submit_next_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("submit_next_finish");
    let msgs = 50_000u64;
    group.throughput(Throughput::Elements(msgs));

    group.bench_function("single_level_roundtrip", |b| {
        b.iter(|| {
            let scheduler: Scheduler<u64, DefaultPolicy<u64>> = Scheduler::new_default(8).unwrap();
            for i in 0..msgs {
                scheduler.submit(i, SubmitOptions::default()).unwrap();
            }
            let mut drained = 0u64;
            while let Some(lease) = scheduler.next() {
                black_box(lease.task);
                scheduler
                    .feedback(
                        lease.token,
                        Feedback {
                            finished: true,
                            ..Default::default()
                        },
                    )
                    .unwrap();
                drained += 1;
            }
            assert_eq!(drained, msgs);
        });
    });

    group.finish();
}

fn bench_feedback_requeue_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("feedback_requeue");
    let cycles = 20_000u64;
    group.throughput(Throughput::Elements(cycles));

    group.bench_function("full_quantum_demote_loop", |b| {
        b.iter(|| {
            let policy = DefaultPolicy::new(4, DefaultPolicyConfig::default());
            let scheduler: Scheduler<u64, DefaultPolicy<u64>> = Scheduler::new(policy).unwrap();
            let token = scheduler.submit(0, SubmitOptions::default()).unwrap();
            for _ in 0..cycles {
                let lease = scheduler.next().unwrap();
                scheduler
                    .feedback(
                        lease.token,
                        Feedback {
                            ran_for: lease.quantum,
                            used_full_quantum: true,
                            ..Default::default()
                        },
                    )
                    .unwrap();
            }
            black_box(token);
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_submit,
    bench_submit_next_cycle,
    bench_feedback_requeue_churn
);
criterion_main!(benches);
