//! Benchmarks for dataset construction and the constraint sweep.

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use remex_core::{Dataset, RawEvent, RawItem, RawUser};
use remex_eval::{Experiment, ExperimentConfig, PolicySet};

fn synthetic_tables(
    n_users: usize,
    n_items: usize,
    events_per_user: usize,
) -> (Vec<RawEvent>, Vec<RawUser>, Vec<RawItem>) {
    let mut events = Vec::with_capacity(n_users * events_per_user);
    for user in 0..n_users {
        for step in 0..events_per_user {
            let item = (user * 7 + step * 13) % n_items;
            #[allow(clippy::cast_precision_loss)]
            let ts = step as f64;
            events.push(RawEvent::new(format!("u{user}"), format!("i{item}"), ts));
        }
    }
    let users = (0..n_users)
        .map(|user| {
            #[allow(clippy::cast_precision_loss)]
            let start = (events_per_user as f64) * 0.8;
            RawUser::new(format!("u{user}"), start)
        })
        .collect();
    let items = (0..n_items).map(|item| RawItem::new(format!("i{item}"))).collect();
    (events, users, items)
}

fn bench_construction(c: &mut Criterion) {
    let (events, users, items) = synthetic_tables(500, 100, 40);
    c.bench_function("dataset_construct_500x100", |b| {
        b.iter(|| {
            let d = Dataset::construct(
                black_box(&events),
                black_box(&users),
                black_box(&items),
                100.0,
                1,
                1,
            )
            .expect("valid tables");
            black_box(d.target_matrix().nnz())
        });
    });
}

fn bench_rank_based_sweep(c: &mut Criterion) {
    let (events, users, items) = synthetic_tables(200, 50, 30);
    let dataset = Dataset::construct(&events, &users, &items, 100.0, 1, 1).expect("valid tables");
    c.bench_function("rank_sweep_pop_200x50", |b| {
        b.iter(|| {
            let config = ExperimentConfig {
                policies: vec!["Pop".to_string()],
                multipliers: vec![0.0, 0.5, 1.0, 3.0, 10.0],
                ..ExperimentConfig::default()
            };
            let mut experiment =
                Experiment::new(&dataset, None, config, PolicySet::standard(7)).expect("valid");
            experiment.run();
            black_box(experiment.into_results())
        });
    });
}

criterion_group!(benches, bench_construction, bench_rank_based_sweep);
criterion_main!(benches);
