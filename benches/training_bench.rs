use bsprec::algorithms::master::{RankingMaster, SgdMaster};
use bsprec::algorithms::ranking::{Bpr, Ranking, RankingMethod};
use bsprec::algorithms::sgd::{sgd_update, Sgd};
use bsprec::config::{EngineConfig, RankingConfig, SgdConfig};
use bsprec::*;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn synthetic_engine(users: u64, items: u64, per_user: u64) -> LocalEngine {
    let config = EngineConfig {
        seed: 11,
        ..EngineConfig::default()
    };
    let mut engine = LocalEngine::new(&config).unwrap();
    for user in 1..=users {
        for k in 0..per_user {
            let item = 1 + (user * 31 + k * 17) % items;
            let rating = 1.0 + ((user + item) % 5) as f32;
            engine.add_edge(VertexId::user(user), VertexId::item(item), rating);
        }
    }
    engine
}

fn benchmark_kernels(c: &mut Criterion) {
    let v = FactorVector::from_vec(vec![0.1; 64]);
    let u = FactorVector::from_vec(vec![0.2; 64]);
    let bounds = RatingBounds::new(0.0, 5.0);

    c.bench_function("sgd_update_dim64", |b| {
        b.iter(|| black_box(sgd_update(black_box(&v), black_box(&u), 3.0, bounds, 0.01, 0.005)));
    });

    let params = RankingConfig {
        dim: 64,
        min_item_id: Some(1),
        max_item_id: Some(1000),
        ..RankingConfig::default()
    }
    .validate()
    .unwrap();
    let bpr = Bpr::new(&params);
    let positives: Vec<_> = (1..=20).map(|i| (VertexId::item(i), u.clone())).collect();
    let negatives: Vec<_> = (21..=40).map(|i| (VertexId::item(i), v.clone())).collect();

    c.bench_function("bpr_gradient_update_20x20", |b| {
        b.iter(|| black_box(bpr.gradient_update(&v, &positives, &negatives)));
    });
}

fn benchmark_training_runs(c: &mut Criterion) {
    let mut group = c.benchmark_group("training_runs");
    group.sample_size(10);

    let sgd_config = SgdConfig {
        dim: 16,
        iterations: 10,
        ..SgdConfig::default()
    };
    let sgd = Sgd::new(&sgd_config, 11).unwrap();
    group.bench_function("sgd_500_users", |b| {
        b.iter(|| {
            let mut engine = synthetic_engine(500, 200, 10);
            black_box(engine.run(&sgd, &mut SgdMaster::new(&sgd_config)).unwrap())
        });
    });

    let params = RankingConfig {
        dim: 16,
        iter: 3,
        min_item_id: Some(1),
        max_item_id: Some(200),
        ..RankingConfig::default()
    }
    .validate()
    .unwrap();
    let ranking = Ranking::new(Bpr::new(&params), params, 11);
    group.bench_function("bpr_500_users", |b| {
        b.iter(|| {
            let mut engine = synthetic_engine(500, 200, 10);
            black_box(engine.run(&ranking, &mut RankingMaster::new(&params)).unwrap())
        });
    });

    group.finish();
}

criterion_group!(benches, benchmark_kernels, benchmark_training_runs);
criterion_main!(benches);
