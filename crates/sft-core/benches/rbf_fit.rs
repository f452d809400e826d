use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use sft_core::{Embedding, PointSet, RadialBasisWarp};

fn control_grid(n: usize) -> (PointSet, PointSet) {
    let mut src = Vec::with_capacity(n * n);
    let mut dst = Vec::with_capacity(n * n);
    for j in 0..n {
        for i in 0..n {
            let (x, y) = (i as f64 * 10.0, j as f64 * 10.0);
            src.push(vec![x, y]);
            dst.push(vec![x + 0.01 * y * y, y + 2.0 * (x * 0.05).sin()]);
        }
    }
    (
        PointSet::from_vec_rows(2, &src).unwrap(),
        PointSet::from_vec_rows(2, &dst).unwrap(),
    )
}

fn fit(c: &mut Criterion) {
    let mut group = c.benchmark_group("tps_fit");
    for n in [5, 10, 20] {
        let (src, dst) = control_grid(n);
        group.bench_with_input(BenchmarkId::from_parameter(n * n), &n, |b, _| {
            b.iter(|| RadialBasisWarp::fit(&src, &dst, 0.0).unwrap())
        });
    }
    group.finish();
}

fn evaluate(c: &mut Criterion) {
    let (src, dst) = control_grid(10);
    let warp = RadialBasisWarp::fit(&src, &dst, 0.0).unwrap();
    let (queries, _) = control_grid(40);
    c.bench_function("tps_evaluate_1600", |b| {
        b.iter(|| warp.apply(&queries).unwrap())
    });
}

criterion_group!(
    name = rbf;
    config = Criterion::default().sample_size(20);
    targets = fit, evaluate
);
criterion_main!(rbf);
