//! Benchmarks for mixture evaluation, fitting, and matching.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use limitomo_gmm::{fit, match_components, FitOptions, GaussianComponent, Gmm, Histogram, MatchPolicy};

fn spread_mixture(components: usize) -> Gmm {
    Gmm::from_components(
        (0..components)
            .map(|i| {
                GaussianComponent::new(1.0, 3.0 * i as f64, 0.5 + 0.1 * i as f64).unwrap()
            })
            .collect(),
    )
}

fn bench_evaluate(c: &mut Criterion) {
    let mut group = c.benchmark_group("gmm_evaluate");
    let grid: Vec<f64> = (0..1024).map(|i| -5.0 + f64::from(i) * 0.05).collect();

    for components in [2usize, 4, 8] {
        let mixture = spread_mixture(components);
        group.throughput(Throughput::Elements(grid.len() as u64));
        group.bench_with_input(
            BenchmarkId::new("grid_1024", components),
            &mixture,
            |b, mixture| {
                b.iter(|| black_box(mixture.evaluate(black_box(&grid))));
            },
        );
    }
    group.finish();
}

fn bench_fit(c: &mut Criterion) {
    let mut group = c.benchmark_group("gmm_fit");
    let truth = Gmm::from_components(vec![
        GaussianComponent::new(0.6, -2.0, 0.5).unwrap(),
        GaussianComponent::new(0.4, 3.0, 0.8).unwrap(),
    ]);
    let perturbed = Gmm::from_components(vec![
        GaussianComponent::new(0.5, -1.6, 0.7).unwrap(),
        GaussianComponent::new(0.5, 3.4, 0.6).unwrap(),
    ]);

    for bins in [64usize, 200] {
        let width = 13.0 / bins as f64;
        let centers: Vec<f64> = (0..bins).map(|i| -6.0 + (i as f64 + 0.5) * width).collect();
        let densities = truth.evaluate(&centers);
        let hist = Histogram::from_parts(centers, densities).unwrap();
        let options = FitOptions {
            tolerance: 0.02,
            ..FitOptions::default()
        };

        group.throughput(Throughput::Elements(bins as u64));
        group.bench_with_input(BenchmarkId::new("two_components", bins), &hist, |b, hist| {
            b.iter(|| black_box(fit(hist, &perturbed, &options).unwrap()));
        });
    }
    group.finish();
}

fn bench_matching(c: &mut Criterion) {
    let mut group = c.benchmark_group("gmm_matching");

    for components in [4usize, 8, 16] {
        let a = spread_mixture(components);
        let b_mix = Gmm::from_components(
            (0..components)
                .map(|i| {
                    GaussianComponent::new(1.0, 3.0 * i as f64 + 0.4, 0.5 + 0.1 * i as f64)
                        .unwrap()
                })
                .collect(),
        );
        group.throughput(Throughput::Elements((components * components) as u64));
        group.bench_with_input(
            BenchmarkId::new("assignment", components),
            &components,
            |bench, _| {
                bench.iter(|| {
                    black_box(match_components(&a, &b_mix, MatchPolicy::Full).unwrap())
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_evaluate, bench_fit, bench_matching);
criterion_main!(benches);
