//! End-to-end mixture pipeline tests on synthetic voxel samples:
//! sampling, histogramming, initial guess, refinement, and
//! cross-resolution extrapolation working together.

use approx::assert_abs_diff_eq;
use limitomo_gmm::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

/// Draws `n` values from a mixture given as (weight, mean, sd) triples.
fn sample_mixture(truth: &[(f64, f64, f64)], n: usize, seed: u64) -> Vec<f64> {
    let total: f64 = truth.iter().map(|c| c.0).sum();
    let normals: Vec<Normal<f64>> = truth
        .iter()
        .map(|c| Normal::new(c.1, c.2).unwrap())
        .collect();

    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            let r = rng.gen::<f64>() * total;
            let mut acc = 0.0;
            let mut idx = truth.len() - 1;
            for (i, c) in truth.iter().enumerate() {
                acc += c.0;
                if r < acc {
                    idx = i;
                    break;
                }
            }
            normals[idx].sample(&mut rng)
        })
        .collect()
}

fn fit_samples(samples: &[f64], seed: u64) -> Gmm {
    let guess = initial_guess(samples, &[2], seed).unwrap();
    let hist = Histogram::from_samples(samples, 64).unwrap();
    let options = FitOptions {
        tolerance: 0.15,
        ..FitOptions::default()
    };
    fit(&hist, &guess, &options).unwrap()
}

#[test]
fn test_fit_pipeline_recovers_bimodal_truth() {
    let truth = [(0.35, -2.0, 0.6), (0.65, 3.0, 0.9)];
    let samples = sample_mixture(&truth, 40_000, 11);

    let fitted = fit_samples(&samples, 11).sorted_by_mean();
    assert_eq!(fitted.len(), 2);

    let low = fitted.components()[0];
    let high = fitted.components()[1];
    assert_abs_diff_eq!(low.mean, -2.0, epsilon = 0.15);
    assert_abs_diff_eq!(low.sd, 0.6, epsilon = 0.15);
    assert_abs_diff_eq!(low.weight, 0.35, epsilon = 0.1);
    assert_abs_diff_eq!(high.mean, 3.0, epsilon = 0.15);
    assert_abs_diff_eq!(high.sd, 0.9, epsilon = 0.15);
    assert_abs_diff_eq!(high.weight, 0.65, epsilon = 0.1);
}

#[test]
fn test_fitted_mixture_matches_truth_components() {
    let truth_specs = [(0.35, -2.0, 0.6), (0.65, 3.0, 0.9)];
    let samples = sample_mixture(&truth_specs, 40_000, 23);
    let fitted = fit_samples(&samples, 23);

    let truth = Gmm::from_components(
        truth_specs
            .iter()
            .map(|&(w, m, s)| GaussianComponent::new(w, m, s).unwrap())
            .collect(),
    );

    let matched = match_components(&fitted, &truth, MatchPolicy::Full).unwrap();
    assert_eq!(matched.pairs.len(), 2);
    for pair in &matched.pairs {
        assert!(
            pair.cost < 0.3,
            "fitted component drifted {:.3} from its truth partner",
            pair.cost
        );
    }
}

#[test]
fn test_multi_resolution_extrapolation_pipeline() {
    // Underlying component attributes drift linearly with angular density d:
    // the low mode sits at -3 + d, the high mode at 2 + d. At full density
    // the truth is therefore (-2, 3).
    let truth_at = |d: f64| [(0.5, -3.0 + d, 0.6), (0.5, 2.0 + d, 0.9)];

    let mut levels = Vec::new();
    for (li, d) in [0.25, 0.5].into_iter().enumerate() {
        let samples = sample_mixture(&truth_at(d), 40_000, 100 + li as u64);
        levels.push((d, fit_samples(&samples, 100 + li as u64)));
    }

    let predicted = full_resolution_mixture(&levels).unwrap().sorted_by_mean();
    assert_eq!(predicted.len(), 2);
    assert_abs_diff_eq!(predicted.components()[0].mean, -2.0, epsilon = 0.3);
    assert_abs_diff_eq!(predicted.components()[1].mean, 3.0, epsilon = 0.3);
    assert_abs_diff_eq!(predicted.components()[0].weight, 0.5, epsilon = 0.15);
    assert_abs_diff_eq!(predicted.components()[1].weight, 0.5, epsilon = 0.15);
}
