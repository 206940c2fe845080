//! Mixture fitting: clustered initial guess plus Levenberg-Marquardt
//! refinement against an empirical histogram.
//!
//! The initial guess seeds one component per k-means cluster of the raw
//! sample values. Refinement then minimizes the chosen energy between the
//! mixture density and the histogram densities with damped Gauss-Newton
//! steps and an analytic Jacobian.

use limitomo_core::{CoreError, CoreResult};
use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::histogram::Histogram;
use crate::model::{GaussianComponent, Gmm, SQRT_TWO_PI};

/// Default component count candidates for [`initial_guess`].
pub const DEFAULT_CANDIDATES: &[usize] = &[5];

/// k-means refinement passes for the initial guess.
const MAX_KMEANS_ITERS: usize = 64;

/// Damping retries per refinement step before the step is declared stalled.
const MAX_DAMPING_RETRIES: usize = 8;

/// Bin count of the scratch histogram used to score candidate counts.
const GUESS_SCORE_BINS: usize = 64;

/// Residual form minimized by [`fit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EnergyKind {
    /// Sum of squared residuals.
    #[default]
    DistanceSq,
    /// Sum of absolute residuals, handled by iteratively reweighted least
    /// squares.
    AbsDiff,
}

/// Refinement options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitOptions {
    /// Residual form to minimize.
    pub energy: EnergyKind,
    /// Iteration budget for the refinement loop.
    pub max_iterations: usize,
    /// Convergence requirement: the L2 residual norm divided by the L2 norm
    /// of the histogram densities must drop below this.
    pub tolerance: f64,
    /// Drop post-fit components whose weight is negligible.
    pub remove_negligible: bool,
    /// Fraction of total weight below which a component is negligible.
    pub negligible_weight: f64,
    /// Smallest standard deviation a component may reach during refinement.
    pub sd_floor: f64,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            energy: EnergyKind::DistanceSq,
            max_iterations: 200,
            tolerance: 0.1,
            remove_negligible: true,
            negligible_weight: 1e-3,
            sd_floor: 1e-6,
        }
    }
}

/// Seeds a mixture by one-dimensional k-means over the raw sample values.
///
/// Every candidate component count is clustered independently; the candidate
/// whose mixture best reproduces a scratch histogram of the samples (lowest
/// relative residual) wins. Deterministic for a fixed `seed`: cluster centers
/// start at sample quantiles and the RNG is only consulted to reseed empty
/// clusters.
pub fn initial_guess(samples: &[f64], candidates: &[usize], seed: u64) -> CoreResult<Gmm> {
    if samples.is_empty() {
        return Err(CoreError::validation("initial guess needs samples"));
    }
    if candidates.is_empty() {
        return Err(CoreError::validation(
            "initial guess needs at least one component count candidate",
        ));
    }

    let hist = Histogram::from_samples(samples, GUESS_SCORE_BINS)?;
    let hist_norm = hist.density_norm().max(f64::EPSILON);

    let mut rng = StdRng::seed_from_u64(seed);
    let mut best: Option<(f64, Gmm)> = None;
    for &k in candidates {
        if k == 0 || k > samples.len() {
            continue;
        }
        let mixture = kmeans_mixture(samples, k, &mut rng)?;
        let residual: f64 = mixture
            .evaluate(hist.bin_centers())
            .iter()
            .zip(hist.densities())
            .map(|(m, h)| (m - h) * (m - h))
            .sum::<f64>()
            .sqrt();
        let score = residual / hist_norm;
        if best.as_ref().map_or(true, |(s, _)| score < *s) {
            best = Some((score, mixture));
        }
    }

    best.map(|(_, m)| m).ok_or_else(|| {
        CoreError::validation("no usable component count candidate (all zero or above sample count)")
    })
}

fn kmeans_mixture(samples: &[f64], k: usize, rng: &mut StdRng) -> CoreResult<Gmm> {
    let n = samples.len();
    let mut sorted = samples.to_vec();
    sorted.sort_by(f64::total_cmp);
    let range = sorted[n - 1] - sorted[0];

    let mut centers: Vec<f64> = (0..k)
        .map(|i| sorted[((i as f64 + 0.5) / k as f64 * (n - 1) as f64) as usize])
        .collect();

    let mut assign = vec![0usize; n];
    for _ in 0..MAX_KMEANS_ITERS {
        let mut moved = false;
        for (si, &s) in samples.iter().enumerate() {
            let mut best_c = 0;
            let mut best_d = f64::INFINITY;
            for (ci, &c) in centers.iter().enumerate() {
                let d = (s - c).abs();
                if d < best_d {
                    best_d = d;
                    best_c = ci;
                }
            }
            if assign[si] != best_c {
                assign[si] = best_c;
                moved = true;
            }
        }

        let mut sums = vec![0.0; k];
        let mut counts = vec![0usize; k];
        for (si, &s) in samples.iter().enumerate() {
            sums[assign[si]] += s;
            counts[assign[si]] += 1;
        }
        let mut shift = 0.0f64;
        for ci in 0..k {
            let next = if counts[ci] == 0 {
                samples[rng.gen_range(0..n)]
            } else {
                sums[ci] / counts[ci] as f64
            };
            shift = shift.max((next - centers[ci]).abs());
            centers[ci] = next;
        }
        if !moved && shift < 1e-12 {
            break;
        }
    }

    // Final statistics pass against the settled centers.
    let mut counts = vec![0usize; k];
    let mut sums = vec![0.0; k];
    let mut sqs = vec![0.0; k];
    for &s in samples {
        let mut best_c = 0;
        let mut best_d = f64::INFINITY;
        for (ci, &c) in centers.iter().enumerate() {
            let d = (s - c).abs();
            if d < best_d {
                best_d = d;
                best_c = ci;
            }
        }
        counts[best_c] += 1;
        sums[best_c] += s;
    }
    let means: Vec<f64> = (0..k)
        .map(|ci| {
            if counts[ci] == 0 {
                centers[ci]
            } else {
                sums[ci] / counts[ci] as f64
            }
        })
        .collect();
    for &s in samples {
        let mut best_c = 0;
        let mut best_d = f64::INFINITY;
        for (ci, &c) in centers.iter().enumerate() {
            let d = (s - c).abs();
            if d < best_d {
                best_d = d;
                best_c = ci;
            }
        }
        let d = s - means[best_c];
        sqs[best_c] += d * d;
    }

    let sd_floor = (range * 1e-2).max(1e-6);
    let mut components = Vec::with_capacity(k);
    for ci in 0..k {
        if counts[ci] == 0 {
            continue;
        }
        let weight = counts[ci] as f64 / n as f64;
        let sd = (sqs[ci] / counts[ci] as f64).sqrt().max(sd_floor);
        components.push(GaussianComponent::new(weight, means[ci], sd)?);
    }
    Ok(Gmm::from_components(components))
}

/// Refines `initial` against `histogram` by Levenberg-Marquardt.
///
/// Fails with `ConvergenceError` when the relative residual does not reach
/// `options.tolerance` within `options.max_iterations`; the error is
/// recoverable by retrying with a different seed, component count, or
/// tolerance.
pub fn fit(histogram: &Histogram, initial: &Gmm, options: &FitOptions) -> CoreResult<Gmm> {
    if initial.is_empty() {
        return Err(CoreError::validation("fit needs a non-empty initial guess"));
    }
    if options.sd_floor <= 0.0 {
        return Err(CoreError::validation("sd_floor must be positive"));
    }

    let centers = histogram.bin_centers();
    let target = DVector::from_column_slice(histogram.densities());
    let hist_norm = target.norm().max(f64::EPSILON);

    let mut params = pack(initial);
    project(&mut params, options.sd_floor);

    let mut residual = residual_vec(&params, centers, &target);
    let mut cost = energy_of(&residual, options.energy);
    let mut lambda = 1e-3;
    let mut iterations = 0;

    while iterations < options.max_iterations {
        if residual.norm() / hist_norm <= options.tolerance {
            break;
        }
        iterations += 1;

        let (jac, weighted_residual) = jacobian(&params, centers, &residual, options.energy);
        let jtj = jac.transpose() * &jac;
        let jtr = jac.transpose() * &weighted_residual;

        let mut stepped = false;
        for _ in 0..MAX_DAMPING_RETRIES {
            let mut damped = jtj.clone();
            for i in 0..damped.nrows() {
                let scale = jtj[(i, i)].max(1e-12);
                damped[(i, i)] += lambda * scale;
            }
            let rhs = -&jtr;
            let Some(step) = damped.lu().solve(&rhs) else {
                lambda *= 4.0;
                continue;
            };

            let mut candidate = params.clone();
            for (p, s) in candidate.iter_mut().zip(step.iter()) {
                *p += s;
            }
            project(&mut candidate, options.sd_floor);

            let cand_residual = residual_vec(&candidate, centers, &target);
            let cand_cost = energy_of(&cand_residual, options.energy);
            if cand_cost < cost {
                params = candidate;
                residual = cand_residual;
                cost = cand_cost;
                lambda = (lambda * 0.5).max(1e-12);
                stepped = true;
                break;
            }
            lambda *= 4.0;
        }

        if !stepped {
            // No downhill step at any damping level; the fit has stalled.
            break;
        }
    }

    let relative = residual.norm() / hist_norm;
    if relative > options.tolerance {
        return Err(CoreError::Convergence {
            iterations,
            residual: relative,
            tolerance: options.tolerance,
        });
    }

    let mut fitted = unpack(&params)?;
    if options.remove_negligible {
        fitted = prune_negligible(fitted, options.negligible_weight);
    }
    Ok(fitted)
}

/// Drops components lighter than `fraction` of total weight. Never returns
/// an empty mixture: if everything is negligible the heaviest component is
/// kept.
#[must_use]
pub fn prune_negligible(mixture: Gmm, fraction: f64) -> Gmm {
    let total = mixture.total_weight();
    if total <= 0.0 {
        return mixture;
    }
    let threshold = fraction * total;
    let kept: Vec<GaussianComponent> = mixture
        .components()
        .iter()
        .copied()
        .filter(|c| c.weight >= threshold)
        .collect();
    if kept.is_empty() {
        let heaviest = mixture
            .components()
            .iter()
            .copied()
            .max_by(|a, b| a.weight.total_cmp(&b.weight));
        return Gmm::from_components(heaviest.into_iter().collect());
    }
    Gmm::from_components(kept)
}

// ---------------------------------------------------------------------------
// Levenberg-Marquardt internals
// ---------------------------------------------------------------------------

fn pack(mixture: &Gmm) -> Vec<f64> {
    let mut params = Vec::with_capacity(mixture.len() * 3);
    for c in mixture.components() {
        params.push(c.weight);
        params.push(c.mean);
        params.push(c.sd);
    }
    params
}

fn unpack(params: &[f64]) -> CoreResult<Gmm> {
    let mut components = Vec::with_capacity(params.len() / 3);
    for chunk in params.chunks_exact(3) {
        components.push(GaussianComponent::new(chunk[0], chunk[1], chunk[2])?);
    }
    Ok(Gmm::from_components(components))
}

/// Clamps parameters back into the feasible region after a step.
fn project(params: &mut [f64], sd_floor: f64) {
    for chunk in params.chunks_exact_mut(3) {
        chunk[0] = chunk[0].max(0.0);
        chunk[2] = chunk[2].max(sd_floor);
    }
}

fn model_at(params: &[f64], x: f64) -> f64 {
    params
        .chunks_exact(3)
        .map(|c| {
            let z = (x - c[1]) / c[2];
            c[0] * (-0.5 * z * z).exp() / (c[2] * SQRT_TWO_PI)
        })
        .sum()
}

fn residual_vec(params: &[f64], centers: &[f64], target: &DVector<f64>) -> DVector<f64> {
    DVector::from_iterator(
        centers.len(),
        centers
            .iter()
            .enumerate()
            .map(|(i, &x)| model_at(params, x) - target[i]),
    )
}

fn energy_of(residual: &DVector<f64>, energy: EnergyKind) -> f64 {
    match energy {
        EnergyKind::DistanceSq => residual.iter().map(|r| r * r).sum(),
        EnergyKind::AbsDiff => residual.iter().map(|r| r.abs()).sum(),
    }
}

/// Builds the Jacobian of the residual vector. For `AbsDiff`, rows are
/// IRLS-reweighted by `1/sqrt(|r|)` so the squared problem approximates the
/// absolute one.
fn jacobian(
    params: &[f64],
    centers: &[f64],
    residual: &DVector<f64>,
    energy: EnergyKind,
) -> (DMatrix<f64>, DVector<f64>) {
    let n = centers.len();
    let p = params.len();
    let mut jac = DMatrix::zeros(n, p);
    let mut weighted = residual.clone();

    for (i, &x) in centers.iter().enumerate() {
        let row_weight = match energy {
            EnergyKind::DistanceSq => 1.0,
            EnergyKind::AbsDiff => 1.0 / residual[i].abs().max(1e-6).sqrt(),
        };
        for (j, c) in params.chunks_exact(3).enumerate() {
            let (w, mu, sd) = (c[0], c[1], c[2]);
            let z = (x - mu) / sd;
            let phi = (-0.5 * z * z).exp() / (sd * SQRT_TWO_PI);
            jac[(i, 3 * j)] = row_weight * phi;
            jac[(i, 3 * j + 1)] = row_weight * w * phi * z / sd;
            jac[(i, 3 * j + 2)] = row_weight * w * phi * (z * z - 1.0) / sd;
        }
        weighted[i] *= row_weight;
    }
    (jac, weighted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    fn two_component_truth() -> Gmm {
        Gmm::from_components(vec![
            GaussianComponent::new(0.6, -2.0, 0.5).unwrap(),
            GaussianComponent::new(0.4, 3.0, 0.8).unwrap(),
        ])
    }

    fn histogram_of(mixture: &Gmm, lo: f64, hi: f64, bins: usize) -> Histogram {
        let width = (hi - lo) / bins as f64;
        let centers: Vec<f64> = (0..bins).map(|i| lo + (i as f64 + 0.5) * width).collect();
        let densities = mixture.evaluate(&centers);
        Histogram::from_parts(centers, densities).unwrap()
    }

    #[test]
    fn test_fit_exact_initial_is_fixed_point() {
        let truth = two_component_truth();
        let hist = histogram_of(&truth, -6.0, 7.0, 200);

        let fitted = fit(&hist, &truth, &FitOptions::default()).unwrap();
        assert_eq!(fitted.len(), 2);
        for (f, t) in fitted.components().iter().zip(truth.components()) {
            assert_abs_diff_eq!(f.mean, t.mean, epsilon = 1e-6);
            assert_abs_diff_eq!(f.sd, t.sd, epsilon = 1e-6);
            assert_abs_diff_eq!(f.weight, t.weight, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_fit_recovers_perturbed_means() {
        let truth = two_component_truth();
        let hist = histogram_of(&truth, -6.0, 7.0, 200);

        let perturbed = Gmm::from_components(vec![
            GaussianComponent::new(0.5, -1.7, 0.6).unwrap(),
            GaussianComponent::new(0.5, 3.3, 0.7).unwrap(),
        ]);

        let options = FitOptions {
            tolerance: 0.02,
            ..FitOptions::default()
        };
        let fitted = fit(&hist, &perturbed, &options).unwrap().sorted_by_mean();
        assert_abs_diff_eq!(fitted.components()[0].mean, -2.0, epsilon = 0.1);
        assert_abs_diff_eq!(fitted.components()[1].mean, 3.0, epsilon = 0.1);
    }

    #[test]
    fn test_fit_abs_diff_energy_also_recovers() {
        let truth = two_component_truth();
        let hist = histogram_of(&truth, -6.0, 7.0, 200);

        let perturbed = Gmm::from_components(vec![
            GaussianComponent::new(0.6, -2.2, 0.5).unwrap(),
            GaussianComponent::new(0.4, 2.8, 0.8).unwrap(),
        ]);
        let options = FitOptions {
            energy: EnergyKind::AbsDiff,
            tolerance: 0.05,
            ..FitOptions::default()
        };
        let fitted = fit(&hist, &perturbed, &options).unwrap().sorted_by_mean();
        assert_abs_diff_eq!(fitted.components()[0].mean, -2.0, epsilon = 0.15);
        assert_abs_diff_eq!(fitted.components()[1].mean, 3.0, epsilon = 0.15);
    }

    #[test]
    fn test_fit_zero_budget_reports_convergence_error() {
        let truth = two_component_truth();
        let hist = histogram_of(&truth, -6.0, 7.0, 100);

        // Deliberately hopeless: far-off guess, no iterations allowed.
        let bad = Gmm::from_components(vec![GaussianComponent::new(1.0, 50.0, 0.3).unwrap()]);
        let options = FitOptions {
            max_iterations: 0,
            tolerance: 1e-6,
            ..FitOptions::default()
        };
        let err = fit(&hist, &bad, &options).unwrap_err();
        assert!(matches!(err, CoreError::Convergence { .. }));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_fit_rejects_empty_initial() {
        let hist = Histogram::from_parts(vec![0.0, 1.0], vec![0.5, 0.5]).unwrap();
        assert!(fit(&hist, &Gmm::new(), &FitOptions::default()).is_err());
    }

    #[test]
    fn test_prune_negligible_drops_light_components() {
        let mixture = Gmm::from_components(vec![
            GaussianComponent::new(1.0, 0.0, 1.0).unwrap(),
            GaussianComponent::new(1e-7, 5.0, 1.0).unwrap(),
        ]);
        let pruned = prune_negligible(mixture, 1e-3);
        assert_eq!(pruned.len(), 1);
        assert_relative_eq!(pruned.components()[0].mean, 0.0);
    }

    #[test]
    fn test_prune_never_empties_mixture() {
        let mixture = Gmm::from_components(vec![
            GaussianComponent::new(1e-9, 0.0, 1.0).unwrap(),
            GaussianComponent::new(2e-9, 5.0, 1.0).unwrap(),
        ]);
        let pruned = prune_negligible(mixture, 0.9);
        assert_eq!(pruned.len(), 1);
        assert_relative_eq!(pruned.components()[0].mean, 5.0);
    }

    #[test]
    fn test_initial_guess_is_deterministic() {
        let samples: Vec<f64> = (0..200)
            .map(|i| if i % 2 == 0 { -3.0 + f64::from(i % 10) * 0.05 } else { 4.0 + f64::from(i % 7) * 0.1 })
            .collect();
        let a = initial_guess(&samples, &[2], 7).unwrap();
        let b = initial_guess(&samples, &[2], 7).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_initial_guess_prefers_matching_count() {
        // Two clearly separated clusters: k=2 must beat k=1.
        let mut samples = Vec::new();
        for i in 0..100 {
            samples.push(-5.0 + f64::from(i) * 0.01);
            samples.push(5.0 + f64::from(i) * 0.01);
        }
        let guess = initial_guess(&samples, &[1, 2], 42).unwrap();
        assert_eq!(guess.len(), 2);

        let sorted = guess.sorted_by_mean();
        assert!(sorted.components()[0].mean < 0.0);
        assert!(sorted.components()[1].mean > 0.0);
    }

    #[test]
    fn test_initial_guess_rejects_unusable_candidates() {
        let samples = vec![1.0, 2.0, 3.0];
        assert!(initial_guess(&samples, &[0], 1).is_err());
        assert!(initial_guess(&samples, &[10], 1).is_err());
        assert!(initial_guess(&samples, &[], 1).is_err());
    }
}
