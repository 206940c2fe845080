//! Cross-resolution component tracking and extrapolation.
//!
//! Reconstructions from subsampled angle sets yield one mixture per angular
//! density level. Components are tracked across levels by matching every
//! level onto the densest one, each attribute is fitted with an ordinary
//! least squares line over density, and the line is evaluated at density 1.0
//! to predict the full-resolution mixture.

use limitomo_core::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};

use crate::matching::{match_components, MatchPolicy};
use crate::model::{GaussianComponent, Gmm};

/// Angular density of an unsubsampled acquisition.
pub const FULL_RESOLUTION_DENSITY: f64 = 1.0;

/// Smallest standard deviation an extrapolated component may carry.
pub const MIN_TREND_SD: f64 = 1e-6;

/// One observation of a tracked component at some angular density.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackPoint {
    /// Angular density of the level, `1 / subsample_factor`.
    pub density: f64,
    /// The component observed at this level.
    pub component: GaussianComponent,
}

/// A reference component followed across density levels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentTrack {
    /// Component index in the densest level's mixture.
    pub reference_index: usize,
    /// Observations ordered by ascending density.
    pub points: Vec<TrackPoint>,
}

/// Least-squares line `y = intercept + slope * x`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearTrend {
    /// Value at x = 0.
    pub intercept: f64,
    /// Change of y per unit x.
    pub slope: f64,
}

impl LinearTrend {
    /// Evaluates the line at `x`.
    #[must_use]
    pub fn at(&self, x: f64) -> f64 {
        self.intercept + self.slope * x
    }
}

/// Per-attribute trends of one tracked component.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComponentTrend {
    /// Component index in the densest level's mixture.
    pub reference_index: usize,
    /// Weight over density.
    pub weight: LinearTrend,
    /// Mean over density.
    pub mean: LinearTrend,
    /// Standard deviation over density.
    pub sd: LinearTrend,
}

/// Ordinary least squares line through `(xs, ys)`.
///
/// A single point or an x-range without spread yields a constant line at the
/// mean of `ys`.
pub fn linear_fit(xs: &[f64], ys: &[f64]) -> CoreResult<LinearTrend> {
    if xs.is_empty() || xs.len() != ys.len() {
        return Err(CoreError::validation(format!(
            "linear fit needs equal non-empty series, got {} xs and {} ys",
            xs.len(),
            ys.len()
        )));
    }
    let n = xs.len() as f64;
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = ys.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var = 0.0;
    for (&x, &y) in xs.iter().zip(ys) {
        cov += (x - mean_x) * (y - mean_y);
        var += (x - mean_x) * (x - mean_x);
    }
    if var < 1e-12 {
        return Ok(LinearTrend {
            intercept: mean_y,
            slope: 0.0,
        });
    }
    let slope = cov / var;
    Ok(LinearTrend {
        intercept: mean_y - slope * mean_x,
        slope,
    })
}

/// Tracks components across density levels.
///
/// The level with the highest density is the reference; every other level is
/// matched onto it partially. A reference component contributes its own
/// observation plus one per level where a partner was found.
pub fn build_tracks(levels: &[(f64, Gmm)]) -> CoreResult<Vec<ComponentTrack>> {
    if levels.is_empty() {
        return Err(CoreError::validation("component tracking needs at least one level"));
    }
    for (density, _) in levels {
        if !density.is_finite() || *density <= 0.0 {
            return Err(CoreError::validation(format!(
                "angular density must be positive and finite, got {density}"
            )));
        }
    }

    let reference_at = levels
        .iter()
        .enumerate()
        .max_by(|(_, (da, _)), (_, (db, _))| da.total_cmp(db))
        .map(|(i, _)| i)
        .unwrap_or(0);
    let (reference_density, reference) = &levels[reference_at];

    let mut tracks: Vec<ComponentTrack> = (0..reference.len())
        .map(|reference_index| ComponentTrack {
            reference_index,
            points: vec![TrackPoint {
                density: *reference_density,
                component: reference.components()[reference_index],
            }],
        })
        .collect();

    for (level_at, (density, mixture)) in levels.iter().enumerate() {
        if level_at == reference_at {
            continue;
        }
        let matched = match_components(reference, mixture, MatchPolicy::Partial)?;
        for pair in &matched.pairs {
            tracks[pair.a_index].points.push(TrackPoint {
                density: *density,
                component: mixture.components()[pair.b_index],
            });
        }
    }

    for track in &mut tracks {
        track.points.sort_by(|p, q| p.density.total_cmp(&q.density));
    }
    Ok(tracks)
}

/// Fits weight, mean and sd lines over density for every track.
pub fn fit_trends(tracks: &[ComponentTrack]) -> CoreResult<Vec<ComponentTrend>> {
    tracks
        .iter()
        .map(|track| {
            let densities: Vec<f64> = track.points.iter().map(|p| p.density).collect();
            let weights: Vec<f64> = track.points.iter().map(|p| p.component.weight).collect();
            let means: Vec<f64> = track.points.iter().map(|p| p.component.mean).collect();
            let sds: Vec<f64> = track.points.iter().map(|p| p.component.sd).collect();
            Ok(ComponentTrend {
                reference_index: track.reference_index,
                weight: linear_fit(&densities, &weights)?,
                mean: linear_fit(&densities, &means)?,
                sd: linear_fit(&densities, &sds)?,
            })
        })
        .collect()
}

/// Evaluates trends at `density`, flooring weights at zero and standard
/// deviations at [`MIN_TREND_SD`].
pub fn extrapolate(trends: &[ComponentTrend], density: f64) -> CoreResult<Gmm> {
    let mut components = Vec::with_capacity(trends.len());
    for trend in trends {
        let weight = trend.weight.at(density).max(0.0);
        let mean = trend.mean.at(density);
        let sd = trend.sd.at(density).max(MIN_TREND_SD);
        components.push(GaussianComponent::new(weight, mean, sd)?);
    }
    Ok(Gmm::from_components(components))
}

/// Tracks, fits and extrapolates in one call: the mixture predicted at
/// density 1.0 from the given levels.
pub fn full_resolution_mixture(levels: &[(f64, Gmm)]) -> CoreResult<Gmm> {
    let tracks = build_tracks(levels)?;
    let trends = fit_trends(&tracks)?;
    extrapolate(&trends, FULL_RESOLUTION_DENSITY)
}
