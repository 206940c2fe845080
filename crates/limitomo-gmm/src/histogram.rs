//! Density-normalized intensity histograms.

use limitomo_core::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};

/// Default bin count for reconstruction intensity histograms.
pub const DEFAULT_BINS: usize = 200;

/// Empirical density histogram with midpoint bin centers.
///
/// Densities are normalized so the histogram integrates to one, making them
/// directly comparable to a unit-weight mixture's `evaluate` output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    bin_centers: Vec<f64>,
    densities: Vec<f64>,
    bin_width: f64,
}

impl Histogram {
    /// Builds a density histogram over the sample range of `values`.
    pub fn from_samples(values: &[f64], bins: usize) -> CoreResult<Self> {
        if values.is_empty() {
            return Err(CoreError::validation("histogram needs at least one sample"));
        }
        if bins == 0 {
            return Err(CoreError::validation("histogram bin count must be >= 1"));
        }

        let mut lo = f64::INFINITY;
        let mut hi = f64::NEG_INFINITY;
        for &v in values {
            if !v.is_finite() {
                return Err(CoreError::validation("histogram samples must be finite"));
            }
            lo = lo.min(v);
            hi = hi.max(v);
        }
        // Degenerate all-equal input still gets a usable unit-wide range.
        if hi - lo < f64::EPSILON {
            lo -= 0.5;
            hi += 0.5;
        }

        let bin_width = (hi - lo) / bins as f64;
        let mut counts = vec![0usize; bins];
        for &v in values {
            let idx = ((v - lo) / bin_width) as usize;
            counts[idx.min(bins - 1)] += 1;
        }

        let total = values.len() as f64;
        let densities = counts
            .iter()
            .map(|&c| c as f64 / (total * bin_width))
            .collect();
        let bin_centers = (0..bins)
            .map(|i| lo + (i as f64 + 0.5) * bin_width)
            .collect();

        Ok(Self {
            bin_centers,
            densities,
            bin_width,
        })
    }

    /// Wraps externally computed centers and densities (e.g. histogram data
    /// handed across the visualization boundary).
    pub fn from_parts(bin_centers: Vec<f64>, densities: Vec<f64>) -> CoreResult<Self> {
        if bin_centers.is_empty() {
            return Err(CoreError::validation("histogram needs at least one bin"));
        }
        if bin_centers.len() != densities.len() {
            return Err(CoreError::validation(format!(
                "bin center count {} does not match density count {}",
                bin_centers.len(),
                densities.len()
            )));
        }
        let bin_width = if bin_centers.len() > 1 {
            bin_centers[1] - bin_centers[0]
        } else {
            1.0
        };
        Ok(Self {
            bin_centers,
            densities,
            bin_width,
        })
    }

    /// Midpoint of every bin, ascending.
    #[must_use]
    pub fn bin_centers(&self) -> &[f64] {
        &self.bin_centers
    }

    /// Density value of every bin.
    #[must_use]
    pub fn densities(&self) -> &[f64] {
        &self.densities
    }

    /// Width of one bin.
    #[must_use]
    pub fn bin_width(&self) -> f64 {
        self.bin_width
    }

    /// Number of bins.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bin_centers.len()
    }

    /// Whether the histogram has no bins.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bin_centers.is_empty()
    }

    /// L2 norm of the density vector.
    #[must_use]
    pub fn density_norm(&self) -> f64 {
        self.densities.iter().map(|d| d * d).sum::<f64>().sqrt()
    }
}
