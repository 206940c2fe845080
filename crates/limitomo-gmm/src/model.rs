//! Gaussian mixture model value type and its operations.
//!
//! Mixtures are plain values: sorting returns a new mixture instead of
//! mutating shared state, which keeps concurrent family processing free of
//! aliased model objects.

use limitomo_core::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};

/// sqrt(2 * pi)
pub(crate) const SQRT_TWO_PI: f64 = 2.506_628_274_631_000_5;

/// One weighted Gaussian component.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GaussianComponent {
    /// Mixing weight, non-negative.
    pub weight: f64,
    /// Component center.
    pub mean: f64,
    /// Standard deviation, strictly positive.
    pub sd: f64,
}

impl GaussianComponent {
    /// Creates a component, rejecting negative weight and non-positive sd.
    pub fn new(weight: f64, mean: f64, sd: f64) -> CoreResult<Self> {
        if !weight.is_finite() || weight < 0.0 {
            return Err(CoreError::validation(format!(
                "component weight must be finite and non-negative, got {weight}"
            )));
        }
        if !mean.is_finite() {
            return Err(CoreError::validation(format!(
                "component mean must be finite, got {mean}"
            )));
        }
        if !sd.is_finite() || sd <= 0.0 {
            return Err(CoreError::validation(format!(
                "component standard deviation must be positive, got {sd}"
            )));
        }
        Ok(Self { weight, mean, sd })
    }

    /// Weighted normal density at `x`. The sd > 0 invariant rules out any
    /// division-by-zero path.
    #[must_use]
    pub fn density(&self, x: f64) -> f64 {
        let z = (x - self.mean) / self.sd;
        self.weight * (-0.5 * z * z).exp() / (self.sd * SQRT_TWO_PI)
    }
}

/// Ordered collection of Gaussian components with a derived total weight.
///
/// Component order is semantically insignificant unless explicitly sorted.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Gmm {
    components: Vec<GaussianComponent>,
}

impl Gmm {
    /// Empty mixture.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mixture from prebuilt components.
    #[must_use]
    pub fn from_components(components: Vec<GaussianComponent>) -> Self {
        Self { components }
    }

    /// Appends a component; `ValidationError` if `weight < 0` or `sd <= 0`.
    pub fn add_component(&mut self, weight: f64, mean: f64, sd: f64) -> CoreResult<()> {
        self.components.push(GaussianComponent::new(weight, mean, sd)?);
        Ok(())
    }

    /// The components in their current order.
    #[must_use]
    pub fn components(&self) -> &[GaussianComponent] {
        &self.components
    }

    /// Number of components.
    #[must_use]
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Whether the mixture has no components.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Sum of component weights.
    #[must_use]
    pub fn total_weight(&self) -> f64 {
        self.components.iter().map(|c| c.weight).sum()
    }

    /// New mixture with components stably reordered ascending by mean.
    /// Idempotent: sorting a sorted mixture returns the same sequence.
    #[must_use]
    pub fn sorted_by_mean(&self) -> Self {
        let mut components = self.components.clone();
        components.sort_by(|a, b| a.mean.total_cmp(&b.mean));
        Self { components }
    }

    /// Mixture density at a single point.
    #[must_use]
    pub fn evaluate_one(&self, x: f64) -> f64 {
        self.components.iter().map(|c| c.density(x)).sum()
    }

    /// Mixture density at each point of `xs`. Linear in component weights:
    /// scaling every weight by `c` scales every output by `c`.
    #[must_use]
    pub fn evaluate(&self, xs: &[f64]) -> Vec<f64> {
        xs.iter().map(|&x| self.evaluate_one(x)).collect()
    }
}

/// Per-attribute views of a mixture collection, component order aligned
/// within each mixture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GmmAttributeSeries {
    /// Per-mixture mean sequences.
    pub mean: Vec<Vec<f64>>,
    /// Per-mixture standard deviation sequences.
    pub sd: Vec<Vec<f64>>,
    /// Per-mixture weight sequences.
    pub weight: Vec<Vec<f64>>,
}

/// Produces, for each attribute, one ordered sequence per mixture.
///
/// With `by_mean` set, every mixture is locally sorted ascending by mean
/// before extraction, so mixtures with the same underlying components line
/// up at matching indices. This is a per-mixture sort only; aligning
/// different component sets across resolutions is the matcher's job.
#[must_use]
pub fn sort_gmms(mixtures: &[Gmm], by_mean: bool) -> GmmAttributeSeries {
    let ordered: Vec<Gmm> = mixtures
        .iter()
        .map(|m| if by_mean { m.sorted_by_mean() } else { m.clone() })
        .collect();

    GmmAttributeSeries {
        mean: ordered
            .iter()
            .map(|m| m.components().iter().map(|c| c.mean).collect())
            .collect(),
        sd: ordered
            .iter()
            .map(|m| m.components().iter().map(|c| c.sd).collect())
            .collect(),
        weight: ordered
            .iter()
            .map(|m| m.components().iter().map(|c| c.weight).collect())
            .collect(),
    }
}
