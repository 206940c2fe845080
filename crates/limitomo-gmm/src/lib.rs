//! Gaussian mixture modeling for grey-value distributions.
//!
//! This crate covers the statistical side of multi-resolution
//! reconstruction refinement:
//!
//! - Mixture and component value types with density evaluation
//! - Histogram construction from voxel samples
//! - Clustered initial guesses and Levenberg-Marquardt fitting
//! - Minimal-cost component matching between mixtures
//! - Cross-resolution tracking and linear extrapolation of component
//!   attributes
//!
//! # Example
//!
//! ```
//! use limitomo_gmm::{GaussianComponent, Gmm};
//!
//! let mixture = Gmm::from_components(vec![
//!     GaussianComponent::new(10.0, 5.0, 3.0)?,
//!     GaussianComponent::new(2.0, -3.0, 1.0)?,
//!     GaussianComponent::new(5.0, 0.0, 10.0)?,
//! ]);
//!
//! let sorted = mixture.sorted_by_mean();
//! assert_eq!(sorted.components()[0].mean, -3.0);
//! assert_eq!(sorted.components()[2].mean, 5.0);
//! # Ok::<(), limitomo_core::CoreError>(())
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod fitter;
pub mod histogram;
pub mod matching;
pub mod model;
pub mod trend;

pub use fitter::{fit, initial_guess, prune_negligible, EnergyKind, FitOptions, DEFAULT_CANDIDATES};
pub use histogram::{Histogram, DEFAULT_BINS};
pub use matching::{
    component_distance, match_components, ComponentMatch, MatchPolicy, MatchedPair,
};
pub use model::{sort_gmms, GaussianComponent, Gmm, GmmAttributeSeries};
pub use trend::{
    build_tracks, extrapolate, fit_trends, full_resolution_mixture, linear_fit, ComponentTrack,
    ComponentTrend, LinearTrend, TrackPoint,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Convenience re-exports for downstream crates.
pub mod prelude {
    pub use crate::fitter::{fit, initial_guess, EnergyKind, FitOptions};
    pub use crate::histogram::Histogram;
    pub use crate::matching::{match_components, ComponentMatch, MatchPolicy};
    pub use crate::model::{sort_gmms, GaussianComponent, Gmm, GmmAttributeSeries};
    pub use crate::trend::{full_resolution_mixture, ComponentTrack, ComponentTrend};
    pub use limitomo_core::{CoreError, CoreResult};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
