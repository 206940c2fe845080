//! # limitomo-core
//!
//! Core types, traits, and utilities for the limitomo limited-angle
//! tomography toolkit.
//!
//! This crate provides the foundational building blocks used throughout the
//! limitomo workspace:
//!
//! - **Geometry & Data Types**: [`VolumeGeometry`], [`ProjectionGeometry`],
//!   [`Volume`], [`Sinogram`], and [`Mask`] describing reconstruction targets
//!   and projection data.
//!
//! - **Error Taxonomy**: [`CoreError`] with the six failure kinds shared by
//!   every pipeline stage, and the [`CoreResult`] alias.
//!
//! - **Traits**: [`TomographyEngine`], the opaque device-side
//!   projection/reconstruction service, and [`VolumeStore`] for persistence.
//!
//! - **Utilities**: angle generation, angular subsampling, and per-angle
//!   projection normalization.
//!
//! ## Example
//!
//! ```rust
//! use limitomo_core::{ProjectionGeometry, GeometryKind, VolumeGeometry};
//! use limitomo_core::utils::angle_span;
//!
//! let volume = VolumeGeometry::new(128, 128, 4).unwrap();
//! let proj = ProjectionGeometry::circumscribing(
//!     &volume,
//!     angle_span(64),
//!     GeometryKind::Parallel3d,
//! )
//! .unwrap();
//!
//! // Wide enough for the circumscribing circle at any rotation.
//! assert_eq!(proj.detector_cols(), 182);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod traits;
pub mod types;
pub mod utils;

// Re-export commonly used types at the crate root
pub use error::{CoreError, CoreResult};
pub use traits::{AlgorithmRef, AlgorithmSpec, DataRef, TomographyEngine, VolumeStore};
pub use types::{
    AlgorithmKind, GeometryInput, GeometryKind, Mask, ProjectionGeometry, Sinogram, Volume,
    VolumeGeometry,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports.
///
/// ```rust
/// use limitomo_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::error::{CoreError, CoreResult};
    pub use crate::traits::{AlgorithmRef, AlgorithmSpec, DataRef, TomographyEngine, VolumeStore};
    pub use crate::types::{
        AlgorithmKind, GeometryInput, GeometryKind, Mask, ProjectionGeometry, Sinogram, Volume,
        VolumeGeometry,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_valid() {
        assert!(!VERSION.is_empty());
    }
}
