//! Limited-angle tomography reconstruction and stochastic refinement.
//!
//! This crate hosts the device-facing side of the limitomo workspace:
//!
//! - A reference CPU tomography engine behind the opaque engine trait
//! - Scoped engine handles guaranteeing paired allocate/release
//! - Forward projection and iterative reconstruction front-ends
//! - The multi-resolution family orchestrator
//! - Prior estimation from cross-resolution mixture trends
//! - The simulated annealing refinement loop
//!
//! # Example
//!
//! ```
//! use limitomo_core::{utils, GeometryKind, TomographyEngine, Volume, VolumeGeometry};
//! use limitomo_recon::{CpuEngine, Projector};
//!
//! let engine = CpuEngine::new();
//! let volume = Volume::uniform(VolumeGeometry::new(8, 8, 1)?, 1.0);
//!
//! let mut projector = Projector::new(&engine);
//! projector.set_input_volume(&volume)?;
//! let sinogram = projector.project(utils::angle_span(12), GeometryKind::Parallel3d)?;
//!
//! assert_eq!(sinogram.geometry().angle_count(), 12);
//! assert_eq!(engine.live_allocations(), 0);
//! # Ok::<(), limitomo_core::CoreError>(())
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod anneal;
pub mod engine;
pub mod family;
pub mod handle;
pub mod prior;
pub mod projector;
pub mod reconstructor;
pub mod storage;

use std::collections::BTreeMap;

use limitomo_core::{
    CoreError, CoreResult, GeometryKind, Mask, Sinogram, TomographyEngine, Volume, VolumeGeometry,
};
use limitomo_gmm::{
    fit, full_resolution_mixture, initial_guess, FitOptions, Gmm, Histogram, DEFAULT_BINS,
    DEFAULT_CANDIDATES,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub use anneal::{
    acceptance_probability, AnnealConfig, AnnealingOptimizer, AnnealingOutcome, AnnealingPhase,
    AnnealingState, Transition, INITIAL_ENERGY,
};
pub use engine::CpuEngine;
pub use family::{run_family, run_family_from_master, FamilyConfig, FamilyMember};
pub use handle::EngineHandle;
pub use prior::{estimate_prior, PriorConfig};
pub use projector::Projector;
pub use reconstructor::{Reconstructor, SinogramInput};
pub use storage::{unique_path, MemberReport, RawVolumeStore, RunReport};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Convenience re-exports for downstream crates.
pub mod prelude {
    pub use crate::anneal::{AnnealConfig, AnnealingOptimizer, AnnealingOutcome};
    pub use crate::engine::CpuEngine;
    pub use crate::family::{run_family, FamilyConfig, FamilyMember};
    pub use crate::handle::EngineHandle;
    pub use crate::projector::Projector;
    pub use crate::reconstructor::{Reconstructor, SinogramInput};
    pub use crate::storage::RawVolumeStore;
    pub use crate::{LevelSummary, PipelineConfig, RefinementOutcome, RefinementPipeline};
    pub use limitomo_core::{CoreError, CoreResult, TomographyEngine, VolumeStore};
}

/// Full-pipeline parameters: family orchestration, per-level mixture
/// fitting, prior estimation, and annealing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Multi-resolution family settings.
    pub family: FamilyConfig,
    /// Component counts tried for each level's initial guess.
    pub component_candidates: Vec<usize>,
    /// Histogram resolution for mixture fitting.
    pub histogram_bins: usize,
    /// Upper bound on voxel samples drawn per level (0 keeps all).
    pub sample_cap: usize,
    /// Mixture refinement settings.
    pub fit: FitOptions,
    /// Seed for the clustering initial guess.
    pub seed: u64,
    /// Whether to bias annealing with the trend-derived prior field.
    pub use_prior: bool,
    /// Prior smoothing and transfer settings.
    pub prior: PriorConfig,
    /// Annealing schedule.
    pub anneal: AnnealConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            family: FamilyConfig::default(),
            component_candidates: DEFAULT_CANDIDATES.to_vec(),
            histogram_bins: DEFAULT_BINS,
            sample_cap: 100_000,
            fit: FitOptions::default(),
            seed: 0,
            use_prior: true,
            prior: PriorConfig::default(),
            anneal: AnnealConfig::default(),
        }
    }
}

/// Per-level statistical summary, the external rendering surface for one
/// family member.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LevelSummary {
    /// Angular subsampling factor.
    pub factor: usize,
    /// Display label (the member's angle count).
    pub label: String,
    /// Angles used by this level.
    pub angle_count: usize,
    /// Angular density relative to the full acquisition.
    pub density: f64,
    /// Mixture fit to the level's voxel values.
    pub mixture: Gmm,
    /// Histogram the mixture was fit against.
    pub histogram: Histogram,
}

/// Everything a finished refinement run produced.
#[derive(Debug)]
pub struct RefinementOutcome {
    /// The reconstruction family, keyed by factor.
    pub family: BTreeMap<usize, FamilyMember>,
    /// Per-level mixture summaries, ordered by ascending factor.
    pub levels: Vec<LevelSummary>,
    /// Trend-extrapolated full-resolution mixture.
    pub extrapolated: Gmm,
    /// The annealing chain's result.
    pub annealing: AnnealingOutcome,
}

impl RefinementOutcome {
    /// The refined volume.
    #[must_use]
    pub fn refined(&self) -> &Volume {
        &self.annealing.volume
    }
}

/// End-to-end coordinator: family reconstruction, per-level mixture fits,
/// trend extrapolation, prior estimation, and annealing refinement.
pub struct RefinementPipeline<'e> {
    engine: &'e dyn TomographyEngine,
    config: PipelineConfig,
}

impl<'e> RefinementPipeline<'e> {
    /// Creates a pipeline over `engine`.
    pub fn new(engine: &'e dyn TomographyEngine, config: PipelineConfig) -> Self {
        Self { engine, config }
    }

    /// Projects `volume` over `angles`, then refines from that master
    /// projection. See [`RefinementPipeline::run_from_master`].
    pub fn run(&self, volume: &Volume, angles: &[f64]) -> CoreResult<RefinementOutcome> {
        let mut projector = Projector::new(self.engine);
        projector.set_input_volume(volume)?;
        let master = projector.project(angles.to_vec(), GeometryKind::Parallel3d)?;
        self.run_from_master(&master, volume.geometry())
    }

    /// Runs the whole refinement flow from an acquired master sinogram.
    pub fn run_from_master(
        &self,
        master: &Sinogram,
        target: VolumeGeometry,
    ) -> CoreResult<RefinementOutcome> {
        let family = family::run_family_from_master(self.engine, master, target, &self.config.family)?;

        let mut levels = Vec::with_capacity(family.len());
        for member in family.values() {
            levels.push(self.summarize(member)?);
        }

        let by_density: Vec<(f64, Gmm)> = levels
            .iter()
            .map(|level| (level.density, level.mixture.clone()))
            .collect();
        let extrapolated = full_resolution_mixture(&by_density)?;

        // The densest member seeds the refinement chain.
        let reference = levels
            .iter()
            .max_by(|a, b| a.density.total_cmp(&b.density))
            .ok_or_else(|| CoreError::validation("family produced no members"))?;
        let base = &family[&reference.factor];

        let prior = if self.config.use_prior {
            Some(prior::estimate_prior(
                &base.volume,
                &extrapolated,
                &reference.mixture,
                &self.config.prior,
            )?)
        } else {
            None
        };

        let optimizer = AnnealingOptimizer::new(self.engine, self.config.anneal.clone())?;
        let annealing = optimizer.refine(&base.volume, master, prior.as_ref())?;

        info!(
            levels = levels.len(),
            components = extrapolated.len(),
            accepted = annealing.accepted,
            energy = annealing.state.energy,
            "refinement pipeline finished"
        );
        Ok(RefinementOutcome {
            family,
            levels,
            extrapolated,
            annealing,
        })
    }

    fn summarize(&self, member: &FamilyMember) -> CoreResult<LevelSummary> {
        let samples = support_samples(&member.volume, self.config.sample_cap);
        let histogram = Histogram::from_samples(&samples, self.config.histogram_bins)?;
        let guess = initial_guess(&samples, &self.config.component_candidates, self.config.seed)?;
        let mixture = fit(&histogram, &guess, &self.config.fit)?;
        debug!(
            factor = member.factor,
            components = mixture.len(),
            "level mixture fit"
        );
        Ok(LevelSummary {
            factor: member.factor,
            label: member.label.clone(),
            angle_count: member.angle_count,
            density: member.density,
            mixture,
            histogram,
        })
    }
}

/// Voxel values inside the inscribed cylinder, strided down deterministically
/// to at most `cap` samples.
fn support_samples(volume: &Volume, cap: usize) -> Vec<f64> {
    let mask = Mask::inscribed_cylinder(volume.geometry());
    let inside: Vec<f64> = volume
        .data()
        .iter()
        .zip(mask.data().iter())
        .filter(|&(_, &m)| m != 0)
        .map(|(&v, _)| f64::from(v))
        .collect();
    if cap == 0 || inside.len() <= cap {
        return inside;
    }
    let stride = inside.len().div_ceil(cap);
    inside.into_iter().step_by(stride).collect()
}
