//! Multi-resolution reconstruction family.
//!
//! One master projection is subsampled into several angular densities, and
//! each density is reconstructed by an independent worker with its own
//! engine handle. Workers share nothing but the read-only master sinogram
//! and the engine itself.

use std::collections::BTreeMap;
use std::thread;

use limitomo_core::{
    AlgorithmKind, CoreError, CoreResult, GeometryInput, GeometryKind, Sinogram,
    TomographyEngine, Volume, VolumeGeometry,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::projector::Projector;
use crate::reconstructor::{Reconstructor, SinogramInput};

/// Family run parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FamilyConfig {
    /// Angular subsampling factors, one reconstruction per factor. Factor 1
    /// is the full angle set.
    pub factors: Vec<usize>,
    /// Iterative algorithm for every member.
    pub algorithm: AlgorithmKind,
    /// Iteration count for every member.
    pub iterations: usize,
    /// Whether members restrict updates to the inscribed cylinder.
    pub circle_mask: bool,
}

impl Default for FamilyConfig {
    fn default() -> Self {
        Self {
            factors: vec![1, 2, 3, 4],
            algorithm: AlgorithmKind::Sirt,
            iterations: 100,
            circle_mask: true,
        }
    }
}

/// One completed family reconstruction.
#[derive(Debug, Clone)]
pub struct FamilyMember {
    /// The subsampling factor this member was reconstructed at.
    pub factor: usize,
    /// Display label, the angle count as text.
    pub label: String,
    /// Number of angles used.
    pub angle_count: usize,
    /// Angular density, `1 / factor`.
    pub density: f64,
    /// The reconstructed volume.
    pub volume: Volume,
}

/// Projects `volume` over `angles` once, then reconstructs the family from
/// that master projection. See [`run_family_from_master`].
pub fn run_family(
    engine: &dyn TomographyEngine,
    volume: &Volume,
    angles: &[f64],
    config: &FamilyConfig,
) -> CoreResult<BTreeMap<usize, FamilyMember>> {
    let mut projector = Projector::new(engine);
    projector.set_input_volume(volume)?;
    let master = projector.project(angles.to_vec(), GeometryKind::Parallel3d)?;
    run_family_from_master(engine, &master, volume.geometry(), config)
}

/// Reconstructs one volume per subsampling factor from a shared master
/// sinogram.
///
/// Members run as parallel scoped workers; each owns its engine refs
/// exclusively and releases them before finishing. On failure the first
/// failing factor (in configuration order) is reported and no partial family
/// is returned.
pub fn run_family_from_master(
    engine: &dyn TomographyEngine,
    master: &Sinogram,
    target: VolumeGeometry,
    config: &FamilyConfig,
) -> CoreResult<BTreeMap<usize, FamilyMember>> {
    validate_factors(&config.factors)?;

    let mut results: Vec<(usize, CoreResult<FamilyMember>)> =
        Vec::with_capacity(config.factors.len());
    thread::scope(|scope| {
        let workers: Vec<_> = config
            .factors
            .iter()
            .map(|&factor| {
                let worker =
                    scope.spawn(move || reconstruct_member(engine, master, target, factor, config));
                (factor, worker)
            })
            .collect();
        for (factor, worker) in workers {
            let result = worker.join().unwrap_or_else(|_| {
                Err(CoreError::resource(
                    "family reconstruction",
                    format!("worker for factor {factor} panicked"),
                ))
            });
            results.push((factor, result));
        }
    });

    let mut family = BTreeMap::new();
    for (factor, result) in results {
        match result {
            Ok(member) => {
                family.insert(factor, member);
            }
            Err(err) => {
                error!(factor, %err, "family member reconstruction failed");
                return Err(tag_factor(err, factor));
            }
        }
    }
    info!(
        members = family.len(),
        algorithm = %config.algorithm,
        "family reconstruction complete"
    );
    Ok(family)
}

fn validate_factors(factors: &[usize]) -> CoreResult<()> {
    if factors.is_empty() {
        return Err(CoreError::validation("at least one subsampling factor required"));
    }
    if factors.contains(&0) {
        return Err(CoreError::validation("subsampling factors must be >= 1"));
    }
    let mut seen = factors.to_vec();
    seen.sort_unstable();
    seen.dedup();
    if seen.len() != factors.len() {
        return Err(CoreError::validation("duplicate subsampling factor"));
    }
    Ok(())
}

fn reconstruct_member(
    engine: &dyn TomographyEngine,
    master: &Sinogram,
    target: VolumeGeometry,
    factor: usize,
    config: &FamilyConfig,
) -> CoreResult<FamilyMember> {
    let subsampled = master.subsample(factor)?;
    let angle_count = subsampled.geometry().angle_count();
    let density = 1.0 / factor as f64;

    let mut reconstructor = Reconstructor::new(engine);
    let result = (|| {
        reconstructor.set_reconstruction_geometry(GeometryInput::ByShape {
            shape: target.shape(),
            circle_mask: config.circle_mask,
        })?;
        reconstructor.set_input_sinogram(SinogramInput::Data(subsampled))?;
        reconstructor.reconstruct(config.algorithm, config.iterations)
    })();

    match result {
        Ok(volume) => Ok(FamilyMember {
            factor,
            label: angle_count.to_string(),
            angle_count,
            density,
            volume,
        }),
        Err(err) => {
            if let Err(release_err) = reconstructor.release_all() {
                error!(factor, %release_err, "cleanup after member failure also failed");
            }
            Err(err)
        }
    }
}

/// Prefixes message-carrying variants with the failing factor so callers can
/// report it. Convergence failures keep their numeric payload untouched.
fn tag_factor(err: CoreError, factor: usize) -> CoreError {
    match err {
        CoreError::Validation { message } => CoreError::Validation {
            message: format!("factor {factor}: {message}"),
        },
        CoreError::Precondition { operation, message } => CoreError::Precondition {
            operation,
            message: format!("factor {factor}: {message}"),
        },
        CoreError::NotReady { message } => CoreError::NotReady {
            message: format!("factor {factor}: {message}"),
        },
        CoreError::Matching { message } => CoreError::Matching {
            message: format!("factor {factor}: {message}"),
        },
        CoreError::Resource { operation, message } => CoreError::Resource {
            operation,
            message: format!("factor {factor}: {message}"),
        },
        other => other,
    }
}
