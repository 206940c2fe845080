//! Abstract seams: the opaque tomography engine and volume storage.
//!
//! The engine trait mirrors a device-side service: data objects live in the
//! engine's own table and are addressed through opaque integer refs. Callers
//! never hold device memory directly; ownership discipline is layered on top
//! by the engine handle in `limitomo-recon`.

use std::path::Path;

use crate::error::CoreResult;
use crate::types::{AlgorithmKind, ProjectionGeometry, Sinogram, Volume, VolumeGeometry};

/// Opaque reference to a device-resident data object (volume, sinogram, or
/// mask).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DataRef(u64);

impl DataRef {
    /// Wraps a raw engine id.
    #[must_use]
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw engine id.
    #[must_use]
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for DataRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "data#{}", self.0)
    }
}

/// Opaque reference to a configured algorithm instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AlgorithmRef(u64);

impl AlgorithmRef {
    /// Wraps a raw engine id.
    #[must_use]
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw engine id.
    #[must_use]
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for AlgorithmRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "alg#{}", self.0)
    }
}

/// Fully-bound algorithm instance description.
///
/// The algorithm consumes the three data refs; they must stay alive until the
/// algorithm instance is released.
#[derive(Debug, Clone, Copy)]
pub struct AlgorithmSpec {
    /// Which iterative method to run.
    pub kind: AlgorithmKind,
    /// Reconstruction target volume, updated in place.
    pub target: DataRef,
    /// Observed projection data.
    pub sinogram: DataRef,
    /// Optional support constraint: updates are restricted to nonzero voxels
    /// of this volume.
    pub mask: Option<DataRef>,
}

/// Device-side tomography service.
///
/// Implementations own every data object they allocate. Refs are opaque;
/// releasing an unknown or already-released ref is a no-op, so callers can
/// layer idempotent-release discipline on top without tracking engine
/// internals. All methods fail fast; none may block indefinitely.
pub trait TomographyEngine: Send + Sync {
    /// Allocates a volume object, optionally uploading initial data.
    /// `ValidationError` if `data` is present with a mismatched geometry.
    fn allocate_volume(
        &self,
        geometry: &VolumeGeometry,
        data: Option<&Volume>,
    ) -> CoreResult<DataRef>;

    /// Allocates a sinogram object, optionally uploading initial data.
    fn allocate_sinogram(
        &self,
        geometry: &ProjectionGeometry,
        data: Option<&Sinogram>,
    ) -> CoreResult<DataRef>;

    /// Forward-projects `volume` under `geometry`, allocating and returning a
    /// new sinogram object holding the result.
    fn forward_project(
        &self,
        volume: DataRef,
        geometry: &ProjectionGeometry,
    ) -> CoreResult<DataRef>;

    /// Instantiates an iterative algorithm bound to its operands.
    fn create_algorithm(&self, spec: &AlgorithmSpec) -> CoreResult<AlgorithmRef>;

    /// Runs `iterations` steps of a previously created algorithm, updating
    /// its target volume in place.
    fn run(&self, algorithm: AlgorithmRef, iterations: usize) -> CoreResult<()>;

    /// Downloads a volume object into host memory.
    fn download_volume(&self, volume: DataRef) -> CoreResult<Volume>;

    /// Downloads a sinogram object into host memory.
    fn download_sinogram(&self, sinogram: DataRef) -> CoreResult<Sinogram>;

    /// Releases a data object. No-op for unknown refs.
    fn release(&self, data: DataRef) -> CoreResult<()>;

    /// Releases an algorithm instance. No-op for unknown refs.
    fn release_algorithm(&self, algorithm: AlgorithmRef) -> CoreResult<()>;

    /// Number of live data objects and algorithm instances, for leak checks.
    fn live_allocations(&self) -> usize;
}

/// Opaque persistence for dense 3D arrays. The on-disk format is an
/// implementation detail of the store.
pub trait VolumeStore {
    /// Writes `volume` at `path`, replacing any existing file.
    fn write_volume(&self, path: &Path, volume: &Volume) -> CoreResult<()>;

    /// Reads the volume stored at `path`.
    fn read_volume(&self, path: &Path) -> CoreResult<Volume>;
}
