//! Forward projection of a host volume through the engine.
//!
//! Device residency is per call: `set_input_volume` uploads, `project`
//! computes, downloads, and releases both the volume and the projection
//! result before returning. Nothing engine-side survives a completed
//! projection.

use limitomo_core::{
    CoreError, CoreResult, GeometryKind, ProjectionGeometry, Sinogram, TomographyEngine, Volume,
    VolumeGeometry,
};
use tracing::debug;

use crate::handle::EngineHandle;

/// Projects host volumes into sinograms.
pub struct Projector<'e> {
    handle: EngineHandle<'e>,
    volume_geometry: Option<VolumeGeometry>,
    last: Option<Sinogram>,
}

impl<'e> Projector<'e> {
    /// Creates a projector on `engine` with no input bound.
    pub fn new(engine: &'e dyn TomographyEngine) -> Self {
        Self {
            handle: EngineHandle::new(engine),
            volume_geometry: None,
            last: None,
        }
    }

    /// Uploads `volume` as the projection input, releasing any previously
    /// uploaded volume first.
    pub fn set_input_volume(&mut self, volume: &Volume) -> CoreResult<()> {
        self.handle.bind_volume(&volume.geometry(), Some(volume))?;
        self.volume_geometry = Some(volume.geometry());
        Ok(())
    }

    /// Projects the input volume over `angles`, sizing the detector to the
    /// circumscribing width of the cross-section. `PreconditionError` when no
    /// input volume is set.
    pub fn project(&mut self, angles: Vec<f64>, kind: GeometryKind) -> CoreResult<Sinogram> {
        let geometry = self
            .volume_geometry
            .ok_or_else(|| CoreError::precondition("project", "no input volume set"))?;
        let projection = ProjectionGeometry::circumscribing(&geometry, angles, kind)?;
        self.project_onto(&projection)
    }

    /// Projects the input volume onto an explicit projection geometry.
    ///
    /// On both success and failure, the device volume and the device
    /// projection result are released before returning.
    pub fn project_onto(&mut self, geometry: &ProjectionGeometry) -> CoreResult<Sinogram> {
        let volume_ref = self
            .handle
            .volume()
            .ok_or_else(|| CoreError::precondition("project", "no input volume set"))?;

        let result = (|| {
            let sino_ref = self.handle.engine().forward_project(volume_ref, geometry)?;
            self.handle.adopt_sinogram(sino_ref)?;
            self.handle.engine().download_sinogram(sino_ref)
        })();

        let released = self.handle.release_all();
        self.volume_geometry = None;

        let sinogram = result?;
        released?;
        debug!(
            angles = geometry.angle_count(),
            detector_cols = geometry.detector_cols(),
            "projection complete"
        );
        self.last = Some(sinogram.clone());
        Ok(sinogram)
    }

    /// The last computed sinogram. `NotReadyError` when `project` has not
    /// completed successfully yet.
    pub fn projection(&self) -> CoreResult<&Sinogram> {
        self.last
            .as_ref()
            .ok_or_else(|| CoreError::not_ready("no projection computed yet"))
    }

    /// Releases everything engine-side, for cancellation paths.
    pub fn release_all(&mut self) -> CoreResult<()> {
        self.volume_geometry = None;
        self.handle.release_all()
    }
}
