//! Iterative reconstruction of a volume from a sinogram.
//!
//! Setup is two-step (geometry, then sinogram), and `reconstruct` tears all
//! engine state down in dependency order when it finishes, successfully or
//! not: algorithm first, then sinogram, target volume, and mask.

use limitomo_core::{
    AlgorithmKind, CoreError, CoreResult, DataRef, GeometryInput, Mask, ProjectionGeometry,
    Sinogram, TomographyEngine, Volume, VolumeGeometry,
};
use tracing::debug;

use crate::handle::EngineHandle;

/// How the input sinogram is supplied.
pub enum SinogramInput {
    /// Host data: a device sinogram is allocated and uploaded.
    Data(Sinogram),
    /// A pre-existing device ref whose ownership the reconstructor adopts;
    /// no allocation happens. The geometry describes the adopted data.
    Existing {
        /// The adopted device sinogram.
        data: DataRef,
        /// Projection geometry of the adopted data.
        geometry: ProjectionGeometry,
    },
}

/// Reconstructs volumes through the engine.
pub struct Reconstructor<'e> {
    handle: EngineHandle<'e>,
    volume_geometry: Option<VolumeGeometry>,
}

impl<'e> Reconstructor<'e> {
    /// Creates a reconstructor on `engine` with nothing bound.
    pub fn new(engine: &'e dyn TomographyEngine) -> Self {
        Self {
            handle: EngineHandle::new(engine),
            volume_geometry: None,
        }
    }

    /// Resolves `input` into a target geometry, allocates the device target
    /// volume (releasing any prior one first), and binds the inscribed
    /// cylinder support mask when requested.
    pub fn set_reconstruction_geometry(&mut self, input: GeometryInput) -> CoreResult<()> {
        let (geometry, mask) = match input {
            GeometryInput::ByDescriptor(geometry) => (geometry, None),
            GeometryInput::ByShape { shape, circle_mask } => {
                let geometry = VolumeGeometry::from_shape(shape)?;
                let mask = circle_mask.then(|| Mask::inscribed_cylinder(geometry));
                (geometry, mask)
            }
        };

        self.handle.bind_volume(&geometry, None)?;
        match &mask {
            Some(mask) => {
                self.handle.bind_mask(mask)?;
            }
            None => self.handle.release_mask()?,
        }
        self.volume_geometry = Some(geometry);
        Ok(())
    }

    /// Binds the input sinogram: uploads host data, or adopts an existing
    /// device ref without re-allocating. Either way any prior sinogram is
    /// released first.
    pub fn set_input_sinogram(&mut self, input: SinogramInput) -> CoreResult<()> {
        if let Some(volume_geometry) = self.volume_geometry {
            let detector_rows = match &input {
                SinogramInput::Data(s) => s.geometry().detector_rows(),
                SinogramInput::Existing { geometry, .. } => geometry.detector_rows(),
            };
            if detector_rows != volume_geometry.slices() {
                return Err(CoreError::validation(format!(
                    "sinogram detector rows {} do not match target slices {}",
                    detector_rows,
                    volume_geometry.slices()
                )));
            }
        }

        match input {
            SinogramInput::Data(sinogram) => {
                let geometry = sinogram.geometry().clone();
                self.handle.bind_sinogram(&geometry, Some(&sinogram))?;
            }
            SinogramInput::Existing { data, geometry } => {
                debug!(%data, angles = geometry.angle_count(), "adopting existing sinogram ref");
                self.handle.adopt_sinogram(data)?;
            }
        }
        Ok(())
    }

    /// Runs `iterations` steps of `algorithm` against the bound target and
    /// sinogram, with the mask (when bound) restricting updates to its
    /// support. `PreconditionError` when geometry or sinogram is missing;
    /// the precondition check allocates nothing.
    ///
    /// On return, successful or not, the algorithm, sinogram, target volume,
    /// and mask have been released in that order.
    pub fn reconstruct(
        &mut self,
        algorithm: AlgorithmKind,
        iterations: usize,
    ) -> CoreResult<Volume> {
        let target = self.handle.volume().ok_or_else(|| {
            CoreError::precondition("reconstruct", "no reconstruction geometry set")
        })?;
        if self.handle.sinogram().is_none() {
            return Err(CoreError::precondition(
                "reconstruct",
                "no input sinogram set",
            ));
        }

        let result = (|| {
            self.handle.bind_algorithm(algorithm)?;
            self.handle.run(iterations)?;
            self.handle.engine().download_volume(target)
        })();

        let released = self.handle.release_all();
        self.volume_geometry = None;

        let volume = result?;
        released?;
        debug!(algorithm = %algorithm, iterations, "reconstruction complete");
        Ok(volume)
    }

    /// Releases everything engine-side, for cancellation paths.
    pub fn release_all(&mut self) -> CoreResult<()> {
        self.volume_geometry = None;
        self.handle.release_all()
    }
}
