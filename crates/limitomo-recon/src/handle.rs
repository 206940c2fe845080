//! Exclusive ownership of one job's engine-resident refs.
//!
//! The handle is the single point of truth for device-resident state: one
//! slot each for the target volume, the sinogram, the optional support mask,
//! and the optional algorithm instance. Binding a slot releases its previous
//! occupant first, so re-binding never leaks. Callers release on every exit
//! path via [`EngineHandle::release_all`]; `Drop` is only a logged backstop
//! for paths that forgot.

use limitomo_core::{
    AlgorithmKind, AlgorithmRef, AlgorithmSpec, CoreError, CoreResult, DataRef, Mask,
    ProjectionGeometry, Sinogram, TomographyEngine, Volume, VolumeGeometry,
};
use tracing::warn;

/// Ref slots for a single projection or reconstruction job.
pub struct EngineHandle<'e> {
    engine: &'e dyn TomographyEngine,
    volume: Option<DataRef>,
    sinogram: Option<DataRef>,
    mask: Option<DataRef>,
    algorithm: Option<AlgorithmRef>,
}

impl<'e> EngineHandle<'e> {
    /// Creates an empty handle on `engine`.
    pub fn new(engine: &'e dyn TomographyEngine) -> Self {
        Self {
            engine,
            volume: None,
            sinogram: None,
            mask: None,
            algorithm: None,
        }
    }

    /// The engine this handle allocates on.
    #[must_use]
    pub fn engine(&self) -> &'e dyn TomographyEngine {
        self.engine
    }

    /// Currently bound target volume ref.
    #[must_use]
    pub fn volume(&self) -> Option<DataRef> {
        self.volume
    }

    /// Currently bound sinogram ref.
    #[must_use]
    pub fn sinogram(&self) -> Option<DataRef> {
        self.sinogram
    }

    /// Currently bound mask ref.
    #[must_use]
    pub fn mask(&self) -> Option<DataRef> {
        self.mask
    }

    /// Currently bound algorithm ref.
    #[must_use]
    pub fn algorithm(&self) -> Option<AlgorithmRef> {
        self.algorithm
    }

    /// True if any slot still holds a ref.
    #[must_use]
    pub fn has_live_refs(&self) -> bool {
        self.volume.is_some()
            || self.sinogram.is_some()
            || self.mask.is_some()
            || self.algorithm.is_some()
    }

    /// Allocates the target volume slot, releasing any prior occupant first.
    pub fn bind_volume(
        &mut self,
        geometry: &VolumeGeometry,
        data: Option<&Volume>,
    ) -> CoreResult<DataRef> {
        self.release_volume()?;
        let data_ref = self.engine.allocate_volume(geometry, data)?;
        self.volume = Some(data_ref);
        Ok(data_ref)
    }

    /// Allocates the sinogram slot, releasing any prior occupant first.
    pub fn bind_sinogram(
        &mut self,
        geometry: &ProjectionGeometry,
        data: Option<&Sinogram>,
    ) -> CoreResult<DataRef> {
        self.release_sinogram()?;
        let data_ref = self.engine.allocate_sinogram(geometry, data)?;
        self.sinogram = Some(data_ref);
        Ok(data_ref)
    }

    /// Adopts ownership of an already-allocated sinogram ref without
    /// re-allocating, releasing any prior occupant first.
    pub fn adopt_sinogram(&mut self, data: DataRef) -> CoreResult<()> {
        self.release_sinogram()?;
        self.sinogram = Some(data);
        Ok(())
    }

    /// Uploads a support mask into the mask slot, releasing any prior
    /// occupant first. The mask is stored engine-side as a 0/255 volume.
    pub fn bind_mask(&mut self, mask: &Mask) -> CoreResult<DataRef> {
        self.release_mask()?;
        let data_ref = self
            .engine
            .allocate_volume(&mask.geometry(), Some(&mask.to_volume()))?;
        self.mask = Some(data_ref);
        Ok(data_ref)
    }

    /// Instantiates `kind` bound to the current volume, sinogram, and mask
    /// slots. `PreconditionError` when the volume or sinogram slot is empty.
    pub fn bind_algorithm(&mut self, kind: AlgorithmKind) -> CoreResult<AlgorithmRef> {
        let target = self.volume.ok_or_else(|| {
            CoreError::precondition("bind algorithm", "no target volume bound")
        })?;
        let sinogram = self.sinogram.ok_or_else(|| {
            CoreError::precondition("bind algorithm", "no sinogram bound")
        })?;
        self.release_algorithm()?;
        let spec = AlgorithmSpec {
            kind,
            target,
            sinogram,
            mask: self.mask,
        };
        let algorithm = self.engine.create_algorithm(&spec)?;
        self.algorithm = Some(algorithm);
        Ok(algorithm)
    }

    /// Runs the bound algorithm for `iterations` steps.
    pub fn run(&self, iterations: usize) -> CoreResult<()> {
        let algorithm = self
            .algorithm
            .ok_or_else(|| CoreError::precondition("run", "no algorithm bound"))?;
        self.engine.run(algorithm, iterations)
    }

    /// Releases the volume slot. No-op when empty.
    pub fn release_volume(&mut self) -> CoreResult<()> {
        if let Some(data_ref) = self.volume.take() {
            self.engine.release(data_ref)?;
        }
        Ok(())
    }

    /// Releases the sinogram slot. No-op when empty.
    pub fn release_sinogram(&mut self) -> CoreResult<()> {
        if let Some(data_ref) = self.sinogram.take() {
            self.engine.release(data_ref)?;
        }
        Ok(())
    }

    /// Releases the mask slot. No-op when empty.
    pub fn release_mask(&mut self) -> CoreResult<()> {
        if let Some(data_ref) = self.mask.take() {
            self.engine.release(data_ref)?;
        }
        Ok(())
    }

    /// Releases the algorithm slot. No-op when empty.
    pub fn release_algorithm(&mut self) -> CoreResult<()> {
        if let Some(algorithm) = self.algorithm.take() {
            self.engine.release_algorithm(algorithm)?;
        }
        Ok(())
    }

    /// Releases every slot: the algorithm first (it consumes the others),
    /// then sinogram, volume, and mask. Idempotent, and attempts every
    /// release even when one fails; the first failure is returned.
    pub fn release_all(&mut self) -> CoreResult<()> {
        let mut first_error = None;
        for result in [
            self.release_algorithm(),
            self.release_sinogram(),
            self.release_volume(),
            self.release_mask(),
        ] {
            if let Err(err) = result {
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Drop for EngineHandle<'_> {
    fn drop(&mut self) {
        if self.has_live_refs() {
            warn!("engine handle dropped with live refs, releasing now");
            if let Err(err) = self.release_all() {
                warn!(%err, "backstop release failed");
            }
        }
    }
}

impl std::fmt::Debug for EngineHandle<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("volume", &self.volume)
            .field("sinogram", &self.sinogram)
            .field("mask", &self.mask)
            .field("algorithm", &self.algorithm)
            .finish()
    }
}
