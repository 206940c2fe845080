//! In-process tomography engine.
//!
//! Parallel-beam, pixel-driven projection with linear detector interpolation.
//! Slices along the rotation axis are independent, so the forward and back
//! projectors are exact transposes of each other, which SIRT and CGLS both
//! rely on. Data objects live in an internal table keyed by opaque ids;
//! releasing an unknown id is a no-op.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use ndarray::{Array3, Zip};
use parking_lot::Mutex;
use tracing::debug;

use limitomo_core::{
    AlgorithmKind, AlgorithmRef, AlgorithmSpec, CoreError, CoreResult, DataRef,
    ProjectionGeometry, Sinogram, TomographyEngine, Volume, VolumeGeometry,
};

/// Normalization sums below this are treated as zero.
const WEIGHT_EPS: f32 = 1e-6;

enum DataObject {
    Volume(Volume),
    Sinogram(Sinogram),
}

impl DataObject {
    fn kind(&self) -> &'static str {
        match self {
            Self::Volume(_) => "volume",
            Self::Sinogram(_) => "sinogram",
        }
    }
}

/// Reference engine holding all data objects in host memory.
///
/// Shareable across worker threads; the object table is lock-protected and
/// every operation is self-contained.
#[derive(Default)]
pub struct CpuEngine {
    next_id: AtomicU64,
    data: Mutex<HashMap<u64, DataObject>>,
    algorithms: Mutex<HashMap<u64, AlgorithmSpec>>,
}

impl CpuEngine {
    /// Creates an empty engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, object: DataObject) -> DataRef {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(id, kind = object.kind(), "engine allocate");
        self.data.lock().insert(id, object);
        DataRef::new(id)
    }

    fn fetch_volume(&self, operation: &str, data: DataRef) -> CoreResult<Volume> {
        match self.data.lock().get(&data.raw()) {
            Some(DataObject::Volume(v)) => Ok(v.clone()),
            Some(other) => Err(CoreError::resource(
                operation,
                format!("{data} is a {}, expected a volume", other.kind()),
            )),
            None => Err(CoreError::resource(operation, format!("unknown ref {data}"))),
        }
    }

    fn fetch_sinogram(&self, operation: &str, data: DataRef) -> CoreResult<Sinogram> {
        match self.data.lock().get(&data.raw()) {
            Some(DataObject::Sinogram(s)) => Ok(s.clone()),
            Some(other) => Err(CoreError::resource(
                operation,
                format!("{data} is a {}, expected a sinogram", other.kind()),
            )),
            None => Err(CoreError::resource(operation, format!("unknown ref {data}"))),
        }
    }
}

impl TomographyEngine for CpuEngine {
    fn allocate_volume(
        &self,
        geometry: &VolumeGeometry,
        data: Option<&Volume>,
    ) -> CoreResult<DataRef> {
        let volume = match data {
            Some(v) => {
                if v.geometry() != *geometry {
                    return Err(CoreError::validation(format!(
                        "volume upload shape {:?} does not match allocation geometry {:?}",
                        v.geometry().shape(),
                        geometry.shape()
                    )));
                }
                v.clone()
            }
            None => Volume::zeros(*geometry),
        };
        Ok(self.insert(DataObject::Volume(volume)))
    }

    fn allocate_sinogram(
        &self,
        geometry: &ProjectionGeometry,
        data: Option<&Sinogram>,
    ) -> CoreResult<DataRef> {
        let sinogram = match data {
            Some(s) => {
                if s.geometry() != geometry {
                    return Err(CoreError::validation(
                        "sinogram upload geometry does not match allocation geometry",
                    ));
                }
                s.clone()
            }
            None => Sinogram::zeros(geometry.clone()),
        };
        Ok(self.insert(DataObject::Sinogram(sinogram)))
    }

    fn forward_project(
        &self,
        volume: DataRef,
        geometry: &ProjectionGeometry,
    ) -> CoreResult<DataRef> {
        let source = self.fetch_volume("forward projection", volume)?;
        if geometry.detector_rows() != source.geometry().slices() {
            return Err(CoreError::validation(format!(
                "detector rows {} must match volume slices {}",
                geometry.detector_rows(),
                source.geometry().slices()
            )));
        }
        let data = project_array(source.data(), geometry);
        let sinogram = Sinogram::new(geometry.clone(), data)?;
        Ok(self.insert(DataObject::Sinogram(sinogram)))
    }

    fn create_algorithm(&self, spec: &AlgorithmSpec) -> CoreResult<AlgorithmRef> {
        let target = self.fetch_volume("create algorithm", spec.target)?;
        let sinogram = self.fetch_sinogram("create algorithm", spec.sinogram)?;
        if sinogram.geometry().detector_rows() != target.geometry().slices() {
            return Err(CoreError::validation(format!(
                "sinogram detector rows {} must match target slices {}",
                sinogram.geometry().detector_rows(),
                target.geometry().slices()
            )));
        }
        if let Some(mask) = spec.mask {
            let mask_volume = self.fetch_volume("create algorithm", mask)?;
            if mask_volume.geometry() != target.geometry() {
                return Err(CoreError::validation(
                    "mask geometry does not match target geometry",
                ));
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(id, kind = %spec.kind, "engine create algorithm");
        self.algorithms.lock().insert(id, *spec);
        Ok(AlgorithmRef::new(id))
    }

    fn run(&self, algorithm: AlgorithmRef, iterations: usize) -> CoreResult<()> {
        let spec = self
            .algorithms
            .lock()
            .get(&algorithm.raw())
            .copied()
            .ok_or_else(|| {
                CoreError::resource("run algorithm", format!("unknown ref {algorithm}"))
            })?;

        let mut target = self.fetch_volume("run algorithm", spec.target)?;
        let sinogram = self.fetch_sinogram("run algorithm", spec.sinogram)?;
        let mask = match spec.mask {
            Some(m) => Some(self.fetch_volume("run algorithm", m)?),
            None => None,
        };
        let mask_data = mask.as_ref().map(Volume::data);

        match spec.kind {
            AlgorithmKind::Sirt => sirt(target.data_mut(), &sinogram, mask_data, iterations),
            AlgorithmKind::Cgls => cgls(target.data_mut(), &sinogram, mask_data, iterations),
        }

        self.data
            .lock()
            .insert(spec.target.raw(), DataObject::Volume(target));
        Ok(())
    }

    fn download_volume(&self, volume: DataRef) -> CoreResult<Volume> {
        self.fetch_volume("download volume", volume)
    }

    fn download_sinogram(&self, sinogram: DataRef) -> CoreResult<Sinogram> {
        self.fetch_sinogram("download sinogram", sinogram)
    }

    fn release(&self, data: DataRef) -> CoreResult<()> {
        if self.data.lock().remove(&data.raw()).is_some() {
            debug!(id = data.raw(), "engine release");
        }
        Ok(())
    }

    fn release_algorithm(&self, algorithm: AlgorithmRef) -> CoreResult<()> {
        if self.algorithms.lock().remove(&algorithm.raw()).is_some() {
            debug!(id = algorithm.raw(), "engine release algorithm");
        }
        Ok(())
    }

    fn live_allocations(&self) -> usize {
        self.data.lock().len() + self.algorithms.lock().len()
    }
}

/// Forward projection of a `(slice, row, col)` array under `geometry`.
///
/// Each voxel is splat onto the two detector bins straddling its projected
/// position, weighted by linear interpolation.
fn project_array(volume: &Array3<f32>, geometry: &ProjectionGeometry) -> Array3<f32> {
    let (slices, rows, cols) = volume.dim();
    let det_cols = geometry.detector_cols();
    let mut sino = Array3::zeros((geometry.angle_count(), slices, det_cols));

    let cy = (rows as f64 - 1.0) / 2.0;
    let cx = (cols as f64 - 1.0) / 2.0;
    let cu = (det_cols as f64 - 1.0) / 2.0;

    for (ai, &angle) in geometry.angles().iter().enumerate() {
        let (sin_t, cos_t) = angle.sin_cos();
        for s in 0..slices {
            for r in 0..rows {
                let y = r as f64 - cy;
                for c in 0..cols {
                    let v = volume[[s, r, c]];
                    if v == 0.0 {
                        continue;
                    }
                    let x = c as f64 - cx;
                    let u = x * cos_t + y * sin_t + cu;
                    let base = u.floor();
                    let frac = (u - base) as f32;
                    let i0 = base as isize;
                    if (0..det_cols as isize).contains(&i0) {
                        sino[[ai, s, i0 as usize]] += v * (1.0 - frac);
                    }
                    let i1 = i0 + 1;
                    if (0..det_cols as isize).contains(&i1) {
                        sino[[ai, s, i1 as usize]] += v * frac;
                    }
                }
            }
        }
    }
    sino
}

/// Back projection, the exact transpose of [`project_array`].
fn backproject_array(
    sino: &Array3<f32>,
    geometry: &ProjectionGeometry,
    target_dim: (usize, usize, usize),
) -> Array3<f32> {
    let (slices, rows, cols) = target_dim;
    let det_cols = geometry.detector_cols();
    let mut volume = Array3::zeros(target_dim);

    let cy = (rows as f64 - 1.0) / 2.0;
    let cx = (cols as f64 - 1.0) / 2.0;
    let cu = (det_cols as f64 - 1.0) / 2.0;

    for (ai, &angle) in geometry.angles().iter().enumerate() {
        let (sin_t, cos_t) = angle.sin_cos();
        for s in 0..slices {
            for r in 0..rows {
                let y = r as f64 - cy;
                for c in 0..cols {
                    let x = c as f64 - cx;
                    let u = x * cos_t + y * sin_t + cu;
                    let base = u.floor();
                    let frac = (u - base) as f32;
                    let i0 = base as isize;
                    let mut acc = 0.0f32;
                    if (0..det_cols as isize).contains(&i0) {
                        acc += sino[[ai, s, i0 as usize]] * (1.0 - frac);
                    }
                    let i1 = i0 + 1;
                    if (0..det_cols as isize).contains(&i1) {
                        acc += sino[[ai, s, i1 as usize]] * frac;
                    }
                    volume[[s, r, c]] += acc;
                }
            }
        }
    }
    volume
}

/// Simultaneous iterative reconstruction with row and column normalization.
/// Updates outside the mask support are suppressed.
fn sirt(
    target: &mut Array3<f32>,
    sinogram: &Sinogram,
    mask: Option<&Array3<f32>>,
    iterations: usize,
) {
    let geometry = sinogram.geometry();
    let dim = target.dim();

    let row_sums = project_array(&Array3::from_elem(dim, 1.0), geometry);
    let col_sums = backproject_array(
        &Array3::from_elem(sinogram.data().dim(), 1.0),
        geometry,
        dim,
    );

    for _ in 0..iterations {
        let mut residual = sinogram.data().clone();
        residual -= &project_array(target, geometry);
        Zip::from(&mut residual).and(&row_sums).for_each(|r, &w| {
            *r = if w > WEIGHT_EPS { *r / w } else { 0.0 };
        });

        let mut update = backproject_array(&residual, geometry, dim);
        Zip::from(&mut update).and(&col_sums).for_each(|u, &w| {
            *u = if w > WEIGHT_EPS { *u / w } else { 0.0 };
        });
        if let Some(mask) = mask {
            Zip::from(&mut update).and(mask).for_each(|u, &m| {
                if m == 0.0 {
                    *u = 0.0;
                }
            });
        }
        *target += &update;
    }
}

/// Conjugate gradient on the least-squares normal equations. The mask
/// restricts the solution subspace by zeroing gradients outside the support.
fn cgls(
    target: &mut Array3<f32>,
    sinogram: &Sinogram,
    mask: Option<&Array3<f32>>,
    iterations: usize,
) {
    let geometry = sinogram.geometry();
    let dim = target.dim();
    let apply_mask = |arr: &mut Array3<f32>| {
        if let Some(mask) = mask {
            Zip::from(arr).and(mask).for_each(|v, &m| {
                if m == 0.0 {
                    *v = 0.0;
                }
            });
        }
    };

    let mut residual = sinogram.data().clone();
    residual -= &project_array(target, geometry);
    let mut gradient = backproject_array(&residual, geometry, dim);
    apply_mask(&mut gradient);
    let mut direction = gradient.clone();
    let mut gamma: f32 = gradient.iter().map(|v| v * v).sum();

    for _ in 0..iterations {
        if gamma <= WEIGHT_EPS {
            break;
        }
        let q = project_array(&direction, geometry);
        let q_norm: f32 = q.iter().map(|v| v * v).sum();
        if q_norm <= WEIGHT_EPS {
            break;
        }
        let alpha = gamma / q_norm;
        target.scaled_add(alpha, &direction);
        residual.scaled_add(-alpha, &q);

        let mut next_gradient = backproject_array(&residual, geometry, dim);
        apply_mask(&mut next_gradient);
        let gamma_next: f32 = next_gradient.iter().map(|v| v * v).sum();
        let beta = gamma_next / gamma;
        direction.mapv_inplace(|v| v * beta);
        direction += &next_gradient;
        gamma = gamma_next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use limitomo_core::{utils, GeometryKind, Mask};

    fn engine_with_volume(geometry: VolumeGeometry) -> (CpuEngine, DataRef) {
        let engine = CpuEngine::new();
        let volume = Volume::uniform(geometry, 1.0);
        let data = engine.allocate_volume(&geometry, Some(&volume)).unwrap();
        (engine, data)
    }

    #[test]
    fn test_allocate_then_release_returns_to_baseline() {
        let engine = CpuEngine::new();
        let geometry = VolumeGeometry::new(4, 4, 2).unwrap();
        assert_eq!(engine.live_allocations(), 0);

        let data = engine.allocate_volume(&geometry, None).unwrap();
        assert_eq!(engine.live_allocations(), 1);

        engine.release(data).unwrap();
        assert_eq!(engine.live_allocations(), 0);
        // Double release is a no-op, not an error.
        engine.release(data).unwrap();
        assert_eq!(engine.live_allocations(), 0);
    }

    #[test]
    fn test_release_unknown_refs_is_noop() {
        let engine = CpuEngine::new();
        engine.release(DataRef::new(999)).unwrap();
        engine.release_algorithm(AlgorithmRef::new(999)).unwrap();
    }

    #[test]
    fn test_allocate_volume_rejects_shape_mismatch() {
        let engine = CpuEngine::new();
        let geometry = VolumeGeometry::new(4, 4, 2).unwrap();
        let other = VolumeGeometry::new(4, 4, 3).unwrap();
        let volume = Volume::zeros(other);
        assert!(matches!(
            engine.allocate_volume(&geometry, Some(&volume)),
            Err(CoreError::Validation { .. })
        ));
        assert_eq!(engine.live_allocations(), 0);
    }

    #[test]
    fn test_download_wrong_kind_is_resource_error() {
        let geometry = VolumeGeometry::new(4, 4, 1).unwrap();
        let (engine, data) = engine_with_volume(geometry);
        assert!(matches!(
            engine.download_sinogram(data),
            Err(CoreError::Resource { .. })
        ));
    }

    #[test]
    fn test_projection_conserves_mass_per_angle() {
        let geometry = VolumeGeometry::new(4, 4, 2).unwrap();
        let (engine, data) = engine_with_volume(geometry);
        let proj =
            ProjectionGeometry::circumscribing(&geometry, utils::angle_span(8), GeometryKind::Parallel3d)
                .unwrap();

        let sino_ref = engine.forward_project(data, &proj).unwrap();
        let sino = engine.download_sinogram(sino_ref).unwrap();

        // The circumscribing detector captures every splat, so each angle
        // plane sums to the voxel total (16 per slice).
        for plane in sino.data().outer_iter() {
            let total: f32 = plane.iter().sum();
            assert_abs_diff_eq!(total, 32.0, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_centered_voxel_projects_to_detector_center() {
        let geometry = VolumeGeometry::new(5, 5, 1).unwrap();
        let engine = CpuEngine::new();
        let mut volume = Volume::zeros(geometry);
        volume.data_mut()[[0, 2, 2]] = 1.0;
        let data = engine.allocate_volume(&geometry, Some(&volume)).unwrap();

        let proj = ProjectionGeometry::new(1, 9, vec![0.0, 1.0, 2.5], GeometryKind::Parallel3d)
            .unwrap();
        let sino_ref = engine.forward_project(data, &proj).unwrap();
        let sino = engine.download_sinogram(sino_ref).unwrap();

        // The rotation center maps to detector center at every angle.
        for ai in 0..3 {
            assert_abs_diff_eq!(sino.data()[[ai, 0, 4]], 1.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_forward_project_rejects_detector_row_mismatch() {
        let geometry = VolumeGeometry::new(4, 4, 2).unwrap();
        let (engine, data) = engine_with_volume(geometry);
        let proj = ProjectionGeometry::new(3, 6, vec![0.0], GeometryKind::Parallel3d).unwrap();
        assert!(matches!(
            engine.forward_project(data, &proj),
            Err(CoreError::Validation { .. })
        ));
    }

    #[test]
    fn test_create_algorithm_rejects_unknown_refs() {
        let engine = CpuEngine::new();
        let spec = AlgorithmSpec {
            kind: AlgorithmKind::Sirt,
            target: DataRef::new(1),
            sinogram: DataRef::new(2),
            mask: None,
        };
        assert!(matches!(
            engine.create_algorithm(&spec),
            Err(CoreError::Resource { .. })
        ));
    }

    #[test]
    fn test_create_algorithm_rejects_mask_geometry_mismatch() {
        let geometry = VolumeGeometry::new(4, 4, 1).unwrap();
        let (engine, target) = engine_with_volume(geometry);
        let proj =
            ProjectionGeometry::circumscribing(&geometry, utils::angle_span(4), GeometryKind::Parallel3d)
                .unwrap();
        let sinogram = engine.allocate_sinogram(&proj, None).unwrap();

        let other = VolumeGeometry::new(6, 6, 1).unwrap();
        let mask = Mask::full(other).to_volume();
        let mask_ref = engine.allocate_volume(&other, Some(&mask)).unwrap();

        let spec = AlgorithmSpec {
            kind: AlgorithmKind::Sirt,
            target,
            sinogram,
            mask: Some(mask_ref),
        };
        assert!(matches!(
            engine.create_algorithm(&spec),
            Err(CoreError::Validation { .. })
        ));
    }

    fn reconstruction_error(kind: AlgorithmKind, iterations: usize) -> f64 {
        let geometry = VolumeGeometry::new(8, 8, 1).unwrap();
        let mask = Mask::inscribed_cylinder(geometry);
        let truth = mask.to_volume();

        let engine = CpuEngine::new();
        let proj =
            ProjectionGeometry::circumscribing(&geometry, utils::angle_span(24), GeometryKind::Parallel3d)
                .unwrap();
        let truth_ref = engine.allocate_volume(&geometry, Some(&truth)).unwrap();
        let sino_ref = engine.forward_project(truth_ref, &proj).unwrap();

        let target = engine.allocate_volume(&geometry, None).unwrap();
        let spec = AlgorithmSpec {
            kind,
            target,
            sinogram: sino_ref,
            mask: None,
        };
        let alg = engine.create_algorithm(&spec).unwrap();
        engine.run(alg, iterations).unwrap();
        let result = engine.download_volume(target).unwrap();

        let recon_mean = mask.masked_mean(&result).unwrap();
        let truth_mean = mask.masked_mean(&truth).unwrap();
        (recon_mean - truth_mean).abs() / truth_mean
    }

    #[test]
    fn test_sirt_converges_on_cylinder() {
        assert!(reconstruction_error(AlgorithmKind::Sirt, 100) < 0.05);
    }

    #[test]
    fn test_cgls_converges_on_cylinder() {
        assert!(reconstruction_error(AlgorithmKind::Cgls, 30) < 0.05);
    }

    #[test]
    fn test_masked_run_leaves_outside_untouched() {
        let geometry = VolumeGeometry::new(6, 6, 1).unwrap();
        let mask = Mask::inscribed_cylinder(geometry);
        let truth = mask.to_volume();

        let engine = CpuEngine::new();
        let proj =
            ProjectionGeometry::circumscribing(&geometry, utils::angle_span(12), GeometryKind::Parallel3d)
                .unwrap();
        let truth_ref = engine.allocate_volume(&geometry, Some(&truth)).unwrap();
        let sino_ref = engine.forward_project(truth_ref, &proj).unwrap();

        let target = engine.allocate_volume(&geometry, None).unwrap();
        let mask_ref = engine
            .allocate_volume(&geometry, Some(&mask.to_volume()))
            .unwrap();
        let spec = AlgorithmSpec {
            kind: AlgorithmKind::Sirt,
            target,
            sinogram: sino_ref,
            mask: Some(mask_ref),
        };
        let alg = engine.create_algorithm(&spec).unwrap();
        engine.run(alg, 20).unwrap();
        let result = engine.download_volume(target).unwrap();

        for ((s, r, c), &v) in result.data().indexed_iter() {
            if !mask.contains(s, r, c) {
                assert_eq!(v, 0.0, "voxel ({s},{r},{c}) outside support was updated");
            }
        }
    }
}
