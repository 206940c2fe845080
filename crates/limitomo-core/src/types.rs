//! Geometry descriptors and dense array payloads.
//!
//! Volumes are indexed `(slice, row, col)` and sinograms
//! `(angle, detector_row, detector_col)`. Geometry descriptors are validated
//! at construction and immutable afterwards.

use ndarray::{s, Array3};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Beam arrangement understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GeometryKind {
    /// Parallel rays; slices along the rotation axis are independent.
    #[default]
    Parallel3d,
}

impl GeometryKind {
    /// Short identifier used in labels and logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Parallel3d => "parallel3d",
        }
    }
}

/// Iterative reconstruction algorithm selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AlgorithmKind {
    /// Simultaneous Iterative Reconstruction Technique.
    #[default]
    Sirt,
    /// Conjugate gradient on the least-squares normal equations.
    Cgls,
}

impl AlgorithmKind {
    /// Short identifier used in labels and logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sirt => "sirt",
            Self::Cgls => "cgls",
        }
    }
}

impl std::fmt::Display for AlgorithmKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable reconstruction volume shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeGeometry {
    rows: usize,
    cols: usize,
    slices: usize,
}

impl VolumeGeometry {
    /// Creates a volume geometry. All extents must be positive.
    pub fn new(rows: usize, cols: usize, slices: usize) -> CoreResult<Self> {
        if rows == 0 || cols == 0 || slices == 0 {
            return Err(CoreError::validation(format!(
                "volume extents must be positive, got {rows}x{cols}x{slices}"
            )));
        }
        Ok(Self { rows, cols, slices })
    }

    /// Creates a geometry from a `[slices, rows, cols]` array shape.
    pub fn from_shape(shape: [usize; 3]) -> CoreResult<Self> {
        Self::new(shape[1], shape[2], shape[0])
    }

    /// In-slice row count (the cross-section height).
    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// In-slice column count (the cross-section width).
    #[must_use]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Slice count along the rotation axis.
    #[must_use]
    pub fn slices(&self) -> usize {
        self.slices
    }

    /// Array shape as `[slices, rows, cols]`.
    #[must_use]
    pub fn shape(&self) -> [usize; 3] {
        [self.slices, self.rows, self.cols]
    }

    /// Total voxel count.
    #[must_use]
    pub fn voxel_count(&self) -> usize {
        self.rows * self.cols * self.slices
    }
}

/// How a reconstruction target geometry is supplied.
///
/// Resolved by an exhaustive match; there is no keyword probing.
#[derive(Debug, Clone)]
pub enum GeometryInput {
    /// Use a prebuilt descriptor as-is, no mask.
    ByDescriptor(VolumeGeometry),
    /// Build a descriptor from a raw `[slices, rows, cols]` shape, optionally
    /// with the inscribed-cylinder support mask.
    ByShape {
        /// Target array shape.
        shape: [usize; 3],
        /// Whether to constrain updates to the inscribed cylinder.
        circle_mask: bool,
    },
}

/// Projection-space shape: detector grid plus the ordered angle sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionGeometry {
    detector_rows: usize,
    detector_cols: usize,
    angles: Vec<f64>,
    kind: GeometryKind,
}

impl ProjectionGeometry {
    /// Creates a projection geometry. The angle sequence must be non-empty
    /// and the detector extents positive.
    pub fn new(
        detector_rows: usize,
        detector_cols: usize,
        angles: Vec<f64>,
        kind: GeometryKind,
    ) -> CoreResult<Self> {
        if detector_rows == 0 || detector_cols == 0 {
            return Err(CoreError::validation(format!(
                "detector extents must be positive, got {detector_rows}x{detector_cols}"
            )));
        }
        if angles.is_empty() {
            return Err(CoreError::validation("angle sequence must be non-empty"));
        }
        Ok(Self {
            detector_rows,
            detector_cols,
            angles,
            kind,
        })
    }

    /// Builds the geometry that fully captures `volume` under rotation:
    /// one detector row per slice and `ceil(sqrt(2 * rows^2))` detector
    /// columns, wide enough for the circumscribing circle of the
    /// cross-section at any orientation.
    pub fn circumscribing(
        volume: &VolumeGeometry,
        angles: Vec<f64>,
        kind: GeometryKind,
    ) -> CoreResult<Self> {
        let rows = volume.rows() as f64;
        let detector_cols = (2.0 * rows * rows).sqrt().ceil() as usize;
        Self::new(volume.slices(), detector_cols, angles, kind)
    }

    /// Detector row count (matches the volume slice count).
    #[must_use]
    pub fn detector_rows(&self) -> usize {
        self.detector_rows
    }

    /// Detector column count.
    #[must_use]
    pub fn detector_cols(&self) -> usize {
        self.detector_cols
    }

    /// Projection angles in radians, in acquisition order.
    #[must_use]
    pub fn angles(&self) -> &[f64] {
        &self.angles
    }

    /// Number of projection angles.
    #[must_use]
    pub fn angle_count(&self) -> usize {
        self.angles.len()
    }

    /// Beam arrangement.
    #[must_use]
    pub fn kind(&self) -> GeometryKind {
        self.kind
    }

    /// Sinogram array shape as `[angles, detector_rows, detector_cols]`.
    #[must_use]
    pub fn sinogram_shape(&self) -> [usize; 3] {
        [self.angles.len(), self.detector_rows, self.detector_cols]
    }

    /// Geometry restricted to every `factor`-th angle, starting at the first.
    pub fn subsample(&self, factor: usize) -> CoreResult<Self> {
        if factor == 0 {
            return Err(CoreError::validation("subsampling factor must be >= 1"));
        }
        let angles: Vec<f64> = self.angles.iter().copied().step_by(factor).collect();
        Self::new(self.detector_rows, self.detector_cols, angles, self.kind)
    }
}

/// Dense voxel block plus its descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    geometry: VolumeGeometry,
    data: Array3<f32>,
}

impl Volume {
    /// Wraps voxel data, checking its shape against `geometry`.
    pub fn new(geometry: VolumeGeometry, data: Array3<f32>) -> CoreResult<Self> {
        if data.shape() != geometry.shape() {
            return Err(CoreError::validation(format!(
                "volume data shape {:?} does not match geometry {:?}",
                data.shape(),
                geometry.shape()
            )));
        }
        Ok(Self { geometry, data })
    }

    /// All-zero volume of the given geometry.
    #[must_use]
    pub fn zeros(geometry: VolumeGeometry) -> Self {
        Self {
            geometry,
            data: Array3::zeros(geometry.shape()),
        }
    }

    /// Constant-valued volume of the given geometry.
    #[must_use]
    pub fn uniform(geometry: VolumeGeometry, value: f32) -> Self {
        Self {
            geometry,
            data: Array3::from_elem(geometry.shape(), value),
        }
    }

    /// The volume's geometry descriptor.
    #[must_use]
    pub fn geometry(&self) -> VolumeGeometry {
        self.geometry
    }

    /// Voxel data, `(slice, row, col)` indexed.
    #[must_use]
    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    /// Mutable voxel data.
    pub fn data_mut(&mut self) -> &mut Array3<f32> {
        &mut self.data
    }

    /// Consumes the volume, yielding its raw array.
    #[must_use]
    pub fn into_data(self) -> Array3<f32> {
        self.data
    }
}

/// Dense projection data plus its descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct Sinogram {
    geometry: ProjectionGeometry,
    data: Array3<f32>,
}

impl Sinogram {
    /// Wraps projection data, checking its shape against `geometry`.
    pub fn new(geometry: ProjectionGeometry, data: Array3<f32>) -> CoreResult<Self> {
        if data.shape() != geometry.sinogram_shape() {
            return Err(CoreError::validation(format!(
                "sinogram data shape {:?} does not match geometry {:?}",
                data.shape(),
                geometry.sinogram_shape()
            )));
        }
        Ok(Self { geometry, data })
    }

    /// All-zero sinogram of the given geometry.
    #[must_use]
    pub fn zeros(geometry: ProjectionGeometry) -> Self {
        let shape = geometry.sinogram_shape();
        Self {
            geometry,
            data: Array3::zeros(shape),
        }
    }

    /// The sinogram's projection geometry.
    #[must_use]
    pub fn geometry(&self) -> &ProjectionGeometry {
        &self.geometry
    }

    /// Projection data, `(angle, detector_row, detector_col)` indexed.
    #[must_use]
    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    /// Mutable projection data.
    pub fn data_mut(&mut self) -> &mut Array3<f32> {
        &mut self.data
    }

    /// Consumes the sinogram, yielding its raw array.
    #[must_use]
    pub fn into_data(self) -> Array3<f32> {
        self.data
    }

    /// Sinogram restricted to every `factor`-th angle plane, paired with the
    /// matching subsampled geometry.
    pub fn subsample(&self, factor: usize) -> CoreResult<Self> {
        let geometry = self.geometry.subsample(factor)?;
        let step = factor as isize;
        let data = self.data.slice(s![..;step, .., ..]).to_owned();
        Self::new(geometry, data)
    }
}

/// Region-of-support constraint volume: 255 inside, 0 outside.
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    geometry: VolumeGeometry,
    data: Array3<u8>,
}

impl Mask {
    /// Wraps mask data, checking its shape against `geometry`. Nonzero
    /// entries are normalized to 255.
    pub fn new(geometry: VolumeGeometry, data: Array3<u8>) -> CoreResult<Self> {
        if data.shape() != geometry.shape() {
            return Err(CoreError::validation(format!(
                "mask data shape {:?} does not match geometry {:?}",
                data.shape(),
                geometry.shape()
            )));
        }
        let data = data.mapv(|v| if v != 0 { 255 } else { 0 });
        Ok(Self { geometry, data })
    }

    /// Mask selecting every voxel.
    #[must_use]
    pub fn full(geometry: VolumeGeometry) -> Self {
        Self {
            geometry,
            data: Array3::from_elem(geometry.shape(), 255),
        }
    }

    /// Mask selecting the inscribed cylinder of the cross-section: center at
    /// `(rows/2, cols/2)`, radius `(rows + 1)/2`, identical across slices.
    #[must_use]
    pub fn inscribed_cylinder(geometry: VolumeGeometry) -> Self {
        let cy = geometry.rows() as f64 / 2.0;
        let cx = geometry.cols() as f64 / 2.0;
        let radius = (geometry.rows() as f64 + 1.0) / 2.0;
        let r2 = radius * radius;
        let data = Array3::from_shape_fn(geometry.shape(), |(_, y, x)| {
            let dy = y as f64 - cy;
            let dx = x as f64 - cx;
            if dy * dy + dx * dx < r2 {
                255
            } else {
                0
            }
        });
        Self { geometry, data }
    }

    /// The mask's geometry descriptor.
    #[must_use]
    pub fn geometry(&self) -> VolumeGeometry {
        self.geometry
    }

    /// Mask data, `(slice, row, col)` indexed.
    #[must_use]
    pub fn data(&self) -> &Array3<u8> {
        &self.data
    }

    /// Whether the voxel at `(slice, row, col)` is inside the support.
    #[must_use]
    pub fn contains(&self, slice: usize, row: usize, col: usize) -> bool {
        self.data[[slice, row, col]] != 0
    }

    /// Number of voxels inside the support.
    #[must_use]
    pub fn inside_count(&self) -> usize {
        self.data.iter().filter(|&&v| v != 0).count()
    }

    /// The mask as a float volume (255.0 inside, 0.0 outside), for upload to
    /// engines that only store float data objects.
    #[must_use]
    pub fn to_volume(&self) -> Volume {
        Volume {
            geometry: self.geometry,
            data: self.data.mapv(f32::from),
        }
    }

    /// Mean of `volume` over the voxels inside the support.
    pub fn masked_mean(&self, volume: &Volume) -> CoreResult<f64> {
        if volume.geometry() != self.geometry {
            return Err(CoreError::validation(
                "mask and volume geometries differ",
            ));
        }
        let mut sum = 0.0;
        let mut count = 0usize;
        for (m, v) in self.data.iter().zip(volume.data().iter()) {
            if *m != 0 {
                sum += f64::from(*v);
                count += 1;
            }
        }
        if count == 0 {
            return Ok(0.0);
        }
        Ok(sum / count as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_geometry_rejects_zero_extent() {
        assert!(VolumeGeometry::new(0, 4, 4).is_err());
        assert!(VolumeGeometry::new(4, 0, 4).is_err());
        assert!(VolumeGeometry::new(4, 4, 0).is_err());
        assert!(VolumeGeometry::new(4, 4, 4).is_ok());
    }

    #[test]
    fn test_volume_geometry_shape_round_trip() {
        let geom = VolumeGeometry::new(8, 6, 3).unwrap();
        assert_eq!(geom.shape(), [3, 8, 6]);
        let back = VolumeGeometry::from_shape(geom.shape()).unwrap();
        assert_eq!(back, geom);
        assert_eq!(geom.voxel_count(), 144);
    }

    #[test]
    fn test_circumscribing_detector_width() {
        let angles = vec![0.0, 0.5, 1.0];
        let geom = VolumeGeometry::new(128, 128, 2).unwrap();
        let proj = ProjectionGeometry::circumscribing(&geom, angles.clone(), GeometryKind::Parallel3d)
            .unwrap();
        // ceil(sqrt(2 * 128^2)) = ceil(181.02) = 182
        assert_eq!(proj.detector_cols(), 182);
        assert_eq!(proj.detector_rows(), 2);

        let small = VolumeGeometry::new(4, 4, 1).unwrap();
        let proj = ProjectionGeometry::circumscribing(&small, angles, GeometryKind::Parallel3d)
            .unwrap();
        // ceil(sqrt(32)) = 6
        assert_eq!(proj.detector_cols(), 6);
    }

    #[test]
    fn test_projection_geometry_rejects_empty_angles() {
        let err = ProjectionGeometry::new(4, 6, vec![], GeometryKind::Parallel3d);
        assert!(matches!(
            err,
            Err(crate::error::CoreError::Validation { .. })
        ));
    }

    #[test]
    fn test_subsample_selects_every_kth_angle() {
        let angles: Vec<f64> = (0..10).map(f64::from).collect();
        let proj = ProjectionGeometry::new(2, 6, angles, GeometryKind::Parallel3d).unwrap();

        let half = proj.subsample(2).unwrap();
        assert_eq!(half.angles(), &[0.0, 2.0, 4.0, 6.0, 8.0]);
        let third = proj.subsample(3).unwrap();
        assert_eq!(third.angles(), &[0.0, 3.0, 6.0, 9.0]);
        assert!(proj.subsample(0).is_err());
    }

    #[test]
    fn test_sinogram_subsample_slices_angle_planes() {
        let angles: Vec<f64> = (0..4).map(f64::from).collect();
        let proj = ProjectionGeometry::new(1, 2, angles, GeometryKind::Parallel3d).unwrap();
        let mut sino = Sinogram::zeros(proj);
        for a in 0..4 {
            sino.data_mut()[[a, 0, 0]] = a as f32;
        }

        let half = sino.subsample(2).unwrap();
        assert_eq!(half.geometry().angle_count(), 2);
        assert_eq!(half.data()[[0, 0, 0]], 0.0);
        assert_eq!(half.data()[[1, 0, 0]], 2.0);
    }

    #[test]
    fn test_volume_shape_mismatch_is_validation_error() {
        let geom = VolumeGeometry::new(4, 4, 2).unwrap();
        let data = Array3::<f32>::zeros((2, 4, 3));
        assert!(matches!(
            Volume::new(geom, data),
            Err(crate::error::CoreError::Validation { .. })
        ));
    }

    #[test]
    fn test_inscribed_cylinder_membership() {
        let geom = VolumeGeometry::new(4, 4, 2).unwrap();
        let mask = Mask::inscribed_cylinder(geom);

        // Radius 2.5 around (2, 2): only the (0, 0) corner falls outside.
        assert!(!mask.contains(0, 0, 0));
        assert!(mask.contains(0, 2, 2));
        assert!(mask.contains(0, 0, 2));
        assert!(mask.contains(1, 3, 3));
        assert_eq!(mask.inside_count(), 15 * 2);
    }

    #[test]
    fn test_mask_normalizes_nonzero_to_255() {
        let geom = VolumeGeometry::new(2, 2, 1).unwrap();
        let raw = Array3::from_shape_vec((1, 2, 2), vec![0u8, 1, 7, 255]).unwrap();
        let mask = Mask::new(geom, raw).unwrap();
        assert_eq!(mask.data()[[0, 0, 0]], 0);
        assert_eq!(mask.data()[[0, 0, 1]], 255);
        assert_eq!(mask.data()[[0, 1, 0]], 255);
        assert_eq!(mask.inside_count(), 3);
    }

    #[test]
    fn test_masked_mean_ignores_outside_voxels() {
        let geom = VolumeGeometry::new(2, 2, 1).unwrap();
        let raw = Array3::from_shape_vec((1, 2, 2), vec![255u8, 255, 0, 0]).unwrap();
        let mask = Mask::new(geom, raw).unwrap();

        let data = Array3::from_shape_vec((1, 2, 2), vec![1.0f32, 3.0, 100.0, 100.0]).unwrap();
        let volume = Volume::new(geom, data).unwrap();
        let mean = mask.masked_mean(&volume).unwrap();
        assert!((mean - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_mask_to_volume_values() {
        let geom = VolumeGeometry::new(2, 2, 1).unwrap();
        let mask = Mask::full(geom);
        let vol = mask.to_volume();
        assert_eq!(vol.data()[[0, 1, 1]], 255.0);
    }

    #[test]
    fn test_algorithm_kind_labels() {
        assert_eq!(AlgorithmKind::Sirt.as_str(), "sirt");
        assert_eq!(AlgorithmKind::Cgls.to_string(), "cgls");
    }
}
