//! Angle and projection-domain helpers shared across the workspace.

use ndarray::Array3;

/// Absolute plane sums below this are treated as zero during normalization.
const SUM_EPS: f32 = 1e-12;

/// Generates `count` angles in radians, evenly spaced over `[0, pi)` with
/// the endpoint excluded (0 and pi coincide for parallel beams).
#[must_use]
pub fn angle_span(count: usize) -> Vec<f64> {
    (0..count)
        .map(|i| i as f64 * std::f64::consts::PI / count as f64)
        .collect()
}

/// Every `factor`-th entry of `angles`, starting at the first. A factor of 0
/// is treated as 1.
#[must_use]
pub fn subsample_angles(angles: &[f64], factor: usize) -> Vec<f64> {
    angles.iter().copied().step_by(factor.max(1)).collect()
}

/// Per-angle normalization: divides every angle plane of a
/// `(angle, detector_row, detector_col)` array by the absolute value of its
/// sum. This makes projection-domain comparisons invariant to overall
/// intensity scale. Planes whose absolute sum is below `1e-12` are left
/// unscaled.
#[must_use]
pub fn normalize_per_angle(sino: &Array3<f32>) -> Array3<f32> {
    let mut out = sino.clone();
    for mut plane in out.outer_iter_mut() {
        let denom = plane.iter().sum::<f32>().abs();
        if denom > SUM_EPS {
            plane.mapv_inplace(|v| v / denom);
        }
    }
    out
}

/// Replaces voxels exactly equal to `sentinel` with 0.0. CT exporters pad
/// the region outside the field of view with a fixed fill value (commonly
/// -3024); this resets such padding before projection.
pub fn fill_sentinel(data: &mut Array3<f32>, sentinel: f32) {
    data.mapv_inplace(|v| if v == sentinel { 0.0 } else { v });
}
