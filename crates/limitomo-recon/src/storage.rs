//! Volume persistence and run reports.
//!
//! Volumes are stored as flat little-endian files: a `[slices, rows, cols]`
//! u32 header followed by the f32 voxel payload in array order. Run metadata
//! goes to a JSON sidecar so external plotting tools can pick up labels,
//! fitted mixtures, and histograms without parsing volume data.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{DateTime, Utc};
use limitomo_core::{
    AlgorithmKind, CoreError, CoreResult, Volume, VolumeGeometry, VolumeStore,
};
use limitomo_gmm::{Gmm, Histogram};
use ndarray::Array3;
use serde::{Deserialize, Serialize};
use tracing::info;

/// [`VolumeStore`] backed by headered raw files.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawVolumeStore;

impl RawVolumeStore {
    /// Creates the store.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl VolumeStore for RawVolumeStore {
    fn write_volume(&self, path: &Path, volume: &Volume) -> CoreResult<()> {
        let file = File::create(path).map_err(|e| store_error("write volume", path, &e))?;
        let mut writer = BufWriter::new(file);

        for extent in volume.geometry().shape() {
            writer
                .write_u32::<LittleEndian>(extent as u32)
                .map_err(|e| store_error("write volume", path, &e))?;
        }
        for &voxel in volume.data().iter() {
            writer
                .write_f32::<LittleEndian>(voxel)
                .map_err(|e| store_error("write volume", path, &e))?;
        }
        writer
            .flush()
            .map_err(|e| store_error("write volume", path, &e))?;

        info!(
            path = %path.display(),
            voxels = volume.geometry().voxel_count(),
            "volume written"
        );
        Ok(())
    }

    fn read_volume(&self, path: &Path) -> CoreResult<Volume> {
        let file = File::open(path).map_err(|e| store_error("read volume", path, &e))?;
        let mut reader = BufReader::new(file);

        let mut shape = [0usize; 3];
        for extent in &mut shape {
            *extent = reader
                .read_u32::<LittleEndian>()
                .map_err(|e| store_error("read volume", path, &e))? as usize;
        }
        let geometry = VolumeGeometry::from_shape(shape)?;

        let mut voxels = vec![0.0f32; geometry.voxel_count()];
        reader
            .read_f32_into::<LittleEndian>(&mut voxels)
            .map_err(|e| store_error("read volume", path, &e))?;

        let data = Array3::from_shape_vec(geometry.shape(), voxels)
            .map_err(|e| CoreError::resource("read volume", e.to_string()))?;
        Volume::new(geometry, data)
    }
}

fn store_error(operation: &str, path: &Path, source: &std::io::Error) -> CoreError {
    CoreError::resource(operation, format!("{}: {source}", path.display()))
}

/// First free variant of `path`, appending `_1`, `_2`, ... before the
/// extension when the file already exists.
#[must_use]
pub fn unique_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path.extension().map(|e| e.to_string_lossy().into_owned());

    let mut n = 1u64;
    loop {
        let name = match &extension {
            Some(ext) => format!("{stem}_{n}.{ext}"),
            None => format!("{stem}_{n}"),
        };
        let candidate = path.with_file_name(name);
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

/// Per-member entry of a [`RunReport`], the external rendering surface for
/// one family reconstruction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberReport {
    /// Display label (the member's angle count).
    pub label: String,
    /// Angular subsampling factor.
    pub factor: usize,
    /// Angles used by this member.
    pub angle_count: usize,
    /// Angular density relative to the full acquisition.
    pub density: f64,
    /// Where the member's volume was written.
    pub volume_path: PathBuf,
    /// Mixture fit to the member's voxel values, when available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mixture: Option<Gmm>,
    /// Histogram the mixture was fit against, when available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub histogram: Option<Histogram>,
}

/// JSON sidecar describing one multi-resolution run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// When the run finished.
    pub created_at: DateTime<Utc>,
    /// Reconstruction algorithm used for every member.
    pub algorithm: AlgorithmKind,
    /// Iteration count used for every member.
    pub iterations: usize,
    /// One entry per family member, ordered by factor.
    pub members: Vec<MemberReport>,
}

impl RunReport {
    /// Empty report stamped with the current time.
    #[must_use]
    pub fn new(algorithm: AlgorithmKind, iterations: usize) -> Self {
        Self {
            created_at: Utc::now(),
            algorithm,
            iterations,
            members: Vec::new(),
        }
    }

    /// Serializes the report to `path` as pretty JSON.
    pub fn write(&self, path: &Path) -> CoreResult<()> {
        let file = File::create(path).map_err(|e| store_error("write report", path, &e))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)
            .map_err(|e| CoreError::resource("write report", e.to_string()))?;
        Ok(())
    }
}
