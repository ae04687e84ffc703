//! On-disk map format.
//!
//! A map is stored as its `2^D` sub-lattice storages (the pyramid partition)
//! plus one metadata record:
//!
//! ```text
//! <root>/
//!   map.yaml           origin, resolution, min/max bundle index, bundle list
//!   0/d<i0>_<i1>...    one YAML file per distribution of sub-lattice 0
//!   1/...
//!   <2^D - 1>/...
//! ```
//!
//! Bundle `bi` stores its slot `i` distribution at the coarse index
//! `si[axis] = floor(bi[axis]/2) + bit(i, axis) * (bi[axis] mod 2)`; loading
//! maps it back through `bi[axis] = clamp(2 * si[axis], min[axis], max[axis])`.
//! Only sufficient statistics are written, so a round trip is exact.
//!
//! The metadata file is written last and removed first, so an interrupted
//! save never leaves a directory that loads as a valid map.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use nalgebra::{SMatrix, SVector};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::geometry::Transform;
use crate::grid::{GridIndex, SparseGridStorage, slot_count};
use crate::map::{GridMap, GridMapConfig};
use crate::math::Distribution;

use super::error::CodecError;

/// Name of the metadata record inside the map root.
pub const METADATA_FILE: &str = "map.yaml";

/// Prefix of every distribution file name.
const DISTRIBUTION_FILE_PREFIX: &str = "d";

// ============================================================================
// Records
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct TransformRecord {
    /// Row-major D x D.
    rotation: Vec<f64>,
    translation: Vec<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct MapRecord {
    origin: TransformRecord,
    resolution: f64,
    #[serde(default)]
    limit_covariance: bool,
    min_index: Option<Vec<i32>>,
    max_index: Option<Vec<i32>>,
    bundles: Vec<Vec<i32>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct DistributionRecord {
    index: Vec<i32>,
    sample_count: usize,
    mean: Vec<f64>,
    /// Row-major D x D; only the upper triangle is meaningful.
    second_moment: Vec<f64>,
}

/// Decoded and validated metadata.
struct MapHeader<const D: usize> {
    origin: Transform<D>,
    config: GridMapConfig,
    bounds: Option<(GridIndex<D>, GridIndex<D>)>,
    bundles: Vec<GridIndex<D>>,
}

// ============================================================================
// Pyramid partition
// ============================================================================

/// The `2^D` coarse distribution storages a map is persisted as.
#[derive(Debug, Clone)]
pub struct PyramidPartition<const D: usize> {
    slots: Vec<SparseGridStorage<D, Distribution<D>>>,
}

impl<const D: usize> PyramidPartition<D> {
    /// Empty partition with `2^D` slots.
    pub fn new() -> Self {
        Self {
            slots: (0..slot_count::<D>())
                .map(|_| SparseGridStorage::new())
                .collect(),
        }
    }

    /// Split a map into its sub-lattice storages.
    ///
    /// Bundles are visited in lexicographic order; the first non-empty
    /// distribution reaching a coarse index wins.
    pub fn from_map(map: &GridMap<D>) -> Self {
        let mut partition = Self::new();
        for bi in map.bundle_indices() {
            for (slot, storage) in partition.slots.iter_mut().enumerate() {
                let si = bi.coarse(slot);
                if storage.contains(&si) {
                    continue;
                }
                if let Some(d) = map.grid().distribution(&bi, slot) {
                    if !d.is_empty() {
                        storage.get_or_allocate_with(si, || d.clone());
                    }
                }
            }
        }
        partition
    }

    /// Storage of slot `slot`.
    pub fn slot(&self, slot: usize) -> Option<&SparseGridStorage<D, Distribution<D>>> {
        self.slots.get(slot)
    }

    /// Total number of stored distributions.
    pub fn num_distributions(&self) -> usize {
        self.slots.iter().map(SparseGridStorage::len).sum()
    }

    /// Write every stored distribution back into `map`, mapping coarse
    /// indices to bundle indices clamped to `[min, max]`.
    pub fn restore_into(self, map: &mut GridMap<D>, min: &GridIndex<D>, max: &GridIndex<D>) {
        for (slot, storage) in self.slots.into_iter().enumerate() {
            for (si, distribution) in storage {
                let bi = si.fine(min, max);
                map.grid_mut().overwrite(&bi, slot, distribution);
            }
        }
    }
}

impl<const D: usize> Default for PyramidPartition<D> {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Save
// ============================================================================

/// Save `map` under the directory `path`, creating it if needed.
///
/// Existing sub-lattice directories and metadata in `path` are replaced.
pub fn save<const D: usize, P: AsRef<Path>>(map: &GridMap<D>, path: P) -> Result<()> {
    let root = path.as_ref();
    fs::create_dir_all(root).with_context(|| format!("Failed to create {:?}", root))?;

    let metadata_path = root.join(METADATA_FILE);
    if metadata_path.exists() {
        fs::remove_file(&metadata_path)
            .with_context(|| format!("Failed to remove stale {:?}", metadata_path))?;
    }

    let partition = PyramidPartition::from_map(map);
    for (slot, storage) in partition.slots.iter().enumerate() {
        let dir = slot_directory(root, slot);
        if dir.is_dir() {
            fs::remove_dir_all(&dir)
                .with_context(|| format!("Failed to clear {:?}", dir))?;
        } else if dir.exists() {
            bail!("Failed to create {:?}: not a directory", dir);
        }
        fs::create_dir_all(&dir).with_context(|| format!("Failed to create {:?}", dir))?;
        write_slot(storage, &dir)?;
        debug!("Wrote {} distributions to {:?}", storage.len(), dir);
    }

    write_metadata(map, &metadata_path)?;

    info!(
        "Saved map with {} bundles ({} distributions) to {:?}",
        map.num_bundles(),
        partition.num_distributions(),
        root
    );
    Ok(())
}

fn slot_directory(root: &Path, slot: usize) -> PathBuf {
    root.join(slot.to_string())
}

fn distribution_file_name<const D: usize>(si: &GridIndex<D>) -> String {
    let parts: Vec<String> = si.coords().iter().map(i32::to_string).collect();
    format!("{}{}", DISTRIBUTION_FILE_PREFIX, parts.join("_"))
}

fn write_slot<const D: usize>(
    storage: &SparseGridStorage<D, Distribution<D>>,
    dir: &Path,
) -> Result<()> {
    for (si, d) in storage.iter() {
        let record = DistributionRecord {
            index: si.coords().to_vec(),
            sample_count: d.sample_count(),
            mean: d.mean().as_slice().to_vec(),
            second_moment: d.second_moment().transpose().as_slice().to_vec(),
        };
        let file_path = dir.join(distribution_file_name(si));
        let file = File::create(&file_path)
            .with_context(|| format!("Failed to create {:?}", file_path))?;
        serde_yaml::to_writer(BufWriter::new(file), &record)
            .with_context(|| format!("Failed to write {:?}", file_path))?;
    }
    Ok(())
}

fn write_metadata<const D: usize>(map: &GridMap<D>, path: &Path) -> Result<()> {
    let record = MapRecord {
        origin: TransformRecord {
            rotation: map.origin().rotation_row_major(),
            translation: map.origin().translation.as_slice().to_vec(),
        },
        resolution: map.resolution(),
        limit_covariance: map.limit_covariance(),
        min_index: map.min_index().map(|i| i.coords().to_vec()),
        max_index: map.max_index().map(|i| i.coords().to_vec()),
        bundles: map
            .bundle_indices()
            .iter()
            .map(|bi| bi.coords().to_vec())
            .collect(),
    };

    let yaml = serde_yaml::to_string(&record).context("Failed to serialize map metadata")?;
    let tmp_path = path.with_extension("yaml.tmp");
    fs::write(&tmp_path, yaml).with_context(|| format!("Failed to write {:?}", tmp_path))?;
    fs::rename(&tmp_path, path).with_context(|| format!("Failed to move {:?} into place", tmp_path))?;
    Ok(())
}

// ============================================================================
// Load
// ============================================================================

/// Load a map saved with [`save`] from the directory `path`.
///
/// Fails without returning a partial map if the root, the metadata or any
/// of the `2^D` sub-lattice directories is missing, or a record has the
/// wrong shape for dimension D.
pub fn load<const D: usize, P: AsRef<Path>>(path: P) -> Result<GridMap<D>> {
    let root = path.as_ref();
    if !root.is_dir() {
        bail!(CodecError::MissingDirectory(root.to_path_buf()));
    }
    let slot_dirs: Vec<PathBuf> = (0..slot_count::<D>())
        .map(|slot| slot_directory(root, slot))
        .collect();
    if let Some(missing) = slot_dirs.iter().find(|dir| !dir.is_dir()) {
        bail!(CodecError::MissingDirectory(missing.clone()));
    }

    let metadata_path = root.join(METADATA_FILE);
    let record: MapRecord = serde_yaml::from_reader(
        File::open(&metadata_path).with_context(|| format!("Failed to open {:?}", metadata_path))?,
    )
    .with_context(|| format!("Failed to parse {:?}", metadata_path))?;
    let header = parse_header::<D>(record, &metadata_path)?;

    let mut partition = PyramidPartition::<D>::new();
    for (storage, dir) in partition.slots.iter_mut().zip(&slot_dirs) {
        read_slot(dir, storage)?;
        debug!("Read {} distributions from {:?}", storage.len(), dir);
    }

    let mut map = GridMap::try_with_config(header.origin, &header.config)?;
    for bi in &header.bundles {
        map.grid_mut().allocate(*bi);
    }
    if let Some((min, max)) = header.bounds {
        partition.restore_into(&mut map, &min, &max);
        if map.min_index() != Some(min) || map.max_index() != Some(max) {
            warn!(
                "Stored bounds {}..{} differ from bundle bounds {:?}..{:?}",
                min,
                max,
                map.min_index(),
                map.max_index()
            );
        }
    }

    info!("Loaded map with {} bundles from {:?}", map.num_bundles(), root);
    Ok(map)
}

fn check_arity(path: &Path, field: &'static str, expected: usize, got: usize) -> Result<()> {
    if expected != got {
        bail!(CodecError::Arity {
            record: path.display().to_string(),
            field,
            expected,
            got,
        });
    }
    Ok(())
}

fn parse_index<const D: usize>(
    path: &Path,
    field: &'static str,
    values: &[i32],
) -> Result<GridIndex<D>> {
    check_arity(path, field, D, values.len())?;
    GridIndex::try_from(values).map_err(|got| {
        CodecError::Arity {
            record: path.display().to_string(),
            field,
            expected: D,
            got,
        }
        .into()
    })
}

fn parse_header<const D: usize>(record: MapRecord, path: &Path) -> Result<MapHeader<D>> {
    check_arity(path, "origin.rotation", D * D, record.origin.rotation.len())?;
    check_arity(path, "origin.translation", D, record.origin.translation.len())?;
    let origin = Transform::from_row_major(&record.origin.rotation, &record.origin.translation)
        .with_context(|| format!("{:?}: malformed origin", path))?;

    if !(record.resolution.is_finite() && record.resolution > 0.0) {
        bail!(CodecError::InvalidResolution(record.resolution));
    }

    let bounds = match (&record.min_index, &record.max_index) {
        (Some(min), Some(max)) => Some((
            parse_index::<D>(path, "min_index", min)?,
            parse_index::<D>(path, "max_index", max)?,
        )),
        _ => None,
    };
    if bounds.is_none() && !record.bundles.is_empty() {
        bail!(CodecError::MissingBounds(path.display().to_string()));
    }

    let bundles = record
        .bundles
        .iter()
        .map(|bi| parse_index::<D>(path, "bundles", bi))
        .collect::<Result<Vec<_>>>()?;

    Ok(MapHeader {
        origin,
        config: GridMapConfig {
            resolution: record.resolution,
            limit_covariance: record.limit_covariance,
        },
        bounds,
        bundles,
    })
}

fn read_slot<const D: usize>(
    dir: &Path,
    storage: &mut SparseGridStorage<D, Distribution<D>>,
) -> Result<()> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to list {:?}", dir))? {
        let path = entry?.path();
        let is_distribution = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with(DISTRIBUTION_FILE_PREFIX));
        if path.is_file() && is_distribution {
            files.push(path);
        } else {
            warn!("Skipping unexpected entry {:?}", path);
        }
    }
    files.sort();

    for path in files {
        let record: DistributionRecord = serde_yaml::from_reader(
            File::open(&path).with_context(|| format!("Failed to open {:?}", path))?,
        )
        .with_context(|| format!("Failed to parse {:?}", path))?;

        let si = parse_index::<D>(&path, "index", &record.index)?;
        check_arity(&path, "mean", D, record.mean.len())?;
        check_arity(&path, "second_moment", D * D, record.second_moment.len())?;

        let distribution = Distribution::from_statistics(
            record.sample_count,
            SVector::from_column_slice(&record.mean),
            SMatrix::from_row_slice(&record.second_moment),
        );
        if storage.contains(&si) {
            warn!("Duplicate distribution index {} in {:?}", si, dir);
            continue;
        }
        storage.get_or_allocate_with(si, || distribution);
    }
    Ok(())
}
