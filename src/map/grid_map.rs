//! GridMap - sparse NDT map of overlapping Gaussian cells.
//!
//! Points are brought into the map frame with the inverse origin transform
//! and binned at half the map resolution. The bundle at that index spans
//! `2^D` full-resolution cells, one per staggered sub-lattice; every one of
//! them accumulates the point. Sampling sums the `2^D` densities with weight
//! `1 / 2^D`, which gives a continuous field across cell borders.
//!
//! Insertion is best effort: points with non-finite coordinates or outside
//! the `i32` index range are dropped without an error.

use anyhow::Result;
use nalgebra::SVector;
use tracing::{debug, trace};

use crate::geometry::Transform;
use crate::grid::{BundleGrid, GridIndex, SparseGridStorage, slot_count};
use crate::math::Distribution;

use super::config::GridMapConfig;
use super::expansion::{ExpansionPolicy, MinSampleCount};

/// Sparse multi-lattice NDT map in D dimensions.
pub struct GridMap<const D: usize> {
    /// `T_world_map`.
    origin: Transform<D>,

    /// Edge length of one distribution cell.
    resolution: f64,

    /// Edge length of one bundle cell (`resolution / 2`).
    bundle_resolution: f64,

    /// Bundles and the sub-lattice distributions they cover.
    grid: BundleGrid<D>,

    /// Injected refinement predicate.
    expansion: Box<dyn ExpansionPolicy<D>>,
}

impl<const D: usize> GridMap<D> {
    /// Weight of each sub-lattice density in a sample.
    const SLOT_WEIGHT: f64 = 1.0 / slot_count::<D>() as f64;

    /// Create an empty map with the given origin and resolution.
    ///
    /// # Panics
    /// If `resolution` is not positive and finite.
    pub fn new(origin: Transform<D>, resolution: f64) -> Self {
        Self::with_config(origin, &GridMapConfig::with_resolution(resolution))
    }

    /// Create an empty map from a config.
    ///
    /// # Panics
    /// If the config resolution is not positive and finite. Use
    /// [`try_with_config`](Self::try_with_config) for untrusted configs.
    pub fn with_config(origin: Transform<D>, config: &GridMapConfig) -> Self {
        assert!(
            config.resolution.is_finite() && config.resolution > 0.0,
            "resolution must be positive and finite, got {}",
            config.resolution
        );
        Self::from_valid_config(origin, config)
    }

    /// Create an empty map from a config, rejecting invalid resolutions.
    pub fn try_with_config(origin: Transform<D>, config: &GridMapConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_valid_config(origin, config))
    }

    fn from_valid_config(origin: Transform<D>, config: &GridMapConfig) -> Self {
        Self {
            origin,
            resolution: config.resolution,
            bundle_resolution: 0.5 * config.resolution,
            grid: BundleGrid::new(config.limit_covariance),
            expansion: Box::new(MinSampleCount::default()),
        }
    }

    /// Replace the refinement predicate.
    pub fn with_expansion_policy<P>(mut self, policy: P) -> Self
    where
        P: ExpansionPolicy<D> + 'static,
    {
        self.expansion = Box::new(policy);
        self
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// `T_world_map`.
    pub fn origin(&self) -> &Transform<D> {
        &self.origin
    }

    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    pub fn bundle_resolution(&self) -> f64 {
        self.bundle_resolution
    }

    pub fn limit_covariance(&self) -> bool {
        self.grid.limit_covariance()
    }

    /// Config this map was built with.
    pub fn config(&self) -> GridMapConfig {
        GridMapConfig {
            resolution: self.resolution,
            limit_covariance: self.grid.limit_covariance(),
        }
    }

    /// Smallest bundle index per axis ever allocated.
    pub fn min_index(&self) -> Option<GridIndex<D>> {
        self.grid.min_index()
    }

    /// Largest bundle index per axis ever allocated.
    pub fn max_index(&self) -> Option<GridIndex<D>> {
        self.grid.max_index()
    }

    /// Number of allocated bundles.
    pub fn num_bundles(&self) -> usize {
        self.grid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grid.is_empty()
    }

    /// Allocated bundle indices in lexicographic order.
    pub fn bundle_indices(&self) -> Vec<GridIndex<D>> {
        self.grid.bundle_indices()
    }

    pub fn contains(&self, bi: &GridIndex<D>) -> bool {
        self.grid.contains(bi)
    }

    /// Underlying bundle grid.
    pub fn grid(&self) -> &BundleGrid<D> {
        &self.grid
    }

    pub(crate) fn grid_mut(&mut self) -> &mut BundleGrid<D> {
        &mut self.grid
    }

    /// Distributions of bundle `bi` ordered by sub-lattice.
    pub fn bundle(&self, bi: &GridIndex<D>) -> Option<Vec<&Distribution<D>>> {
        self.grid.distributions(bi).map(Iterator::collect)
    }

    // ------------------------------------------------------------------
    // Index resolution
    // ------------------------------------------------------------------

    /// Map-frame coordinates and bundle index of a world-frame point.
    pub fn to_bundle_index(&self, p: &SVector<f64, D>) -> Option<(SVector<f64, D>, GridIndex<D>)> {
        let pm = self.origin.inverse_transform_point(p);
        let bi = GridIndex::from_coords(pm.as_slice(), self.bundle_resolution)?;
        Some((pm, bi))
    }

    /// Bundle index of a world-frame point.
    pub fn bundle_index_of(&self, p: &SVector<f64, D>) -> Option<GridIndex<D>> {
        self.to_bundle_index(p).map(|(_, bi)| bi)
    }

    // ------------------------------------------------------------------
    // Insertion
    // ------------------------------------------------------------------

    /// Insert one world-frame point.
    ///
    /// Returns `false` if the point could not be resolved to a bundle and
    /// was dropped.
    pub fn insert(&mut self, p: &SVector<f64, D>) -> bool {
        let Some((pm, bi)) = self.to_bundle_index(p) else {
            trace!("Dropping unresolvable point {:?}", p.as_slice());
            return false;
        };
        self.grid.add(bi, &pm);
        true
    }

    /// Insert a batch of points given in the frame `points_origin`
    /// (`T_world_points`).
    ///
    /// Points are first aggregated per bundle index in a temporary storage;
    /// each aggregate is then merged once into the `2^D` distributions of
    /// its bundle. Returns the number of points kept.
    pub fn insert_points<I>(&mut self, points: I, points_origin: &Transform<D>) -> usize
    where
        I: IntoIterator<Item = SVector<f64, D>>,
    {
        let mut aggregates: SparseGridStorage<D, Distribution<D>> = SparseGridStorage::new();
        let mut total = 0usize;
        let mut kept = 0usize;

        for p in points {
            total += 1;
            let pw = points_origin.transform_point(&p);
            if !pw.iter().all(|v| v.is_finite()) {
                continue;
            }
            if let Some((pm, bi)) = self.to_bundle_index(&pw) {
                aggregates.get_or_allocate(bi).add(&pm);
                kept += 1;
            }
        }

        aggregates.traverse(|bi, aggregate| self.grid.merge(*bi, aggregate));

        debug!(
            "Inserted {}/{} points into {} bundles ({} total)",
            kept,
            total,
            aggregates.len(),
            self.grid.len()
        );
        kept
    }

    // ------------------------------------------------------------------
    // Sampling
    // ------------------------------------------------------------------

    /// Density at a world-frame point; 0 where no bundle exists.
    pub fn sample(&self, p: &SVector<f64, D>) -> f64 {
        match self.to_bundle_index(p) {
            Some((pm, bi)) => self.sample_at(&pm, &bi),
            None => 0.0,
        }
    }

    /// Density at a map-frame point evaluated against bundle `bi`.
    pub fn sample_at(&self, pm: &SVector<f64, D>, bi: &GridIndex<D>) -> f64 {
        self.grid.distributions(bi).map_or(0.0, |distributions| {
            distributions
                .map(|d| Self::SLOT_WEIGHT * d.density(pm))
                .sum()
        })
    }

    /// Like [`sample`](Self::sample) with unnormalized cell densities.
    pub fn sample_non_normalized(&self, p: &SVector<f64, D>) -> f64 {
        match self.to_bundle_index(p) {
            Some((pm, bi)) => self.sample_non_normalized_at(&pm, &bi),
            None => 0.0,
        }
    }

    /// Like [`sample_at`](Self::sample_at) with unnormalized cell densities.
    pub fn sample_non_normalized_at(&self, pm: &SVector<f64, D>, bi: &GridIndex<D>) -> f64 {
        self.grid.distributions(bi).map_or(0.0, |distributions| {
            distributions
                .map(|d| Self::SLOT_WEIGHT * d.non_normalized_density(pm))
                .sum()
        })
    }

    // ------------------------------------------------------------------
    // Refinement
    // ------------------------------------------------------------------

    /// Whether `distribution` should be refined, per the injected policy.
    pub fn should_expand(&self, distribution: &Distribution<D>) -> bool {
        self.expansion.should_expand(distribution)
    }

    /// Bundles with at least one distribution the policy wants refined,
    /// in lexicographic order.
    pub fn expandable_bundles(&self) -> Vec<GridIndex<D>> {
        self.grid
            .bundle_indices()
            .into_iter()
            .filter(|bi| {
                self.grid
                    .distributions(bi)
                    .is_some_and(|mut ds| ds.any(|d| self.should_expand(d)))
            })
            .collect()
    }
}

impl<const D: usize> std::fmt::Debug for GridMap<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GridMap")
            .field("origin", &self.origin)
            .field("resolution", &self.resolution)
            .field("num_bundles", &self.grid.len())
            .field("min_index", &self.grid.min_index())
            .field("max_index", &self.grid.max_index())
            .finish()
    }
}
