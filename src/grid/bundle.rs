//! Overlapping cell bundles.
//!
//! The map lattice has half the map resolution. Each bundle index `bi` is
//! covered by exactly one full-resolution cell on each of the `2^D`
//! sub-lattices obtained by shifting the grid by 0 or +resolution/2 along
//! each axis. A [`CellBundle`] holds the handles of those `2^D` cells;
//! the distributions themselves live in one [`SparseGridStorage`] per
//! sub-lattice, so neighboring bundles see the same distribution from
//! differently centered windows.
//!
//! ```text
//!   sub-lattice 0   |     |     |        bundle bi covers one cell of
//!   sub-lattice 1      |     |     |     every sub-lattice; the sum of
//!   bundles         | | | | | | | |      their densities interpolates
//! ```

use nalgebra::SVector;

use crate::math::Distribution;

use super::index::{GridIndex, slot_count};
use super::storage::SparseGridStorage;

/// Handles of the `2^D` sub-lattice cells covering one bundle index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellBundle<const D: usize> {
    slots: Vec<GridIndex<D>>,
}

impl<const D: usize> CellBundle<D> {
    /// Resolve the sub-lattice cells of bundle index `bi`.
    pub fn new(bi: GridIndex<D>) -> Self {
        Self {
            slots: (0..slot_count::<D>()).map(|slot| bi.coarse(slot)).collect(),
        }
    }

    /// Cell index on sub-lattice `slot`.
    #[inline]
    pub fn slot(&self, slot: usize) -> Option<&GridIndex<D>> {
        self.slots.get(slot)
    }

    /// Cell indices ordered by sub-lattice.
    #[inline]
    pub fn slots(&self) -> &[GridIndex<D>] {
        &self.slots
    }
}

/// Sparse storage of bundles together with the sub-lattice distributions
/// they refer to.
#[derive(Debug, Clone)]
pub struct BundleGrid<const D: usize> {
    bundles: SparseGridStorage<D, CellBundle<D>>,
    lattices: Vec<SparseGridStorage<D, Distribution<D>>>,
    limit_covariance: bool,
}

impl<const D: usize> BundleGrid<D> {
    /// Create an empty grid. `limit_covariance` is applied to every
    /// distribution allocated by this grid.
    pub fn new(limit_covariance: bool) -> Self {
        Self {
            bundles: SparseGridStorage::new(),
            lattices: (0..slot_count::<D>())
                .map(|_| SparseGridStorage::new())
                .collect(),
            limit_covariance,
        }
    }

    /// Number of allocated bundles.
    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }

    pub fn limit_covariance(&self) -> bool {
        self.limit_covariance
    }

    pub fn contains(&self, bi: &GridIndex<D>) -> bool {
        self.bundles.contains(bi)
    }

    pub fn bundle(&self, bi: &GridIndex<D>) -> Option<&CellBundle<D>> {
        self.bundles.get(bi)
    }

    /// Smallest bundle index per axis ever allocated.
    pub fn min_index(&self) -> Option<GridIndex<D>> {
        self.bundles.min_index()
    }

    /// Largest bundle index per axis ever allocated.
    pub fn max_index(&self) -> Option<GridIndex<D>> {
        self.bundles.max_index()
    }

    /// Allocated bundle indices in lexicographic order.
    pub fn bundle_indices(&self) -> Vec<GridIndex<D>> {
        self.bundles.sorted_indices()
    }

    /// Storage of sub-lattice `slot`.
    pub fn lattice(&self, slot: usize) -> Option<&SparseGridStorage<D, Distribution<D>>> {
        self.lattices.get(slot)
    }

    /// Visit the `2^D` distributions of bundle `bi`, allocating the bundle
    /// and any missing sub-lattice cell first.
    pub fn for_each_slot_mut<F>(&mut self, bi: GridIndex<D>, mut f: F)
    where
        F: FnMut(usize, &mut Distribution<D>),
    {
        let limit_covariance = self.limit_covariance;
        let lattices = &mut self.lattices;
        let bundle = self
            .bundles
            .get_or_allocate_with(bi, || CellBundle::new(bi));

        for (slot, (lattice, si)) in lattices.iter_mut().zip(bundle.slots()).enumerate() {
            let distribution = lattice.get_or_allocate_with(*si, || {
                Distribution::with_limit_covariance(limit_covariance)
            });
            f(slot, distribution);
        }
    }

    /// Allocate bundle `bi` with empty distributions where none exist yet.
    pub fn allocate(&mut self, bi: GridIndex<D>) {
        self.for_each_slot_mut(bi, |_, _| {});
    }

    /// Add one map-frame point to every distribution of bundle `bi`.
    pub fn add(&mut self, bi: GridIndex<D>, p: &SVector<f64, D>) {
        self.for_each_slot_mut(bi, |_, d| d.add(p));
    }

    /// Merge aggregated statistics into every distribution of bundle `bi`.
    pub fn merge(&mut self, bi: GridIndex<D>, aggregate: &Distribution<D>) {
        self.for_each_slot_mut(bi, |_, d| d.merge(aggregate));
    }

    /// Distributions of bundle `bi` ordered by sub-lattice, `None` if the
    /// bundle was never allocated.
    pub fn distributions(
        &self,
        bi: &GridIndex<D>,
    ) -> Option<impl Iterator<Item = &Distribution<D>> + '_> {
        let bundle = self.bundles.get(bi)?;
        Some(
            bundle
                .slots()
                .iter()
                .zip(&self.lattices)
                .filter_map(|(si, lattice)| lattice.get(si)),
        )
    }

    /// Distribution of bundle `bi` on sub-lattice `slot`.
    pub fn distribution(&self, bi: &GridIndex<D>, slot: usize) -> Option<&Distribution<D>> {
        let si = self.bundles.get(bi)?.slot(slot)?;
        self.lattices.get(slot)?.get(si)
    }

    /// Replace the statistics of the sub-lattice `slot` cell covering `bi`.
    ///
    /// Does not allocate a bundle at `bi`; the cell is shared with whichever
    /// allocated bundles cover it.
    pub fn overwrite(&mut self, bi: &GridIndex<D>, slot: usize, mut distribution: Distribution<D>) {
        let Some(lattice) = self.lattices.get_mut(slot) else {
            return;
        };
        distribution.set_limit_covariance(self.limit_covariance);
        *lattice.get_or_allocate_with(bi.coarse(slot), Distribution::new) = distribution;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector2;

    #[test]
    fn test_bundle_slots_follow_coarse_index() {
        let bundle = CellBundle::new(GridIndex::new([3, 2]));

        assert_eq!(bundle.slots().len(), 4);
        assert_eq!(bundle.slot(0), Some(&GridIndex::new([1, 1])));
        assert_eq!(bundle.slot(1), Some(&GridIndex::new([2, 1])));
        assert_eq!(bundle.slot(2), Some(&GridIndex::new([1, 1])));
        assert_eq!(bundle.slot(3), Some(&GridIndex::new([2, 1])));
        assert_eq!(bundle.slot(4), None);
    }

    #[test]
    fn test_add_updates_all_slots() {
        let mut grid = BundleGrid::<2>::new(false);
        let bi = GridIndex::new([0, 0]);
        grid.add(bi, &Vector2::new(0.1, 0.2));
        grid.add(bi, &Vector2::new(0.2, 0.1));

        let counts: Vec<_> = grid
            .distributions(&bi)
            .unwrap()
            .map(|d| d.sample_count())
            .collect();
        assert_eq!(counts, vec![2, 2, 2, 2]);
        assert_eq!(grid.len(), 1);
    }

    #[test]
    fn test_neighboring_bundles_share_cells() {
        let mut grid = BundleGrid::<1>::new(false);
        // Bundles 0 and 1 share the slot-0 cell 0; bundle 1 uses cell 1 on slot 1.
        grid.add(GridIndex::new([0]), &nalgebra::Vector1::new(0.1));
        grid.add(GridIndex::new([1]), &nalgebra::Vector1::new(0.3));

        let d0 = grid.distribution(&GridIndex::new([0]), 0).unwrap();
        let d1 = grid.distribution(&GridIndex::new([1]), 0).unwrap();
        assert_eq!(d0.sample_count(), 2);
        assert_eq!(d1.sample_count(), 2);

        assert_eq!(grid.distribution(&GridIndex::new([0]), 1).unwrap().sample_count(), 1);
        assert_eq!(grid.distribution(&GridIndex::new([1]), 1).unwrap().sample_count(), 1);

        assert_eq!(grid.lattice(0).unwrap().len(), 1);
        assert_eq!(grid.lattice(1).unwrap().len(), 2);
        assert!(grid.lattice(2).is_none());
    }

    #[test]
    fn test_missing_bundle_has_no_distributions() {
        let grid = BundleGrid::<2>::new(false);
        assert!(grid.distributions(&GridIndex::new([0, 0])).is_none());
        assert!(grid.distribution(&GridIndex::new([0, 0]), 0).is_none());
    }

    #[test]
    fn test_merge_adds_aggregate_to_every_slot() {
        let mut aggregate = Distribution::<2>::new();
        aggregate.add(&Vector2::new(1.0, 1.0));
        aggregate.add(&Vector2::new(1.0, 1.2));

        let mut grid = BundleGrid::<2>::new(false);
        let bi = GridIndex::new([2, 2]);
        grid.merge(bi, &aggregate);

        for d in grid.distributions(&bi).unwrap() {
            assert_eq!(d.sample_count(), 2);
            assert_eq!(d.mean(), aggregate.mean());
        }
    }

    #[test]
    fn test_overwrite_applies_grid_limit_flag() {
        let mut grid = BundleGrid::<2>::new(true);
        let bi = GridIndex::new([1, 1]);
        grid.allocate(bi);

        let mut d = Distribution::new();
        d.add(&Vector2::new(0.5, 0.5));
        grid.overwrite(&bi, 3, d);

        let stored = grid.distribution(&bi, 3).unwrap();
        assert_eq!(stored.sample_count(), 1);
        assert!(stored.limit_covariance());
        assert_eq!(grid.distribution(&bi, 0).unwrap().sample_count(), 0);
    }
}
