//! Sparse lattice storage.
//!
//! Maps an unbounded integer lattice to elements without allocating the
//! whole grid. Elements are owned by value, keyed by [`GridIndex`]; nothing
//! outside the storage keeps references to them across mutating calls.
//!
//! The tracked bounds only ever widen. They are persisted with a map and
//! drive the coarse-to-fine index clamping on load, so they are never
//! recomputed from the current key set.

use std::collections::HashMap;
use std::collections::hash_map::{self, Entry};

use super::index::GridIndex;

/// Sparse mapping from lattice index to element.
#[derive(Debug, Clone)]
pub struct SparseGridStorage<const D: usize, E> {
    elements: HashMap<GridIndex<D>, E>,
    /// Per-axis (min, max) over every index ever allocated.
    bounds: Option<(GridIndex<D>, GridIndex<D>)>,
}

impl<const D: usize, E> SparseGridStorage<D, E> {
    /// Create an empty storage.
    pub fn new() -> Self {
        Self {
            elements: HashMap::new(),
            bounds: None,
        }
    }

    /// Number of allocated elements.
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Look up an element. Never allocates.
    #[inline]
    pub fn get(&self, index: &GridIndex<D>) -> Option<&E> {
        self.elements.get(index)
    }

    pub fn contains(&self, index: &GridIndex<D>) -> bool {
        self.elements.contains_key(index)
    }

    /// Return the element at `index`, allocating it with `allocate` if absent.
    pub fn get_or_allocate_with<F>(&mut self, index: GridIndex<D>, allocate: F) -> &mut E
    where
        F: FnOnce() -> E,
    {
        match self.elements.entry(index) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                self.bounds = Some(match self.bounds {
                    None => (index, index),
                    Some((min, max)) => (min.component_min(&index), max.component_max(&index)),
                });
                entry.insert(allocate())
            }
        }
    }

    /// Return the element at `index`, allocating a default one if absent.
    pub fn get_or_allocate(&mut self, index: GridIndex<D>) -> &mut E
    where
        E: Default,
    {
        self.get_or_allocate_with(index, E::default)
    }

    /// Smallest index per axis over all allocations, `None` while empty.
    pub fn min_index(&self) -> Option<GridIndex<D>> {
        self.bounds.map(|(min, _)| min)
    }

    /// Largest index per axis over all allocations, `None` while empty.
    pub fn max_index(&self) -> Option<GridIndex<D>> {
        self.bounds.map(|(_, max)| max)
    }

    /// Lazy iteration over `(index, element)` in internal (unsorted) order.
    pub fn iter(&self) -> impl Iterator<Item = (&GridIndex<D>, &E)> + '_ {
        self.elements.iter()
    }

    /// Visit every `(index, element)` pair in internal order.
    pub fn traverse<F>(&self, mut visitor: F)
    where
        F: FnMut(&GridIndex<D>, &E),
    {
        for (index, element) in &self.elements {
            visitor(index, element);
        }
    }

    /// All allocated indices in lexicographic order.
    pub fn sorted_indices(&self) -> Vec<GridIndex<D>> {
        let mut indices: Vec<_> = self.elements.keys().copied().collect();
        indices.sort_unstable();
        indices
    }
}

impl<const D: usize, E> IntoIterator for SparseGridStorage<D, E> {
    type Item = (GridIndex<D>, E);
    type IntoIter = hash_map::IntoIter<GridIndex<D>, E>;

    fn into_iter(self) -> Self::IntoIter {
        self.elements.into_iter()
    }
}

impl<const D: usize, E> Default for SparseGridStorage<D, E> {
    fn default() -> Self {
        Self::new()
    }
}
