//! Sparse lattice storage and overlapping cell bundles.
//!
//! This module contains:
//! - [`GridIndex`] - Integer cell index, lexicographically ordered
//! - [`SparseGridStorage`] - Allocate-on-demand index to element mapping with widening bounds
//! - [`CellBundle`] / [`BundleGrid`] - The `2^D` staggered sub-lattice cells behind every map cell

pub mod bundle;
pub mod index;
pub mod storage;

pub use bundle::{BundleGrid, CellBundle};
pub use index::{GridIndex, slot_count};
pub use storage::SparseGridStorage;
