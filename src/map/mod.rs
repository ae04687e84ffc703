//! Map module - NDT grid map built from overlapping cell bundles.
//!
//! This module contains:
//! - [`GridMap`] - Point insertion and density sampling over a [`BundleGrid`](crate::grid::BundleGrid)
//! - [`GridMapConfig`] - Resolution and covariance options
//! - [`ExpansionPolicy`] - Refinement predicate injected by multi-resolution backends
//!
//! # Example
//!
//! ```
//! use nalgebra::Vector2;
//! use ndt_grid::geometry::Transform;
//! use ndt_grid::map::GridMap;
//!
//! let mut map = GridMap::<2>::new(Transform::identity(), 1.0);
//! map.insert(&Vector2::new(0.0, 0.0));
//! map.insert(&Vector2::new(0.0, 0.01));
//! map.insert(&Vector2::new(0.02, 0.0));
//!
//! assert!(map.sample(&Vector2::new(0.0, 0.0)) > 0.0);
//! assert_eq!(map.sample(&Vector2::new(100.0, 100.0)), 0.0);
//! ```

pub mod config;
pub mod expansion;
pub mod grid_map;

pub use config::GridMapConfig;
pub use expansion::{DEFAULT_EXPANSION_SAMPLES, ExpansionPolicy, MinSampleCount};
pub use grid_map::GridMap;
