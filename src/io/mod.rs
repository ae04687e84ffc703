//! Map persistence and point input.
//!
//! This module contains:
//! - `codec`: directory-based save/load of a [`GridMap`](crate::map::GridMap)
//! - `error`: typed codec failures
//! - `points`: CSV point cloud reader

pub mod codec;
pub mod error;
pub mod points;

pub use codec::{METADATA_FILE, PyramidPartition, load, save};
pub use error::CodecError;
pub use points::load_points;
