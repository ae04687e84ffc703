//! Statistical estimators stored in grid cells.

pub mod distribution;

pub use distribution::{Distribution, MIN_ESTIMATE_SAMPLES};
