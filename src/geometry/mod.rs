//! Geometry utilities: rigid transforms for map and batch origins.

pub mod transform;

pub use transform::Transform;
