pub mod geometry;
pub mod grid;
pub mod io;
pub mod map;
pub mod math;
