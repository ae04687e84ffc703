//! Typed failures of the map codec.
//!
//! Codec functions return `anyhow::Result`; these variants are attached as
//! the root cause so callers can tell layout and format problems apart with
//! `error.downcast_ref::<CodecError>()`.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    /// Root or sub-lattice directory missing on load.
    #[error("directory {0:?} does not exist")]
    MissingDirectory(PathBuf),

    /// A record field holds the wrong number of values.
    #[error("{record}: field `{field}` has {got} values, expected {expected}")]
    Arity {
        record: String,
        field: &'static str,
        expected: usize,
        got: usize,
    },

    /// Stored resolution is not positive and finite.
    #[error("invalid resolution {0}")]
    InvalidResolution(f64),

    /// Bundles are listed but the index bounds are missing.
    #[error("{0}: bundle indices present without min/max bounds")]
    MissingBounds(String),
}
