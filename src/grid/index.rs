//! Integer lattice indices.

use std::fmt;

/// Number of staggered sub-lattices (and distributions per bundle) in D dimensions.
#[inline]
pub const fn slot_count<const D: usize>() -> usize {
    1 << D
}

/// Index of one cell of a regular lattice.
///
/// Ordering is lexicographic over the components, which is the order used
/// for deterministic traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GridIndex<const D: usize>(pub [i32; D]);

impl<const D: usize> GridIndex<D> {
    /// Create an index from its components.
    pub const fn new(coords: [i32; D]) -> Self {
        Self(coords)
    }

    /// Cell containing `coords` for a lattice of the given cell size.
    ///
    /// Returns `None` if any coordinate is non-finite or the cell does not
    /// fit into `i32`.
    pub fn from_coords(coords: &[f64], cell_size: f64) -> Option<Self> {
        if coords.len() != D {
            return None;
        }
        let mut index = [0i32; D];
        for (slot, &c) in index.iter_mut().zip(coords) {
            let cell = (c / cell_size).floor();
            if !cell.is_finite() || cell < f64::from(i32::MIN) || cell > f64::from(i32::MAX) {
                return None;
            }
            *slot = cell as i32;
        }
        Some(Self(index))
    }

    /// Components.
    #[inline]
    pub fn coords(&self) -> &[i32; D] {
        &self.0
    }

    /// Per-axis minimum.
    pub fn component_min(&self, other: &Self) -> Self {
        let mut out = self.0;
        for (o, &v) in out.iter_mut().zip(&other.0) {
            *o = (*o).min(v);
        }
        Self(out)
    }

    /// Per-axis maximum.
    pub fn component_max(&self, other: &Self) -> Self {
        let mut out = self.0;
        for (o, &v) in out.iter_mut().zip(&other.0) {
            *o = (*o).max(v);
        }
        Self(out)
    }

    /// True if every component lies within `[min, max]`.
    pub fn within(&self, min: &Self, max: &Self) -> bool {
        (0..D).all(|axis| min.0[axis] <= self.0[axis] && self.0[axis] <= max.0[axis])
    }

    /// Index on sub-lattice `slot` covering this half-resolution bundle index.
    ///
    /// Sub-lattice `slot` is shifted by half a cell along every axis whose bit
    /// is set in `slot`:
    /// ```text
    /// si[axis] = floor(bi[axis] / 2) + bit(slot, axis) * (bi[axis] mod 2)
    /// ```
    pub fn coarse(&self, slot: usize) -> Self {
        let mut out = [0i32; D];
        for (axis, o) in out.iter_mut().enumerate() {
            let bi = self.0[axis];
            let bit = ((slot >> axis) & 1) as i32;
            *o = bi.div_euclid(2) + bit * bi.rem_euclid(2);
        }
        Self(out)
    }

    /// Bundle index a coarse sub-lattice index maps back to.
    ///
    /// ```text
    /// bi[axis] = clamp(2 * si[axis], min[axis], max[axis])
    /// ```
    pub fn fine(&self, min: &Self, max: &Self) -> Self {
        let mut out = [0i32; D];
        for (axis, o) in out.iter_mut().enumerate() {
            *o = self.0[axis]
                .saturating_mul(2)
                .clamp(min.0[axis], max.0[axis].max(min.0[axis]));
        }
        Self(out)
    }
}

impl<const D: usize> From<[i32; D]> for GridIndex<D> {
    fn from(coords: [i32; D]) -> Self {
        Self(coords)
    }
}

impl<const D: usize> TryFrom<&[i32]> for GridIndex<D> {
    type Error = usize;

    /// Fails with the slice length if it is not D.
    fn try_from(value: &[i32]) -> Result<Self, Self::Error> {
        <[i32; D]>::try_from(value)
            .map(Self)
            .map_err(|_| value.len())
    }
}

impl<const D: usize> fmt::Display for GridIndex<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (axis, v) in self.0.iter().enumerate() {
            if axis > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", v)?;
        }
        write!(f, ")")
    }
}
