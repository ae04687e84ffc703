//! Rigid transforms in D dimensions.
//!
//! A map stores every distribution in its own frame. The map origin is the
//! transform `T_world_map`; incoming points are expressed in the world frame
//! (or in a sensor frame, together with a `T_world_sensor` batch origin) and
//! brought into the map frame before they are binned.
//!
//! We use the notation `T_target_source`:
//! ```text
//! p_target = T_target_source * p_source
//! ```

use nalgebra::{Quaternion, SMatrix, SVector, UnitQuaternion, Vector3};

/// Rigid transform `p' = R p + t` in D dimensions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform<const D: usize> {
    /// Rotation part (orthonormal, det = +1).
    pub rotation: SMatrix<f64, D, D>,

    /// Translation part.
    pub translation: SVector<f64, D>,
}

impl<const D: usize> Transform<D> {
    /// The identity transform.
    pub fn identity() -> Self {
        Self {
            rotation: SMatrix::identity(),
            translation: SVector::zeros(),
        }
    }

    /// Apply the transform to a point.
    #[inline]
    pub fn transform_point(&self, p: &SVector<f64, D>) -> SVector<f64, D> {
        self.rotation * p + self.translation
    }

    /// Apply the inverse transform to a point without building the inverse.
    #[inline]
    pub fn inverse_transform_point(&self, p: &SVector<f64, D>) -> SVector<f64, D> {
        self.rotation.transpose() * (p - self.translation)
    }

    /// Rotation in row-major order, as stored on disk.
    pub fn rotation_row_major(&self) -> Vec<f64> {
        self.rotation.transpose().as_slice().to_vec()
    }

    /// Rebuild a transform from a row-major rotation and a translation.
    ///
    /// Returns `None` if the slices do not hold `D * D` and `D` values.
    pub fn from_row_major(rotation: &[f64], translation: &[f64]) -> Option<Self> {
        if rotation.len() != D * D || translation.len() != D {
            return None;
        }
        Some(Self {
            rotation: SMatrix::from_row_slice(rotation),
            translation: SVector::from_column_slice(translation),
        })
    }
}

impl<const D: usize> Default for Transform<D> {
    fn default() -> Self {
        Self::identity()
    }
}

impl Transform<2> {
    /// Planar pose `(x, y, theta)`.
    #[rustfmt::skip]
    pub fn from_pose(x: f64, y: f64, theta: f64) -> Self {
        let (s, c) = theta.sin_cos();
        Self {
            rotation: SMatrix::<f64, 2, 2>::new(
                c, -s,
                s,  c,
            ),
            translation: SVector::<f64, 2>::new(x, y),
        }
    }
}

impl Transform<3> {
    /// Build from a w-first quaternion and a translation.
    pub fn from_quaternion(qw: f64, qx: f64, qy: f64, qz: f64, translation: Vector3<f64>) -> Self {
        let q = UnitQuaternion::from_quaternion(Quaternion::new(qw, qx, qy, qz));
        Self {
            rotation: q.to_rotation_matrix().into_inner(),
            translation,
        }
    }
}
