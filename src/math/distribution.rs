//! Online Gaussian estimator for one grid cell.
//!
//! A [`Distribution`] keeps only sufficient statistics (sample count, mean and
//! the upper triangle of the second moment `E[p pᵀ]`), so memory per cell is
//! constant regardless of how many points fall into it. Covariance, inverse
//! covariance and determinant are derived lazily on the first read after a
//! change and cached until the next `add`/`merge`.
//!
//! ```text
//! mean'     = (mean * n + p) / (n + 1)
//! corr'(ij) = (corr(ij) * n + p_i p_j) / (n + 1)        for i <= j
//! cov(ij)   = (corr(ij) - mean_i mean_j) * n / (n - 1)
//! ```

use std::cell::OnceCell;
use std::f64::consts::PI;
use std::ops::AddAssign;

use nalgebra::{DMatrix, SMatrix, SVector};

/// Minimum number of samples before covariance and density are defined.
pub const MIN_ESTIMATE_SAMPLES: usize = 2;

/// Eigenvalues smaller than this fraction of the largest one are lifted to it
/// when covariance limiting is enabled.
const EIGENVALUE_FLOOR_RATIO: f64 = 1e-3;

/// Values derived from the sufficient statistics.
#[derive(Debug, Clone)]
struct Estimate<const D: usize> {
    covariance: SMatrix<f64, D, D>,
    /// `None` when the covariance is singular.
    inverse_covariance: Option<SMatrix<f64, D, D>>,
    determinant: f64,
}

/// Online multivariate Gaussian over D-dimensional points.
#[derive(Debug, Clone)]
pub struct Distribution<const D: usize> {
    sample_count: usize,
    mean: SVector<f64, D>,
    /// Upper triangle of the running second moment; the lower triangle stays zero.
    second_moment: SMatrix<f64, D, D>,
    limit_covariance: bool,
    /// Empty while stale; filled on the first read after a change.
    derived: OnceCell<Estimate<D>>,
}

impl<const D: usize> Distribution<D> {
    /// Create an empty distribution with covariance limiting disabled.
    pub fn new() -> Self {
        Self::with_limit_covariance(false)
    }

    /// Create an empty distribution.
    ///
    /// With `limit_covariance` set, the covariance is reconstructed from an
    /// eigenbasis whose small eigenvalues are clamped, which keeps cells fed
    /// with collinear points invertible.
    pub fn with_limit_covariance(limit_covariance: bool) -> Self {
        Self {
            sample_count: 0,
            mean: SVector::zeros(),
            second_moment: SMatrix::zeros(),
            limit_covariance,
            derived: OnceCell::new(),
        }
    }

    /// Rebuild a distribution from persisted sufficient statistics.
    ///
    /// Only the upper triangle of `second_moment` is used.
    pub fn from_statistics(
        sample_count: usize,
        mean: SVector<f64, D>,
        second_moment: SMatrix<f64, D, D>,
    ) -> Self {
        Self {
            sample_count,
            mean,
            second_moment: second_moment.upper_triangle(),
            limit_covariance: false,
            derived: OnceCell::new(),
        }
    }

    /// Accumulate one point.
    pub fn add(&mut self, p: &SVector<f64, D>) {
        let n = self.sample_count as f64;
        let n1 = n + 1.0;
        self.mean = (self.mean * n + p) / n1;
        for i in 0..D {
            for j in i..D {
                self.second_moment[(i, j)] = (self.second_moment[(i, j)] * n + p[i] * p[j]) / n1;
            }
        }
        self.sample_count += 1;
        self.invalidate();
    }

    /// Merge the sufficient statistics of `other` into `self`.
    ///
    /// The result equals having added all of `other`'s points to `self`,
    /// up to floating point rounding.
    pub fn merge(&mut self, other: &Self) {
        if other.sample_count == 0 {
            return;
        }
        if self.sample_count == 0 {
            self.sample_count = other.sample_count;
            self.mean = other.mean;
            self.second_moment = other.second_moment;
            self.invalidate();
            return;
        }

        let n_a = self.sample_count as f64;
        let n_b = other.sample_count as f64;
        let n = n_a + n_b;
        self.mean = (self.mean * n_a + other.mean * n_b) / n;
        self.second_moment = (self.second_moment * n_a + other.second_moment * n_b) / n;
        self.sample_count += other.sample_count;
        self.invalidate();
    }

    /// Restore the empty state.
    pub fn reset(&mut self) {
        self.sample_count = 0;
        self.mean = SVector::zeros();
        self.second_moment = SMatrix::zeros();
        self.invalidate();
    }

    /// Number of accumulated points.
    #[inline]
    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    /// True when no point has been accumulated.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.sample_count == 0
    }

    /// Running mean.
    #[inline]
    pub fn mean(&self) -> SVector<f64, D> {
        self.mean
    }

    /// Running second moment (upper triangle).
    #[inline]
    pub fn second_moment(&self) -> SMatrix<f64, D, D> {
        self.second_moment
    }

    /// Whether covariance limiting is enabled.
    pub fn limit_covariance(&self) -> bool {
        self.limit_covariance
    }

    /// Enable or disable covariance limiting.
    pub fn set_limit_covariance(&mut self, limit_covariance: bool) {
        if self.limit_covariance != limit_covariance {
            self.limit_covariance = limit_covariance;
            self.invalidate();
        }
    }

    /// True when enough samples exist for covariance and density.
    #[inline]
    pub fn has_estimate(&self) -> bool {
        self.sample_count >= MIN_ESTIMATE_SAMPLES
    }

    /// Sample covariance; zero below [`MIN_ESTIMATE_SAMPLES`].
    pub fn covariance(&self) -> SMatrix<f64, D, D> {
        self.estimate()
            .map(|e| e.covariance)
            .unwrap_or_else(SMatrix::zeros)
    }

    /// Inverse covariance; zero below [`MIN_ESTIMATE_SAMPLES`] or when singular.
    pub fn inverse_covariance(&self) -> SMatrix<f64, D, D> {
        self.estimate()
            .and_then(|e| e.inverse_covariance)
            .unwrap_or_else(SMatrix::zeros)
    }

    /// Gaussian density at `p`.
    ///
    /// The normalizer is `det(Σ) * sqrt(2π)` independent of D. Stored maps and
    /// matcher thresholds depend on this scale, so it is kept as is.
    pub fn density(&self, p: &SVector<f64, D>) -> f64 {
        self.density_with_offset(p).0
    }

    /// Density at `p` together with the offset `q = p - mean`.
    pub fn density_with_offset(&self, p: &SVector<f64, D>) -> (f64, SVector<f64, D>) {
        let q = p - self.mean;
        let density = match self.estimate() {
            Some(Estimate {
                inverse_covariance: Some(inv),
                determinant,
                ..
            }) => {
                let exponent = -0.5 * q.dot(&(inv * q));
                exponent.exp() / (determinant * (2.0 * PI).sqrt())
            }
            _ => 0.0,
        };
        (density, q)
    }

    /// `exp(-0.5 qᵀ Σ⁻¹ q)` without the normalizer.
    pub fn non_normalized_density(&self, p: &SVector<f64, D>) -> f64 {
        match self.estimate() {
            Some(Estimate {
                inverse_covariance: Some(inv),
                ..
            }) => {
                let q = p - self.mean;
                (-0.5 * q.dot(&(inv * q))).exp()
            }
            _ => 0.0,
        }
    }

    #[inline]
    fn invalidate(&mut self) {
        self.derived.take();
    }

    fn estimate(&self) -> Option<&Estimate<D>> {
        if !self.has_estimate() {
            return None;
        }
        Some(self.derived.get_or_init(|| self.compute_estimate()))
    }

    fn compute_estimate(&self) -> Estimate<D> {
        let n = self.sample_count as f64;
        let scale = n / (n - 1.0);

        let mut covariance = SMatrix::<f64, D, D>::zeros();
        for i in 0..D {
            for j in i..D {
                let c = (self.second_moment[(i, j)] - self.mean[i] * self.mean[j]) * scale;
                covariance[(i, j)] = c;
                covariance[(j, i)] = c;
            }
        }

        if self.limit_covariance {
            limited_estimate(covariance)
        } else {
            let dynamic = DMatrix::from_column_slice(D, D, covariance.as_slice());
            let determinant = dynamic.determinant();
            let inverse_covariance = dynamic
                .try_inverse()
                .filter(|inv| inv.iter().all(|v| v.is_finite()))
                .map(|inv| SMatrix::from_column_slice(inv.as_slice()));
            Estimate {
                covariance,
                inverse_covariance,
                determinant,
            }
        }
    }
}

/// Rebuild covariance and inverse from an eigenbasis with small eigenvalues
/// lifted to `EIGENVALUE_FLOOR_RATIO * max_lambda`.
fn limited_estimate<const D: usize>(covariance: SMatrix<f64, D, D>) -> Estimate<D> {
    let eigen = DMatrix::from_column_slice(D, D, covariance.as_slice()).symmetric_eigen();
    let max_lambda = eigen.eigenvalues.iter().copied().fold(0.0, f64::max);

    // All-zero or negative spectrum: nothing to lift against.
    if !(max_lambda > 0.0 && max_lambda.is_finite()) {
        return Estimate {
            covariance,
            inverse_covariance: None,
            determinant: 0.0,
        };
    }

    let floor = max_lambda * EIGENVALUE_FLOOR_RATIO;
    let lambda = eigen
        .eigenvalues
        .map(|l| if l.abs() < floor { floor } else { l });
    let q = &eigen.eigenvectors;

    let limited = q * DMatrix::from_diagonal(&lambda) * q.transpose();
    let inverse = q * DMatrix::from_diagonal(&lambda.map(|l| 1.0 / l)) * q.transpose();

    Estimate {
        covariance: SMatrix::from_column_slice(limited.as_slice()),
        inverse_covariance: Some(SMatrix::from_column_slice(inverse.as_slice())),
        determinant: lambda.iter().product(),
    }
}

impl<const D: usize> Default for Distribution<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const D: usize> AddAssign<&Distribution<D>> for Distribution<D> {
    fn add_assign(&mut self, rhs: &Distribution<D>) {
        self.merge(rhs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Matrix2, Vector1, Vector2, Vector3};

    fn filled(points: &[Vector2<f64>]) -> Distribution<2> {
        let mut d = Distribution::new();
        for p in points {
            d.add(p);
        }
        d
    }

    #[test]
    fn test_empty_distribution_is_zero() {
        let d = Distribution::<2>::new();

        assert_eq!(d.sample_count(), 0);
        assert!(d.is_empty());
        assert_eq!(d.covariance(), Matrix2::zeros());
        assert_eq!(d.density(&Vector2::zeros()), 0.0);
    }

    #[test]
    fn test_single_point_returns_zero() {
        let d = filled(&[Vector2::new(1.0, 2.0)]);

        assert_eq!(d.sample_count(), 1);
        assert!(!d.has_estimate());
        assert_eq!(d.covariance(), Matrix2::zeros());
        assert_eq!(d.inverse_covariance(), Matrix2::zeros());
        assert_eq!(d.density(&Vector2::new(1.0, 2.0)), 0.0);
        assert_eq!(d.non_normalized_density(&Vector2::new(1.0, 2.0)), 0.0);
    }

    #[test]
    fn test_two_points_give_estimate() {
        let mut d = Distribution::<1>::new();
        d.add(&Vector1::new(0.0));
        d.add(&Vector1::new(1.0));

        assert!(d.has_estimate());
        assert_relative_eq!(d.covariance()[(0, 0)], 0.5, epsilon = 1e-12);
        assert_relative_eq!(d.inverse_covariance()[(0, 0)], 2.0, epsilon = 1e-12);
        assert_relative_eq!(
            d.density(&Vector1::new(0.5)),
            1.0 / (0.5 * (2.0 * PI).sqrt()),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_two_points_limited_in_plane() {
        let points = [Vector2::new(0.0, 0.0), Vector2::new(1.0, 2.0)];

        // Two points span a line: singular unless limited.
        let plain = filled(&points);
        assert!(plain.has_estimate());
        assert_eq!(plain.density(&Vector2::new(0.5, 1.0)), 0.0);

        let mut limited = Distribution::with_limit_covariance(true);
        for p in &points {
            limited.add(p);
        }
        let density = limited.density(&Vector2::new(0.5, 1.0));
        assert!(density > 0.0 && density.is_finite());
    }

    #[test]
    fn test_same_point_twice_gives_exact_mean() {
        let p = Vector2::new(0.1, -0.7);
        let d = filled(&[p, p]);

        assert_eq!(d.mean(), p);
    }

    #[test]
    fn test_identical_points_have_zero_covariance() {
        let p = Vector2::new(1.0, 2.0);
        let d = filled(&[p, p, p]);

        assert_eq!(d.mean(), p);
        assert_eq!(d.covariance(), Matrix2::zeros());
        // Singular: no density instead of a division by zero.
        assert_eq!(d.density(&p), 0.0);
    }

    #[test]
    fn test_covariance_matches_unbiased_estimate() {
        let points = [
            Vector2::new(1.0, 2.0),
            Vector2::new(2.0, 1.0),
            Vector2::new(4.0, 5.0),
            Vector2::new(-1.0, 0.5),
        ];
        let d = filled(&points);

        let n = points.len() as f64;
        let mean = points.iter().sum::<Vector2<f64>>() / n;
        let mut expected = Matrix2::zeros();
        for p in &points {
            let q = p - mean;
            expected += q * q.transpose();
        }
        expected /= n - 1.0;

        assert_relative_eq!(d.mean(), mean, epsilon = 1e-12);
        assert_relative_eq!(d.covariance(), expected, epsilon = 1e-12);
        assert_relative_eq!(
            d.inverse_covariance() * d.covariance(),
            Matrix2::identity(),
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_density_uses_literal_normalizer() {
        let d = filled(&[
            Vector2::new(0.0, 0.0),
            Vector2::new(1.0, 0.0),
            Vector2::new(0.0, 1.0),
            Vector2::new(1.0, 1.0),
        ]);
        let cov = d.covariance();
        let at_mean = d.density(&d.mean());

        assert_relative_eq!(
            at_mean,
            1.0 / (cov.determinant() * (2.0 * PI).sqrt()),
            epsilon = 1e-12
        );
        assert_relative_eq!(d.non_normalized_density(&d.mean()), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_density_decreases_away_from_mean() {
        let d = filled(&[
            Vector2::new(0.0, 0.0),
            Vector2::new(0.2, 0.1),
            Vector2::new(-0.1, 0.3),
            Vector2::new(0.1, -0.2),
        ]);
        let m = d.mean();

        let near = d.density(&(m + Vector2::new(0.05, 0.0)));
        let far = d.density(&(m + Vector2::new(1.0, 0.0)));
        assert!(d.density(&m) > near);
        assert!(near > far);
    }

    #[test]
    fn test_cache_invalidated_on_add() {
        let mut d = filled(&[
            Vector2::new(0.0, 0.0),
            Vector2::new(1.0, 0.0),
            Vector2::new(0.0, 1.0),
        ]);
        let before = d.covariance();
        // Reading twice must be stable.
        assert_eq!(d.covariance(), before);

        d.add(&Vector2::new(5.0, 5.0));
        assert_ne!(d.covariance(), before);
    }

    #[test]
    fn test_merge_matches_sequential_add() {
        let a_points = [
            Vector3::new(0.0, 1.0, 2.0),
            Vector3::new(0.5, -1.0, 0.2),
        ];
        let b_points = [
            Vector3::new(1.0, 1.0, 1.0),
            Vector3::new(-2.0, 0.3, 0.7),
            Vector3::new(0.1, 0.1, -0.4),
        ];

        let mut sequential = Distribution::<3>::new();
        let mut a = Distribution::<3>::new();
        let mut b = Distribution::<3>::new();
        for p in &a_points {
            sequential.add(p);
            a.add(p);
        }
        for p in &b_points {
            sequential.add(p);
            b.add(p);
        }
        a += &b;

        assert_eq!(a.sample_count(), sequential.sample_count());
        assert_relative_eq!(a.mean(), sequential.mean(), epsilon = 1e-12);
        assert_relative_eq!(a.second_moment(), sequential.second_moment(), epsilon = 1e-12);
        assert_relative_eq!(a.covariance(), sequential.covariance(), epsilon = 1e-12);
    }

    #[test]
    fn test_merge_into_empty_copies_statistics() {
        let src = filled(&[Vector2::new(0.3, 0.1), Vector2::new(0.7, 0.9)]);
        let mut dst = Distribution::new();
        dst.merge(&src);

        assert_eq!(dst.sample_count(), 2);
        assert_eq!(dst.mean(), src.mean());
        assert_eq!(dst.second_moment(), src.second_moment());
    }

    #[test]
    fn test_reset_restores_empty_state() {
        let mut d = filled(&[
            Vector2::new(0.0, 0.0),
            Vector2::new(1.0, 0.0),
            Vector2::new(0.0, 1.0),
        ]);
        d.reset();

        assert!(d.is_empty());
        assert_eq!(d.mean(), Vector2::zeros());
        assert_eq!(d.second_moment(), Matrix2::zeros());
        assert_eq!(d.covariance(), Matrix2::zeros());
    }

    #[test]
    fn test_limit_covariance_keeps_collinear_points_invertible() {
        let points = [
            Vector2::new(0.0, 0.0),
            Vector2::new(1.0, 1.0),
            Vector2::new(2.0, 2.0),
            Vector2::new(3.0, 3.0),
        ];

        let plain = filled(&points);
        assert_eq!(plain.density(&Vector2::new(1.5, 1.5)), 0.0);

        let mut limited = Distribution::with_limit_covariance(true);
        for p in &points {
            limited.add(p);
        }
        let cov = limited.covariance();
        let eigen = cov.symmetric_eigen();
        let max = eigen.eigenvalues.max();
        let min = eigen.eigenvalues.min();

        assert_relative_eq!(min, max * EIGENVALUE_FLOOR_RATIO, epsilon = 1e-9);
        assert_relative_eq!(
            limited.inverse_covariance() * cov,
            Matrix2::identity(),
            epsilon = 1e-6
        );
        let density = limited.density(&Vector2::new(1.5, 1.5));
        assert!(density > 0.0 && density.is_finite());
    }

    #[test]
    fn test_from_statistics_keeps_upper_triangle() {
        let d = filled(&[
            Vector2::new(0.0, 0.0),
            Vector2::new(1.0, 0.5),
            Vector2::new(0.3, 1.0),
        ]);
        let restored = Distribution::from_statistics(d.sample_count(), d.mean(), d.second_moment());

        assert_eq!(restored.sample_count(), d.sample_count());
        assert_eq!(restored.mean(), d.mean());
        assert_eq!(restored.second_moment(), d.second_moment());
        assert_eq!(restored.covariance(), d.covariance());
    }
}
