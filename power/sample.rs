//! Standardized draws from a zero-mean multivariate normal distribution.
//!
//! Model-selection estimators are sensitive to scale, so every drawn sample matrix
//! is centered and rescaled per feature to zero empirical mean and unit empirical
//! (population) variance before it reaches an estimator.

use ndarray::{Array2, ArrayView2, Axis};
use ndarray_linalg::error::LinalgError;
use ndarray_linalg::{Cholesky, UPLO};
use rand::Rng;
use rand_distr::StandardNormal;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SampleError {
    #[error("At least 2 samples are required to standardize a draw, got {0}.")]
    TooFewSamples(usize),

    #[error("Covariance matrix has shape {rows}x{cols}, expected {expected}x{expected}.")]
    ShapeMismatch {
        rows: usize,
        cols: usize,
        expected: usize,
    },

    #[error("Covariance matrix is not positive-definite: {0}")]
    NotPositiveDefinite(LinalgError),

    #[error("Feature {feature} has zero empirical variance in a draw of {n_samples} samples.")]
    ZeroVariance { feature: usize, n_samples: usize },
}

/// A zero-mean multivariate normal distribution held as the lower Cholesky
/// factor of its covariance, so repeated draws from one ground truth share a
/// single factorization.
#[derive(Debug, Clone)]
pub struct MultivariateNormal {
    lower: Array2<f64>,
}

impl MultivariateNormal {
    pub fn new(covariance: ArrayView2<f64>) -> Result<Self, SampleError> {
        let (rows, cols) = covariance.dim();
        if rows != cols {
            return Err(SampleError::ShapeMismatch {
                rows,
                cols,
                expected: rows,
            });
        }
        let lower = covariance
            .cholesky(UPLO::Lower)
            .map_err(SampleError::NotPositiveDefinite)?;
        Ok(Self { lower })
    }

    pub fn n_features(&self) -> usize {
        self.lower.nrows()
    }

    /// Raw draw: `n_samples` rows of `Z L^T` with `Z` standard normal.
    pub fn draw<R: Rng + ?Sized>(&self, n_samples: usize, rng: &mut R) -> Array2<f64> {
        let z = Array2::from_shape_fn((n_samples, self.n_features()), |_| {
            rng.sample::<f64, _>(StandardNormal)
        });
        z.dot(&self.lower.t())
    }

    /// Draw followed by per-feature centering and scaling.
    pub fn standardized_sample<R: Rng + ?Sized>(
        &self,
        n_samples: usize,
        rng: &mut R,
    ) -> Result<Array2<f64>, SampleError> {
        if n_samples < 2 {
            return Err(SampleError::TooFewSamples(n_samples));
        }
        let mut samples = self.draw(n_samples, rng);
        standardize_columns(&mut samples)?;
        Ok(samples)
    }
}

/// Draws `n_samples` standardized rows from the zero-mean normal with the given covariance.
pub fn draw_standardized<R: Rng + ?Sized>(
    n_samples: usize,
    n_features: usize,
    covariance: ArrayView2<f64>,
    rng: &mut R,
) -> Result<Array2<f64>, SampleError> {
    let (rows, cols) = covariance.dim();
    if rows != n_features || cols != n_features {
        return Err(SampleError::ShapeMismatch {
            rows,
            cols,
            expected: n_features,
        });
    }
    MultivariateNormal::new(covariance)?.standardized_sample(n_samples, rng)
}

/// Subtracts each column's mean and divides by its population standard deviation.
pub fn standardize_columns(samples: &mut Array2<f64>) -> Result<(), SampleError> {
    let n_samples = samples.nrows();
    for (feature, mut column) in samples.axis_iter_mut(Axis(1)).enumerate() {
        let mean = column.sum() / n_samples as f64;
        column.mapv_inplace(|v| v - mean);
        let std = (column.iter().map(|v| v * v).sum::<f64>() / n_samples as f64).sqrt();
        if !std.is_finite() || std <= f64::EPSILON {
            return Err(SampleError::ZeroVariance { feature, n_samples });
        }
        column.mapv_inplace(|v| v / std);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn standardized_columns_have_zero_mean_unit_variance() {
        let cov = array![[1.0, 0.6, 0.0], [0.6, 1.0, 0.2], [0.0, 0.2, 1.0]];
        let mut rng = StdRng::seed_from_u64(42);
        let x = draw_standardized(25, 3, cov.view(), &mut rng).unwrap();
        assert_eq!(x.dim(), (25, 3));
        for column in x.axis_iter(Axis(1)) {
            let mean = column.sum() / 25.0;
            let var = column.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / 25.0;
            assert_abs_diff_eq!(mean, 0.0, epsilon = 1e-12);
            assert_abs_diff_eq!(var, 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn large_draw_matches_covariance() {
        let cov = array![[1.0, 0.5], [0.5, 1.0]];
        let mvn = MultivariateNormal::new(cov.view()).unwrap();
        let mut rng = StdRng::seed_from_u64(9);
        let x = mvn.draw(20_000, &mut rng);
        let empirical = x.t().dot(&x) / 20_000.0;
        assert_abs_diff_eq!(empirical[[0, 1]], 0.5, epsilon = 0.03);
        assert_abs_diff_eq!(empirical[[1, 1]], 1.0, epsilon = 0.05);
    }

    #[test]
    fn rejects_bad_inputs() {
        let cov = array![[1.0, 0.0], [0.0, 1.0]];
        let mut rng = StdRng::seed_from_u64(1);
        assert!(matches!(
            draw_standardized(1, 2, cov.view(), &mut rng),
            Err(SampleError::TooFewSamples(1))
        ));
        assert!(matches!(
            draw_standardized(5, 3, cov.view(), &mut rng),
            Err(SampleError::ShapeMismatch { expected: 3, .. })
        ));
        let indefinite = array![[1.0, 2.0], [2.0, 1.0]];
        assert!(matches!(
            MultivariateNormal::new(indefinite.view()),
            Err(SampleError::NotPositiveDefinite(_))
        ));
    }

    #[test]
    fn constant_column_cannot_be_standardized() {
        let mut x = array![[1.0, 2.0], [1.0, 3.0], [1.0, 4.0]];
        assert!(matches!(
            standardize_columns(&mut x),
            Err(SampleError::ZeroVariance { feature: 0, .. })
        ));
    }
}
