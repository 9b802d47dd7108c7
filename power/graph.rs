//! # Ground-Truth Graph Synthesis
//!
//! Produces the fixed (covariance, precision) pair that every cell of one
//! sparsity row is scored against. The precision matrix is built as `L^T L`
//! from a sparse, randomly permuted unit-triangular factor `L`, which makes it
//! positive-definite by construction while keeping exact zeros wherever the
//! factor's sparsity pattern leaves no path between two variables.
//!
//! Both matrices are returned in correlation form: the covariance has a unit
//! diagonal and the precision carries the inverse scaling, so the pair stays an
//! exact inverse pair.

use ndarray::{Array2, ArrayView2, Zip};
use ndarray_linalg::error::LinalgError;
use ndarray_linalg::{Cholesky, Inverse, UPLO};
use rand::Rng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::support;

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Invalid graph synthesis parameter: {0}")]
    InvalidParameter(String),

    #[error(
        "The synthesized precision matrix for {n_features} features at alpha = {alpha} is not positive-definite: {source}"
    )]
    NotPositiveDefinite {
        n_features: usize,
        alpha: f64,
        #[source]
        source: LinalgError,
    },

    #[error("Failed to invert the precision matrix into a covariance matrix: {0}")]
    Inversion(LinalgError),

    #[error("The precision matrix must be square, got shape {rows}x{cols}.")]
    NotSquare { rows: usize, cols: usize },
}

/// A matched pair of correlation-scaled covariance and precision matrices.
#[derive(Debug, Clone, PartialEq)]
pub struct Graph {
    pub covariance: Array2<f64>,
    pub precision: Array2<f64>,
}

impl Graph {
    /// Builds the pair from a positive-definite precision matrix, inverting it and
    /// rescaling both matrices to correlation form.
    pub fn from_precision(precision: ArrayView2<f64>) -> Result<Self, GraphError> {
        let (rows, cols) = precision.dim();
        if rows != cols {
            return Err(GraphError::NotSquare { rows, cols });
        }
        let precision = symmetrize(precision);
        let covariance = symmetrize(precision.inv().map_err(GraphError::Inversion)?.view());
        Ok(to_correlation_form(covariance, precision))
    }

    pub fn n_features(&self) -> usize {
        self.precision.nrows()
    }

    /// Number of nonzero entries (diagonal included) of the precision matrix.
    pub fn nonzero_count(&self) -> usize {
        support::count_nonzero(self.precision.view())
    }
}

/// Source of ground-truth graphs for the sweep.
///
/// Implementations must be deterministic given the random source they are handed.
pub trait GraphSource: Send + Sync {
    fn synthesize(
        &self,
        n_features: usize,
        alpha: f64,
        rng: &mut StdRng,
    ) -> Result<Graph, GraphError>;
}

/// Random sparse symmetric positive-definite precision matrices.
///
/// Off-diagonal factor entries are zero with probability `alpha`; the others have a
/// magnitude drawn uniformly from `[smallest_coef, largest_coef]` and a random sign.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphSynthesizer {
    pub smallest_coef: f64,
    pub largest_coef: f64,
}

impl Default for GraphSynthesizer {
    fn default() -> Self {
        Self {
            smallest_coef: 0.7,
            largest_coef: 0.7,
        }
    }
}

impl GraphSynthesizer {
    fn validate(&self, n_features: usize, alpha: f64) -> Result<(), GraphError> {
        if n_features < 2 {
            return Err(GraphError::InvalidParameter(format!(
                "at least 2 features are required, got {n_features}"
            )));
        }
        if !(alpha > 0.0 && alpha < 1.0) {
            return Err(GraphError::InvalidParameter(format!(
                "alpha must lie strictly between 0 and 1, got {alpha}"
            )));
        }
        let coefs_ok = self.smallest_coef.is_finite()
            && self.largest_coef.is_finite()
            && self.smallest_coef > 0.0
            && self.smallest_coef <= self.largest_coef;
        if !coefs_ok {
            return Err(GraphError::InvalidParameter(format!(
                "coefficient range must satisfy 0 < smallest <= largest, got [{}, {}]",
                self.smallest_coef, self.largest_coef
            )));
        }
        Ok(())
    }

    /// Unit-triangular factor `-I + P^T A P` with a strictly lower-triangular sparse `A`.
    fn sparse_factor<R: Rng + ?Sized>(&self, n_features: usize, alpha: f64, rng: &mut R) -> Array2<f64> {
        let spread = self.largest_coef - self.smallest_coef;
        let mut aux = Array2::<f64>::zeros((n_features, n_features));
        for i in 1..n_features {
            for j in 0..i {
                if rng.gen_range(0.0..1.0) > alpha {
                    let magnitude = self.smallest_coef + spread * rng.gen_range(0.0..1.0);
                    let sign = if rng.gen_bool(0.5) { 1.0 } else { -1.0 };
                    aux[[i, j]] = sign * magnitude;
                }
            }
        }

        let mut permutation: Vec<usize> = (0..n_features).collect();
        permutation.shuffle(rng);

        let mut factor = Array2::from_shape_fn((n_features, n_features), |(a, b)| {
            aux[[permutation[b], permutation[a]]]
        });
        factor.diag_mut().mapv_inplace(|v| v - 1.0);
        factor
    }
}

impl GraphSource for GraphSynthesizer {
    fn synthesize(
        &self,
        n_features: usize,
        alpha: f64,
        rng: &mut StdRng,
    ) -> Result<Graph, GraphError> {
        self.validate(n_features, alpha)?;

        let factor = self.sparse_factor(n_features, alpha, rng);
        let precision = factor.t().dot(&factor);
        precision
            .cholesky(UPLO::Lower)
            .map_err(|source| GraphError::NotPositiveDefinite {
                n_features,
                alpha,
                source,
            })?;

        let graph = Graph::from_precision(precision.view())?;
        log::debug!(
            "Synthesized graph: {} features, alpha = {:.4}, {} nonzero precision entries",
            n_features,
            alpha,
            graph.nonzero_count()
        );
        Ok(graph)
    }
}

fn symmetrize(matrix: ArrayView2<f64>) -> Array2<f64> {
    let mut out = matrix.to_owned();
    Zip::from(&mut out)
        .and(&matrix.t())
        .for_each(|v, &vt| *v = 0.5 * (*v + vt));
    out
}

/// Divides the covariance by the outer product of its standard deviations and
/// multiplies the precision by the same outer product.
fn to_correlation_form(mut covariance: Array2<f64>, mut precision: Array2<f64>) -> Graph {
    let scale = covariance.diag().mapv(f64::sqrt);
    for ((i, j), v) in covariance.indexed_iter_mut() {
        *v /= scale[i] * scale[j];
    }
    for ((i, j), v) in precision.indexed_iter_mut() {
        *v *= scale[i] * scale[j];
    }
    Graph {
        covariance,
        precision,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seeding::{UnitKey, unit_rng};
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn correlation_form_keeps_inverse_pair() {
        let precision = array![[2.0, -0.5, 0.0], [-0.5, 1.5, 0.3], [0.0, 0.3, 1.0]];
        let graph = Graph::from_precision(precision.view()).unwrap();
        for i in 0..3 {
            assert_abs_diff_eq!(graph.covariance[[i, i]], 1.0, epsilon = 1e-12);
        }
        let product = graph.precision.dot(&graph.covariance);
        for ((i, j), &v) in product.indexed_iter() {
            let expected = if i == j { 1.0 } else { 0.0 };
            assert_abs_diff_eq!(v, expected, epsilon = 1e-10);
        }
        assert_eq!(graph.precision[[0, 2]], 0.0);
        assert_eq!(graph.nonzero_count(), 7);
    }

    #[test]
    fn rejects_non_square_precision() {
        let rect = Array2::<f64>::zeros((2, 3));
        assert!(matches!(
            Graph::from_precision(rect.view()),
            Err(GraphError::NotSquare { rows: 2, cols: 3 })
        ));
    }

    #[test]
    fn synthesizer_is_deterministic_for_a_seed() {
        let synth = GraphSynthesizer::default();
        let a = synth
            .synthesize(12, 0.9, &mut unit_rng(3, UnitKey::graph(0)))
            .unwrap();
        let b = synth
            .synthesize(12, 0.9, &mut unit_rng(3, UnitKey::graph(0)))
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn synthesizer_validates_inputs() {
        let synth = GraphSynthesizer::default();
        let mut rng = unit_rng(1, UnitKey::graph(0));
        assert!(synth.synthesize(1, 0.5, &mut rng).is_err());
        assert!(synth.synthesize(5, 0.0, &mut rng).is_err());
        assert!(synth.synthesize(5, 1.0, &mut rng).is_err());
        let inverted = GraphSynthesizer {
            smallest_coef: 0.9,
            largest_coef: 0.1,
        };
        assert!(inverted.synthesize(5, 0.5, &mut rng).is_err());
    }

    #[test]
    fn dense_factor_still_positive_definite() {
        let synth = GraphSynthesizer {
            smallest_coef: 0.5,
            largest_coef: 1.5,
        };
        let mut rng = unit_rng(11, UnitKey::graph(2));
        let graph = synth.synthesize(8, 0.05, &mut rng).unwrap();
        assert!(graph.precision.cholesky(UPLO::Lower).is_ok());
        assert!(graph.covariance.cholesky(UPLO::Lower).is_ok());
    }
}
