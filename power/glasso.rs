//! # Graphical Lasso Estimators
//!
//! Reference estimators that satisfy the controller's capability contract:
//!
//! 1.  [`GraphLasso`]: the L1-penalized Gaussian maximum likelihood estimate of the
//!     precision matrix for a fixed penalty, solved by block coordinate descent
//!     (Friedman, Hastie and Tibshirani, 2008). Each sweep visits every column,
//!     solves the lasso sub-problem `min 0.5 b'W11 b - s12'b + lam |b|_1` by
//!     coordinate descent, and writes `w12 = W11 b` back into the working
//!     covariance `W`.
//!
//! 2.  [`GraphLassoEbic`]: fits [`GraphLasso`] along a log-spaced penalty path and
//!     keeps the penalty minimizing the extended BIC (Foygel and Drton, 2010).
//!
//! With [`Initialization::Correlation`] the problem is solved on the sample
//! correlation matrix and the estimate is rescaled back by the feature standard
//! deviations, so a given penalty means the same thing regardless of feature scale.

use ndarray::{Array1, Array2, ArrayView2, Axis, Zip};
use ndarray_linalg::{Cholesky, UPLO};
use serde::{Deserialize, Serialize};

use crate::estimator::{EstimatorError, PenalizedEstimator, PenaltySelector, PrecisionEstimator};

const MIN_SAMPLES: usize = 2;
const MAX_INNER_SWEEPS: usize = 1000;

/// Which second-moment matrix the penalty is applied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Initialization {
    Covariance,
    Correlation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphLassoConfig {
    pub penalty: f64,
    pub max_iter: usize,
    pub tol: f64,
    pub initialization: Initialization,
}

impl Default for GraphLassoConfig {
    fn default() -> Self {
        Self {
            penalty: 0.1,
            max_iter: 100,
            tol: 1e-4,
            initialization: Initialization::Correlation,
        }
    }
}

/// Second-moment matrix handed to the solver, with the scale needed to map the
/// solution back to the original feature units.
struct Moments {
    matrix: Array2<f64>,
    scale: Option<Array1<f64>>,
    n_samples: usize,
}

impl Moments {
    fn from_samples(
        samples: ArrayView2<f64>,
        initialization: Initialization,
    ) -> Result<Self, EstimatorError> {
        let n_samples = samples.nrows();
        if n_samples < MIN_SAMPLES {
            return Err(EstimatorError::TooFewSamples {
                required: MIN_SAMPLES,
                found: n_samples,
            });
        }
        if samples.iter().any(|v| !v.is_finite()) {
            return Err(EstimatorError::NonFiniteInput);
        }

        let mean = samples.sum_axis(Axis(0)) / n_samples as f64;
        let centered = &samples - &mean;
        let covariance = centered.t().dot(&centered) / n_samples as f64;

        match initialization {
            Initialization::Covariance => Ok(Self {
                matrix: covariance,
                scale: None,
                n_samples,
            }),
            Initialization::Correlation => {
                let scale = covariance.diag().mapv(f64::sqrt);
                if let Some(feature) = scale.iter().position(|&s| !(s > f64::EPSILON)) {
                    return Err(EstimatorError::ZeroVariance(feature));
                }
                let mut correlation = covariance;
                for ((i, j), v) in correlation.indexed_iter_mut() {
                    *v /= scale[i] * scale[j];
                }
                Ok(Self {
                    matrix: correlation,
                    scale: Some(scale),
                    n_samples,
                })
            }
        }
    }

    /// Maps a precision estimate of `matrix` back to the original feature scale.
    fn unscale(&self, mut precision: Array2<f64>) -> Array2<f64> {
        if let Some(scale) = &self.scale {
            for ((i, j), v) in precision.indexed_iter_mut() {
                *v /= scale[i] * scale[j];
            }
        }
        precision
    }
}

/// Result of one block coordinate descent solve.
struct GlassoSolution {
    covariance: Array2<f64>,
    precision: Array2<f64>,
    iterations: usize,
    converged: bool,
}

fn soft_threshold(x: f64, lam: f64) -> f64 {
    x.signum() * (x.abs() - lam).max(0.0)
}

fn mean_abs_off_diagonal(matrix: &Array2<f64>) -> f64 {
    let p = matrix.nrows();
    if p < 2 {
        return 0.0;
    }
    let total: f64 = matrix
        .indexed_iter()
        .filter(|((i, j), _)| i != j)
        .map(|(_, v)| v.abs())
        .sum();
    total / (p * (p - 1)) as f64
}

/// Coordinate descent for `min 0.5 b'W11 b - s12'b + lam |b|_1`, where the
/// sub-problem for column `j` excludes index `j` from `W` and `s`.
fn lasso_column(w: &Array2<f64>, s: &Array2<f64>, j: usize, lam: f64, beta: &mut Array1<f64>, tol: f64) {
    let p = w.nrows();
    for _ in 0..MAX_INNER_SWEEPS {
        let mut max_delta = 0.0_f64;
        for k in (0..p).filter(|&k| k != j) {
            let mut partial = s[[k, j]];
            for l in (0..p).filter(|&l| l != j && l != k) {
                partial -= w[[k, l]] * beta[l];
            }
            let updated = soft_threshold(partial, lam) / w[[k, k]];
            max_delta = max_delta.max((updated - beta[k]).abs());
            beta[k] = updated;
        }
        if max_delta < tol {
            break;
        }
    }
}

fn solve_glasso(
    s: &Array2<f64>,
    lam: f64,
    max_iter: usize,
    tol: f64,
) -> Result<GlassoSolution, EstimatorError> {
    let p = s.nrows();
    let mut w = s.clone();
    w.diag_mut().mapv_inplace(|v| v + lam);
    let mut betas = Array2::<f64>::zeros((p, p));

    let scale = mean_abs_off_diagonal(s);
    let threshold = if scale > 0.0 { tol * scale } else { tol };
    let inner_tol = tol * 0.1;

    let mut iterations = 0;
    let mut converged = p < 2;
    while !converged && iterations < max_iter {
        iterations += 1;
        let previous = w.clone();
        for j in 0..p {
            let mut beta = betas.column(j).to_owned();
            lasso_column(&w, s, j, lam, &mut beta, inner_tol);
            for k in (0..p).filter(|&k| k != j) {
                let mut w12 = 0.0;
                for l in (0..p).filter(|&l| l != j) {
                    w12 += w[[k, l]] * beta[l];
                }
                w[[k, j]] = w12;
                w[[j, k]] = w12;
            }
            betas.column_mut(j).assign(&beta);
        }

        let mut change = 0.0;
        Zip::from(&w)
            .and(&previous)
            .for_each(|a, b| change += (a - b).abs());
        let change = change / (p * p) as f64;
        log::trace!("glasso sweep {iterations}: mean |dW| = {change:.3e} (target {threshold:.3e})");
        converged = change < threshold;
    }

    let mut precision = Array2::<f64>::zeros((p, p));
    for j in 0..p {
        let mut cross = 0.0;
        for k in (0..p).filter(|&k| k != j) {
            cross += w[[k, j]] * betas[[k, j]];
        }
        let theta_jj = 1.0 / (w[[j, j]] - cross);
        precision[[j, j]] = theta_jj;
        for k in (0..p).filter(|&k| k != j) {
            precision[[k, j]] = -betas[[k, j]] * theta_jj;
        }
    }
    let symmetric = (&precision + &precision.t()) * 0.5;

    if symmetric.iter().any(|v| !v.is_finite()) {
        return Err(EstimatorError::NonFiniteEstimate { penalty: lam });
    }

    Ok(GlassoSolution {
        covariance: w,
        precision: symmetric,
        iterations,
        converged,
    })
}

fn validate_penalty(penalty: f64) -> Result<(), EstimatorError> {
    if penalty.is_finite() && penalty >= 0.0 {
        Ok(())
    } else {
        Err(EstimatorError::InvalidPenalty(penalty))
    }
}

/// Fixed-penalty graphical lasso.
#[derive(Debug, Clone)]
pub struct GraphLasso {
    config: GraphLassoConfig,
    covariance: Option<Array2<f64>>,
    precision: Option<Array2<f64>>,
    n_iter: usize,
}

impl GraphLasso {
    pub fn new(config: GraphLassoConfig) -> Self {
        Self {
            config,
            covariance: None,
            precision: None,
            n_iter: 0,
        }
    }

    pub fn config(&self) -> &GraphLassoConfig {
        &self.config
    }

    /// The regularized covariance estimate `W` in the solver's scale.
    pub fn covariance(&self) -> Option<&Array2<f64>> {
        self.covariance.as_ref()
    }

    /// Block coordinate descent sweeps used by the last fit.
    pub fn n_iter(&self) -> usize {
        self.n_iter
    }
}

impl Default for GraphLasso {
    fn default() -> Self {
        Self::new(GraphLassoConfig::default())
    }
}

impl PrecisionEstimator for GraphLasso {
    fn unfitted(&self) -> Self {
        Self::new(self.config.clone())
    }

    fn fit(&mut self, samples: ArrayView2<f64>) -> Result<(), EstimatorError> {
        self.covariance = None;
        self.precision = None;
        validate_penalty(self.config.penalty)?;

        let moments = Moments::from_samples(samples, self.config.initialization)?;
        let solution = solve_glasso(
            &moments.matrix,
            self.config.penalty,
            self.config.max_iter,
            self.config.tol,
        )?;
        if !solution.converged {
            log::warn!(
                "Graphical lasso did not converge within {} sweeps at penalty {:.4}",
                self.config.max_iter,
                self.config.penalty
            );
        }

        self.n_iter = solution.iterations;
        self.precision = Some(moments.unscale(solution.precision));
        self.covariance = Some(solution.covariance);
        Ok(())
    }

    fn precision(&self) -> Option<&Array2<f64>> {
        self.precision.as_ref()
    }
}

impl PenalizedEstimator for GraphLasso {
    fn from_penalty(penalty: f64) -> Self {
        Self::new(GraphLassoConfig {
            penalty,
            ..GraphLassoConfig::default()
        })
    }

    fn penalty(&self) -> f64 {
        self.config.penalty
    }

    fn set_penalty(&mut self, penalty: f64) {
        self.config.penalty = penalty;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphLassoEbicConfig {
    /// Number of penalties on the path.
    pub n_lambdas: usize,
    /// Smallest penalty on the path as a fraction of the largest.
    pub lambda_min_ratio: f64,
    /// Extended BIC prior weight on graph size; 0 gives the ordinary BIC.
    pub gamma: f64,
    pub max_iter: usize,
    pub tol: f64,
    pub initialization: Initialization,
}

impl Default for GraphLassoEbicConfig {
    fn default() -> Self {
        Self {
            n_lambdas: 30,
            lambda_min_ratio: 0.01,
            gamma: 0.0,
            max_iter: 100,
            tol: 1e-4,
            initialization: Initialization::Correlation,
        }
    }
}

/// One point of the model selection path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PathPoint {
    pub penalty: f64,
    pub ebic: f64,
    pub n_edges: usize,
}

/// Graphical lasso with the penalty selected by the extended BIC.
#[derive(Debug, Clone)]
pub struct GraphLassoEbic {
    config: GraphLassoEbicConfig,
    precision: Option<Array2<f64>>,
    selected_penalty: Option<f64>,
    path: Vec<PathPoint>,
}

impl GraphLassoEbic {
    pub fn new(config: GraphLassoEbicConfig) -> Self {
        Self {
            config,
            precision: None,
            selected_penalty: None,
            path: Vec::new(),
        }
    }

    pub fn config(&self) -> &GraphLassoEbicConfig {
        &self.config
    }

    /// Every penalty tried by the last fit, largest first.
    pub fn path(&self) -> &[PathPoint] {
        &self.path
    }

    /// Log-spaced penalties from `lam_max` down to `lam_max * lambda_min_ratio`.
    pub fn penalty_path(&self, lam_max: f64) -> Array1<f64> {
        let n = self.config.n_lambdas.max(1);
        let ratio = self.config.lambda_min_ratio.clamp(f64::MIN_POSITIVE, 1.0);
        Array1::linspace(0.0, ratio.ln(), n).mapv(|e| lam_max * e.exp())
    }
}

impl Default for GraphLassoEbic {
    fn default() -> Self {
        Self::new(GraphLassoEbicConfig::default())
    }
}

/// `n (tr(S Theta) - log det Theta) + |E| log n + 4 |E| gamma log p`, or `None` if
/// `Theta` is not positive-definite.
fn extended_bic(s: &Array2<f64>, precision: &Array2<f64>, n_samples: usize, gamma: f64) -> Option<(f64, usize)> {
    let p = s.nrows();
    let lower = precision.cholesky(UPLO::Lower).ok()?;
    let log_det = 2.0 * lower.diag().mapv(f64::ln).sum();
    let trace: f64 = Zip::from(s).and(precision).fold(0.0, |acc, a, b| acc + a * b);
    let n_edges = precision
        .indexed_iter()
        .filter(|((i, j), v)| j > i && **v != 0.0)
        .count();
    let n = n_samples as f64;
    let edges = n_edges as f64;
    let value = n * (trace - log_det) + edges * n.ln() + 4.0 * edges * gamma * (p as f64).ln();
    value.is_finite().then_some((value, n_edges))
}

/// Best `(ebic, penalty, precision)` found along a path, if any point was usable.
type PathBest = Option<(f64, f64, Array2<f64>)>;

/// Fits every penalty in order and keeps the lowest-scoring estimate.
///
/// Points whose estimate is non-finite or cannot be scored are skipped; any other
/// solver failure ends the walk.
fn walk_path<F, G>(
    penalties: &Array1<f64>,
    mut solve: F,
    score: G,
) -> Result<(Vec<PathPoint>, PathBest), EstimatorError>
where
    F: FnMut(f64) -> Result<Array2<f64>, EstimatorError>,
    G: Fn(&Array2<f64>) -> Option<(f64, usize)>,
{
    let mut path = Vec::with_capacity(penalties.len());
    let mut best: PathBest = None;
    for &lam in penalties.iter() {
        let precision = match solve(lam) {
            Ok(precision) => precision,
            Err(EstimatorError::NonFiniteEstimate { .. }) => {
                log::warn!("Skipping penalty {lam:.4}: estimate has non-finite entries");
                continue;
            }
            Err(e) => return Err(e),
        };
        let Some((ebic, n_edges)) = score(&precision) else {
            log::warn!("Skipping penalty {lam:.4}: estimate is not positive-definite");
            continue;
        };
        log::trace!("EBIC path: lambda = {lam:.4}, edges = {n_edges}, ebic = {ebic:.4}");
        path.push(PathPoint {
            penalty: lam,
            ebic,
            n_edges,
        });
        if best.as_ref().is_none_or(|(current, ..)| ebic < *current) {
            best = Some((ebic, lam, precision));
        }
    }
    Ok((path, best))
}

impl PrecisionEstimator for GraphLassoEbic {
    fn unfitted(&self) -> Self {
        Self::new(self.config.clone())
    }

    fn fit(&mut self, samples: ArrayView2<f64>) -> Result<(), EstimatorError> {
        self.precision = None;
        self.selected_penalty = None;
        self.path.clear();

        let moments = Moments::from_samples(samples, self.config.initialization)?;
        let s = &moments.matrix;
        let lam_max = {
            let largest = s
                .indexed_iter()
                .filter(|((i, j), _)| i != j)
                .map(|(_, v)| v.abs())
                .fold(0.0, f64::max);
            if largest > 0.0 { largest } else { 1.0 }
        };

        let penalties = self.penalty_path(lam_max);
        let (max_iter, tol, gamma) = (self.config.max_iter, self.config.tol, self.config.gamma);
        let (path, best) = walk_path(
            &penalties,
            |lam| solve_glasso(s, lam, max_iter, tol).map(|solution| solution.precision),
            |precision| extended_bic(s, precision, moments.n_samples, gamma),
        )?;
        self.path = path;

        let (score, lam, precision) = best.ok_or(EstimatorError::NoValidPenalty)?;
        log::debug!("EBIC selected penalty {lam:.4} (ebic = {score:.4})");
        self.selected_penalty = Some(lam);
        self.precision = Some(moments.unscale(precision));
        Ok(())
    }

    fn precision(&self) -> Option<&Array2<f64>> {
        self.precision.as_ref()
    }
}

impl PenaltySelector for GraphLassoEbic {
    fn selected_penalty(&self) -> Option<f64> {
        self.selected_penalty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn soft_threshold_shrinks_towards_zero() {
        assert_eq!(soft_threshold(0.5, 0.2), 0.3);
        assert_eq!(soft_threshold(-0.5, 0.2), -0.3);
        assert_eq!(soft_threshold(0.1, 0.2), 0.0);
    }

    #[test]
    fn zero_penalty_inverts_covariance() {
        let s = array![[1.0, 0.3, 0.1], [0.3, 1.0, -0.2], [0.1, -0.2, 1.0]];
        let solution = solve_glasso(&s, 0.0, 500, 1e-10).unwrap();
        let product = solution.precision.dot(&s);
        for ((i, j), &v) in product.indexed_iter() {
            let expected = if i == j { 1.0 } else { 0.0 };
            assert_abs_diff_eq!(v, expected, epsilon = 1e-5);
        }
    }

    #[test]
    fn huge_penalty_gives_diagonal_precision() {
        let s = array![[1.0, 0.6], [0.6, 1.0]];
        let solution = solve_glasso(&s, 10.0, 100, 1e-6).unwrap();
        assert_eq!(solution.precision[[0, 1]], 0.0);
        assert_abs_diff_eq!(solution.precision[[0, 0]], 1.0 / 11.0, epsilon = 1e-12);
        assert!(solution.converged);
    }

    #[test]
    fn penalty_path_is_log_spaced_and_descending() {
        let est = GraphLassoEbic::new(GraphLassoEbicConfig {
            n_lambdas: 3,
            lambda_min_ratio: 0.01,
            ..GraphLassoEbicConfig::default()
        });
        let path = est.penalty_path(2.0);
        assert_abs_diff_eq!(path[0], 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(path[1], 0.2, epsilon = 1e-12);
        assert_abs_diff_eq!(path[2], 0.02, epsilon = 1e-12);
    }

    #[test]
    fn correlation_initialization_rejects_constant_feature() {
        let x = array![[1.0, 0.0], [1.0, 1.0], [1.0, 2.0]];
        let mut est = GraphLasso::default();
        assert!(matches!(
            est.fit(x.view()),
            Err(EstimatorError::ZeroVariance(0))
        ));
        assert!(est.precision().is_none());
    }

    #[test]
    fn invalid_penalty_is_rejected() {
        let x = array![[1.0, 0.0], [0.0, 1.0], [2.0, 2.5]];
        let mut est = GraphLasso::from_penalty(-1.0);
        assert!(matches!(
            est.fit(x.view()),
            Err(EstimatorError::InvalidPenalty(_))
        ));
    }

    #[test]
    fn path_skips_non_finite_points() {
        let penalties = array![1.0, 0.5, 0.1];
        let (path, best) = walk_path(
            &penalties,
            |lam| {
                if lam == 0.5 {
                    Err(EstimatorError::NonFiniteEstimate { penalty: lam })
                } else {
                    Ok(Array2::eye(2) * lam)
                }
            },
            |precision| Some((precision[[0, 0]], 0)),
        )
        .unwrap();
        assert_eq!(path.len(), 2);
        assert_eq!(path[0].penalty, 1.0);
        assert_eq!(path[1].penalty, 0.1);
        let (score, lam, precision) = best.unwrap();
        assert_eq!((score, lam), (0.1, 0.1));
        assert_eq!(precision[[1, 1]], 0.1);
    }

    #[test]
    fn path_with_no_usable_point_has_no_best() {
        let penalties = array![1.0, 0.5];
        let (path, best) = walk_path(
            &penalties,
            |lam| Err(EstimatorError::NonFiniteEstimate { penalty: lam }),
            |precision: &Array2<f64>| Some((precision[[0, 0]], 0)),
        )
        .unwrap();
        assert!(path.is_empty());
        assert!(best.is_none());
    }

    #[test]
    fn path_stops_on_other_solver_failures() {
        let penalties = array![1.0, 0.5];
        let outcome = walk_path(
            &penalties,
            |lam| {
                if lam < 1.0 {
                    Err(EstimatorError::Custom("diverged".to_string()))
                } else {
                    Ok(Array2::eye(2))
                }
            },
            |precision: &Array2<f64>| Some((precision[[0, 0]], 0)),
        );
        assert!(matches!(outcome, Err(EstimatorError::Custom(_))));
    }
}
