//! Capability contract between the experiment controller and the estimators it evaluates.
//!
//! The controller only ever needs four things from an estimator: a fresh copy of
//! its configuration, a fit on a sample matrix, the fitted precision matrix, and a
//! way to move one scalar penalty from the model-selection estimator into the
//! trial estimator. The last is expressed as a [`PenaltyBinding`], a named
//! getter/setter pair fixed when the experiment is configured.

use ndarray::{Array2, ArrayView2};
use ndarray_linalg::error::LinalgError;
use std::fmt;
use thiserror::Error;

/// Failures raised by estimators while fitting.
#[derive(Error, Debug)]
pub enum EstimatorError {
    #[error("At least {required} samples are required to estimate a precision matrix, found {found}.")]
    TooFewSamples { required: usize, found: usize },

    #[error("Input samples contain non-finite values.")]
    NonFiniteInput,

    #[error("Feature {0} has zero variance and cannot be scaled to a correlation.")]
    ZeroVariance(usize),

    #[error("Penalty must be finite and non-negative, got {0}.")]
    InvalidPenalty(f64),

    #[error("The estimated precision matrix contains non-finite values at penalty {penalty}.")]
    NonFiniteEstimate { penalty: f64 },

    #[error("No penalty on the model selection path produced a positive-definite estimate.")]
    NoValidPenalty,

    #[error("A linear algebra operation failed: {0}")]
    Linalg(#[from] LinalgError),

    #[error("{0}")]
    Custom(String),
}

/// An inverse-covariance estimator that can be re-instantiated and fitted on samples.
pub trait PrecisionEstimator: Send + Sync {
    /// A copy built from this estimator's configuration only, with no learned state.
    fn unfitted(&self) -> Self
    where
        Self: Sized;

    /// Fits on an `n_samples x n_features` matrix and stores the fitted precision.
    fn fit(&mut self, samples: ArrayView2<f64>) -> Result<(), EstimatorError>;

    /// The fitted precision matrix, or `None` before a successful fit.
    fn precision(&self) -> Option<&Array2<f64>>;
}

/// An estimator that chooses its own penalty from data.
pub trait PenaltySelector: PrecisionEstimator {
    fn selected_penalty(&self) -> Option<f64>;
}

/// An estimator fitted with an externally fixed penalty.
pub trait PenalizedEstimator: PrecisionEstimator {
    /// The estimator in its default mode with the given penalty.
    fn from_penalty(penalty: f64) -> Self
    where
        Self: Sized;

    fn penalty(&self) -> f64;

    fn set_penalty(&mut self, penalty: f64);
}

/// Reads the selected penalty off a fitted selector and injects it into a trial estimator.
///
/// The names only label the accessors in progress output and errors; the accessors
/// themselves are bound when the binding is built.
pub struct PenaltyBinding<S, T> {
    selected_name: String,
    inject_name: String,
    read: fn(&S) -> Option<f64>,
    write: fn(&mut T, f64),
}

impl<S, T> PenaltyBinding<S, T> {
    pub fn new(
        selected_name: impl Into<String>,
        read: fn(&S) -> Option<f64>,
        inject_name: impl Into<String>,
        write: fn(&mut T, f64),
    ) -> Self {
        Self {
            selected_name: selected_name.into(),
            inject_name: inject_name.into(),
            read,
            write,
        }
    }

    pub fn selected_name(&self) -> &str {
        &self.selected_name
    }

    pub fn inject_name(&self) -> &str {
        &self.inject_name
    }

    pub fn read(&self, selector: &S) -> Option<f64> {
        (self.read)(selector)
    }

    pub fn inject(&self, estimator: &mut T, penalty: f64) {
        (self.write)(estimator, penalty)
    }
}

impl<S: PenaltySelector, T: PenalizedEstimator> Default for PenaltyBinding<S, T> {
    fn default() -> Self {
        Self::new(
            "selected_penalty",
            S::selected_penalty,
            "penalty",
            T::set_penalty,
        )
    }
}

impl<S, T> Clone for PenaltyBinding<S, T> {
    fn clone(&self) -> Self {
        Self {
            selected_name: self.selected_name.clone(),
            inject_name: self.inject_name.clone(),
            read: self.read,
            write: self.write,
        }
    }
}

impl<S, T> fmt::Debug for PenaltyBinding<S, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PenaltyBinding")
            .field("selected", &self.selected_name)
            .field("inject", &self.inject_name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed {
        lam: Option<f64>,
        precision: Option<Array2<f64>>,
    }

    impl PrecisionEstimator for Fixed {
        fn unfitted(&self) -> Self {
            Self {
                lam: self.lam,
                precision: None,
            }
        }

        fn fit(&mut self, samples: ArrayView2<f64>) -> Result<(), EstimatorError> {
            self.precision = Some(Array2::eye(samples.ncols()));
            Ok(())
        }

        fn precision(&self) -> Option<&Array2<f64>> {
            self.precision.as_ref()
        }
    }

    impl PenaltySelector for Fixed {
        fn selected_penalty(&self) -> Option<f64> {
            self.lam
        }
    }

    impl PenalizedEstimator for Fixed {
        fn from_penalty(penalty: f64) -> Self {
            Self {
                lam: Some(penalty),
                precision: None,
            }
        }

        fn penalty(&self) -> f64 {
            self.lam.unwrap_or(0.0)
        }

        fn set_penalty(&mut self, penalty: f64) {
            self.lam = Some(penalty);
        }
    }

    #[test]
    fn default_binding_moves_penalty() {
        let binding: PenaltyBinding<Fixed, Fixed> = PenaltyBinding::default();
        assert_eq!(binding.selected_name(), "selected_penalty");
        assert_eq!(binding.inject_name(), "penalty");

        let selector = Fixed::from_penalty(0.35);
        let mut trial = Fixed::from_penalty(1.0);
        let lam = binding.read(&selector).unwrap();
        binding.inject(&mut trial, lam);
        assert_eq!(trial.penalty(), 0.35);
    }

    #[test]
    fn custom_binding_uses_its_accessors() {
        let binding: PenaltyBinding<Fixed, Fixed> = PenaltyBinding::new(
            "lam_",
            |s: &Fixed| s.lam.map(|v| v * 2.0),
            "lam",
            |t: &mut Fixed, v| t.lam = Some(v + 1.0),
        );
        let selector = Fixed::from_penalty(0.5);
        let mut trial = Fixed::from_penalty(0.0);
        binding.inject(&mut trial, binding.read(&selector).unwrap());
        assert_eq!(trial.penalty(), 2.0);
        assert_eq!(format!("{binding:?}"), "PenaltyBinding { selected: \"lam_\", inject: \"lam\" }");
    }

    #[test]
    fn unfitted_copy_drops_learned_state() {
        let mut est = Fixed::from_penalty(0.2);
        est.fit(Array2::<f64>::zeros((3, 4)).view()).unwrap();
        assert!(est.precision().is_some());
        let fresh = est.unfitted();
        assert!(fresh.precision().is_none());
        assert_eq!(fresh.penalty(), 0.2);
    }
}
