use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

/// Magnitude at or below which a fitted precision entry is treated as an absent edge.
///
/// Fitted estimators return small but nonzero values for edges that are truly absent.
/// The value materially affects measured power.
pub const DEFAULT_SUPPORT_EPSILON: f64 = 0.2;

/// Decides whether a fitted precision matrix recovers the exact support of the truth.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SupportComparator {
    epsilon: f64,
}

impl Default for SupportComparator {
    fn default() -> Self {
        Self::new(DEFAULT_SUPPORT_EPSILON)
    }
}

impl SupportComparator {
    pub fn new(epsilon: f64) -> Self {
        Self { epsilon }
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Hard-thresholds a copy of `matrix`: entries with `|x| <= epsilon` become zero.
    /// Non-finite entries are kept, and so count as nonzero.
    pub fn threshold(&self, matrix: ArrayView2<f64>) -> Array2<f64> {
        let eps = self.epsilon;
        matrix.mapv(|v| if v.abs() <= eps { 0.0 } else { v })
    }

    /// True iff the thresholded `fitted` matrix is nonzero at exactly the flat
    /// positions where `truth` is nonzero. Matrices of different shape never match.
    pub fn exact_support(&self, truth: ArrayView2<f64>, fitted: ArrayView2<f64>) -> bool {
        if truth.dim() != fitted.dim() {
            return false;
        }
        let eps = self.epsilon;
        truth
            .iter()
            .zip(fitted.iter())
            .all(|(&t, &f)| (t != 0.0) == !(f.abs() <= eps))
    }
}

/// Number of entries that are not exactly zero.
pub fn count_nonzero(matrix: ArrayView2<f64>) -> usize {
    matrix.iter().filter(|&&v| v != 0.0).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, array};

    #[test]
    fn near_zero_entries_are_snapped() {
        let cmp = SupportComparator::default();
        let truth = array![[1.0, 0.0], [0.0, 1.0]];
        let fitted = array![[0.9, 0.15], [-0.2, 1.1]];
        assert!(cmp.exact_support(truth.view(), fitted.view()));
        let thresholded = cmp.threshold(fitted.view());
        assert_eq!(thresholded, array![[0.9, 0.0], [0.0, 1.1]]);
    }

    #[test]
    fn thresholding_is_idempotent() {
        let cmp = SupportComparator::new(0.25);
        let truth = array![[1.0, 0.4, 0.0], [0.4, 1.0, 0.0], [0.0, 0.0, 1.0]];
        let fitted = array![[1.2, 0.3, 0.24], [0.31, 0.8, -0.1], [0.26, -0.01, 0.9]];
        let once = cmp.threshold(fitted.view());
        let twice = cmp.threshold(once.view());
        assert_eq!(once, twice);
        assert_eq!(
            cmp.exact_support(truth.view(), fitted.view()),
            cmp.exact_support(truth.view(), once.view())
        );
    }

    #[test]
    fn diagonal_truth_boundary() {
        let cmp = SupportComparator::default();
        let mut fitted = Array2::from_elem((4, 4), 0.19);
        fitted.diag_mut().fill(1.0);
        let diagonal: Array2<f64> = Array2::eye(4);
        assert!(cmp.exact_support(diagonal.view(), fitted.view()));

        let mut with_edge = diagonal.clone();
        with_edge[[0, 3]] = 0.5;
        with_edge[[3, 0]] = 0.5;
        assert!(!cmp.exact_support(with_edge.view(), fitted.view()));
    }

    #[test]
    fn missing_or_extra_edges_fail() {
        let cmp = SupportComparator::default();
        let truth = array![[1.0, 0.5], [0.5, 1.0]];
        let dropped = array![[1.0, 0.1], [0.1, 1.0]];
        assert!(!cmp.exact_support(truth.view(), dropped.view()));
        let extra = array![[1.0, 0.5], [0.5, 1.0]];
        let sparse_truth = array![[1.0, 0.0], [0.0, 1.0]];
        assert!(!cmp.exact_support(sparse_truth.view(), extra.view()));
    }

    #[test]
    fn shape_mismatch_and_nan() {
        let cmp = SupportComparator::default();
        let truth: Array2<f64> = Array2::eye(2);
        let bigger: Array2<f64> = Array2::eye(3);
        assert!(!cmp.exact_support(truth.view(), bigger.view()));
        let with_nan = array![[1.0, f64::NAN], [0.0, 1.0]];
        assert!(!cmp.exact_support(truth.view(), with_nan.view()));
    }

    #[test]
    fn counts_nonzero_entries() {
        assert_eq!(count_nonzero(array![[1.0, 0.0], [-0.0, 2.0]].view()), 2);
    }
}
