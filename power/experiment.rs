// power/experiment.rs

//! # Statistical Power of Exact Support Recovery
//!
//! The controller sweeps a grid of sparsity levels (rows) against a grid of
//! `n_samples / n_features` ratios (columns) and estimates, for every cell, the
//! probability that a model-selection-driven procedure recovers the exact
//! zero/nonzero pattern of the true precision matrix.
//!
//! Every cell runs a two-phase protocol:
//!
//! 1.  **Selection (once per cell):** a fresh copy of the model-selection estimator
//!     is fitted on one draw and its selected penalty is read off.
//!
//! 2.  **Trials (`n_trials` per cell):** the penalty is injected into the trial
//!     estimator, and each trial fits a fresh copy on an independent draw from the
//!     same fixed graph and scores exact support recovery.
//!
//! Freezing the penalty per cell separates "does this penalty recover the support
//! across independent draws" from "does selection pick a good penalty", without
//! paying the selection cost on every trial.
//!
//! Every graph, selection draw and trial draw has its own seeded random stream
//! (see [`crate::seeding`]), so the trial phase may run on rayon workers and still
//! reproduce the sequential result exactly.

use indicatif::{ProgressBar, ProgressStyle};
use ndarray::{Array1, Array2, s};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use thiserror::Error;

use crate::estimator::{EstimatorError, PenalizedEstimator, PenaltyBinding, PenaltySelector, PrecisionEstimator};
use crate::glasso::GraphLasso;
use crate::graph::{Graph, GraphError, GraphSource, GraphSynthesizer};
use crate::render::{PowerRenderer, RenderError, TextChart};
use crate::sample::{MultivariateNormal, SampleError};
use crate::seeding::{UnitKey, unit_rng};
use crate::support::{DEFAULT_SUPPORT_EPSILON, SupportComparator};

/// Number of sparsity levels in every sweep.
pub const N_ALPHA_GRID_POINTS: usize = 5;

/// Which half of the per-cell protocol an estimator failed in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Selection,
    Trial(usize),
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Selection => f.write_str("model selection"),
            Self::Trial(trial) => write!(f, "trial {trial}"),
        }
    }
}

#[derive(Error, Debug)]
pub enum PowerError {
    #[error("Invalid experiment configuration: {0}")]
    InvalidConfig(String),

    #[error(
        "The model selection estimator exposed no value through '{attribute}' after fitting (sparsity row {row}, ratio column {column})."
    )]
    MissingPenalty {
        attribute: String,
        row: usize,
        column: usize,
    },

    #[error("The trial estimator produced no precision matrix at sparsity row {row}, ratio column {column}.")]
    MissingPrecision { row: usize, column: usize },

    #[error("The graph source returned a {found}-feature graph, expected {expected}.")]
    GraphShape { expected: usize, found: usize },

    #[error("Graph synthesis failed: {0}")]
    Graph(#[from] GraphError),

    #[error("Sampling failed: {0}")]
    Sample(#[from] SampleError),

    #[error("The {phase} estimator failed at sparsity row {row}, ratio column {column}: {source}")]
    Estimator {
        phase: Phase,
        row: usize,
        column: usize,
        #[source]
        source: EstimatorError,
    },
}

/// Sweep configuration. Every field has a default, so partial TOML tables load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerConfig {
    pub n_features: usize,
    /// Trials per (sparsity, ratio) cell.
    pub n_trials: usize,
    /// Number of `n_samples / n_features` ratios.
    pub n_grid_points: usize,
    /// Interval of the ratio grid, traversed ascending.
    pub ratio_range: (f64, f64),
    /// Interval of the sparsity grid, traversed from the sparsest level down.
    pub alpha_range: (f64, f64),
    /// Threshold of the exact-support comparison.
    pub epsilon: f64,
    pub seed: u64,
    /// Run the trials of a cell on the rayon pool.
    pub parallel: bool,
    /// Print progress text. Has no effect on results.
    pub verbose: bool,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            n_features: 50,
            n_trials: 100,
            n_grid_points: 10,
            ratio_range: (0.25, 4.0),
            alpha_range: (0.99, 0.999),
            epsilon: DEFAULT_SUPPORT_EPSILON,
            seed: 1,
            parallel: true,
            verbose: false,
        }
    }
}

impl PowerConfig {
    /// Sparsity levels, sparsest first.
    pub fn alpha_grid(&self) -> Array1<f64> {
        let (lo, hi) = self.alpha_range;
        Array1::linspace(lo, hi, N_ALPHA_GRID_POINTS)
            .slice(s![..;-1])
            .to_owned()
    }

    /// Ascending, evenly spaced `n_samples / n_features` ratios.
    pub fn ratio_grid(&self) -> Array1<f64> {
        let (lo, hi) = self.ratio_range;
        Array1::linspace(lo, hi, self.n_grid_points)
    }

    /// `round(ratio * n_features)` for every ratio.
    pub fn sample_counts(&self, ratios: &Array1<f64>) -> Vec<usize> {
        ratios
            .iter()
            .map(|r| (r * self.n_features as f64).round() as usize)
            .collect()
    }

    pub fn validate(&self) -> Result<(), PowerError> {
        let fail = |msg: String| Err(PowerError::InvalidConfig(msg));
        if self.n_features < 2 {
            return fail(format!("n_features must be at least 2, got {}", self.n_features));
        }
        if self.n_trials == 0 {
            return fail("n_trials must be at least 1".to_string());
        }
        if self.n_grid_points == 0 {
            return fail("n_grid_points must be at least 1".to_string());
        }
        let (r_lo, r_hi) = self.ratio_range;
        if !(r_lo.is_finite() && r_hi.is_finite() && r_lo > 0.0 && r_lo <= r_hi) {
            return fail(format!(
                "ratio_range must satisfy 0 < lo <= hi, got ({r_lo}, {r_hi})"
            ));
        }
        let (a_lo, a_hi) = self.alpha_range;
        if !(a_lo > 0.0 && a_hi < 1.0 && a_lo <= a_hi) {
            return fail(format!(
                "alpha_range must satisfy 0 < lo <= hi < 1, got ({a_lo}, {a_hi})"
            ));
        }
        if !(self.epsilon.is_finite() && self.epsilon >= 0.0) {
            return fail(format!("epsilon must be finite and non-negative, got {}", self.epsilon));
        }
        let ratios = self.ratio_grid();
        let counts = self.sample_counts(&ratios);
        if let Some((ratio, count)) = ratios.iter().zip(&counts).find(|(_, c)| **c < 2) {
            return fail(format!(
                "ratio {ratio} with {} features yields {count} samples; at least 2 are required",
                self.n_features
            ));
        }
        Ok(())
    }
}

/// The finished power surface and the grids it is indexed by.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerResults {
    /// Fraction of trials with exact support recovery, `N_ALPHA_GRID_POINTS x n_grid_points`.
    pub power: Array2<f64>,
    /// Penalty selected in each cell, same shape as `power`.
    pub penalties: Array2<f64>,
    pub alphas: Array1<f64>,
    pub ratios: Array1<f64>,
    pub sample_counts: Vec<usize>,
    /// Nonzero entries of each sparsity level's true precision matrix.
    pub nonzero_counts: Vec<usize>,
}

struct CellOutcome {
    penalty: f64,
    power: f64,
}

/// Experiment controller for the statistical power of exact support recovery.
///
/// `S` is the model-selection estimator, `T` the trial estimator that receives the
/// selected penalty. Without a trial prototype, `T::from_penalty` builds one per cell.
pub struct StatisticalPower<S, T = GraphLasso> {
    selector: S,
    trial_estimator: Option<T>,
    binding: PenaltyBinding<S, T>,
    graph_source: Box<dyn GraphSource>,
    config: PowerConfig,
    results: Option<PowerResults>,
}

impl<S: PenaltySelector> StatisticalPower<S, GraphLasso> {
    /// Controller with the default graphical lasso trial estimator and default settings.
    pub fn new(selector: S) -> Self {
        Self::from_parts(selector, None, PenaltyBinding::default())
    }
}

impl<S: PrecisionEstimator, T: PenalizedEstimator> StatisticalPower<S, T> {
    pub fn from_parts(selector: S, trial_estimator: Option<T>, binding: PenaltyBinding<S, T>) -> Self {
        Self {
            selector,
            trial_estimator,
            binding,
            graph_source: Box::new(GraphSynthesizer::default()),
            config: PowerConfig::default(),
            results: None,
        }
    }

    /// Replaces the trial prototype.
    ///
    /// The penalty binding is reset to the default accessors of the new estimator
    /// type, discarding any binding set earlier. Call [`with_binding`](Self::with_binding)
    /// afterwards, or use [`with_trial_estimator_and_binding`](Self::with_trial_estimator_and_binding),
    /// to keep a custom one.
    pub fn with_trial_estimator<U: PenalizedEstimator>(self, trial: U) -> StatisticalPower<S, U>
    where
        S: PenaltySelector,
    {
        self.with_trial_estimator_and_binding(trial, PenaltyBinding::default())
    }

    /// Replaces the trial prototype together with the binding that moves the
    /// selected penalty onto it.
    pub fn with_trial_estimator_and_binding<U: PenalizedEstimator>(
        self,
        trial: U,
        binding: PenaltyBinding<S, U>,
    ) -> StatisticalPower<S, U> {
        StatisticalPower {
            selector: self.selector,
            trial_estimator: Some(trial),
            binding,
            graph_source: self.graph_source,
            config: self.config,
            results: None,
        }
    }

    pub fn with_binding(mut self, binding: PenaltyBinding<S, T>) -> Self {
        self.binding = binding;
        self
    }

    pub fn with_config(mut self, config: PowerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_graph_source(mut self, source: impl GraphSource + 'static) -> Self {
        self.graph_source = Box::new(source);
        self
    }

    pub fn config(&self) -> &PowerConfig {
        &self.config
    }

    pub fn binding(&self) -> &PenaltyBinding<S, T> {
        &self.binding
    }

    pub fn is_fitted(&self) -> bool {
        self.results.is_some()
    }

    /// The power surface, available once `fit` has completed.
    pub fn results(&self) -> Option<&PowerResults> {
        self.results.as_ref()
    }

    /// Runs the full sweep, replacing any earlier results.
    ///
    /// Any failure aborts the sweep and leaves the controller unfitted.
    pub fn fit(&mut self) -> Result<&PowerResults, PowerError> {
        self.results = None;
        self.config.validate()?;

        let config = &self.config;
        let alphas = config.alpha_grid();
        let ratios = config.ratio_grid();
        let sample_counts = config.sample_counts(&ratios);
        let n_cols = ratios.len();

        let mut power = Array2::<f64>::zeros((N_ALPHA_GRID_POINTS, n_cols));
        let mut penalties = Array2::<f64>::zeros((N_ALPHA_GRID_POINTS, n_cols));
        let mut nonzero_counts = Vec::with_capacity(N_ALPHA_GRID_POINTS);

        log::info!(
            "Starting power sweep: {} features, {} sparsity levels x {} ratios, {} trials per cell",
            config.n_features,
            N_ALPHA_GRID_POINTS,
            n_cols,
            config.n_trials
        );
        let progress = self.progress_bar((N_ALPHA_GRID_POINTS * n_cols) as u64);

        for (row, &alpha) in alphas.iter().enumerate() {
            self.report(&progress, || {
                format!("> At alpha {alpha} ({}/{})", row + 1, N_ALPHA_GRID_POINTS)
            });

            let mut graph_rng = unit_rng(config.seed, UnitKey::graph(row));
            let graph = self
                .graph_source
                .synthesize(config.n_features, alpha, &mut graph_rng)?;
            if graph.n_features() != config.n_features {
                return Err(PowerError::GraphShape {
                    expected: config.n_features,
                    found: graph.n_features(),
                });
            }
            let nonzero = graph.nonzero_count();
            log::info!("Graph at alpha {alpha:.4} has {nonzero} nonzero entries");
            self.report(&progress, || format!("   Graph has {nonzero} nonzero entries"));
            nonzero_counts.push(nonzero);

            let sampler = MultivariateNormal::new(graph.covariance.view())?;
            for (column, &n_samples) in sample_counts.iter().enumerate() {
                let cell = self.run_cell(row, column, n_samples, &graph, &sampler, &progress)?;
                power[[row, column]] = cell.power;
                penalties[[row, column]] = cell.penalty;
                progress.inc(1);
            }

            log::info!("Power at alpha {alpha:.4}: {:?}", power.row(row).to_vec());
            self.report(&progress, || {
                format!("   Results at this row: {:?}", power.row(row).to_vec())
            });
        }
        progress.finish_and_clear();

        Ok(self.results.insert(PowerResults {
            power,
            penalties,
            alphas,
            ratios,
            sample_counts,
            nonzero_counts,
        }))
    }

    fn run_cell(
        &self,
        row: usize,
        column: usize,
        n_samples: usize,
        graph: &Graph,
        sampler: &MultivariateNormal,
        progress: &ProgressBar,
    ) -> Result<CellOutcome, PowerError> {
        let seed = self.config.seed;
        let n_trials = self.config.n_trials;

        let mut selection_rng = unit_rng(seed, UnitKey::selection(row, column));
        let samples = sampler.standardized_sample(n_samples, &mut selection_rng)?;
        let mut selector = self.selector.unfitted();
        selector
            .fit(samples.view())
            .map_err(|source| PowerError::Estimator {
                phase: Phase::Selection,
                row,
                column,
                source,
            })?;
        let penalty = self
            .binding
            .read(&selector)
            .ok_or_else(|| PowerError::MissingPenalty {
                attribute: self.binding.selected_name().to_string(),
                row,
                column,
            })?;
        log::debug!("Cell ({row}, {column}): n_samples = {n_samples}, selected penalty = {penalty}");
        self.report(progress, || {
            format!(
                "   ({}/{}), n_samples = {}, selected {} = {}",
                column + 1,
                self.config.n_grid_points,
                n_samples,
                self.binding.selected_name(),
                penalty
            )
        });

        let mut trial_estimator = match &self.trial_estimator {
            Some(prototype) => prototype.unfitted(),
            None => T::from_penalty(penalty),
        };
        self.binding.inject(&mut trial_estimator, penalty);

        let comparator = SupportComparator::new(self.config.epsilon);
        let trial_estimator = &trial_estimator;
        let run_trial = |trial: usize| -> Result<bool, PowerError> {
            let mut rng = unit_rng(seed, UnitKey::trial(row, column, trial));
            let samples = sampler.standardized_sample(n_samples, &mut rng)?;
            let mut estimator = trial_estimator.unfitted();
            estimator
                .fit(samples.view())
                .map_err(|source| PowerError::Estimator {
                    phase: Phase::Trial(trial),
                    row,
                    column,
                    source,
                })?;
            let fitted = estimator
                .precision()
                .ok_or(PowerError::MissingPrecision { row, column })?;
            Ok(comparator.exact_support(graph.precision.view(), fitted.view()))
        };

        let outcomes: Vec<bool> = if self.config.parallel {
            (0..n_trials)
                .into_par_iter()
                .map(&run_trial)
                .collect::<Result<_, _>>()?
        } else {
            (0..n_trials).map(&run_trial).collect::<Result<_, _>>()?
        };
        let recovered = outcomes.iter().filter(|&&hit| hit).count();

        Ok(CellOutcome {
            penalty,
            power: recovered as f64 / n_trials as f64,
        })
    }

    fn progress_bar(&self, total: u64) -> ProgressBar {
        if !self.config.verbose {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(total);
        if let Ok(style) =
            ProgressStyle::with_template(">  - Cells [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
        {
            pb.set_style(style.progress_chars("█▉▊▋▌▍▎▏ "));
        }
        pb
    }

    fn report(&self, progress: &ProgressBar, message: impl FnOnce() -> String) {
        if self.config.verbose {
            progress.suspend(|| eprintln!("{}", message()));
        }
    }

    /// Renders the power surface as a text chart on stderr.
    pub fn show(&self) -> Result<(), RenderError> {
        self.show_with(&mut TextChart::new(io::stderr()))
    }

    /// Renders the power surface with `renderer`. Before `fit` has completed this
    /// only reports that the controller is not fitted.
    pub fn show_with<R: PowerRenderer + ?Sized>(&self, renderer: &mut R) -> Result<(), RenderError> {
        match &self.results {
            Some(results) => renderer.render(results),
            None => {
                log::warn!("Power surface requested before the experiment was fitted");
                eprintln!("Not fitted.");
                Ok(())
            }
        }
    }
}
