#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

pub mod config;
pub mod estimator;
pub mod experiment;
pub mod glasso;
pub mod graph;
pub mod render;
pub mod sample;
pub mod seeding;
pub mod support;

pub use estimator::{
    EstimatorError, PenalizedEstimator, PenaltyBinding, PenaltySelector, PrecisionEstimator,
};
pub use experiment::{N_ALPHA_GRID_POINTS, PowerConfig, PowerError, PowerResults, StatisticalPower};
pub use glasso::{GraphLasso, GraphLassoConfig, GraphLassoEbic, GraphLassoEbicConfig};
pub use graph::{Graph, GraphError, GraphSource, GraphSynthesizer};
pub use support::SupportComparator;
