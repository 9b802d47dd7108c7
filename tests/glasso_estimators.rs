use ndarray::Array2;

use spower::glasso::Initialization;
use spower::sample::MultivariateNormal;
use spower::seeding::{UnitKey, unit_rng};
use spower::{
    EstimatorError, Graph, GraphLasso, GraphLassoConfig, GraphLassoEbic, GraphLassoEbicConfig,
    PenaltySelector, PrecisionEstimator, SupportComparator,
};

fn chain_graph(n: usize) -> Graph {
    let precision = Array2::from_shape_fn((n, n), |(i, j)| {
        if i == j {
            2.0
        } else if i.abs_diff(j) == 1 {
            -0.8
        } else {
            0.0
        }
    });
    Graph::from_precision(precision.view()).expect("chain precision")
}

fn draw(graph: &Graph, n_samples: usize, index: usize) -> Array2<f64> {
    MultivariateNormal::new(graph.covariance.view())
        .expect("sampler")
        .standardized_sample(n_samples, &mut unit_rng(31, UnitKey::trial(0, 0, index)))
        .expect("draw")
}

#[test]
fn glasso_recovers_a_chain_from_plenty_of_data() {
    let graph = chain_graph(6);
    let samples = draw(&graph, 4000, 0);
    let mut est = GraphLasso::new(GraphLassoConfig {
        penalty: 0.05,
        ..GraphLassoConfig::default()
    });
    est.fit(samples.view()).expect("fit");

    let precision = est.precision().expect("fitted precision");
    assert!(SupportComparator::default().exact_support(graph.precision.view(), precision.view()));
    for ((i, j), &v) in precision.indexed_iter() {
        assert_eq!(v, precision[[j, i]]);
    }
    assert!(est.n_iter() > 0);
    assert!(est.covariance().is_some());
    assert!(est.unfitted().precision().is_none());
}

#[test]
fn both_initializations_fit() {
    let graph = chain_graph(5);
    let samples = draw(&graph, 200, 1);
    for initialization in [Initialization::Covariance, Initialization::Correlation] {
        let mut est = GraphLasso::new(GraphLassoConfig {
            initialization,
            ..GraphLassoConfig::default()
        });
        est.fit(samples.view()).expect("fit");
        let precision = est.precision().expect("fitted precision");
        assert_eq!(precision.dim(), (5, 5));
        assert!(precision.diag().iter().all(|&v| v > 0.0));
    }
}

#[test]
fn ebic_selects_a_penalty_on_its_path() {
    let graph = chain_graph(8);
    let samples = draw(&graph, 200, 2);
    let mut est = GraphLassoEbic::new(GraphLassoEbicConfig {
        n_lambdas: 12,
        ..GraphLassoEbicConfig::default()
    });
    assert!(est.selected_penalty().is_none());
    est.fit(samples.view()).expect("fit");

    let selected = est.selected_penalty().expect("selected penalty");
    let path = est.path();
    assert!(!path.is_empty() && path.len() <= 12);
    assert!(path.windows(2).all(|w| w[0].penalty > w[1].penalty));
    let best = path
        .iter()
        .find(|point| point.penalty == selected)
        .expect("selected penalty lies on the path");
    assert!(path.iter().all(|point| point.ebic >= best.ebic));
    assert!(est.precision().is_some());
}

#[test]
fn larger_gamma_never_selects_more_edges() {
    let graph = chain_graph(8);
    let samples = draw(&graph, 60, 3);
    let selected_edges = |gamma: f64| -> usize {
        let mut est = GraphLassoEbic::new(GraphLassoEbicConfig {
            gamma,
            n_lambdas: 15,
            ..GraphLassoEbicConfig::default()
        });
        est.fit(samples.view()).expect("fit");
        let selected = est.selected_penalty().expect("selected penalty");
        est.path()
            .iter()
            .find(|point| point.penalty == selected)
            .map(|point| point.n_edges)
            .expect("selected point")
    };
    assert!(selected_edges(1.0) <= selected_edges(0.0));
}

#[test]
fn too_few_samples_are_rejected() {
    let samples = Array2::from_shape_vec((1, 3), vec![0.1, 0.2, 0.3]).expect("shape");
    let mut est = GraphLassoEbic::default();
    assert!(matches!(
        est.fit(samples.view()),
        Err(EstimatorError::TooFewSamples {
            required: 2,
            found: 1
        })
    ));
    assert!(est.selected_penalty().is_none());

    let mut nan = Array2::<f64>::zeros((4, 2));
    nan[[2, 1]] = f64::NAN;
    assert!(matches!(
        GraphLasso::default().fit(nan.view()),
        Err(EstimatorError::NonFiniteInput)
    ));
}
