//! TOML experiment files for the command-line tool.
//!
//! Every table and field is optional; anything left out takes the library default.
//!
//! ```toml
//! [experiment]
//! n_features = 20
//! n_trials = 50
//! ratio_range = [0.5, 3.0]
//!
//! [graph]
//! smallest_coef = 0.5
//! largest_coef = 0.9
//!
//! [selector]
//! gamma = 0.5
//!
//! [trial]
//! max_iter = 200
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::experiment::PowerConfig;
use crate::glasso::{GraphLassoConfig, GraphLassoEbicConfig};
use crate::graph::GraphSynthesizer;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read experiment file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse experiment file: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Long-format CSV of the power surface.
    pub csv: Option<PathBuf>,
    /// Skip the text chart on stderr.
    pub quiet: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExperimentFile {
    pub experiment: PowerConfig,
    pub graph: GraphSynthesizer,
    pub selector: GraphLassoEbicConfig,
    /// Trial estimator prototype. Its penalty is overwritten in every cell; when absent
    /// the default graphical lasso is built from the selected penalty.
    pub trial: Option<GraphLassoConfig>,
    pub output: OutputConfig,
}

impl ExperimentFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }
}
