//! Deterministic seed derivation for the independently executed units of a sweep.
//!
//! Every graph draw, selection draw and trial draw owns a private `StdRng` whose
//! seed is a SplitMix64 mix of the experiment seed and the unit's coordinates.
//! A unit's random stream therefore does not depend on the order (or the thread)
//! in which units are executed.

use rand::SeedableRng;
use rand::rngs::StdRng;

/// Which random stream a unit draws from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stream {
    Graph,
    Selection,
    Trial,
}

impl Stream {
    fn tag(self) -> u64 {
        match self {
            Self::Graph => 0x47,
            Self::Selection => 0x53,
            Self::Trial => 0x54,
        }
    }
}

/// Coordinates of one execution unit inside the sparsity x ratio sweep.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UnitKey {
    pub stream: Stream,
    pub row: usize,
    pub column: usize,
    pub index: usize,
}

impl UnitKey {
    /// The fixed ground-truth graph of a sparsity row.
    pub fn graph(row: usize) -> Self {
        Self {
            stream: Stream::Graph,
            row,
            column: 0,
            index: 0,
        }
    }

    /// The single model-selection draw of a cell.
    pub fn selection(row: usize, column: usize) -> Self {
        Self {
            stream: Stream::Selection,
            row,
            column,
            index: 0,
        }
    }

    pub fn trial(row: usize, column: usize, trial: usize) -> Self {
        Self {
            stream: Stream::Trial,
            row,
            column,
            index: trial,
        }
    }
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

/// Mixes the experiment seed with the unit coordinates.
pub fn unit_seed(base: u64, key: UnitKey) -> u64 {
    [
        key.stream.tag(),
        key.row as u64,
        key.column as u64,
        key.index as u64,
    ]
    .into_iter()
    .fold(splitmix64(base), |acc, part| splitmix64(acc ^ part))
}

pub fn unit_rng(base: u64, key: UnitKey) -> StdRng {
    StdRng::seed_from_u64(unit_seed(base, key))
}
