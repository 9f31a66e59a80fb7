//! libgraphone-core
//!
//! Core of a joint-sequence model toolkit for source-to-target sequence
//! conversion (grapheme-to-phoneme and friends), shared by task-specific
//! front ends.
//!
//! A model represents an alignment between two symbol sequences as a
//! concatenation of joint multigrams, pairs of short substrings scored by an
//! n-gram back-off language model over multigram tokens. This crate owns the
//! four tightly coupled subsystems behind that idea:
//!
//! - [`MultigramInventory`] - content-addressed catalogue of joint multigrams
//! - [`SequenceModel`] - compact back-off model with tree-structured
//!   history lookup
//! - [`EstimationGraphBuilder`], the accumulators and
//!   [`SequenceModelEstimator`] - per-pair alignment lattices, expected-count
//!   collection and Kneser-Ney re-estimation
//! - [`Translator`] - A* single-best and N-best decoding
//!
//! Everything is a caller-owned object and single-threaded; for parallel
//! training pipelines, instantiate one set of components per worker.

use serde::{Deserialize, Serialize};

pub mod probability;
pub use probability::{
    difference_ulp, is_nearly_equal, LogProbability, Probability, ProbabilityAccumulator,
};

pub mod graph;
pub use graph::{EdgeId, EdgeMap, Graph, GraphSorter, NodeId, NodeMap};

pub mod multigram;
pub use multigram::{
    JointMultigram, Multigram, MultigramIndex, MultigramInventory, Symbol, MAX_MULTIGRAM_LENGTH,
};

pub mod priority_queue;
pub use priority_queue::{PriorityQueue, TracedPriorityQueue};

pub mod sequence_model;
pub use sequence_model::{History, ModelEntry, SequenceModel, Token};

pub mod estimation;
pub use estimation::{EmergenceMode, EstimationGraph, EstimationGraphBuilder};

pub mod accumulator;
pub use accumulator::{
    EvidenceStore, ForwardBackwardAccumulator, OneForAllAccumulator, ViterbiAccumulator,
};

pub mod estimator;
pub use estimator::SequenceModelEstimator;

pub mod translator;
pub use translator::{NBestContext, Translator};

pub mod error;
pub use error::{EstimationError, InputError, TranslationError};

/// Generic training and decoding configuration.
///
/// Front-end crates layer their task-specific options (alphabet handling,
/// corpus formats) on top of this; everything here is meaningful for any
/// pair of symbol alphabets.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Target n-gram order of the sequence model. Training ramps up one
    /// order at a time.
    pub ngram_order: u32,
    /// Maximum source symbols a single multigram may cover.
    pub max_left_length: u32,
    /// Maximum target symbols a single multigram may cover.
    pub max_right_length: u32,
    /// Whether multigrams may leave one side empty (insertions/deletions).
    /// With this off, every multigram consumes on both sides.
    pub allow_empty_sides: bool,
    /// EM iterations per order step.
    pub em_iterations: u32,
    /// Relative log-likelihood change below which an order step is
    /// considered converged.
    pub convergence_threshold: f64,
    /// Kneser-Ney discount applied at every history level.
    pub discount: f64,
    /// Open-queue bound for the decoder.
    pub stack_limit: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            // trigram over multigram tokens is a solid general default
            ngram_order: 3,
            max_left_length: 2,
            max_right_length: 2,
            allow_empty_sides: true,
            em_iterations: 10,
            convergence_threshold: 1e-4,
            discount: 0.5,
            stack_limit: 1 << 22,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load_toml<P: AsRef<std::path::Path>>(
        path: P,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save_toml<P: AsRef<std::path::Path>>(
        &self,
        path: P,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// The size templates implied by the side length bounds.
    pub fn size_templates(&self) -> Vec<(u32, u32)> {
        let mut result = Vec::new();
        for l in 0..=self.max_left_length {
            for r in 0..=self.max_right_length {
                if l + r == 0 {
                    continue;
                }
                if !self.allow_empty_sides && (l == 0 || r == 0) {
                    continue;
                }
                result.push((l, r));
            }
        }
        result
    }

    /// One discount per history level for a model of the given order.
    pub fn discounts(&self, order: u32) -> Vec<f64> {
        vec![self.discount; order.max(1) as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_round_trips_through_toml() {
        let mut config = Config::default();
        config.ngram_order = 5;
        config.allow_empty_sides = false;
        let text = config.to_toml_string().unwrap();
        let back = Config::from_toml_str(&text).unwrap();
        assert_eq!(back.ngram_order, 5);
        assert!(!back.allow_empty_sides);
        assert_eq!(back.stack_limit, config.stack_limit);
    }

    #[test]
    fn size_templates_honor_the_empty_side_switch() {
        let mut config = Config::default();
        config.max_left_length = 1;
        config.max_right_length = 1;
        let mut with_empty = config.size_templates();
        with_empty.sort();
        assert_eq!(with_empty, vec![(0, 1), (1, 0), (1, 1)]);

        config.allow_empty_sides = false;
        assert_eq!(config.size_templates(), vec![(1, 1)]);
    }

    #[test]
    fn discounts_cover_every_level() {
        let config = Config::default();
        assert_eq!(config.discounts(3).len(), 3);
        assert_eq!(config.discounts(0).len(), 1);
    }
}
