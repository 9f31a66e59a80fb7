//! Batch EM training of a grapheme-to-phoneme model.
//!
//! The driver around the core estimation pipeline:
//!
//! 1. a discovery pass in emerge mode populates the multigram inventory and
//!    weeds out unalignable entries,
//! 2. a flat start counts alignment support with the one-for-all
//!    accumulator and estimates a first unigram model,
//! 3. per n-gram order, forward-backward EM iterations run to convergence,
//!    with the model ramped up by one context level between orders.
//!
//! The reserved init/term tokens are chosen right above the discovered
//! inventory, which stays frozen after the discovery pass (later passes run
//! in suppress mode).

use crate::error::G2pError;
use crate::symbols::SymbolInventory;
use crate::G2pModel;
use libgraphone_core::{
    Config, EmergenceMode, EstimationGraphBuilder, EvidenceStore, ForwardBackwardAccumulator,
    LogProbability, ModelEntry, MultigramInventory, OneForAllAccumulator, SequenceModel, Symbol,
    Token,
};
use std::collections::HashSet;
use tracing::{debug, info, warn};

pub struct Trainer {
    config: Config,
    graphemes: SymbolInventory,
    phonemes: SymbolInventory,
    pairs: Vec<(Vec<Symbol>, Vec<Symbol>)>,
}

impl Trainer {
    pub fn new(config: Config) -> Self {
        Trainer {
            config,
            graphemes: SymbolInventory::new(),
            phonemes: SymbolInventory::new(),
            pairs: Vec::new(),
        }
    }

    /// Adds one training pair; the word is split into characters, the
    /// pronunciation is taken as given.
    pub fn add_entry(&mut self, word: &str, phonemes: &[String]) -> Result<(), G2pError> {
        let mut left = Vec::with_capacity(word.chars().count());
        for c in word.chars() {
            left.push(self.graphemes.find_or_add(&c.to_string())?);
        }
        let mut right = Vec::with_capacity(phonemes.len());
        for p in phonemes {
            right.push(self.phonemes.find_or_add(p)?);
        }
        self.pairs.push((left, right));
        Ok(())
    }

    pub fn add_lexicon(&mut self, entries: &[crate::corpus::LexiconEntry]) -> Result<(), G2pError> {
        for entry in entries {
            self.add_entry(&entry.word, &entry.phonemes)?;
        }
        Ok(())
    }

    pub fn pair_count(&self) -> usize {
        self.pairs.len()
    }

    pub fn train(mut self) -> Result<G2pModel, G2pError> {
        let mut builder = EstimationGraphBuilder::new();
        for (l, r) in self.config.size_templates() {
            builder.add_size_template(l, r)?;
        }
        let mut inventory = MultigramInventory::new();

        // discovery: populate the inventory and drop unalignable entries
        builder.set_emergence_mode(EmergenceMode::Emerge);
        let probe = SequenceModel::new();
        let mut usable = Vec::with_capacity(self.pairs.len());
        for (i, (left, right)) in self.pairs.iter().enumerate() {
            match builder.create(&mut inventory, &probe, left, right) {
                Ok(_) => usable.push(i),
                Err(_) => warn!(
                    pair = i,
                    left = left.len(),
                    right = right.len(),
                    "entry has no alignment under the size templates, skipping"
                ),
            }
        }
        if usable.is_empty() {
            return Err(G2pError::EmptyCorpus);
        }
        let kept: Vec<_> = usable.into_iter().map(|i| self.pairs[i].clone()).collect();
        self.pairs = kept;
        builder.set_emergence_mode(EmergenceMode::Suppress);

        let init = inventory.size() as Token + 1;
        let term = inventory.size() as Token + 2;
        let vocabulary = inventory.size() as u32 + 1;
        info!(
            pairs = self.pairs.len(),
            multigrams = inventory.size(),
            "discovery finished"
        );

        // flat start: uniform support counts, estimated as a unigram
        let mut flat = SequenceModel::new();
        flat.set_init_and_term(init, term);
        let mut store = EvidenceStore::new();
        let counter = OneForAllAccumulator::new();
        for (left, right) in &self.pairs {
            let eg = builder.create(&mut inventory, &flat, left, right)?;
            counter.accumulate(&eg, LogProbability::certain(), &mut store);
        }
        let mut model = store
            .make_sequence_model_estimator(&flat)
            .make_sequence_model(vocabulary, &self.config.discounts(1))?;

        for order in 1..=self.config.ngram_order {
            if order > 1 {
                model = ramp_up(&model, init, term)?;
            }
            let mut last_score = f64::INFINITY;
            for iteration in 0..self.config.em_iterations {
                let mut store = EvidenceStore::new();
                let mut score = 0.0;
                for (left, right) in &self.pairs {
                    let eg = builder.create(&mut inventory, &model, left, right)?;
                    let fb = ForwardBackwardAccumulator::new(&eg);
                    score += fb.log_lik().score();
                    fb.accumulate(&eg, LogProbability::certain(), &mut store);
                }
                model = store
                    .make_sequence_model_estimator(&model)
                    .make_sequence_model(vocabulary, &self.config.discounts(order))?;
                info!(order, iteration, score, "EM iteration");
                if (last_score - score).abs() <= self.config.convergence_threshold * score.abs() {
                    debug!(order, iteration, "converged");
                    break;
                }
                last_score = score;
            }
        }

        Ok(G2pModel {
            graphemes: self.graphemes,
            phonemes: self.phonemes,
            inventory,
            model,
        })
    }
}

/// Extends every predicted context of the model by one level, with back-off
/// weight 1, so the next EM pass can collect evidence one order higher while
/// all probabilities stay exactly as they were. The sentence-begin context
/// is seeded explicitly since the init token is never predicted.
fn ramp_up(model: &SequenceModel, init: Token, term: Token) -> Result<SequenceModel, G2pError> {
    let mut entries = model.get();
    let mut seen: HashSet<Vec<Token>> = entries
        .iter()
        .filter(|e| e.token.is_none())
        .map(|e| e.history.clone())
        .collect();
    let mut extended = Vec::new();
    if seen.insert(vec![init]) {
        extended.push(ModelEntry {
            history: vec![init],
            token: None,
            score: 0.0,
        });
    }
    for e in &entries {
        let Some(t) = e.token else { continue };
        if t == term {
            continue;
        }
        let mut history = e.history.clone();
        history.push(t);
        if seen.insert(history.clone()) {
            extended.push(ModelEntry {
                history,
                token: None,
                score: 0.0,
            });
        }
    }
    entries.extend(extended);
    let mut ramped = SequenceModel::new();
    ramped.set_init_and_term(init, term);
    ramped.set(&entries)?;
    Ok(ramped)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_config() -> Config {
        let mut config = Config::default();
        config.ngram_order = 2;
        config.em_iterations = 4;
        config.allow_empty_sides = false;
        config.max_left_length = 2;
        config.max_right_length = 2;
        config
    }

    #[test]
    fn ramp_up_preserves_probabilities_and_deepens_contexts() {
        let mut model = SequenceModel::new();
        model.set_init_and_term(8, 9);
        model
            .set(&[
                ModelEntry {
                    history: vec![],
                    token: None,
                    score: -0.1f64.ln(),
                },
                ModelEntry {
                    history: vec![],
                    token: Some(1),
                    score: -0.6f64.ln(),
                },
                ModelEntry {
                    history: vec![],
                    token: Some(9),
                    score: -0.3f64.ln(),
                },
            ])
            .unwrap();

        let ramped = ramp_up(&model, 8, 9).unwrap();
        // queries are unchanged
        let h = ramped.advanced(ramped.initial(), 1);
        assert_eq!(
            ramped.probability(1, h).score(),
            model.probability(1, model.initial()).score()
        );
        // but the state space got deeper: [8] and [1] now exist
        assert_eq!(ramped.history_length(ramped.initial()), 1);
        assert_eq!(ramped.history_length(h), 1);
        // term spawned no context
        let after_term = ramped.get().iter().any(|e| e.history == vec![9]);
        assert!(!after_term);
    }

    #[test]
    fn trains_a_tiny_reduplication_lexicon() {
        let mut trainer = Trainer::new(tiny_config());
        for _ in 0..3 {
            trainer
                .add_entry("ab", &["A".to_string(), "B".to_string()])
                .unwrap();
            trainer.add_entry("a", &["A".to_string()]).unwrap();
            trainer.add_entry("b", &["B".to_string()]).unwrap();
        }
        assert_eq!(trainer.pair_count(), 9);
        let model = trainer.train().unwrap();
        assert!(model.inventory.size() >= 2);
        assert_eq!(model.graphemes.size(), 2);
        assert_eq!(model.phonemes.size(), 2);
    }

    #[test]
    fn unalignable_entries_are_skipped_not_fatal() {
        let mut config = tiny_config();
        config.max_left_length = 1;
        config.max_right_length = 1;
        let mut trainer = Trainer::new(config);
        trainer.add_entry("a", &["A".to_string()]).unwrap();
        // 1 grapheme cannot cover 3 phonemes with 1:1 templates
        trainer
            .add_entry("x", &["X".to_string(), "Y".to_string(), "Z".to_string()])
            .unwrap();
        let model = trainer.train().unwrap();
        // discovery still emerges (x)/(X) before the dead end
        assert_eq!(model.inventory.size(), 2);
    }

    #[test]
    fn empty_corpus_is_an_error() {
        let trainer = Trainer::new(tiny_config());
        assert!(matches!(trainer.train(), Err(G2pError::EmptyCorpus)));
    }
}
