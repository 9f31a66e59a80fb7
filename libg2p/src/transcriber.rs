//! Applying a trained model to words.

use crate::error::G2pError;
use crate::G2pModel;
use libgraphone_core::{MultigramIndex, Symbol, TranslationError, Translator};

/// A scored pronunciation; the score is the negative natural log of the
/// path probability.
#[derive(Debug, Clone, PartialEq)]
pub struct Pronunciation {
    pub phonemes: Vec<String>,
    pub score: f64,
}

pub struct Transcriber {
    model: G2pModel,
    translator: Translator,
}

impl Transcriber {
    pub fn new(model: G2pModel) -> Self {
        let mut translator = Translator::new();
        translator.set_multigram_inventory(&model.inventory);
        Transcriber { model, translator }
    }

    pub fn model(&self) -> &G2pModel {
        &self.model
    }

    /// Bounds the decoder's open queue.
    pub fn set_stack_limit(&mut self, limit: u32) {
        self.translator.set_stack_limit(limit);
    }

    /// The single most probable pronunciation.
    pub fn transcribe(&mut self, word: &str) -> Result<Pronunciation, G2pError> {
        let left = self.encode(word)?;
        let (p, indices) = self.translator.translate(&self.model.model, &left)?;
        Ok(self.pronunciation(p.score(), &indices))
    }

    /// Up to `n` pronunciations in non-increasing probability order; fewer
    /// if the model exhausts first.
    pub fn transcribe_n_best(&mut self, word: &str, n: usize) -> Result<Vec<Pronunciation>, G2pError> {
        let left = self.encode(word)?;
        let mut context = self.translator.n_best_init(&self.model.model, &left)?;
        let mut result = Vec::new();
        while result.len() < n {
            match self.translator.n_best_next(&mut context) {
                Ok((p, indices)) => result.push(self.pronunciation(p.score(), &indices)),
                Err(TranslationError::NoFurtherTranslations) => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(result)
    }

    fn encode(&self, word: &str) -> Result<Vec<Symbol>, G2pError> {
        word.chars()
            .map(|c| {
                self.model
                    .graphemes
                    .index(&c.to_string())
                    .ok_or(G2pError::UnknownGrapheme(c))
            })
            .collect()
    }

    fn pronunciation(&self, score: f64, indices: &[MultigramIndex]) -> Pronunciation {
        let mut phonemes = Vec::new();
        for &q in indices {
            for &s in self.model.inventory.symbol(q).right.symbols() {
                phonemes.push(self.model.phonemes.symbol(s).to_string());
            }
        }
        Pronunciation { phonemes, score }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trainer::Trainer;
    use libgraphone_core::Config;

    fn trained() -> Transcriber {
        let mut config = Config::default();
        config.ngram_order = 2;
        config.em_iterations = 3;
        config.allow_empty_sides = false;
        let mut trainer = Trainer::new(config);
        for _ in 0..3 {
            trainer
                .add_entry("ab", &["A".to_string(), "B".to_string()])
                .unwrap();
            trainer.add_entry("a", &["A".to_string()]).unwrap();
            trainer.add_entry("ba", &["B".to_string(), "A".to_string()]).unwrap();
        }
        Transcriber::new(trainer.train().unwrap())
    }

    #[test]
    fn reproduces_training_pronunciations() {
        let mut transcriber = trained();
        assert_eq!(transcriber.transcribe("a").unwrap().phonemes, vec!["A"]);
        assert_eq!(
            transcriber.transcribe("ab").unwrap().phonemes,
            vec!["A", "B"]
        );
        assert_eq!(
            transcriber.transcribe("ba").unwrap().phonemes,
            vec!["B", "A"]
        );
    }

    #[test]
    fn generalizes_to_unseen_words() {
        let mut transcriber = trained();
        // "aba" was never seen but is covered by the learned multigrams
        let result = transcriber.transcribe("aba").unwrap();
        assert_eq!(result.phonemes, vec!["A", "B", "A"]);
    }

    #[test]
    fn n_best_is_ordered_and_bounded() {
        let mut transcriber = trained();
        let results = transcriber.transcribe_n_best("ab", 5).unwrap();
        assert!(!results.is_empty());
        assert!(results.len() <= 5);
        for pair in results.windows(2) {
            assert!(pair[0].score <= pair[1].score);
        }
        assert_eq!(results[0].phonemes, vec!["A", "B"]);
    }

    #[test]
    fn unknown_grapheme_is_an_input_error() {
        let mut transcriber = trained();
        assert!(matches!(
            transcriber.transcribe("aq"),
            Err(G2pError::UnknownGrapheme('q'))
        ));
    }
}
