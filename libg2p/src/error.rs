//! Front-end error type.

use libgraphone_core::{EstimationError, InputError, TranslationError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum G2pError {
    #[error("lexicon line {line}: {message}")]
    Corpus { line: usize, message: String },
    #[error("symbol alphabet overflow: more than {0} distinct symbols")]
    AlphabetOverflow(usize),
    #[error("unknown grapheme {0:?}")]
    UnknownGrapheme(char),
    #[error("training corpus is empty or fully unalignable")]
    EmptyCorpus,
    #[error("unsupported model file version {0}")]
    ModelVersion(u32),
    #[error(transparent)]
    Input(#[from] InputError),
    #[error(transparent)]
    Estimation(#[from] EstimationError),
    #[error(transparent)]
    Translation(#[from] TranslationError),
}
