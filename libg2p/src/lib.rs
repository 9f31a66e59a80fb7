//! libg2p
//!
//! Grapheme-to-phoneme conversion built on `libgraphone-core`: training a
//! joint multigram model from a pronunciation lexicon, persisting it, and
//! transcribing words with it.
//!
//! Public API:
//! - `Trainer` - batch EM training from (word, pronunciation) pairs
//! - `Transcriber` - single best and N-best pronunciation of words
//! - `G2pModel` - the trained artifact combining all components
//! - `ModelFile` - bincode persistence of a `G2pModel`
//! - `read_lexicon` / `parse_lexicon` - plain-text lexicon input
//! - `edit_distance` - evaluation helper

use libgraphone_core::{MultigramInventory, SequenceModel};

pub mod error;
pub use error::G2pError;

pub mod symbols;
pub use symbols::SymbolInventory;

pub mod corpus;
pub use corpus::{parse_lexicon, read_lexicon, LexiconEntry};

pub mod trainer;
pub use trainer::Trainer;

pub mod transcriber;
pub use transcriber::{Pronunciation, Transcriber};

pub mod model_file;
pub use model_file::{ModelFile, MODEL_FILE_VERSION};

pub mod edit_distance;
pub use edit_distance::edit_distance;

/// A trained grapheme-to-phoneme model: the two symbol alphabets, the joint
/// multigram inventory over them, and the sequence model scoring multigram
/// strings.
#[derive(Debug, Clone)]
pub struct G2pModel {
    pub graphemes: SymbolInventory,
    pub phonemes: SymbolInventory,
    pub inventory: MultigramInventory,
    pub model: SequenceModel,
}
