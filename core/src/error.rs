//! Recoverable error types.
//!
//! Contract violations internal to the core (broken search invariants,
//! disagreeing lattice histories) are defects and assert instead; everything
//! here describes either a domain condition the caller must handle or
//! malformed caller input. All errors leave the reporting component in a
//! valid pre-call state.

use thiserror::Error;

/// Domain errors raised while building or re-syncing an estimation lattice.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EstimationError {
    /// No valid alignment exists for the pair under the current size
    /// templates and inventory.
    #[error("final node not reachable")]
    FinalNodeNotReachable,
    /// The alignment DFS revisited a node on its own stack. Cannot happen
    /// with strictly consuming size templates.
    #[error("cycle detected in alignment lattice")]
    CycleDetected,
}

/// Domain errors raised by the decoder.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranslationError {
    #[error("translation failed")]
    TranslationFailed,
    #[error("stack size limit exceeded")]
    StackLimitExceeded,
    #[error("no further translations")]
    NoFurtherTranslations,
}

/// Malformed caller input.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InputError {
    #[error("size template ({0}, {1}) out of range")]
    SizeTemplateOutOfRange(u32, u32),
    #[error("score {0} is not a non-negative log probability")]
    InvalidScore(f64),
    #[error("token 0 is reserved")]
    ReservedToken,
    #[error("vocabulary size must be positive")]
    InvalidVocabularySize,
    #[error("{provided} discounts provided but {required} levels are present")]
    MissingDiscount { provided: usize, required: usize },
}
