use crate::types::Phase;

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur while driving a game session
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Invalid phase transition from {from:?} to {to:?}")]
    InvalidTransition { from: Phase, to: Phase },

    #[error("No active round")]
    NoActiveRound,

    #[error("Answers are only accepted while playing (current phase: {0:?})")]
    NotAcceptingAnswers(Phase),

    #[error("Game already finished")]
    GameFinished,

    #[error("Failed to encode or decode message: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Transport closed")]
    TransportClosed,
}
