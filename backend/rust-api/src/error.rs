//! Error taxonomy of the assessment engine.
//!
//! Services return [`AssessmentError`]; the HTTP layer maps each variant to a
//! status code in `handlers::ApiError`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AssessmentError {
    /// Duplicate active round, or a round index that does not advance the attempt.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Mutation attempted on a completed session.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Adaptive generation requested without a scored prior round.
    #[error("round {round_index} of attempt {attempt_id} has no result")]
    MissingRoundResult { attempt_id: String, round_index: u32 },

    #[error("{0} not found")]
    NotFound(String),

    /// Malformed identifiers or out-of-range counts.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The question generation agent failed, timed out or returned a bad batch.
    #[error("question generation unavailable: {0}")]
    GenerationUnavailable(String),

    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl AssessmentError {
    pub fn not_found(what: impl Into<String>) -> Self {
        AssessmentError::NotFound(what.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        AssessmentError::Conflict(message.into())
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        AssessmentError::InvalidState(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        AssessmentError::Validation(message.into())
    }

    /// Metric label for the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            AssessmentError::Conflict(_) => "conflict",
            AssessmentError::InvalidState(_) => "invalid_state",
            AssessmentError::MissingRoundResult { .. } => "missing_round_result",
            AssessmentError::NotFound(_) => "not_found",
            AssessmentError::Validation(_) => "validation",
            AssessmentError::GenerationUnavailable(_) => "generation_unavailable",
            AssessmentError::Storage(_) => "storage",
        }
    }
}

pub type AssessmentResult<T> = Result<T, AssessmentError>;
