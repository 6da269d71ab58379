use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct RecordAnswerRequest {
    #[validate(length(min = 1, max = 64, message = "question_id must be 1-64 characters"))]
    pub question_id: String,
    #[validate(length(max = 10000, message = "answer must be at most 10000 characters"))]
    pub answer: String,
    #[serde(default)]
    pub latency_ms: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecordAnswerResponse {
    pub session_id: String,
    pub question_id: String,
    pub saved_at: DateTime<Utc>,
    /// False when a newer write for the same question already won.
    pub applied: bool,
    pub answered_count: u32,
}

/// Result of grading one answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradingOutcome {
    pub is_correct: bool,
    pub score: u8,
    /// Set when the answer could not be graded and was counted as incorrect.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marker: Option<String>,
    pub graded_at: DateTime<Utc>,
}

/// Answer Ledger entry, keyed by (session_id, question_id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerRecord {
    pub session_id: String,
    pub question_id: String,
    pub raw_answer: String,
    pub latency_ms: u64,
    pub saved_at: DateTime<Utc>,
    #[serde(default)]
    pub grading: Option<GradingOutcome>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerWrite {
    Applied,
    /// A write with a later `saved_at` is already stored.
    Stale,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScoreOutcome {
    pub session_id: String,
    pub question_id: String,
    pub is_correct: bool,
    pub score: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub marker: Option<String>,
    pub explanation: Option<String>,
}
