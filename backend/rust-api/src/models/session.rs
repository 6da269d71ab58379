use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::answer::AnswerRecord;
use super::question::QuestionView;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    InProgress,
    Paused,
    Completed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Paused => "paused",
            SessionStatus::Completed => "completed",
        }
    }

    /// In-progress and paused sessions both occupy the round slot.
    pub fn is_active(&self) -> bool {
        !matches!(self, SessionStatus::Completed)
    }

    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        matches!(
            (self, next),
            (SessionStatus::InProgress, SessionStatus::Paused)
                | (SessionStatus::InProgress, SessionStatus::Completed)
                | (SessionStatus::Paused, SessionStatus::InProgress)
                | (SessionStatus::Paused, SessionStatus::Completed)
        )
    }
}

/// Parameters a round's questions are generated with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub target_difficulty: f64,
    #[serde(default)]
    pub difficulty_delta: f64,
    #[serde(default)]
    pub priority_categories: Vec<String>,
    #[serde(default)]
    pub recurring_categories: Vec<String>,
    pub question_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundSession {
    pub id: String,
    pub owner_id: String,
    pub attempt_id: String,
    pub survey_id: String,
    pub round_index: u32,
    pub status: SessionStatus,
    pub question_count: u32,
    pub time_limit_secs: u32,
    pub params: GenerationParams,
    pub created_at: DateTime<Utc>,
    /// Set by the first answer write, not by creation.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// Set when a paused session is resumed; the time window restarts here.
    #[serde(default)]
    pub resumed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl RoundSession {
    /// Start of the currently running time window, if the clock is running at all.
    pub fn clock_started_at(&self) -> Option<DateTime<Utc>> {
        self.resumed_at.or(self.started_at)
    }

    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.clock_started_at()
            .map(|start| start + Duration::seconds(i64::from(self.time_limit_secs)))
    }

    /// Only in-progress sessions can time out.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == SessionStatus::InProgress
            && self.deadline().map(|deadline| now > deadline).unwrap_or(false)
    }

    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> u32 {
        match self.deadline() {
            Some(deadline) => (deadline - now).num_seconds().clamp(0, i64::from(u32::MAX)) as u32,
            None => self.time_limit_secs,
        }
    }
}

/// Input to the session service for persisting a new round.
#[derive(Debug, Clone)]
pub struct NewRound {
    pub owner_id: String,
    pub attempt_id: String,
    pub survey_id: String,
    pub round_index: u32,
    pub domain: String,
    pub params: GenerationParams,
    pub prior_answers: Vec<PriorAnswer>,
}

/// Previous round's answer handed to the generation agent for adaptive rounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorAnswer {
    pub question_id: String,
    pub category: String,
    pub prompt: String,
    pub raw_answer: Option<String>,
    pub is_correct: Option<bool>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct StartRoundRequest {
    #[validate(length(min = 1, max = 64, message = "attempt_id must be 1-64 characters"))]
    pub attempt_id: String,
    #[validate(length(min = 1, max = 64, message = "survey_id must be 1-64 characters"))]
    pub survey_id: String,
    #[serde(default = "default_round_index")]
    #[validate(range(min = 1, message = "round_index is 1-based"))]
    pub round_index: u32,
    pub question_count: Option<u32>,
    pub target_difficulty: Option<f64>,
    pub domain: Option<String>,
}

fn default_round_index() -> u32 {
    1
}

#[derive(Debug, Deserialize, Validate)]
pub struct AdaptiveRoundRequest {
    #[validate(length(min = 1, max = 64, message = "attempt_id must be 1-64 characters"))]
    pub attempt_id: String,
    #[validate(range(min = 1, message = "from_round is 1-based"))]
    pub from_round: u32,
    pub question_count: Option<u32>,
    pub domain: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StartRoundResponse {
    pub session_id: String,
    pub attempt_id: String,
    pub round_index: u32,
    pub status: SessionStatus,
    pub time_limit_seconds: u32,
    pub params: GenerationParams,
    pub questions: Vec<QuestionView>,
}

#[derive(Debug, Serialize)]
pub struct SessionView {
    pub session: RoundSession,
    pub questions: Vec<QuestionView>,
    pub answered_count: u32,
    pub remaining_seconds: u32,
}

#[derive(Debug, Serialize)]
pub struct ResumeState {
    pub session_id: String,
    pub status: SessionStatus,
    pub answered_count: u32,
    pub question_count: u32,
    /// Zero-based position of the first unanswered question; `None` when all are answered.
    pub next_question_index: Option<u32>,
    pub remaining_seconds: u32,
    pub answers: Vec<AnswerRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationIssue {
    AnsweredNotCompleted,
    ExpiredInProgress,
    CompletedWithoutResult,
}

#[derive(Debug, Serialize)]
pub struct SessionValidation {
    pub session_id: String,
    pub status: SessionStatus,
    pub answered_count: u32,
    pub question_count: u32,
    pub has_result: bool,
    pub issues: Vec<ValidationIssue>,
}

impl SessionValidation {
    pub fn is_consistent(&self) -> bool {
        self.issues.is_empty()
    }
}
