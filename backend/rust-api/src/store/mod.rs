//! Persistence contract of the assessment engine.
//!
//! A round session owns its questions and its answer ledger, so every store
//! keeps them together with the session and applies ledger writes atomically
//! with the session-status check. Every status change is a compare-and-set on
//! the current status; round results and attempts are insert-if-absent.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::AssessmentResult;
use crate::models::{
    AnswerRecord, AnswerWrite, Attempt, GradingOutcome, Question, RankingUpdate, RoundResult,
    RoundSession, SessionStatus,
};

pub mod memory;
pub mod mongo;

pub use memory::MemoryStore;
pub use mongo::MongoStore;

#[async_trait]
pub trait AssessmentStore: Send + Sync {
    /// Backend name reported by the health check.
    fn backend(&self) -> &'static str;

    async fn ping(&self) -> AssessmentResult<()>;

    /// Persists a session together with its full question batch.
    ///
    /// Fails with `Conflict` when the owner already has a session of this
    /// attempt at the same or a later round index.
    async fn create_round(
        &self,
        session: &RoundSession,
        questions: &[Question],
    ) -> AssessmentResult<()>;

    async fn session(&self, session_id: &str) -> AssessmentResult<Option<RoundSession>>;

    async fn sessions_for_attempt(
        &self,
        owner_id: &str,
        attempt_id: &str,
    ) -> AssessmentResult<Vec<RoundSession>>;

    /// Questions of a session ordered by position.
    async fn questions(&self, session_id: &str) -> AssessmentResult<Vec<Question>>;

    async fn answers(&self, session_id: &str) -> AssessmentResult<Vec<AnswerRecord>>;

    /// Sets `started_at` unless it is already set or the session is completed.
    async fn mark_started(&self, session_id: &str, at: DateTime<Utc>) -> AssessmentResult<bool>;

    /// Upserts one ledger entry, last write wins on `saved_at`.
    ///
    /// Fails with `InvalidState` when the session is completed and with
    /// `NotFound` when the session or the question does not exist.
    async fn upsert_answer(&self, record: &AnswerRecord) -> AssessmentResult<AnswerWrite>;

    /// Attaches a grading outcome to the answer that was saved at `saved_at`.
    /// Returns false if the answer is already graded or was overwritten since.
    async fn set_grading(
        &self,
        session_id: &str,
        question_id: &str,
        saved_at: DateTime<Utc>,
        outcome: &GradingOutcome,
    ) -> AssessmentResult<bool>;

    /// Moves the session to `to` only if its status is one of `from`.
    async fn transition(
        &self,
        session_id: &str,
        from: &[SessionStatus],
        to: SessionStatus,
        at: DateTime<Utc>,
    ) -> AssessmentResult<bool>;

    /// `paused -> in_progress`, restarting the time window at `at`.
    async fn resume(&self, session_id: &str, at: DateTime<Utc>) -> AssessmentResult<bool>;

    /// Ids of in-progress sessions whose time window closed before `now`.
    async fn expired_sessions(&self, now: DateTime<Utc>) -> AssessmentResult<Vec<String>>;

    /// `in_progress -> paused`, only if the session is still expired at `now`.
    async fn pause_if_expired(&self, session_id: &str, now: DateTime<Utc>)
        -> AssessmentResult<bool>;

    /// Stores the result unless one exists; returns the stored result either way.
    async fn insert_round_result(&self, result: &RoundResult) -> AssessmentResult<RoundResult>;

    async fn round_result(&self, session_id: &str) -> AssessmentResult<Option<RoundResult>>;

    async fn round_results_for_attempt(
        &self,
        owner_id: &str,
        attempt_id: &str,
    ) -> AssessmentResult<Vec<RoundResult>>;

    async fn round_results_for_owner(&self, owner_id: &str) -> AssessmentResult<Vec<RoundResult>>;

    /// Stores the attempt unless one exists for (owner, attempt id).
    /// Returns the stored attempt and whether this call created it.
    async fn create_attempt(&self, attempt: &Attempt) -> AssessmentResult<(Attempt, bool)>;

    async fn attempt(&self, owner_id: &str, attempt_id: &str) -> AssessmentResult<Option<Attempt>>;

    async fn attempts_for_survey(&self, survey_id: &str) -> AssessmentResult<Vec<Attempt>>;

    async fn attempts_for_owner(&self, owner_id: &str) -> AssessmentResult<Vec<Attempt>>;

    async fn survey_ids(&self) -> AssessmentResult<Vec<String>>;

    async fn apply_rankings(
        &self,
        updates: &[RankingUpdate],
        at: DateTime<Utc>,
    ) -> AssessmentResult<()>;
}
