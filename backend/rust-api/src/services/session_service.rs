//! Lifecycle of round sessions: creation, autosave, scoring, completion,
//! timeout and resume.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::adaptive::AdaptiveController;
use super::attempt_aggregator::AttemptAggregator;
use super::grading::{grade_or_mark, Grader};
use super::question_generator::{generate_questions, GenerationRequest, QuestionGenerator};
use super::round_scorer::score_round;
use super::session_lock::SessionLocks;
use crate::config::AssessmentSettings;
use crate::error::{AssessmentError, AssessmentResult};
use crate::metrics::{
    ANSWERS_RECORDED_TOTAL, GENERATION_REQUESTS_TOTAL, ROUNDS_SCORED_TOTAL, ROUND_SESSIONS_ACTIVE,
    ROUND_SESSIONS_TOTAL, TIMEOUT_SWEEP_PAUSED_TOTAL,
};
use crate::models::{
    AdaptiveRoundRequest, AnswerRecord, AnswerWrite, NewRound, PriorAnswer, QuestionView,
    RecordAnswerRequest, RecordAnswerResponse, ResumeState, RoundCompleted, RoundResult,
    RoundSession, ScoreOutcome, SessionStatus, SessionValidation, SessionView, StartRoundRequest,
    StartRoundResponse, ValidationIssue,
};
use crate::store::AssessmentStore;
use crate::utils::ids::is_valid_id;

pub struct SessionService {
    store: Arc<dyn AssessmentStore>,
    generator: Arc<dyn QuestionGenerator>,
    grader: Arc<dyn Grader>,
    controller: AdaptiveController,
    aggregator: Arc<AttemptAggregator>,
    locks: SessionLocks,
    settings: AssessmentSettings,
}

fn check_id(field: &str, value: &str) -> AssessmentResult<()> {
    if is_valid_id(value) {
        Ok(())
    } else {
        Err(AssessmentError::validation(format!(
            "{} must match [A-Za-z0-9_-]{{1,64}}",
            field
        )))
    }
}

impl SessionService {
    pub fn new(
        store: Arc<dyn AssessmentStore>,
        generator: Arc<dyn QuestionGenerator>,
        grader: Arc<dyn Grader>,
        aggregator: Arc<AttemptAggregator>,
        locks: SessionLocks,
        settings: AssessmentSettings,
    ) -> Self {
        Self {
            store,
            generator,
            grader,
            controller: AdaptiveController::new(settings.clone()),
            aggregator,
            locks,
            settings,
        }
    }

    pub async fn session(&self, session_id: &str) -> AssessmentResult<RoundSession> {
        self.store
            .session(session_id)
            .await?
            .ok_or_else(|| AssessmentError::not_found(format!("session {}", session_id)))
    }

    /// Loads a session, pausing it first if its time window has closed.
    async fn session_fresh(&self, session_id: &str, now: DateTime<Utc>) -> AssessmentResult<RoundSession> {
        let session = self.session(session_id).await?;
        if !session.is_expired(now) {
            return Ok(session);
        }

        if self.store.pause_if_expired(session_id, now).await? {
            TIMEOUT_SWEEP_PAUSED_TOTAL.inc();
            tracing::info!("Session {} timed out on access, paused", session_id);
        }
        self.session(session_id).await
    }

    pub async fn start_round(
        &self,
        owner_id: &str,
        req: StartRoundRequest,
    ) -> AssessmentResult<StartRoundResponse> {
        check_id("attempt_id", &req.attempt_id)?;
        check_id("survey_id", &req.survey_id)?;
        if req.round_index == 0 {
            return Err(AssessmentError::validation("round_index is 1-based"));
        }
        if req.round_index > self.settings.expected_rounds {
            return Err(AssessmentError::validation(format!(
                "an attempt has {} rounds; round {} is out of range",
                self.settings.expected_rounds, req.round_index
            )));
        }

        let params = self
            .controller
            .initial_params(req.question_count, req.target_difficulty)?;

        self.create_round(NewRound {
            owner_id: owner_id.to_string(),
            attempt_id: req.attempt_id,
            survey_id: req.survey_id,
            round_index: req.round_index,
            domain: req
                .domain
                .unwrap_or_else(|| self.settings.default_domain.clone()),
            params,
            prior_answers: Vec::new(),
        })
        .await
    }

    /// Starts round `from_round + 1` with parameters derived from the scored rounds.
    pub async fn start_adaptive_round(
        &self,
        owner_id: &str,
        req: AdaptiveRoundRequest,
    ) -> AssessmentResult<StartRoundResponse> {
        check_id("attempt_id", &req.attempt_id)?;
        if req.from_round == 0 {
            return Err(AssessmentError::validation("from_round is 1-based"));
        }
        if req.from_round >= self.settings.expected_rounds {
            return Err(AssessmentError::validation(format!(
                "an attempt has {} rounds; round {} is the last one",
                self.settings.expected_rounds, req.from_round
            )));
        }

        let results = self
            .store
            .round_results_for_attempt(owner_id, &req.attempt_id)
            .await?;
        let params =
            self.controller
                .next_params(&req.attempt_id, &results, req.from_round, req.question_count)?;

        // next_params guarantees the source round has a result
        let source = results
            .iter()
            .find(|r| r.round_index == req.from_round)
            .ok_or_else(|| AssessmentError::MissingRoundResult {
                attempt_id: req.attempt_id.clone(),
                round_index: req.from_round,
            })?;

        let prior_answers = self.prior_answers(&source.session_id).await?;

        tracing::info!(
            "Adaptive round {} for attempt {}: difficulty {} (delta {}), priority {:?}",
            req.from_round + 1,
            req.attempt_id,
            params.target_difficulty,
            params.difficulty_delta,
            params.priority_categories
        );

        self.create_round(NewRound {
            owner_id: owner_id.to_string(),
            attempt_id: req.attempt_id,
            survey_id: source.survey_id.clone(),
            round_index: req.from_round + 1,
            domain: req
                .domain
                .unwrap_or_else(|| self.settings.default_domain.clone()),
            params,
            prior_answers,
        })
        .await
    }

    async fn prior_answers(&self, session_id: &str) -> AssessmentResult<Vec<PriorAnswer>> {
        let questions = self.store.questions(session_id).await?;
        let answers = self.store.answers(session_id).await?;

        Ok(questions
            .iter()
            .map(|question| {
                let answer = answers.iter().find(|a| a.question_id == question.id);
                PriorAnswer {
                    question_id: question.id.clone(),
                    category: question.category.clone(),
                    prompt: question.prompt.clone(),
                    raw_answer: answer.map(|a| a.raw_answer.clone()),
                    is_correct: answer
                        .and_then(|a| a.grading.as_ref())
                        .map(|g| g.is_correct),
                }
            })
            .collect())
    }

    async fn ensure_round_slot(&self, new: &NewRound) -> AssessmentResult<()> {
        let existing = self
            .store
            .sessions_for_attempt(&new.owner_id, &new.attempt_id)
            .await?;

        match existing.iter().max_by_key(|s| s.round_index) {
            Some(latest) if latest.round_index >= new.round_index => {
                Err(AssessmentError::conflict(format!(
                    "attempt {} already reached round {}; round index must increase",
                    new.attempt_id, latest.round_index
                )))
            }
            _ => Ok(()),
        }
    }

    async fn create_round(&self, new: NewRound) -> AssessmentResult<StartRoundResponse> {
        // Early check saves a generation call; the store re-checks on insert
        self.ensure_round_slot(&new).await?;

        let session_id = Uuid::new_v4().to_string();
        let request = GenerationRequest {
            session_id: session_id.clone(),
            attempt_id: new.attempt_id.clone(),
            round_index: new.round_index,
            domain: new.domain.clone(),
            question_count: new.params.question_count,
            params: new.params.clone(),
            prior_answers: new.prior_answers,
        };

        let generated = generate_questions(
            self.generator.as_ref(),
            &request,
            Duration::from_secs(self.settings.generator_timeout_secs),
            new.params.target_difficulty,
        )
        .await;

        let questions = match generated {
            Ok(questions) => {
                GENERATION_REQUESTS_TOTAL.with_label_values(&["success"]).inc();
                questions
            }
            Err(err) => {
                GENERATION_REQUESTS_TOTAL.with_label_values(&["error"]).inc();
                tracing::warn!(
                    "Question generation failed for attempt {} round {}: {}",
                    new.attempt_id,
                    new.round_index,
                    err
                );
                return Err(err);
            }
        };

        let now = Utc::now();
        let session = RoundSession {
            id: session_id.clone(),
            owner_id: new.owner_id.clone(),
            attempt_id: new.attempt_id.clone(),
            survey_id: new.survey_id.clone(),
            round_index: new.round_index,
            status: SessionStatus::InProgress,
            question_count: questions.len() as u32,
            time_limit_secs: self.settings.round_time_limit_secs,
            params: new.params.clone(),
            created_at: now,
            started_at: None,
            resumed_at: None,
            completed_at: None,
            updated_at: now,
        };

        self.store.create_round(&session, &questions).await?;

        ROUND_SESSIONS_TOTAL.with_label_values(&["created"]).inc();
        ROUND_SESSIONS_ACTIVE.inc();

        tracing::info!(
            "Round session created: {} (attempt {}, round {}) for owner: {}",
            session_id,
            new.attempt_id,
            new.round_index,
            new.owner_id
        );

        Ok(StartRoundResponse {
            session_id,
            attempt_id: session.attempt_id,
            round_index: session.round_index,
            status: session.status,
            time_limit_seconds: session.time_limit_secs,
            params: session.params,
            questions: questions.iter().map(QuestionView::from).collect(),
        })
    }

    /// Autosave: stores the raw answer, last write wins per question.
    pub async fn record_answer(
        &self,
        session_id: &str,
        req: RecordAnswerRequest,
    ) -> AssessmentResult<RecordAnswerResponse> {
        check_id("question_id", &req.question_id)?;
        let now = Utc::now();
        let session = self.session_fresh(session_id, now).await?;

        if session.status == SessionStatus::Completed {
            return Err(AssessmentError::invalid_state(format!(
                "session {} is completed",
                session_id
            )));
        }

        let record = AnswerRecord {
            session_id: session_id.to_string(),
            question_id: req.question_id.clone(),
            raw_answer: req.answer,
            latency_ms: req.latency_ms.unwrap_or(0),
            saved_at: now,
            grading: None,
        };

        let write = self.store.upsert_answer(&record).await?;
        if session.started_at.is_none() && self.store.mark_started(session_id, now).await? {
            tracing::info!("Session {} started by its first answer", session_id);
        }

        let applied = write == AnswerWrite::Applied;
        ANSWERS_RECORDED_TOTAL
            .with_label_values(&[if applied { "applied" } else { "stale" }])
            .inc();

        let answered_count = self.store.answers(session_id).await?.len() as u32;
        tracing::debug!(
            "Answer saved for session {} question {} (applied: {})",
            session_id,
            req.question_id,
            applied
        );

        Ok(RecordAnswerResponse {
            session_id: session_id.to_string(),
            question_id: req.question_id,
            saved_at: now,
            applied,
            answered_count,
        })
    }

    /// Grades one recorded answer; repeated calls return the stored outcome.
    pub async fn score_answer(
        &self,
        session_id: &str,
        question_id: &str,
    ) -> AssessmentResult<ScoreOutcome> {
        self.session(session_id).await?;

        let guard = self.locks.acquire(session_id).await?;
        let outcome = self.score_answer_locked(session_id, question_id).await;
        guard.release().await;
        outcome
    }

    async fn score_answer_locked(
        &self,
        session_id: &str,
        question_id: &str,
    ) -> AssessmentResult<ScoreOutcome> {
        let questions = self.store.questions(session_id).await?;
        let question = questions
            .iter()
            .find(|q| q.id == question_id)
            .ok_or_else(|| {
                AssessmentError::not_found(format!("question {} in session {}", question_id, session_id))
            })?;

        let answers = self.store.answers(session_id).await?;
        let answer = answers
            .iter()
            .find(|a| a.question_id == question_id)
            .ok_or_else(|| AssessmentError::not_found(format!("answer to question {}", question_id)))?;

        let outcome = match &answer.grading {
            Some(stored) => stored.clone(),
            None => {
                let outcome = grade_or_mark(
                    self.grader.as_ref(),
                    question,
                    &answer.raw_answer,
                    Utc::now(),
                );
                if !self
                    .store
                    .set_grading(session_id, question_id, answer.saved_at, &outcome)
                    .await?
                {
                    tracing::debug!(
                        "Answer {} in session {} changed while grading",
                        question_id,
                        session_id
                    );
                }
                outcome
            }
        };

        Ok(ScoreOutcome {
            session_id: session_id.to_string(),
            question_id: question_id.to_string(),
            is_correct: outcome.is_correct,
            score: outcome.score,
            marker: outcome.marker,
            explanation: Some(question.grading.explanation.clone())
                .filter(|explanation| !explanation.is_empty()),
        })
    }

    /// Completes and scores the round. Repeated calls return the stored result.
    pub async fn complete_round(&self, session_id: &str) -> AssessmentResult<RoundResult> {
        self.session(session_id).await?;

        let result = match self.store.round_result(session_id).await? {
            Some(existing) => {
                self.close_session(session_id, Utc::now()).await?;
                existing
            }
            None => {
                let guard = self.locks.acquire(session_id).await?;
                let scored = self.complete_round_locked(session_id).await;
                guard.release().await;
                scored?
            }
        };

        // Also on the cached path, so a retried completion heals a lost aggregation
        self.publish_completed(&result).await;
        Ok(result)
    }

    async fn complete_round_locked(&self, session_id: &str) -> AssessmentResult<RoundResult> {
        if let Some(existing) = self.store.round_result(session_id).await? {
            return Ok(existing);
        }

        let now = Utc::now();
        self.close_session(session_id, now).await?;

        let session = self.session(session_id).await?;
        if session.status != SessionStatus::Completed {
            return Err(AssessmentError::invalid_state(format!(
                "session {} could not be completed from {}",
                session_id,
                session.status.as_str()
            )));
        }

        let questions = self.store.questions(session_id).await?;
        let answers = self.store.answers(session_id).await?;
        let scored = score_round(&session, &questions, &answers, self.grader.as_ref(), now);

        for grading in &scored.gradings {
            self.store
                .set_grading(session_id, &grading.question_id, grading.saved_at, &grading.outcome)
                .await?;
        }

        let stored = self.store.insert_round_result(&scored.result).await?;
        if stored == scored.result {
            ROUNDS_SCORED_TOTAL.inc();
            tracing::info!(
                "Round {} of attempt {} scored: {} ({} / {})",
                stored.round_index,
                stored.attempt_id,
                stored.score,
                stored.correct_count,
                stored.total_count
            );
        }
        Ok(stored)
    }

    /// Moves an active session to `completed`; a no-op once it is there.
    async fn close_session(&self, session_id: &str, now: DateTime<Utc>) -> AssessmentResult<()> {
        let moved = self
            .store
            .transition(
                session_id,
                &[SessionStatus::InProgress, SessionStatus::Paused],
                SessionStatus::Completed,
                now,
            )
            .await?;
        if moved {
            ROUND_SESSIONS_TOTAL.with_label_values(&["completed"]).inc();
            ROUND_SESSIONS_ACTIVE.dec();
        }
        Ok(())
    }

    async fn publish_completed(&self, result: &RoundResult) {
        let event = RoundCompleted::from(result);
        if let Err(err) = self.aggregator.on_round_completed(&event).await {
            tracing::warn!(
                error = %err,
                "Attempt aggregation failed after round {} of attempt {}",
                event.round_index,
                event.attempt_id
            );
        }
    }

    /// Pauses every in-progress session whose time window has closed.
    pub async fn timeout_sweep(&self, now: DateTime<Utc>) -> AssessmentResult<usize> {
        let expired = self.store.expired_sessions(now).await?;
        let mut paused = 0;

        for session_id in &expired {
            if self.store.pause_if_expired(session_id, now).await? {
                paused += 1;
                TIMEOUT_SWEEP_PAUSED_TOTAL.inc();
                tracing::info!("Session {} timed out, paused", session_id);
            }
        }

        Ok(paused)
    }

    pub async fn resume(&self, session_id: &str) -> AssessmentResult<ResumeState> {
        let now = Utc::now();
        let mut session = self.session_fresh(session_id, now).await?;

        match session.status {
            SessionStatus::Completed => {
                return Err(AssessmentError::invalid_state(format!(
                    "session {} is completed",
                    session_id
                )))
            }
            SessionStatus::Paused => {
                if self.store.resume(session_id, now).await? {
                    tracing::info!("Session {} resumed", session_id);
                }
                session = self.session(session_id).await?;
                if session.status == SessionStatus::Completed {
                    return Err(AssessmentError::invalid_state(format!(
                        "session {} is completed",
                        session_id
                    )));
                }
            }
            SessionStatus::InProgress => {}
        }

        let questions = self.store.questions(session_id).await?;
        let answers = self.store.answers(session_id).await?;
        let answered: HashSet<&str> = answers.iter().map(|a| a.question_id.as_str()).collect();
        let next_question_index = questions
            .iter()
            .find(|q| !answered.contains(q.id.as_str()))
            .map(|q| q.position);

        Ok(ResumeState {
            session_id: session_id.to_string(),
            status: session.status,
            answered_count: answers.len() as u32,
            question_count: questions.len() as u32,
            next_question_index,
            remaining_seconds: session.remaining_seconds(now),
            answers,
        })
    }

    pub async fn get_session(&self, session_id: &str) -> AssessmentResult<SessionView> {
        let now = Utc::now();
        let session = self.session_fresh(session_id, now).await?;
        let questions = self.store.questions(session_id).await?;
        let answered_count = self.store.answers(session_id).await?.len() as u32;

        Ok(SessionView {
            remaining_seconds: session.remaining_seconds(now),
            session,
            questions: questions.iter().map(QuestionView::from).collect(),
            answered_count,
        })
    }

    /// Consistency report for one session; never mutates anything.
    pub async fn validate_session(&self, session_id: &str) -> AssessmentResult<SessionValidation> {
        let now = Utc::now();
        let session = self.session(session_id).await?;
        let questions = self.store.questions(session_id).await?;
        let answers = self.store.answers(session_id).await?;
        let has_result = self.store.round_result(session_id).await?.is_some();

        let mut issues = Vec::new();
        let all_answered = !questions.is_empty() && answers.len() == questions.len();
        if all_answered && session.status != SessionStatus::Completed {
            issues.push(ValidationIssue::AnsweredNotCompleted);
        }
        if session.is_expired(now) {
            issues.push(ValidationIssue::ExpiredInProgress);
        }
        if session.status == SessionStatus::Completed && !has_result {
            issues.push(ValidationIssue::CompletedWithoutResult);
        }

        Ok(SessionValidation {
            session_id: session_id.to_string(),
            status: session.status,
            answered_count: answers.len() as u32,
            question_count: questions.len() as u32,
            has_result,
            issues,
        })
    }
}
