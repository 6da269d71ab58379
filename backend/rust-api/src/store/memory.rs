use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::AssessmentStore;
use crate::error::{AssessmentError, AssessmentResult};
use crate::models::{
    AnswerRecord, AnswerWrite, Attempt, GradingOutcome, Question, RankingUpdate, RoundResult,
    RoundSession, SessionStatus,
};

struct SessionEntry {
    session: RoundSession,
    questions: Vec<Question>,
    answers: HashMap<String, AnswerRecord>,
}

#[derive(Default)]
struct State {
    sessions: HashMap<String, SessionEntry>,
    results: HashMap<String, RoundResult>,
    attempts: HashMap<(String, String), Attempt>,
}

/// Process-local store; one lock over all maps keeps every operation atomic.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn check_round_slot(state: &State, session: &RoundSession) -> AssessmentResult<()> {
    if state.sessions.contains_key(&session.id) {
        return Err(AssessmentError::conflict(format!(
            "session {} already exists",
            session.id
        )));
    }

    let blocking = state.sessions.values().map(|e| &e.session).find(|existing| {
        existing.owner_id == session.owner_id
            && existing.attempt_id == session.attempt_id
            && existing.round_index >= session.round_index
    });

    match blocking {
        Some(existing) if existing.round_index == session.round_index && existing.status.is_active() => {
            Err(AssessmentError::conflict(format!(
                "round {} of attempt {} already has an active session ({})",
                session.round_index, session.attempt_id, existing.id
            )))
        }
        Some(existing) => Err(AssessmentError::conflict(format!(
            "attempt {} already reached round {}; round index must increase",
            session.attempt_id, existing.round_index
        ))),
        None => Ok(()),
    }
}

#[async_trait]
impl AssessmentStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> AssessmentResult<()> {
        Ok(())
    }

    async fn create_round(
        &self,
        session: &RoundSession,
        questions: &[Question],
    ) -> AssessmentResult<()> {
        let mut state = self.state.write().await;
        check_round_slot(&state, session)?;

        let mut questions = questions.to_vec();
        questions.sort_by_key(|q| q.position);
        state.sessions.insert(
            session.id.clone(),
            SessionEntry {
                session: session.clone(),
                questions,
                answers: HashMap::new(),
            },
        );
        Ok(())
    }

    async fn session(&self, session_id: &str) -> AssessmentResult<Option<RoundSession>> {
        let state = self.state.read().await;
        Ok(state.sessions.get(session_id).map(|e| e.session.clone()))
    }

    async fn sessions_for_attempt(
        &self,
        owner_id: &str,
        attempt_id: &str,
    ) -> AssessmentResult<Vec<RoundSession>> {
        let state = self.state.read().await;
        let mut sessions: Vec<RoundSession> = state
            .sessions
            .values()
            .filter(|e| e.session.owner_id == owner_id && e.session.attempt_id == attempt_id)
            .map(|e| e.session.clone())
            .collect();
        sessions.sort_by_key(|s| s.round_index);
        Ok(sessions)
    }

    async fn questions(&self, session_id: &str) -> AssessmentResult<Vec<Question>> {
        let state = self.state.read().await;
        Ok(state
            .sessions
            .get(session_id)
            .map(|e| e.questions.clone())
            .unwrap_or_default())
    }

    async fn answers(&self, session_id: &str) -> AssessmentResult<Vec<AnswerRecord>> {
        let state = self.state.read().await;
        let Some(entry) = state.sessions.get(session_id) else {
            return Ok(Vec::new());
        };

        // Ledger order follows question order
        Ok(entry
            .questions
            .iter()
            .filter_map(|q| entry.answers.get(&q.id).cloned())
            .collect())
    }

    async fn mark_started(&self, session_id: &str, at: DateTime<Utc>) -> AssessmentResult<bool> {
        let mut state = self.state.write().await;
        let entry = state
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| AssessmentError::not_found(format!("session {}", session_id)))?;

        if entry.session.started_at.is_some() || entry.session.status == SessionStatus::Completed {
            return Ok(false);
        }
        entry.session.started_at = Some(at);
        entry.session.updated_at = at;
        Ok(true)
    }

    async fn upsert_answer(&self, record: &AnswerRecord) -> AssessmentResult<AnswerWrite> {
        let mut state = self.state.write().await;
        let entry = state
            .sessions
            .get_mut(&record.session_id)
            .ok_or_else(|| AssessmentError::not_found(format!("session {}", record.session_id)))?;

        if entry.session.status == SessionStatus::Completed {
            return Err(AssessmentError::invalid_state(format!(
                "session {} is completed",
                record.session_id
            )));
        }
        if !entry.questions.iter().any(|q| q.id == record.question_id) {
            return Err(AssessmentError::not_found(format!(
                "question {} in session {}",
                record.question_id, record.session_id
            )));
        }

        let mut stored = record.clone();
        if let Some(existing) = entry.answers.get(&record.question_id) {
            if existing.saved_at > record.saved_at {
                return Ok(AnswerWrite::Stale);
            }
            if existing.raw_answer == record.raw_answer && stored.grading.is_none() {
                stored.grading = existing.grading.clone();
            }
        }

        entry.session.updated_at = record.saved_at;
        entry.answers.insert(record.question_id.clone(), stored);
        Ok(AnswerWrite::Applied)
    }

    async fn set_grading(
        &self,
        session_id: &str,
        question_id: &str,
        saved_at: DateTime<Utc>,
        outcome: &GradingOutcome,
    ) -> AssessmentResult<bool> {
        let mut state = self.state.write().await;
        let answer = state
            .sessions
            .get_mut(session_id)
            .and_then(|e| e.answers.get_mut(question_id));

        match answer {
            Some(answer) if answer.saved_at == saved_at && answer.grading.is_none() => {
                answer.grading = Some(outcome.clone());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn transition(
        &self,
        session_id: &str,
        from: &[SessionStatus],
        to: SessionStatus,
        at: DateTime<Utc>,
    ) -> AssessmentResult<bool> {
        let mut state = self.state.write().await;
        let entry = state
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| AssessmentError::not_found(format!("session {}", session_id)))?;

        let current = entry.session.status;
        if !from.contains(&current) || !current.can_transition_to(to) {
            return Ok(false);
        }

        entry.session.status = to;
        entry.session.updated_at = at;
        if to == SessionStatus::Completed {
            entry.session.completed_at = Some(at);
        }
        Ok(true)
    }

    async fn resume(&self, session_id: &str, at: DateTime<Utc>) -> AssessmentResult<bool> {
        let mut state = self.state.write().await;
        let entry = state
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| AssessmentError::not_found(format!("session {}", session_id)))?;

        if entry.session.status != SessionStatus::Paused {
            return Ok(false);
        }
        entry.session.status = SessionStatus::InProgress;
        entry.session.resumed_at = Some(at);
        entry.session.updated_at = at;
        Ok(true)
    }

    async fn expired_sessions(&self, now: DateTime<Utc>) -> AssessmentResult<Vec<String>> {
        let state = self.state.read().await;
        Ok(state
            .sessions
            .values()
            .filter(|e| e.session.is_expired(now))
            .map(|e| e.session.id.clone())
            .collect())
    }

    async fn pause_if_expired(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> AssessmentResult<bool> {
        let mut state = self.state.write().await;
        let Some(entry) = state.sessions.get_mut(session_id) else {
            return Ok(false);
        };

        if !entry.session.is_expired(now) {
            return Ok(false);
        }
        entry.session.status = SessionStatus::Paused;
        entry.session.updated_at = now;
        Ok(true)
    }

    async fn insert_round_result(&self, result: &RoundResult) -> AssessmentResult<RoundResult> {
        let mut state = self.state.write().await;
        Ok(state
            .results
            .entry(result.session_id.clone())
            .or_insert_with(|| result.clone())
            .clone())
    }

    async fn round_result(&self, session_id: &str) -> AssessmentResult<Option<RoundResult>> {
        let state = self.state.read().await;
        Ok(state.results.get(session_id).cloned())
    }

    async fn round_results_for_attempt(
        &self,
        owner_id: &str,
        attempt_id: &str,
    ) -> AssessmentResult<Vec<RoundResult>> {
        let state = self.state.read().await;
        let mut results: Vec<RoundResult> = state
            .results
            .values()
            .filter(|r| r.owner_id == owner_id && r.attempt_id == attempt_id)
            .cloned()
            .collect();
        results.sort_by_key(|r| r.round_index);
        Ok(results)
    }

    async fn round_results_for_owner(&self, owner_id: &str) -> AssessmentResult<Vec<RoundResult>> {
        let state = self.state.read().await;
        let mut results: Vec<RoundResult> = state
            .results
            .values()
            .filter(|r| r.owner_id == owner_id)
            .cloned()
            .collect();
        results.sort_by(|a, b| {
            a.attempt_id
                .cmp(&b.attempt_id)
                .then(a.round_index.cmp(&b.round_index))
        });
        Ok(results)
    }

    async fn create_attempt(&self, attempt: &Attempt) -> AssessmentResult<(Attempt, bool)> {
        let mut state = self.state.write().await;
        let key = (attempt.owner_id.clone(), attempt.attempt_id.clone());
        if let Some(existing) = state.attempts.get(&key) {
            return Ok((existing.clone(), false));
        }
        state.attempts.insert(key, attempt.clone());
        Ok((attempt.clone(), true))
    }

    async fn attempt(&self, owner_id: &str, attempt_id: &str) -> AssessmentResult<Option<Attempt>> {
        let state = self.state.read().await;
        Ok(state
            .attempts
            .get(&(owner_id.to_string(), attempt_id.to_string()))
            .cloned())
    }

    async fn attempts_for_survey(&self, survey_id: &str) -> AssessmentResult<Vec<Attempt>> {
        let state = self.state.read().await;
        Ok(state
            .attempts
            .values()
            .filter(|a| a.survey_id == survey_id)
            .cloned()
            .collect())
    }

    async fn attempts_for_owner(&self, owner_id: &str) -> AssessmentResult<Vec<Attempt>> {
        let state = self.state.read().await;
        let mut attempts: Vec<Attempt> = state
            .attempts
            .values()
            .filter(|a| a.owner_id == owner_id)
            .cloned()
            .collect();
        attempts.sort_by_key(|a| a.created_at);
        Ok(attempts)
    }

    async fn survey_ids(&self) -> AssessmentResult<Vec<String>> {
        let state = self.state.read().await;
        let ids: BTreeSet<String> = state.attempts.values().map(|a| a.survey_id.clone()).collect();
        Ok(ids.into_iter().collect())
    }

    async fn apply_rankings(
        &self,
        updates: &[RankingUpdate],
        at: DateTime<Utc>,
    ) -> AssessmentResult<()> {
        let mut state = self.state.write().await;
        for update in updates {
            let key = (update.owner_id.clone(), update.attempt_id.clone());
            if let Some(attempt) = state.attempts.get_mut(&key) {
                attempt.rank = Some(update.rank);
                attempt.percentile = Some(update.percentile);
                attempt.ranked_at = Some(at);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CorrectnessSpec, GenerationParams, GradingSchema, QuestionType};
    use chrono::Duration;

    fn session(id: &str, round_index: u32) -> RoundSession {
        let now = Utc::now();
        RoundSession {
            id: id.to_string(),
            owner_id: "owner".to_string(),
            attempt_id: "attempt".to_string(),
            survey_id: "survey".to_string(),
            round_index,
            status: SessionStatus::InProgress,
            question_count: 1,
            time_limit_secs: 60,
            params: GenerationParams {
                target_difficulty: 3.0,
                difficulty_delta: 0.0,
                priority_categories: vec![],
                recurring_categories: vec![],
                question_count: 1,
            },
            created_at: now,
            started_at: None,
            resumed_at: None,
            completed_at: None,
            updated_at: now,
        }
    }

    fn question(session_id: &str) -> Question {
        Question {
            id: format!("{}-q1", session_id),
            session_id: session_id.to_string(),
            position: 0,
            question_type: QuestionType::TrueFalse,
            category: "LLM".to_string(),
            prompt: "Transformers use attention".to_string(),
            options: vec![],
            difficulty: 3.0,
            grading: GradingSchema {
                question_type: QuestionType::TrueFalse,
                correct: CorrectnessSpec::Boolean { value: true },
                explanation: String::new(),
            },
        }
    }

    fn answer(session_id: &str, raw: &str, saved_at: DateTime<Utc>) -> AnswerRecord {
        AnswerRecord {
            session_id: session_id.to_string(),
            question_id: format!("{}-q1", session_id),
            raw_answer: raw.to_string(),
            latency_ms: 100,
            saved_at,
            grading: None,
        }
    }

    #[tokio::test]
    async fn same_round_twice_conflicts() {
        let store = MemoryStore::new();
        store
            .create_round(&session("s1", 1), &[question("s1")])
            .await
            .unwrap();

        let err = store
            .create_round(&session("s2", 1), &[question("s2")])
            .await
            .unwrap_err();
        assert!(matches!(err, AssessmentError::Conflict(_)));

        store
            .create_round(&session("s3", 2), &[question("s3")])
            .await
            .unwrap();
        let err = store
            .create_round(&session("s4", 2), &[question("s4")])
            .await
            .unwrap_err();
        assert!(matches!(err, AssessmentError::Conflict(_)));
    }

    #[tokio::test]
    async fn older_write_loses() {
        let store = MemoryStore::new();
        store
            .create_round(&session("s1", 1), &[question("s1")])
            .await
            .unwrap();

        let now = Utc::now();
        let newer = answer("s1", "true", now);
        let older = answer("s1", "false", now - Duration::seconds(1));

        assert_eq!(store.upsert_answer(&newer).await.unwrap(), AnswerWrite::Applied);
        assert_eq!(store.upsert_answer(&older).await.unwrap(), AnswerWrite::Stale);

        let answers = store.answers("s1").await.unwrap();
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].raw_answer, "true");
    }

    #[tokio::test]
    async fn completed_session_rejects_answers_and_transitions() {
        let store = MemoryStore::new();
        store
            .create_round(&session("s1", 1), &[question("s1")])
            .await
            .unwrap();

        let now = Utc::now();
        assert!(store
            .transition(
                "s1",
                &[SessionStatus::InProgress, SessionStatus::Paused],
                SessionStatus::Completed,
                now
            )
            .await
            .unwrap());

        let err = store.upsert_answer(&answer("s1", "true", now)).await.unwrap_err();
        assert!(matches!(err, AssessmentError::InvalidState(_)));

        assert!(!store
            .transition("s1", &[SessionStatus::Completed], SessionStatus::InProgress, now)
            .await
            .unwrap());
        assert!(!store.resume("s1", now).await.unwrap());
    }

    #[tokio::test]
    async fn regrading_requires_matching_write() {
        let store = MemoryStore::new();
        store
            .create_round(&session("s1", 1), &[question("s1")])
            .await
            .unwrap();
        let now = Utc::now();
        store.upsert_answer(&answer("s1", "true", now)).await.unwrap();

        let outcome = GradingOutcome {
            is_correct: true,
            score: 100,
            marker: None,
            graded_at: now,
        };
        assert!(!store
            .set_grading("s1", "s1-q1", now - Duration::seconds(1), &outcome)
            .await
            .unwrap());
        assert!(store.set_grading("s1", "s1-q1", now, &outcome).await.unwrap());
        assert!(!store.set_grading("s1", "s1-q1", now, &outcome).await.unwrap());
    }
}
