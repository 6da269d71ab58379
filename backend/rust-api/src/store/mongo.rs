use std::collections::BTreeMap;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::{doc, to_bson, Bson, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::IndexOptions;
use mongodb::{Client, Collection, Database, IndexModel};
use serde::{Deserialize, Serialize};

use super::AssessmentStore;
use crate::error::{AssessmentError, AssessmentResult};
use crate::models::{
    AnswerRecord, AnswerWrite, Attempt, GradingOutcome, Question, RankingUpdate, RoundResult,
    RoundSession, SessionStatus,
};
use crate::utils::time::millis;

const SESSIONS: &str = "round_sessions";
const RESULTS: &str = "round_results";
const ATTEMPTS: &str = "attempts";
/// One `{owner_id, attempt_id, last_round}` document per attempt.
const ROUND_COUNTERS: &str = "attempt_round_counters";

/// Session document: questions and the answer ledger live inside it.
#[derive(Debug, Serialize, Deserialize)]
struct StoredSession {
    #[serde(flatten)]
    session: RoundSession,
    questions: Vec<Question>,
    #[serde(default)]
    answers: BTreeMap<String, AnswerRecord>,
    /// question id -> `saved_at` in millis, compared by conditional upserts.
    #[serde(default)]
    answer_saved_ms: BTreeMap<String, i64>,
    /// End of the running time window in millis; queried by the sweeper.
    #[serde(default)]
    deadline_ms: Option<i64>,
}

pub struct MongoStore {
    db: Database,
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        *err.kind,
        ErrorKind::Write(WriteFailure::WriteError(ref write_error)) if write_error.code == 11000
    )
}

fn bson_of<T: Serialize>(value: &T) -> AssessmentResult<Bson> {
    Ok(to_bson(value).context("Failed to encode BSON value")?)
}

/// Filter and update for the per-attempt round counter. The filter only
/// matches a lower counter, so a stale claim falls through to the upsert
/// and trips the unique `(owner_id, attempt_id)` index.
fn round_claim(session: &RoundSession) -> (Document, Document) {
    let round = i64::from(session.round_index);
    (
        doc! {
            "owner_id": &session.owner_id,
            "attempt_id": &session.attempt_id,
            "last_round": { "$lt": round },
        },
        doc! { "$set": { "last_round": round } },
    )
}

fn deadline_ms(at: DateTime<Utc>, time_limit_secs: u32) -> i64 {
    millis(at) + i64::from(time_limit_secs) * 1000
}

impl MongoStore {
    pub async fn connect(uri: &str, database: &str) -> anyhow::Result<Self> {
        let client = Client::with_uri_str(uri)
            .await
            .context("Failed to connect to MongoDB")?;
        let store = Self::new(client.database(database));
        store.ensure_indexes().await?;
        Ok(store)
    }

    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn sessions(&self) -> Collection<StoredSession> {
        self.db.collection(SESSIONS)
    }

    fn results(&self) -> Collection<RoundResult> {
        self.db.collection(RESULTS)
    }

    fn attempts(&self) -> Collection<Attempt> {
        self.db.collection(ATTEMPTS)
    }

    fn round_counters(&self) -> Collection<Document> {
        self.db.collection(ROUND_COUNTERS)
    }

    /// Raises the attempt's round counter to `round_index`. Fails with a
    /// conflict when another round at or above it was claimed first.
    async fn claim_round(&self, session: &RoundSession) -> AssessmentResult<()> {
        let (filter, update) = round_claim(session);
        let claimed = self
            .round_counters()
            .update_one(filter, update)
            .upsert(true)
            .await;

        match claimed {
            Ok(_) => Ok(()),
            // The filter missed an existing counter, so the upsert hit the unique index
            Err(err) if is_duplicate_key(&err) => Err(AssessmentError::conflict(format!(
                "attempt {} already claimed round {} or later; round index must increase",
                session.attempt_id, session.round_index
            ))),
            Err(err) => Err(anyhow::Error::new(err)
                .context("Failed to claim round index")
                .into()),
        }
    }

    pub async fn ensure_indexes(&self) -> anyhow::Result<()> {
        let unique = || IndexOptions::builder().unique(true).build();

        self.sessions()
            .create_indexes([
                IndexModel::builder()
                    .keys(doc! { "id": 1 })
                    .options(unique())
                    .build(),
                IndexModel::builder()
                    .keys(doc! { "owner_id": 1, "attempt_id": 1, "round_index": 1 })
                    .options(unique())
                    .build(),
                IndexModel::builder()
                    .keys(doc! { "status": 1, "deadline_ms": 1 })
                    .build(),
            ])
            .await
            .context("Failed to create round session indexes")?;

        self.results()
            .create_indexes([
                IndexModel::builder()
                    .keys(doc! { "session_id": 1 })
                    .options(unique())
                    .build(),
                IndexModel::builder()
                    .keys(doc! { "owner_id": 1, "attempt_id": 1, "round_index": 1 })
                    .build(),
            ])
            .await
            .context("Failed to create round result indexes")?;

        self.attempts()
            .create_indexes([
                IndexModel::builder()
                    .keys(doc! { "owner_id": 1, "attempt_id": 1 })
                    .options(unique())
                    .build(),
                IndexModel::builder()
                    .keys(doc! { "survey_id": 1, "final_score": -1 })
                    .build(),
            ])
            .await
            .context("Failed to create attempt indexes")?;

        self.round_counters()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "owner_id": 1, "attempt_id": 1 })
                    .options(unique())
                    .build(),
            )
            .await
            .context("Failed to create round counter index")?;

        tracing::info!("MongoDB indexes ensured");
        Ok(())
    }

    async fn stored_session(&self, session_id: &str) -> AssessmentResult<Option<StoredSession>> {
        Ok(self
            .sessions()
            .find_one(doc! { "id": session_id })
            .await
            .context("Failed to load round session")?)
    }

    async fn require_session(&self, session_id: &str) -> AssessmentResult<StoredSession> {
        self.stored_session(session_id)
            .await?
            .ok_or_else(|| AssessmentError::not_found(format!("session {}", session_id)))
    }
}

#[async_trait]
impl AssessmentStore for MongoStore {
    fn backend(&self) -> &'static str {
        "mongo"
    }

    async fn ping(&self) -> AssessmentResult<()> {
        self.db
            .run_command(doc! { "ping": 1 })
            .await
            .context("MongoDB ping failed")?;
        Ok(())
    }

    async fn create_round(
        &self,
        session: &RoundSession,
        questions: &[Question],
    ) -> AssessmentResult<()> {
        let later = self
            .sessions()
            .find_one(doc! {
                "owner_id": &session.owner_id,
                "attempt_id": &session.attempt_id,
                "round_index": { "$gte": i64::from(session.round_index) },
            })
            .sort(doc! { "round_index": -1 })
            .await
            .context("Failed to check existing rounds")?;

        if let Some(existing) = later {
            let existing = existing.session;
            return Err(if existing.round_index == session.round_index && existing.status.is_active() {
                AssessmentError::conflict(format!(
                    "round {} of attempt {} already has an active session ({})",
                    session.round_index, session.attempt_id, existing.id
                ))
            } else {
                AssessmentError::conflict(format!(
                    "attempt {} already reached round {}; round index must increase",
                    session.attempt_id, existing.round_index
                ))
            });
        }

        self.claim_round(session).await?;

        let mut questions = questions.to_vec();
        questions.sort_by_key(|q| q.position);
        let stored = StoredSession {
            session: session.clone(),
            questions,
            answers: BTreeMap::new(),
            answer_saved_ms: BTreeMap::new(),
            deadline_ms: session
                .clock_started_at()
                .map(|start| deadline_ms(start, session.time_limit_secs)),
        };

        match self.sessions().insert_one(&stored).await {
            Ok(_) => Ok(()),
            Err(err) if is_duplicate_key(&err) => Err(AssessmentError::conflict(format!(
                "round {} of attempt {} was created concurrently",
                session.round_index, session.attempt_id
            ))),
            Err(err) => Err(anyhow::Error::new(err)
                .context("Failed to insert round session")
                .into()),
        }
    }

    async fn session(&self, session_id: &str) -> AssessmentResult<Option<RoundSession>> {
        Ok(self.stored_session(session_id).await?.map(|s| s.session))
    }

    async fn sessions_for_attempt(
        &self,
        owner_id: &str,
        attempt_id: &str,
    ) -> AssessmentResult<Vec<RoundSession>> {
        let cursor = self
            .sessions()
            .find(doc! { "owner_id": owner_id, "attempt_id": attempt_id })
            .sort(doc! { "round_index": 1 })
            .await
            .context("Failed to query attempt sessions")?;
        let stored: Vec<StoredSession> = cursor
            .try_collect()
            .await
            .context("Failed to read attempt sessions")?;
        Ok(stored.into_iter().map(|s| s.session).collect())
    }

    async fn questions(&self, session_id: &str) -> AssessmentResult<Vec<Question>> {
        Ok(self
            .stored_session(session_id)
            .await?
            .map(|s| s.questions)
            .unwrap_or_default())
    }

    async fn answers(&self, session_id: &str) -> AssessmentResult<Vec<AnswerRecord>> {
        let Some(mut stored) = self.stored_session(session_id).await? else {
            return Ok(Vec::new());
        };
        let questions = std::mem::take(&mut stored.questions);
        Ok(questions
            .iter()
            .filter_map(|q| stored.answers.remove(&q.id))
            .collect())
    }

    async fn mark_started(&self, session_id: &str, at: DateTime<Utc>) -> AssessmentResult<bool> {
        let stored = self.require_session(session_id).await?;
        let at_bson = bson_of(&at)?;

        let update = self
            .sessions()
            .update_one(
                doc! {
                    "id": session_id,
                    "started_at": Bson::Null,
                    "status": { "$ne": SessionStatus::Completed.as_str() },
                },
                doc! {
                    "$set": {
                        "started_at": at_bson.clone(),
                        "updated_at": at_bson,
                        "deadline_ms": deadline_ms(at, stored.session.time_limit_secs),
                    }
                },
            )
            .await
            .context("Failed to mark session started")?;

        Ok(update.modified_count == 1)
    }

    async fn upsert_answer(&self, record: &AnswerRecord) -> AssessmentResult<AnswerWrite> {
        let stored = self.require_session(&record.session_id).await?;
        if stored.session.status == SessionStatus::Completed {
            return Err(AssessmentError::invalid_state(format!(
                "session {} is completed",
                record.session_id
            )));
        }
        if !stored.questions.iter().any(|q| q.id == record.question_id) {
            return Err(AssessmentError::not_found(format!(
                "question {} in session {}",
                record.question_id, record.session_id
            )));
        }

        let mut record = record.clone();
        if let Some(existing) = stored.answers.get(&record.question_id) {
            if existing.raw_answer == record.raw_answer && record.grading.is_none() {
                record.grading = existing.grading.clone();
            }
        }

        let saved_ms = millis(record.saved_at);
        let answer_path = format!("answers.{}", record.question_id);
        let saved_path = format!("answer_saved_ms.{}", record.question_id);

        let mut set = Document::new();
        set.insert(answer_path, bson_of(&record)?);
        set.insert(saved_path.clone(), saved_ms);
        set.insert("updated_at", bson_of(&record.saved_at)?);

        // Status guard and LWW guard are part of the same single-document update
        let mut never_saved = Document::new();
        never_saved.insert(saved_path.clone(), doc! { "$exists": false });
        let mut saved_earlier = Document::new();
        saved_earlier.insert(saved_path, doc! { "$lte": saved_ms });

        let update = self
            .sessions()
            .update_one(
                doc! {
                    "id": &record.session_id,
                    "status": { "$ne": SessionStatus::Completed.as_str() },
                    "$or": [never_saved, saved_earlier],
                },
                doc! { "$set": set },
            )
            .await
            .context("Failed to upsert answer")?;

        if update.matched_count == 1 {
            return Ok(AnswerWrite::Applied);
        }

        // Nothing matched: either the session completed meanwhile or a newer write won
        match self.session(&record.session_id).await? {
            Some(session) if session.status == SessionStatus::Completed => {
                Err(AssessmentError::invalid_state(format!(
                    "session {} is completed",
                    record.session_id
                )))
            }
            Some(_) => Ok(AnswerWrite::Stale),
            None => Err(AssessmentError::not_found(format!(
                "session {}",
                record.session_id
            ))),
        }
    }

    async fn set_grading(
        &self,
        session_id: &str,
        question_id: &str,
        saved_at: DateTime<Utc>,
        outcome: &GradingOutcome,
    ) -> AssessmentResult<bool> {
        let answer_path = format!("answers.{}", question_id);

        let mut filter = doc! { "id": session_id };
        filter.insert(format!("{}.saved_at", answer_path), bson_of(&saved_at)?);
        filter.insert(format!("{}.grading", answer_path), Bson::Null);

        let mut set = Document::new();
        set.insert(format!("{}.grading", answer_path), bson_of(outcome)?);

        let update = self
            .sessions()
            .update_one(filter, doc! { "$set": set })
            .await
            .context("Failed to store grading")?;

        Ok(update.modified_count == 1)
    }

    async fn transition(
        &self,
        session_id: &str,
        from: &[SessionStatus],
        to: SessionStatus,
        at: DateTime<Utc>,
    ) -> AssessmentResult<bool> {
        let allowed: Vec<&str> = from
            .iter()
            .filter(|status| status.can_transition_to(to))
            .map(|status| status.as_str())
            .collect();

        if !allowed.is_empty() {
            let at_bson = bson_of(&at)?;
            let mut set = doc! { "status": to.as_str(), "updated_at": at_bson.clone() };
            if to == SessionStatus::Completed {
                set.insert("completed_at", at_bson);
                set.insert("deadline_ms", Bson::Null);
            }

            let update = self
                .sessions()
                .update_one(
                    doc! { "id": session_id, "status": { "$in": allowed } },
                    doc! { "$set": set },
                )
                .await
                .context("Failed to transition session")?;

            if update.modified_count == 1 {
                return Ok(true);
            }
        }

        match self.session(session_id).await? {
            Some(_) => Ok(false),
            None => Err(AssessmentError::not_found(format!("session {}", session_id))),
        }
    }

    async fn resume(&self, session_id: &str, at: DateTime<Utc>) -> AssessmentResult<bool> {
        let stored = self.require_session(session_id).await?;
        let at_bson = bson_of(&at)?;

        let update = self
            .sessions()
            .update_one(
                doc! { "id": session_id, "status": SessionStatus::Paused.as_str() },
                doc! {
                    "$set": {
                        "status": SessionStatus::InProgress.as_str(),
                        "resumed_at": at_bson.clone(),
                        "updated_at": at_bson,
                        "deadline_ms": deadline_ms(at, stored.session.time_limit_secs),
                    }
                },
            )
            .await
            .context("Failed to resume session")?;

        Ok(update.modified_count == 1)
    }

    async fn expired_sessions(&self, now: DateTime<Utc>) -> AssessmentResult<Vec<String>> {
        let mut cursor = self
            .db
            .collection::<Document>(SESSIONS)
            .find(doc! {
                "status": SessionStatus::InProgress.as_str(),
                "deadline_ms": { "$lt": millis(now) },
            })
            .projection(doc! { "id": 1 })
            .await
            .context("Failed to query expired sessions")?;

        let mut ids = Vec::new();
        while let Some(document) = cursor.try_next().await.context("Failed to read expired sessions")? {
            let id = document
                .get_str("id")
                .context("Round session document missing id")?;
            ids.push(id.to_string());
        }
        Ok(ids)
    }

    async fn pause_if_expired(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> AssessmentResult<bool> {
        let update = self
            .sessions()
            .update_one(
                doc! {
                    "id": session_id,
                    "status": SessionStatus::InProgress.as_str(),
                    "deadline_ms": { "$lt": millis(now) },
                },
                doc! {
                    "$set": {
                        "status": SessionStatus::Paused.as_str(),
                        "updated_at": bson_of(&now)?,
                    }
                },
            )
            .await
            .context("Failed to pause expired session")?;

        Ok(update.modified_count == 1)
    }

    async fn insert_round_result(&self, result: &RoundResult) -> AssessmentResult<RoundResult> {
        match self.results().insert_one(result).await {
            Ok(_) => Ok(result.clone()),
            Err(err) if is_duplicate_key(&err) => {
                let existing = self
                    .round_result(&result.session_id)
                    .await?
                    .ok_or_else(|| {
                        anyhow::anyhow!(
                            "Duplicate round result for {} but none stored",
                            result.session_id
                        )
                    })?;
                Ok(existing)
            }
            Err(err) => Err(anyhow::Error::new(err)
                .context("Failed to insert round result")
                .into()),
        }
    }

    async fn round_result(&self, session_id: &str) -> AssessmentResult<Option<RoundResult>> {
        Ok(self
            .results()
            .find_one(doc! { "session_id": session_id })
            .await
            .context("Failed to load round result")?)
    }

    async fn round_results_for_attempt(
        &self,
        owner_id: &str,
        attempt_id: &str,
    ) -> AssessmentResult<Vec<RoundResult>> {
        let cursor = self
            .results()
            .find(doc! { "owner_id": owner_id, "attempt_id": attempt_id })
            .sort(doc! { "round_index": 1 })
            .await
            .context("Failed to query round results")?;
        Ok(cursor
            .try_collect()
            .await
            .context("Failed to read round results")?)
    }

    async fn round_results_for_owner(&self, owner_id: &str) -> AssessmentResult<Vec<RoundResult>> {
        let cursor = self
            .results()
            .find(doc! { "owner_id": owner_id })
            .sort(doc! { "attempt_id": 1, "round_index": 1 })
            .await
            .context("Failed to query learner round results")?;
        Ok(cursor
            .try_collect()
            .await
            .context("Failed to read learner round results")?)
    }

    async fn create_attempt(&self, attempt: &Attempt) -> AssessmentResult<(Attempt, bool)> {
        match self.attempts().insert_one(attempt).await {
            Ok(_) => Ok((attempt.clone(), true)),
            Err(err) if is_duplicate_key(&err) => {
                let existing = self
                    .attempt(&attempt.owner_id, &attempt.attempt_id)
                    .await?
                    .ok_or_else(|| {
                        anyhow::anyhow!(
                            "Duplicate attempt {} but none stored",
                            attempt.attempt_id
                        )
                    })?;
                Ok((existing, false))
            }
            Err(err) => Err(anyhow::Error::new(err)
                .context("Failed to insert attempt")
                .into()),
        }
    }

    async fn attempt(&self, owner_id: &str, attempt_id: &str) -> AssessmentResult<Option<Attempt>> {
        Ok(self
            .attempts()
            .find_one(doc! { "owner_id": owner_id, "attempt_id": attempt_id })
            .await
            .context("Failed to load attempt")?)
    }

    async fn attempts_for_survey(&self, survey_id: &str) -> AssessmentResult<Vec<Attempt>> {
        let cursor = self
            .attempts()
            .find(doc! { "survey_id": survey_id })
            .await
            .context("Failed to query survey attempts")?;
        Ok(cursor
            .try_collect()
            .await
            .context("Failed to read survey attempts")?)
    }

    async fn attempts_for_owner(&self, owner_id: &str) -> AssessmentResult<Vec<Attempt>> {
        let cursor = self
            .attempts()
            .find(doc! { "owner_id": owner_id })
            .sort(doc! { "created_at": 1 })
            .await
            .context("Failed to query learner attempts")?;
        Ok(cursor
            .try_collect()
            .await
            .context("Failed to read learner attempts")?)
    }

    async fn survey_ids(&self) -> AssessmentResult<Vec<String>> {
        let values = self
            .attempts()
            .distinct("survey_id", doc! {})
            .await
            .context("Failed to list surveys")?;

        let mut ids: Vec<String> = values
            .into_iter()
            .filter_map(|value| value.as_str().map(str::to_string))
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn apply_rankings(
        &self,
        updates: &[RankingUpdate],
        at: DateTime<Utc>,
    ) -> AssessmentResult<()> {
        let at_bson = bson_of(&at)?;
        for update in updates {
            self.attempts()
                .update_one(
                    doc! { "owner_id": &update.owner_id, "attempt_id": &update.attempt_id },
                    doc! {
                        "$set": {
                            "rank": i64::from(update.rank),
                            "percentile": update.percentile,
                            "ranked_at": at_bson.clone(),
                        }
                    },
                )
                .await
                .with_context(|| format!("Failed to store ranking of attempt {}", update.attempt_id))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GenerationParams;

    fn stored() -> StoredSession {
        let now = Utc::now();
        StoredSession {
            session: RoundSession {
                id: "8d1e6a0c-1111-4f57-9d55-0b1f8f9b2a10".to_string(),
                owner_id: "learner".to_string(),
                attempt_id: "attempt-1".to_string(),
                survey_id: "survey".to_string(),
                round_index: 1,
                status: SessionStatus::InProgress,
                question_count: 0,
                time_limit_secs: 1200,
                params: GenerationParams {
                    target_difficulty: 3.0,
                    difficulty_delta: 0.0,
                    priority_categories: vec![],
                    recurring_categories: vec![],
                    question_count: 0,
                },
                created_at: now,
                started_at: Some(now),
                resumed_at: None,
                completed_at: None,
                updated_at: now,
            },
            questions: vec![],
            answers: BTreeMap::new(),
            answer_saved_ms: BTreeMap::new(),
            deadline_ms: Some(deadline_ms(now, 1200)),
        }
    }

    #[test]
    fn session_fields_are_top_level() {
        let document = mongodb::bson::to_document(&stored()).unwrap();
        assert_eq!(document.get_str("status").unwrap(), "in_progress");
        assert_eq!(document.get_str("owner_id").unwrap(), "learner");
        assert!(document.contains_key("deadline_ms"));
        assert!(document.contains_key("round_index"));
    }

    #[test]
    fn stored_session_roundtrips_through_bson() {
        let original = stored();
        let document = mongodb::bson::to_document(&original).unwrap();
        let decoded: StoredSession = mongodb::bson::from_document(document).unwrap();
        assert_eq!(decoded.session.id, original.session.id);
        assert_eq!(decoded.session.started_at, original.session.started_at);
        assert_eq!(decoded.deadline_ms, original.deadline_ms);
    }

    #[test]
    fn round_claim_only_matches_lower_counters() {
        let mut session = stored().session;
        session.round_index = 3;
        let (filter, update) = round_claim(&session);

        assert_eq!(filter.get_str("owner_id").unwrap(), "learner");
        assert_eq!(filter.get_str("attempt_id").unwrap(), "attempt-1");
        let last_round = filter.get_document("last_round").unwrap();
        assert_eq!(last_round.get_i64("$lt").unwrap(), 3);
        let set = update.get_document("$set").unwrap();
        assert_eq!(set.get_i64("last_round").unwrap(), 3);
    }

    #[test]
    fn deadline_adds_time_limit() {
        let at = Utc::now();
        assert_eq!(deadline_ms(at, 60), millis(at) + 60_000);
    }
}
