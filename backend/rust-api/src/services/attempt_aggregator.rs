use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;

use super::ranking_worker::RankingHandle;
use super::session_lock::KeyedLocks;
use crate::error::AssessmentResult;
use crate::metrics::ATTEMPTS_FINALIZED_TOTAL;
use crate::models::{Attempt, AttemptRound, FinalGrade, RoundCompleted, RoundResult};
use crate::store::AssessmentStore;
use crate::utils::time::round_to;

/// Builds the attempt record once every expected round has a result.
///
/// Only round results are consulted; a round's session status never matters.
pub fn build_attempt(
    owner_id: &str,
    attempt_id: &str,
    expected_rounds: u32,
    results: &[RoundResult],
) -> Option<Attempt> {
    let by_round: BTreeMap<u32, &RoundResult> = results
        .iter()
        .filter(|r| r.owner_id == owner_id && r.attempt_id == attempt_id)
        .map(|r| (r.round_index, r))
        .collect();

    let rounds: Vec<&RoundResult> = (1..=expected_rounds)
        .map(|index| by_round.get(&index).copied())
        .collect::<Option<_>>()?;

    let total: u32 = rounds.iter().map(|r| r.score).sum();
    let final_score = round_to(f64::from(total) / rounds.len() as f64, 2);

    Some(Attempt {
        attempt_id: attempt_id.to_string(),
        owner_id: owner_id.to_string(),
        survey_id: rounds[0].survey_id.clone(),
        final_grade: FinalGrade::from_score(final_score),
        final_score,
        rank: None,
        percentile: None,
        rounds: rounds.iter().map(|r| AttemptRound::from(*r)).collect(),
        created_at: Utc::now(),
        ranked_at: None,
    })
}

pub struct AttemptAggregator {
    store: Arc<dyn AssessmentStore>,
    expected_rounds: u32,
    locks: KeyedLocks,
    ranking: RankingHandle,
}

impl AttemptAggregator {
    pub fn new(store: Arc<dyn AssessmentStore>, expected_rounds: u32, ranking: RankingHandle) -> Self {
        Self {
            store,
            expected_rounds,
            locks: KeyedLocks::new(),
            ranking,
        }
    }

    /// Finalizes the attempt if this was its last missing round.
    /// Returns the attempt when it exists after the call.
    pub async fn on_round_completed(&self, event: &RoundCompleted) -> AssessmentResult<Option<Attempt>> {
        let key = format!("{}:{}", event.owner_id, event.attempt_id);
        let _guard = self.locks.lock(&key).await;

        if let Some(existing) = self.store.attempt(&event.owner_id, &event.attempt_id).await? {
            tracing::debug!(
                "Attempt {} already finalized, ignoring round {}",
                event.attempt_id,
                event.round_index
            );
            return Ok(Some(existing));
        }

        let results = self
            .store
            .round_results_for_attempt(&event.owner_id, &event.attempt_id)
            .await?;

        let Some(attempt) =
            build_attempt(&event.owner_id, &event.attempt_id, self.expected_rounds, &results)
        else {
            tracing::debug!(
                "Attempt {} has {} of {} rounds scored",
                event.attempt_id,
                results.len(),
                self.expected_rounds
            );
            return Ok(None);
        };

        let (attempt, created) = self.store.create_attempt(&attempt).await?;
        if created {
            ATTEMPTS_FINALIZED_TOTAL
                .with_label_values(&[attempt.final_grade.as_str()])
                .inc();
            tracing::info!(
                "Attempt {} finalized for {}: score {} grade {}",
                attempt.attempt_id,
                attempt.owner_id,
                attempt.final_score,
                attempt.final_grade.as_str()
            );
            self.ranking.request(&attempt.survey_id);
        }

        Ok(Some(attempt))
    }
}
