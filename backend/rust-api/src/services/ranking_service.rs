use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;

use crate::error::{AssessmentError, AssessmentResult};
use crate::metrics::RANKING_RECOMPUTE_TOTAL;
use crate::models::{Attempt, AttemptRanking, LeaderboardEntry, LearnerStats, RankingUpdate};
use crate::store::AssessmentStore;
use crate::utils::time::round_to;

fn same_score(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

/// Orders attempts for ranking: score descending, then creation time, then id.
fn leaderboard_order(a: &Attempt, b: &Attempt) -> Ordering {
    b.final_score
        .partial_cmp(&a.final_score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.attempt_id.cmp(&b.attempt_id))
}

pub fn percentile(rank: u32, total: u32) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round_to(100.0 * f64::from(total - rank + 1) / f64::from(total), 1)
}

/// Standard competition ranking ("1224") over one survey's attempts.
pub fn compute_rankings(attempts: &[Attempt]) -> Vec<RankingUpdate> {
    let mut ordered: Vec<&Attempt> = attempts.iter().collect();
    ordered.sort_by(|a, b| leaderboard_order(a, b));

    let total = ordered.len() as u32;
    let mut updates = Vec::with_capacity(ordered.len());
    let mut rank = 0u32;
    let mut previous: Option<f64> = None;

    for (position, attempt) in ordered.iter().enumerate() {
        if previous.map_or(true, |score| !same_score(score, attempt.final_score)) {
            rank = position as u32 + 1;
            previous = Some(attempt.final_score);
        }
        updates.push(RankingUpdate {
            owner_id: attempt.owner_id.clone(),
            attempt_id: attempt.attempt_id.clone(),
            rank,
            percentile: percentile(rank, total),
        });
    }

    updates
}

/// Read model over finalized attempts.
pub struct RankingService {
    store: Arc<dyn AssessmentStore>,
}

impl RankingService {
    pub fn new(store: Arc<dyn AssessmentStore>) -> Self {
        Self { store }
    }

    /// Recomputes and stores rank and percentile for every attempt of a survey.
    pub async fn recompute(&self, survey_id: &str) -> AssessmentResult<usize> {
        let result = async {
            let attempts = self.store.attempts_for_survey(survey_id).await?;
            let updates = compute_rankings(&attempts);
            self.store.apply_rankings(&updates, Utc::now()).await?;
            Ok::<_, AssessmentError>(updates.len())
        }
        .await;

        let status = if result.is_ok() { "success" } else { "error" };
        RANKING_RECOMPUTE_TOTAL.with_label_values(&[status]).inc();

        if let Ok(count) = &result {
            tracing::debug!("Recomputed ranking of survey {} ({} attempts)", survey_id, count);
        }
        result
    }

    pub async fn recompute_all(&self) -> AssessmentResult<usize> {
        let surveys = self.store.survey_ids().await?;
        for survey_id in &surveys {
            self.recompute(survey_id).await?;
        }
        Ok(surveys.len())
    }

    /// Live ranking of one attempt among its survey's finalized attempts.
    pub async fn ranking(&self, owner_id: &str, attempt_id: &str) -> AssessmentResult<AttemptRanking> {
        let attempt = self
            .store
            .attempt(owner_id, attempt_id)
            .await?
            .ok_or_else(|| AssessmentError::not_found(format!("attempt {}", attempt_id)))?;

        let attempts = self.store.attempts_for_survey(&attempt.survey_id).await?;
        let updates = compute_rankings(&attempts);
        let own = updates
            .iter()
            .find(|u| u.owner_id == owner_id && u.attempt_id == attempt_id);

        Ok(AttemptRanking {
            attempt_id: attempt.attempt_id.clone(),
            survey_id: attempt.survey_id.clone(),
            final_score: attempt.final_score,
            rank: own.map(|u| u.rank),
            percentile: own.map(|u| u.percentile),
            total_ranked: updates.len() as u32,
        })
    }

    pub async fn leaderboard(
        &self,
        survey_id: &str,
        limit: usize,
    ) -> AssessmentResult<Vec<LeaderboardEntry>> {
        let mut attempts = self.store.attempts_for_survey(survey_id).await?;
        attempts.sort_by(leaderboard_order);
        let updates = compute_rankings(&attempts);

        Ok(attempts
            .into_iter()
            .zip(updates)
            .take(limit)
            .map(|(attempt, update)| LeaderboardEntry {
                rank: update.rank,
                owner_id: attempt.owner_id,
                attempt_id: attempt.attempt_id,
                final_score: attempt.final_score,
                final_grade: attempt.final_grade,
            })
            .collect())
    }

    /// Aggregates a learner's round results and finalized attempts.
    pub async fn learner_stats(&self, owner_id: &str) -> AssessmentResult<LearnerStats> {
        let results = self.store.round_results_for_owner(owner_id).await?;
        let attempts = self.store.attempts_for_owner(owner_id).await?;

        let mut weak_categories: BTreeMap<String, u32> = BTreeMap::new();
        for result in &results {
            for (category, count) in &result.wrong_categories {
                *weak_categories.entry(category.clone()).or_insert(0) += count;
            }
        }

        let mean = |values: Vec<f64>| -> Option<f64> {
            if values.is_empty() {
                None
            } else {
                Some(round_to(values.iter().sum::<f64>() / values.len() as f64, 2))
            }
        };

        Ok(LearnerStats {
            owner_id: owner_id.to_string(),
            attempts_finalized: attempts.len() as u32,
            best_final_score: attempts
                .iter()
                .map(|a| a.final_score)
                .fold(None, |best: Option<f64>, score| {
                    Some(best.map_or(score, |b| b.max(score)))
                }),
            average_final_score: mean(attempts.iter().map(|a| a.final_score).collect()),
            rounds_scored: results.len() as u32,
            average_round_score: mean(results.iter().map(|r| f64::from(r.score)).collect()),
            weak_categories,
        })
    }
}
