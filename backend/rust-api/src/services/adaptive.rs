//! Derives the next round's generation parameters from scored rounds.

use std::collections::BTreeSet;

use crate::config::AssessmentSettings;
use crate::error::{AssessmentError, AssessmentResult};
use crate::models::{GenerationParams, RoundResult};
use crate::utils::time::round_to;

#[derive(Debug, Clone)]
pub struct AdaptiveController {
    settings: AssessmentSettings,
}

impl AdaptiveController {
    pub fn new(settings: AssessmentSettings) -> Self {
        Self { settings }
    }

    fn question_count(&self, requested: Option<u32>) -> AssessmentResult<u32> {
        let count = requested.unwrap_or(self.settings.default_question_count);
        if count == 0 || count > self.settings.max_question_count {
            return Err(AssessmentError::validation(format!(
                "question_count must be within 1..={}",
                self.settings.max_question_count
            )));
        }
        Ok(count)
    }

    /// Parameters of a fresh round.
    pub fn initial_params(
        &self,
        question_count: Option<u32>,
        target_difficulty: Option<f64>,
    ) -> AssessmentResult<GenerationParams> {
        let difficulty = target_difficulty.unwrap_or(self.settings.base_difficulty);
        if !difficulty.is_finite()
            || difficulty < self.settings.min_difficulty
            || difficulty > self.settings.max_difficulty
        {
            return Err(AssessmentError::validation(format!(
                "target_difficulty must be within {}..={}",
                self.settings.min_difficulty, self.settings.max_difficulty
            )));
        }

        Ok(GenerationParams {
            target_difficulty: difficulty,
            difficulty_delta: 0.0,
            priority_categories: Vec::new(),
            recurring_categories: Vec::new(),
            question_count: self.question_count(question_count)?,
        })
    }

    /// Zero inside `[low, high)`, otherwise proportional to the distance from the band midpoint.
    pub fn difficulty_delta(&self, score: u32) -> f64 {
        let high = self.settings.high_score_threshold;
        let low = self.settings.low_score_threshold;
        if score < high && score >= low {
            return 0.0;
        }

        let midpoint = f64::from(high + low) / 2.0;
        round_to(
            self.settings.max_difficulty_step * (f64::from(score) - midpoint) / 50.0,
            2,
        )
    }

    /// Parameters for round `from_round + 1` of an attempt.
    pub fn next_params(
        &self,
        attempt_id: &str,
        results: &[RoundResult],
        from_round: u32,
        question_count: Option<u32>,
    ) -> AssessmentResult<GenerationParams> {
        let current = results
            .iter()
            .find(|r| r.round_index == from_round)
            .ok_or_else(|| AssessmentError::MissingRoundResult {
                attempt_id: attempt_id.to_string(),
                round_index: from_round,
            })?;

        let delta = self.difficulty_delta(current.score);
        let target_difficulty = round_to(
            (current.difficulty + delta)
                .clamp(self.settings.min_difficulty, self.settings.max_difficulty),
            2,
        );

        let earlier: BTreeSet<&str> = results
            .iter()
            .filter(|r| r.round_index < from_round)
            .flat_map(|r| r.wrong_categories.iter())
            .filter(|(_, count)| **count > 0)
            .map(|(category, _)| category.as_str())
            .collect();

        let recurring_categories = current
            .wrong_categories
            .iter()
            .filter(|(category, count)| **count > 0 && earlier.contains(category.as_str()))
            .map(|(category, _)| category.clone())
            .collect();

        Ok(GenerationParams {
            target_difficulty,
            difficulty_delta: delta,
            priority_categories: current.weakest_categories(),
            recurring_categories,
            question_count: self.question_count(question_count)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn result(round_index: u32, score: u32, wrong: &[(&str, u32)]) -> RoundResult {
        RoundResult {
            session_id: format!("s{}", round_index),
            owner_id: "u1".to_string(),
            attempt_id: "a1".to_string(),
            survey_id: "genai".to_string(),
            round_index,
            score,
            correct_count: score / 20,
            total_count: 5,
            wrong_categories: wrong
                .iter()
                .map(|(c, n)| (c.to_string(), *n))
                .collect::<BTreeMap<_, _>>(),
            difficulty: 3.0,
            created_at: Utc::now(),
        }
    }

    fn controller() -> AdaptiveController {
        AdaptiveController::new(AssessmentSettings::default())
    }

    #[test]
    fn low_score_lowers_difficulty_and_prioritizes_weakest() {
        let results = vec![result(1, 40, &[("LLM", 1), ("RAG", 2)])];

        let params = controller().next_params("a1", &results, 1, None).unwrap();

        assert!(params.difficulty_delta < 0.0);
        assert_eq!(params.difficulty_delta, -0.5);
        assert_eq!(params.target_difficulty, 2.5);
        assert_eq!(params.priority_categories, vec!["RAG".to_string()]);
        assert!(params.recurring_categories.is_empty());
        assert_eq!(params.question_count, 5);
    }

    #[test]
    fn middle_band_holds_difficulty() {
        let c = controller();
        assert_eq!(c.difficulty_delta(50), 0.0);
        assert_eq!(c.difficulty_delta(79), 0.0);
        assert_eq!(c.difficulty_delta(80), 0.3);
        assert_eq!(c.difficulty_delta(100), 0.7);
        assert_eq!(c.difficulty_delta(0), -1.3);
    }

    #[test]
    fn target_is_clamped() {
        let mut low = result(1, 0, &[("LLM", 5)]);
        low.difficulty = 1.2;
        let params = controller().next_params("a1", &[low], 1, None).unwrap();
        assert_eq!(params.target_difficulty, 1.0);
    }

    #[test]
    fn recurring_categories_use_history() {
        let results = vec![
            result(1, 40, &[("LLM", 2), ("RAG", 1)]),
            result(2, 60, &[("Prompting", 1), ("RAG", 1)]),
        ];

        let params = controller().next_params("a1", &results, 2, Some(8)).unwrap();

        assert_eq!(params.difficulty_delta, 0.0);
        assert_eq!(params.recurring_categories, vec!["RAG".to_string()]);
        assert_eq!(
            params.priority_categories,
            vec!["Prompting".to_string(), "RAG".to_string()]
        );
        assert_eq!(params.question_count, 8);
    }

    #[test]
    fn missing_round_is_reported() {
        let err = controller()
            .next_params("a1", &[result(1, 40, &[])], 2, None)
            .unwrap_err();
        assert!(matches!(
            err,
            AssessmentError::MissingRoundResult { round_index: 2, .. }
        ));
    }

    #[test]
    fn initial_params_validate_ranges() {
        let c = controller();
        assert!(c.initial_params(Some(0), None).is_err());
        assert!(c.initial_params(Some(51), None).is_err());
        assert!(c.initial_params(None, Some(9.0)).is_err());

        let params = c.initial_params(None, None).unwrap();
        assert_eq!(params.target_difficulty, 3.0);
        assert_eq!(params.question_count, 5);
    }
}
