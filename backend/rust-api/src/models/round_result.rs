use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Immutable scored outcome of one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundResult {
    pub session_id: String,
    pub owner_id: String,
    pub attempt_id: String,
    pub survey_id: String,
    pub round_index: u32,
    pub score: u32,
    pub correct_count: u32,
    pub total_count: u32,
    /// Category -> incorrect answers; categories without mistakes are absent.
    pub wrong_categories: BTreeMap<String, u32>,
    pub difficulty: f64,
    pub created_at: DateTime<Utc>,
}

impl RoundResult {
    /// Categories sharing the highest wrong count, in name order.
    pub fn weakest_categories(&self) -> Vec<String> {
        let max = match self.wrong_categories.values().max() {
            Some(max) if *max > 0 => *max,
            _ => return Vec::new(),
        };

        self.wrong_categories
            .iter()
            .filter(|(_, count)| **count == max)
            .map(|(category, _)| category.clone())
            .collect()
    }
}

/// Published once a round has a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundCompleted {
    pub session_id: String,
    pub owner_id: String,
    pub attempt_id: String,
    pub survey_id: String,
    pub round_index: u32,
}

impl From<&RoundResult> for RoundCompleted {
    fn from(result: &RoundResult) -> Self {
        Self {
            session_id: result.session_id.clone(),
            owner_id: result.owner_id.clone(),
            attempt_id: result.attempt_id.clone(),
            survey_id: result.survey_id.clone(),
            round_index: result.round_index,
        }
    }
}
