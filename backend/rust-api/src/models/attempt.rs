use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::round_result::RoundResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FinalGrade {
    A,
    B,
    C,
    D,
    F,
}

impl FinalGrade {
    /// Fixed score -> grade buckets.
    pub fn from_score(score: f64) -> Self {
        if score >= 90.0 {
            FinalGrade::A
        } else if score >= 80.0 {
            FinalGrade::B
        } else if score >= 70.0 {
            FinalGrade::C
        } else if score >= 60.0 {
            FinalGrade::D
        } else {
            FinalGrade::F
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FinalGrade::A => "A",
            FinalGrade::B => "B",
            FinalGrade::C => "C",
            FinalGrade::D => "D",
            FinalGrade::F => "F",
        }
    }
}

/// Per-round snapshot owned by an attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRound {
    pub round_index: u32,
    pub session_id: String,
    pub score: u32,
    pub correct_count: u32,
    pub total_count: u32,
    pub wrong_categories: BTreeMap<String, u32>,
}

impl From<&RoundResult> for AttemptRound {
    fn from(result: &RoundResult) -> Self {
        Self {
            round_index: result.round_index,
            session_id: result.session_id.clone(),
            score: result.score,
            correct_count: result.correct_count,
            total_count: result.total_count,
            wrong_categories: result.wrong_categories.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attempt {
    pub attempt_id: String,
    pub owner_id: String,
    pub survey_id: String,
    pub final_grade: FinalGrade,
    pub final_score: f64,
    #[serde(default)]
    pub rank: Option<u32>,
    #[serde(default)]
    pub percentile: Option<f64>,
    pub rounds: Vec<AttemptRound>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub ranked_at: Option<DateTime<Utc>>,
}

/// Rank assignment for one attempt, produced by a recompute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingUpdate {
    pub owner_id: String,
    pub attempt_id: String,
    pub rank: u32,
    pub percentile: f64,
}

#[derive(Debug, Serialize)]
pub struct AttemptRanking {
    pub attempt_id: String,
    pub survey_id: String,
    pub final_score: f64,
    pub rank: Option<u32>,
    pub percentile: Option<f64>,
    pub total_ranked: u32,
}

#[derive(Debug, Serialize)]
pub struct LeaderboardEntry {
    pub rank: u32,
    pub owner_id: String,
    pub attempt_id: String,
    pub final_score: f64,
    pub final_grade: FinalGrade,
}

#[derive(Debug, Default, Serialize)]
pub struct LearnerStats {
    pub owner_id: String,
    pub attempts_finalized: u32,
    pub best_final_score: Option<f64>,
    pub average_final_score: Option<f64>,
    pub rounds_scored: u32,
    pub average_round_score: Option<f64>,
    pub weak_categories: BTreeMap<String, u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grade_buckets() {
        assert_eq!(FinalGrade::from_score(100.0), FinalGrade::A);
        assert_eq!(FinalGrade::from_score(90.0), FinalGrade::A);
        assert_eq!(FinalGrade::from_score(89.99), FinalGrade::B);
        assert_eq!(FinalGrade::from_score(70.0), FinalGrade::C);
        assert_eq!(FinalGrade::from_score(60.0), FinalGrade::D);
        assert_eq!(FinalGrade::from_score(59.5), FinalGrade::F);
        assert_eq!(FinalGrade::from_score(0.0), FinalGrade::F);
    }
}
