//! Turns a session's answer ledger into its round result.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};

use super::grading::{grade_or_mark, Grader};
use crate::models::{AnswerRecord, GradingOutcome, Question, RoundResult, RoundSession};

/// Grading produced while scoring, keyed by the answer write it belongs to.
#[derive(Debug, Clone)]
pub struct NewGrading {
    pub question_id: String,
    pub saved_at: DateTime<Utc>,
    pub outcome: GradingOutcome,
}

#[derive(Debug, Clone)]
pub struct ScoredRound {
    pub result: RoundResult,
    /// Outcomes for answers that had not been graded yet.
    pub gradings: Vec<NewGrading>,
}

pub fn score_percent(correct: u32, total: u32) -> u32 {
    if total == 0 {
        return 0;
    }
    (100.0 * f64::from(correct) / f64::from(total)).round() as u32
}

/// Scores every question of the session. Unanswered questions count as incorrect.
pub fn score_round(
    session: &RoundSession,
    questions: &[Question],
    answers: &[AnswerRecord],
    grader: &dyn Grader,
    now: DateTime<Utc>,
) -> ScoredRound {
    let by_question: HashMap<&str, &AnswerRecord> = answers
        .iter()
        .map(|answer| (answer.question_id.as_str(), answer))
        .collect();

    let mut gradings = Vec::new();
    let mut correct_count = 0u32;
    let mut wrong_categories: BTreeMap<String, u32> = BTreeMap::new();

    for question in questions {
        let is_correct = match by_question.get(question.id.as_str()) {
            Some(answer) => match &answer.grading {
                Some(outcome) => outcome.is_correct,
                None => {
                    let outcome = grade_or_mark(grader, question, &answer.raw_answer, now);
                    let is_correct = outcome.is_correct;
                    gradings.push(NewGrading {
                        question_id: question.id.clone(),
                        saved_at: answer.saved_at,
                        outcome,
                    });
                    is_correct
                }
            },
            None => false,
        };

        if is_correct {
            correct_count += 1;
        } else {
            *wrong_categories.entry(question.category.clone()).or_insert(0) += 1;
        }
    }

    let total_count = questions.len() as u32;
    let result = RoundResult {
        session_id: session.id.clone(),
        owner_id: session.owner_id.clone(),
        attempt_id: session.attempt_id.clone(),
        survey_id: session.survey_id.clone(),
        round_index: session.round_index,
        score: score_percent(correct_count, total_count),
        correct_count,
        total_count,
        wrong_categories,
        difficulty: session.params.target_difficulty,
        created_at: now,
    };

    ScoredRound { result, gradings }
}
