use std::collections::HashSet;

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

use crate::models::{CorrectnessSpec, GradingOutcome, Question};

lazy_static! {
    static ref TOKEN: Regex = Regex::new(r"[\p{L}\p{N}]+").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub is_correct: bool,
    pub score: u8,
}

impl Verdict {
    fn binary(is_correct: bool) -> Self {
        Self {
            is_correct,
            score: if is_correct { 100 } else { 0 },
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum GradingError {
    #[error("grading schema does not match question type {0}")]
    SchemaMismatch(&'static str),
    #[error("answer {0:?} is not a boolean")]
    NotBoolean(String),
    #[error("question has no expected keywords")]
    NoKeywords,
}

/// Deterministic `(question, raw answer) -> verdict`.
pub trait Grader: Send + Sync {
    fn grade(&self, question: &Question, raw_answer: &str) -> Result<Verdict, GradingError>;
}

/// Key match for multiple choice and true/false, keyword overlap for short answers.
#[derive(Debug, Default, Clone, Copy)]
pub struct RuleGrader;

fn tokens(text: &str) -> HashSet<String> {
    TOKEN
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

fn parse_bool(raw: &str) -> Result<bool, GradingError> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" => Ok(true),
        "false" | "f" | "no" | "n" | "0" => Ok(false),
        _ => Err(GradingError::NotBoolean(raw.to_string())),
    }
}

impl Grader for RuleGrader {
    fn grade(&self, question: &Question, raw_answer: &str) -> Result<Verdict, GradingError> {
        let spec = &question.grading.correct;
        if !spec.matches_type(question.question_type) {
            return Err(GradingError::SchemaMismatch(question.question_type.as_str()));
        }

        match spec {
            CorrectnessSpec::Key { key } => {
                let answer = raw_answer.trim();
                let by_key = answer.eq_ignore_ascii_case(key.trim());
                let by_text = question.options.iter().any(|option| {
                    option.key.eq_ignore_ascii_case(key.trim())
                        && option.text.trim().eq_ignore_ascii_case(answer)
                });
                Ok(Verdict::binary(by_key || by_text))
            }
            CorrectnessSpec::Boolean { value } => {
                Ok(Verdict::binary(parse_bool(raw_answer)? == *value))
            }
            CorrectnessSpec::Keywords {
                keywords,
                pass_ratio,
            } => {
                let expected: Vec<HashSet<String>> = keywords
                    .iter()
                    .map(|keyword| tokens(keyword))
                    .filter(|keyword_tokens| !keyword_tokens.is_empty())
                    .collect();
                if expected.is_empty() {
                    return Err(GradingError::NoKeywords);
                }

                let answer_tokens = tokens(raw_answer);
                let matched = expected
                    .iter()
                    .filter(|keyword_tokens| keyword_tokens.is_subset(&answer_tokens))
                    .count();

                let ratio = matched as f64 / expected.len() as f64;
                Ok(Verdict {
                    is_correct: ratio >= *pass_ratio,
                    score: (ratio * 100.0).round() as u8,
                })
            }
        }
    }
}

/// Grades one answer; a grading failure yields an incorrect outcome with a marker.
pub fn grade_or_mark(
    grader: &dyn Grader,
    question: &Question,
    raw_answer: &str,
    graded_at: DateTime<Utc>,
) -> GradingOutcome {
    match grader.grade(question, raw_answer) {
        Ok(verdict) => GradingOutcome {
            is_correct: verdict.is_correct,
            score: verdict.score,
            marker: None,
            graded_at,
        },
        Err(err) => {
            tracing::warn!(
                question_id = %question.id,
                error = %err,
                "Answer could not be graded, counting it as incorrect"
            );
            GradingOutcome {
                is_correct: false,
                score: 0,
                marker: Some(format!("ungradable: {}", err)),
                graded_at,
            }
        }
    }
}
