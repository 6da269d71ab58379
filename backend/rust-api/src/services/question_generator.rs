use std::collections::HashSet;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AssessmentError, AssessmentResult};
use crate::models::{
    CorrectnessSpec, GenerationParams, GradingSchema, PriorAnswer, Question, QuestionOption,
    QuestionType,
};

#[derive(Debug, Clone, Serialize)]
pub struct GenerationRequest {
    pub session_id: String,
    pub attempt_id: String,
    pub round_index: u32,
    pub domain: String,
    pub question_count: u32,
    pub params: GenerationParams,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub prior_answers: Vec<PriorAnswer>,
}

/// One item as returned by the generation agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedQuestion {
    pub question_type: QuestionType,
    pub category: String,
    pub prompt: String,
    #[serde(default)]
    pub options: Vec<QuestionOption>,
    #[serde(default)]
    pub difficulty: Option<f64>,
    pub grading: GradingSchema,
}

#[derive(Debug, Deserialize)]
struct GenerateQuestionsResponse {
    questions: Vec<GeneratedQuestion>,
}

#[async_trait]
pub trait QuestionGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<Vec<GeneratedQuestion>>;
}

/// Generation agent reached over HTTP.
pub struct HttpQuestionGenerator {
    http_client: Client,
    api_url: String,
}

impl HttpQuestionGenerator {
    pub fn new(api_url: String) -> Self {
        Self {
            http_client: Client::new(),
            api_url,
        }
    }
}

#[async_trait]
impl QuestionGenerator for HttpQuestionGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<Vec<GeneratedQuestion>> {
        let url = format!("{}/internal/generate_questions", self.api_url);

        tracing::debug!(
            "Calling question generation agent: {} for session={}, count={}",
            url,
            request.session_id,
            request.question_count
        );

        let response = self
            .http_client
            .post(&url)
            .json(request)
            .send()
            .await
            .context("Failed to call question generation agent")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow!(
                "Question generation agent returned error {}: {}",
                status,
                error_text
            ));
        }

        let api_response: GenerateQuestionsResponse = response
            .json()
            .await
            .context("Failed to parse question generation response")?;

        tracing::info!(
            "Generated {} questions for session {}",
            api_response.questions.len(),
            request.session_id
        );

        Ok(api_response.questions)
    }
}

/// Calls the generator with a deadline and turns its batch into session questions.
///
/// Every failure mode (transport, timeout, wrong count, malformed item) becomes
/// `GenerationUnavailable`.
pub async fn generate_questions(
    generator: &dyn QuestionGenerator,
    request: &GenerationRequest,
    timeout: Duration,
    default_difficulty: f64,
) -> AssessmentResult<Vec<Question>> {
    let generated = match tokio::time::timeout(timeout, generator.generate(request)).await {
        Ok(Ok(generated)) => generated,
        Ok(Err(err)) => {
            return Err(AssessmentError::GenerationUnavailable(format!("{:#}", err)));
        }
        Err(_) => {
            return Err(AssessmentError::GenerationUnavailable(format!(
                "no response within {}s",
                timeout.as_secs()
            )));
        }
    };

    into_questions(request, generated, default_difficulty)
        .map_err(|err| AssessmentError::GenerationUnavailable(format!("{:#}", err)))
}

fn check_item(index: usize, item: &GeneratedQuestion) -> Result<()> {
    if item.prompt.trim().is_empty() {
        return Err(anyhow!("question {} has an empty prompt", index));
    }
    if item.category.trim().is_empty() {
        return Err(anyhow!("question {} has no category", index));
    }
    if item.grading.question_type != item.question_type
        || !item.grading.correct.matches_type(item.question_type)
    {
        return Err(anyhow!(
            "question {} grading schema does not match type {}",
            index,
            item.question_type.as_str()
        ));
    }

    match &item.grading.correct {
        CorrectnessSpec::Key { key } => {
            let keys: HashSet<&str> = item.options.iter().map(|o| o.key.as_str()).collect();
            if item.options.len() < 2 || keys.len() != item.options.len() {
                return Err(anyhow!("question {} needs at least two distinct options", index));
            }
            if !keys.contains(key.as_str()) {
                return Err(anyhow!("question {} correct key {} is not an option", index, key));
            }
        }
        CorrectnessSpec::Keywords {
            keywords,
            pass_ratio,
        } => {
            if keywords.iter().all(|k| k.trim().is_empty()) {
                return Err(anyhow!("question {} has no expected keywords", index));
            }
            if !(*pass_ratio > 0.0 && *pass_ratio <= 1.0) {
                return Err(anyhow!("question {} pass ratio {} out of range", index, pass_ratio));
            }
        }
        CorrectnessSpec::Boolean { .. } => {}
    }
    Ok(())
}

pub fn into_questions(
    request: &GenerationRequest,
    generated: Vec<GeneratedQuestion>,
    default_difficulty: f64,
) -> Result<Vec<Question>> {
    if generated.len() != request.question_count as usize {
        return Err(anyhow!(
            "expected {} questions, got {}",
            request.question_count,
            generated.len()
        ));
    }

    generated
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            check_item(index, &item)?;
            Ok(Question {
                id: Uuid::new_v4().to_string(),
                session_id: request.session_id.clone(),
                position: index as u32,
                question_type: item.question_type,
                category: item.category.trim().to_string(),
                prompt: item.prompt,
                options: item.options,
                difficulty: item
                    .difficulty
                    .filter(|d| d.is_finite())
                    .unwrap_or(default_difficulty),
                grading: item.grading,
            })
        })
        .collect()
}
