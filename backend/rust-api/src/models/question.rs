use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    MultipleChoice,
    TrueFalse,
    ShortAnswer,
}

impl QuestionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionType::MultipleChoice => "multiple_choice",
            QuestionType::TrueFalse => "true_false",
            QuestionType::ShortAnswer => "short_answer",
        }
    }
}

/// What counts as a correct answer; the variant must agree with the question type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CorrectnessSpec {
    Key {
        key: String,
    },
    Boolean {
        value: bool,
    },
    Keywords {
        keywords: Vec<String>,
        #[serde(default = "default_pass_ratio")]
        pass_ratio: f64,
    },
}

fn default_pass_ratio() -> f64 {
    0.6
}

impl CorrectnessSpec {
    pub fn matches_type(&self, question_type: QuestionType) -> bool {
        matches!(
            (self, question_type),
            (CorrectnessSpec::Key { .. }, QuestionType::MultipleChoice)
                | (CorrectnessSpec::Boolean { .. }, QuestionType::TrueFalse)
                | (CorrectnessSpec::Keywords { .. }, QuestionType::ShortAnswer)
        )
    }
}

/// Uniform grading schema shape returned by the generation agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradingSchema {
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    pub correct: CorrectnessSpec,
    #[serde(default)]
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub key: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub session_id: String,
    pub position: u32,
    pub question_type: QuestionType,
    pub category: String,
    pub prompt: String,
    #[serde(default)]
    pub options: Vec<QuestionOption>,
    pub difficulty: f64,
    pub grading: GradingSchema,
}

/// Question as shown to the learner, without the grading schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionView {
    pub id: String,
    pub position: u32,
    pub question_type: QuestionType,
    pub category: String,
    pub prompt: String,
    pub options: Vec<QuestionOption>,
    pub difficulty: f64,
}

impl From<&Question> for QuestionView {
    fn from(question: &Question) -> Self {
        Self {
            id: question.id.clone(),
            position: question.position,
            question_type: question.question_type,
            category: question.category.clone(),
            prompt: question.prompt.clone(),
            options: question.options.clone(),
            difficulty: question.difficulty,
        }
    }
}
