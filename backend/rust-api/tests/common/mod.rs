#![allow(dead_code)]

use assessment_api::{
    config::Config,
    create_router,
    middlewares::auth::JwtService,
    models::{CorrectnessSpec, GradingSchema, QuestionType},
    services::question_generator::{GeneratedQuestion, GenerationRequest, QuestionGenerator},
    store::{AssessmentStore, MemoryStore},
    AppState,
};
use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

pub const JWT_SECRET: &str = "test-secret";

/// Generator returning true/false questions whose categories cycle through
/// `categories`. The correct answer to every question is "true".
pub struct StubGenerator {
    categories: Vec<String>,
    failing: AtomicBool,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl StubGenerator {
    pub fn new(categories: &[&str]) -> Self {
        Self {
            categories: categories.iter().map(|c| c.to_string()).collect(),
            failing: AtomicBool::new(false),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl QuestionGenerator for StubGenerator {
    async fn generate(&self, request: &GenerationRequest) -> anyhow::Result<Vec<GeneratedQuestion>> {
        self.requests.lock().unwrap().push(request.clone());
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("generation agent is down");
        }

        Ok((0..request.question_count as usize)
            .map(|i| GeneratedQuestion {
                question_type: QuestionType::TrueFalse,
                category: self.categories[i % self.categories.len()].clone(),
                prompt: format!("Statement {} of round {}", i + 1, request.round_index),
                options: vec![],
                difficulty: Some(request.params.target_difficulty),
                grading: GradingSchema {
                    question_type: QuestionType::TrueFalse,
                    correct: CorrectnessSpec::Boolean { value: true },
                    explanation: "Every statement is true".to_string(),
                },
            })
            .collect())
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    pub store: Arc<dyn AssessmentStore>,
    pub generator: Arc<StubGenerator>,
}

pub fn create_test_app() -> TestApp {
    create_test_app_with(|_| {})
}

pub fn create_test_app_with(configure: impl FnOnce(&mut Config)) -> TestApp {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    let mut config = Config::in_memory(JWT_SECRET);
    configure(&mut config);

    let store: Arc<dyn AssessmentStore> = Arc::new(MemoryStore::new());
    let generator = Arc::new(StubGenerator::new(&["LLM", "RAG", "Prompting"]));
    let (state, worker) = AppState::assemble(config, store.clone(), generator.clone(), None);
    tokio::spawn(worker.run());

    let state = Arc::new(state);
    TestApp {
        router: create_router(state.clone()),
        state,
        store,
        generator,
    }
}

pub fn token_for(sub: &str) -> String {
    JwtService::new(JWT_SECRET)
        .issue(sub, "learner", 3600)
        .expect("token")
}

/// Sends one request through the router and returns status plus JSON body
/// (`Value::Null` for an empty or non-JSON body).
pub async fn call(
    app: &TestApp,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

/// Starts a round over HTTP and returns `(session_id, question_ids)`.
pub async fn start_round(
    app: &TestApp,
    token: &str,
    attempt_id: &str,
    round_index: u32,
    question_count: u32,
) -> (String, Vec<String>) {
    let (status, body) = call(
        app,
        "POST",
        "/api/v1/assessments/rounds",
        Some(token),
        Some(serde_json::json!({
            "attempt_id": attempt_id,
            "survey_id": "ai-basics",
            "round_index": round_index,
            "question_count": question_count,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "start round failed: {}", body);

    let session_id = body["session_id"].as_str().unwrap().to_string();
    let question_ids = body["questions"]
        .as_array()
        .unwrap()
        .iter()
        .map(|q| q["id"].as_str().unwrap().to_string())
        .collect();
    (session_id, question_ids)
}

pub async fn answer(
    app: &TestApp,
    token: &str,
    session_id: &str,
    question_id: &str,
    answer: &str,
) -> (StatusCode, Value) {
    call(
        app,
        "POST",
        &format!("/api/v1/sessions/{}/answers", session_id),
        Some(token),
        Some(serde_json::json!({ "question_id": question_id, "answer": answer })),
    )
    .await
}
