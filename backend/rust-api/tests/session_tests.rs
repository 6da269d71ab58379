use axum::http::StatusCode;
use serde_json::json;
use uuid::Uuid;

mod common;

use common::{answer, call, create_test_app, start_round, token_for};

#[tokio::test]
async fn test_requests_without_token_are_unauthorized() {
    let app = create_test_app();

    let (status, _) = call(
        &app,
        "POST",
        "/api/v1/assessments/rounds",
        None,
        Some(json!({ "attempt_id": "a-1", "survey_id": "ai-basics" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = call(&app, "GET", "/api/v1/learners/me/stats", Some("not-a-jwt"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_start_round_returns_questions_without_answer_keys() {
    let app = create_test_app();
    let token = token_for("learner-1");

    let (status, body) = call(
        &app,
        "POST",
        "/api/v1/assessments/rounds",
        Some(&token),
        Some(json!({ "attempt_id": "attempt-1", "survey_id": "ai-basics" })),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED, "body: {}", body);
    assert_eq!(body["round_index"], 1);
    assert_eq!(body["status"], "in_progress");
    assert_eq!(body["time_limit_seconds"], 1200);
    let questions = body["questions"].as_array().unwrap();
    assert_eq!(questions.len(), 5);
    assert!(questions[0].get("grading").is_none());

    let session_id = body["session_id"].as_str().unwrap();
    let (status, view) = call(
        &app,
        "GET",
        &format!("/api/v1/sessions/{}", session_id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["answered_count"], 0);
    assert_eq!(view["session"]["started_at"], serde_json::Value::Null);
    assert_eq!(view["questions"].as_array().unwrap().len(), 5);
}

#[tokio::test]
async fn test_session_of_another_learner_is_forbidden() {
    let app = create_test_app();
    let owner = token_for("learner-1");
    let other = token_for("learner-2");
    let (session_id, question_ids) = start_round(&app, &owner, "attempt-1", 1, 3).await;

    let (status, _) = call(
        &app,
        "GET",
        &format!("/api/v1/sessions/{}", session_id),
        Some(&other),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = answer(&app, &other, &session_id, &question_ids[0], "true").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_malformed_and_unknown_identifiers() {
    let app = create_test_app();
    let token = token_for("learner-1");

    let (status, _) = call(&app, "GET", "/api/v1/sessions/not-a-uuid", Some(&token), None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = call(
        &app,
        "GET",
        &format!("/api/v1/sessions/{}", Uuid::new_v4()),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call(
        &app,
        "POST",
        "/api/v1/assessments/rounds",
        Some(&token),
        Some(json!({ "attempt_id": "bad id!", "survey_id": "ai-basics" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = call(&app, "GET", "/api/v1/attempts/missing-attempt", Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_body_is_bad_request() {
    let app = create_test_app();
    let token = token_for("learner-1");

    let (status, body) = call(
        &app,
        "POST",
        "/api/v1/assessments/rounds",
        Some(&token),
        Some(json!({ "survey_id": "ai-basics" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], 400);

    let (status, _) = call(
        &app,
        "POST",
        "/api/v1/assessments/rounds",
        Some(&token),
        Some(json!({ "attempt_id": "a-1", "survey_id": "ai-basics", "question_count": 500 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_duplicate_or_regressing_round_conflicts() {
    let app = create_test_app();
    let token = token_for("learner-1");
    start_round(&app, &token, "attempt-1", 2, 3).await;

    for round_index in [2, 1] {
        let (status, _) = call(
            &app,
            "POST",
            "/api/v1/assessments/rounds",
            Some(&token),
            Some(json!({
                "attempt_id": "attempt-1",
                "survey_id": "ai-basics",
                "round_index": round_index,
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    // Another learner may use the same attempt id
    let other = token_for("learner-2");
    start_round(&app, &other, "attempt-1", 1, 3).await;
}

#[tokio::test]
async fn test_round_beyond_expected_rounds_is_bad_request() {
    let app = create_test_app();
    let token = token_for("learner-1");

    let (status, body) = call(
        &app,
        "POST",
        "/api/v1/assessments/rounds",
        Some(&token),
        Some(json!({
            "attempt_id": "attempt-1",
            "survey_id": "ai-basics",
            "round_index": 7,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "body: {}", body);

    // The rejected round must not block the real ones
    start_round(&app, &token, "attempt-1", 1, 3).await;
    start_round(&app, &token, "attempt-1", 2, 3).await;
}

#[tokio::test]
async fn test_generation_failure_is_service_unavailable() {
    let app = create_test_app();
    let token = token_for("learner-1");
    app.generator.set_failing(true);

    let (status, body) = call(
        &app,
        "POST",
        "/api/v1/assessments/rounds",
        Some(&token),
        Some(json!({ "attempt_id": "attempt-1", "survey_id": "ai-basics" })),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], 503);

    // Nothing was persisted, so the slot is still free
    app.generator.set_failing(false);
    start_round(&app, &token, "attempt-1", 1, 3).await;
}

#[tokio::test]
async fn test_answers_score_and_complete() {
    let app = create_test_app();
    let token = token_for("learner-1");
    let (session_id, question_ids) = start_round(&app, &token, "attempt-1", 1, 3).await;

    let (status, body) = answer(&app, &token, &session_id, &question_ids[0], "true").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["applied"], true);
    assert_eq!(body["answered_count"], 1);

    let (status, body) = answer(&app, &token, &session_id, &question_ids[1], "false").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["answered_count"], 2);

    let (status, body) = call(
        &app,
        "POST",
        &format!(
            "/api/v1/sessions/{}/answers/{}/score",
            session_id, question_ids[0]
        ),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_correct"], true);
    assert_eq!(body["score"], 100);

    let (status, _) = call(
        &app,
        "POST",
        &format!(
            "/api/v1/sessions/{}/answers/{}/score",
            session_id, question_ids[2]
        ),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let complete_uri = format!("/api/v1/sessions/{}/complete", session_id);
    let (status, first) = call(&app, "POST", &complete_uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["correct_count"], 1);
    assert_eq!(first["total_count"], 3);
    assert_eq!(first["score"], 33);
    assert_eq!(first["wrong_categories"], json!({ "RAG": 1, "Prompting": 1 }));

    let (status, second) = call(&app, "POST", &complete_uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first, second);

    let (status, body) = answer(&app, &token, &session_id, &question_ids[2], "true").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["status"], 409);

    let (status, _) = call(
        &app,
        "POST",
        &format!("/api/v1/sessions/{}/resume", session_id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_answer_to_unknown_question_is_not_found() {
    let app = create_test_app();
    let token = token_for("learner-1");
    let (session_id, _) = start_round(&app, &token, "attempt-1", 1, 3).await;

    let (status, _) = answer(&app, &token, &session_id, "no-such-question", "true").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = answer(&app, &token, &session_id, "bad id!", "true").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_resume_reports_progress() {
    let app = create_test_app();
    let token = token_for("learner-1");
    let (session_id, question_ids) = start_round(&app, &token, "attempt-1", 1, 3).await;

    answer(&app, &token, &session_id, &question_ids[0], "true").await;
    answer(&app, &token, &session_id, &question_ids[2], "true").await;

    let (status, body) = call(
        &app,
        "POST",
        &format!("/api/v1/sessions/{}/resume", session_id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "in_progress");
    assert_eq!(body["answered_count"], 2);
    assert_eq!(body["next_question_index"], 1);
    assert_eq!(body["answers"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_validation_report_flags_unfinished_session() {
    let app = create_test_app();
    let token = token_for("learner-1");
    let (session_id, question_ids) = start_round(&app, &token, "attempt-1", 1, 2).await;

    for question_id in &question_ids {
        answer(&app, &token, &session_id, question_id, "true").await;
    }

    let (status, body) = call(
        &app,
        "GET",
        &format!("/api/v1/sessions/{}/validation", session_id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["has_result"], false);
    assert_eq!(body["issues"], json!(["answered_not_completed"]));
}

#[tokio::test]
async fn test_adaptive_round_without_prior_result_is_bad_request() {
    let app = create_test_app();
    let token = token_for("learner-1");
    let (session_id, question_ids) = start_round(&app, &token, "attempt-1", 1, 3).await;
    answer(&app, &token, &session_id, &question_ids[0], "true").await;

    let (status, body) = call(
        &app,
        "POST",
        "/api/v1/assessments/rounds/adaptive",
        Some(&token),
        Some(json!({ "attempt_id": "attempt-1", "from_round": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "body: {}", body);
}

#[tokio::test]
async fn test_adaptive_round_lowers_difficulty_after_weak_round() {
    let app = create_test_app();
    let token = token_for("learner-1");
    // Categories cycle LLM, RAG, Prompting, LLM, RAG
    let (session_id, question_ids) = start_round(&app, &token, "attempt-1", 1, 5).await;

    for (question_id, reply) in question_ids.iter().zip(["true", "false", "true", "false", "false"]) {
        answer(&app, &token, &session_id, question_id, reply).await;
    }
    let (status, result) = call(
        &app,
        "POST",
        &format!("/api/v1/sessions/{}/complete", session_id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["score"], 40);
    assert_eq!(result["wrong_categories"], json!({ "LLM": 1, "RAG": 2 }));

    let (status, body) = call(
        &app,
        "POST",
        "/api/v1/assessments/rounds/adaptive",
        Some(&token),
        Some(json!({ "attempt_id": "attempt-1", "from_round": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "body: {}", body);
    assert_eq!(body["round_index"], 2);
    assert_eq!(body["params"]["target_difficulty"], 2.5);
    assert_eq!(body["params"]["difficulty_delta"], -0.5);
    assert_eq!(body["params"]["priority_categories"], json!(["RAG"]));

    let requests = app.generator.requests();
    let adaptive = requests.last().unwrap();
    assert_eq!(adaptive.round_index, 2);
    assert_eq!(adaptive.prior_answers.len(), 5);
    assert_eq!(adaptive.prior_answers[1].is_correct, Some(false));
}

#[tokio::test]
async fn test_health_and_metrics_auth() {
    let app = create_test_app();

    let (status, body) = call(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "assessment-api");

    let (status, _) = call(&app, "GET", "/metrics", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
