use assessment_api::models::{RoundResult, SessionStatus, StartRoundRequest};
use axum::http::StatusCode;
use chrono::Utc;
use serde_json::json;
use std::collections::BTreeMap;

mod common;

use common::{answer, call, create_test_app, start_round, token_for, TestApp};

/// Answers the first `correct` questions with "true", the rest with "false".
async fn answer_round(app: &TestApp, token: &str, session_id: &str, question_ids: &[String], correct: usize) {
    for (i, question_id) in question_ids.iter().enumerate() {
        let reply = if i < correct { "true" } else { "false" };
        let (status, _) = answer(app, token, session_id, question_id, reply).await;
        assert_eq!(status, StatusCode::OK);
    }
}

async fn complete(app: &TestApp, token: &str, session_id: &str) -> serde_json::Value {
    let (status, body) = call(
        app,
        "POST",
        &format!("/api/v1/sessions/{}/complete", session_id),
        Some(token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "complete failed: {}", body);
    body
}

/// Runs a whole two-round attempt with the given correct counts out of 4.
async fn finish_attempt(app: &TestApp, learner: &str, attempt_id: &str, correct: [usize; 2]) {
    let token = token_for(learner);
    for (round, correct) in correct.into_iter().enumerate() {
        let (session_id, question_ids) =
            start_round(app, &token, attempt_id, round as u32 + 1, 4).await;
        answer_round(app, &token, &session_id, &question_ids, correct).await;
        complete(app, &token, &session_id).await;
    }
}

#[tokio::test]
async fn test_attempt_waits_for_every_round_result() {
    let app = create_test_app();
    let token = token_for("learner-1");

    let (round1, round1_questions) = start_round(&app, &token, "attempt-1", 1, 4).await;
    answer_round(&app, &token, &round1, &round1_questions, 4).await;

    let (round2, round2_questions) = start_round(&app, &token, "attempt-1", 2, 4).await;
    answer_round(&app, &token, &round2, &round2_questions, 2).await;
    complete(&app, &token, &round2).await;

    let (status, _) = call(&app, "GET", "/api/v1/attempts/attempt-1", Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    complete(&app, &token, &round1).await;

    let (status, attempt) = call(&app, "GET", "/api/v1/attempts/attempt-1", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(attempt["final_score"], 75.0);
    assert_eq!(attempt["final_grade"], "C");
    assert_eq!(attempt["survey_id"], "ai-basics");
    let rounds = attempt["rounds"].as_array().unwrap();
    assert_eq!(rounds.len(), 2);
    assert_eq!(rounds[0]["round_index"], 1);
    assert_eq!(rounds[0]["score"], 100);
    assert_eq!(rounds[1]["score"], 50);
}

#[tokio::test]
async fn test_repeated_completion_keeps_a_single_attempt() {
    let app = create_test_app();
    finish_attempt(&app, "learner-1", "attempt-1", [4, 4]).await;

    let token = token_for("learner-1");
    let sessions = app
        .store
        .sessions_for_attempt("learner-1", "attempt-1")
        .await
        .unwrap();
    for session in &sessions {
        complete(&app, &token, &session.id).await;
    }

    let attempts = app.store.attempts_for_owner("learner-1").await.unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].final_score, 100.0);
}

#[tokio::test]
async fn test_attempts_are_private_to_their_owner() {
    let app = create_test_app();
    finish_attempt(&app, "learner-1", "attempt-1", [3, 3]).await;

    let other = token_for("learner-2");
    let (status, _) = call(&app, "GET", "/api/v1/attempts/attempt-1", Some(&other), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_ranking_leaderboard_and_stats() {
    let app = create_test_app();
    finish_attempt(&app, "learner-1", "attempt-1", [4, 2]).await;
    finish_attempt(&app, "learner-2", "attempt-9", [4, 4]).await;

    let token = token_for("learner-1");
    let (status, ranking) = call(
        &app,
        "GET",
        "/api/v1/attempts/attempt-1/ranking",
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ranking["rank"], 2);
    assert_eq!(ranking["percentile"], 50.0);
    assert_eq!(ranking["total_ranked"], 2);

    let (status, board) = call(
        &app,
        "GET",
        "/api/v1/surveys/ai-basics/leaderboard",
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let entries = board.as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["owner_id"], "learner-2");
    assert_eq!(entries[0]["rank"], 1);
    assert_eq!(entries[1]["owner_id"], "learner-1");

    let (_, top) = call(
        &app,
        "GET",
        "/api/v1/surveys/ai-basics/leaderboard?limit=1",
        Some(&token),
        None,
    )
    .await;
    assert_eq!(top.as_array().unwrap().len(), 1);

    let (status, stats) = call(&app, "GET", "/api/v1/learners/me/stats", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["owner_id"], "learner-1");
    assert_eq!(stats["attempts_finalized"], 1);
    assert_eq!(stats["rounds_scored"], 2);
    assert_eq!(stats["best_final_score"], 75.0);
    assert_eq!(stats["average_round_score"], 75.0);
    // Round 2 missed questions 3 and 4: Prompting, LLM
    assert_eq!(stats["weak_categories"], json!({ "Prompting": 1, "LLM": 1 }));
}

#[tokio::test]
async fn test_aggregation_ignores_session_status() {
    let app = create_test_app();
    let sessions = &app.state.sessions;

    let mut session_ids = Vec::new();
    for round_index in 1..=2 {
        let started = sessions
            .start_round(
                "learner-1",
                StartRoundRequest {
                    attempt_id: "attempt-1".to_string(),
                    survey_id: "ai-basics".to_string(),
                    round_index,
                    question_count: Some(2),
                    target_difficulty: None,
                    domain: None,
                },
            )
            .await
            .unwrap();
        session_ids.push(started.session_id);
    }

    // Results recorded while both sessions are still active
    for (i, session_id) in session_ids.iter().enumerate() {
        let result = RoundResult {
            session_id: session_id.clone(),
            owner_id: "learner-1".to_string(),
            attempt_id: "attempt-1".to_string(),
            survey_id: "ai-basics".to_string(),
            round_index: i as u32 + 1,
            score: 80,
            correct_count: 4,
            total_count: 5,
            wrong_categories: BTreeMap::from([("LLM".to_string(), 1)]),
            difficulty: 3.0,
            created_at: Utc::now(),
        };
        app.store.insert_round_result(&result).await.unwrap();
    }

    let stats = app.state.ranking.learner_stats("learner-1").await.unwrap();
    assert_eq!(stats.rounds_scored, 2);

    // Completion finds the stored result, closes the session and publishes it
    sessions.complete_round(&session_ids[1]).await.unwrap();
    let session = sessions.session(&session_ids[1]).await.unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(
        sessions.session(&session_ids[0]).await.unwrap().status,
        SessionStatus::InProgress
    );

    let attempt = app
        .store
        .attempt("learner-1", "attempt-1")
        .await
        .unwrap()
        .expect("attempt finalized from results alone");
    assert_eq!(attempt.final_score, 80.0);
    assert_eq!(attempt.rounds.len(), 2);
}
