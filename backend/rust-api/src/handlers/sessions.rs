use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use std::sync::Arc;

use super::{owned_session, require_id, ApiError};
use crate::extractors::ValidatedJson;
use crate::middlewares::auth::JwtClaims;
use crate::models::{AdaptiveRoundRequest, RecordAnswerRequest, StartRoundRequest};
use crate::services::AppState;

pub async fn start_round(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    ValidatedJson(req): ValidatedJson<StartRoundRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_id("attempt_id", &req.attempt_id)?;
    require_id("survey_id", &req.survey_id)?;
    tracing::info!(
        "Starting round {} of attempt {} for user {}",
        req.round_index,
        req.attempt_id,
        claims.sub
    );

    let response = state.sessions.start_round(&claims.sub, req).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn start_adaptive_round(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    ValidatedJson(req): ValidatedJson<AdaptiveRoundRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_id("attempt_id", &req.attempt_id)?;
    tracing::info!(
        "Starting adaptive round after round {} of attempt {} for user {}",
        req.from_round,
        req.attempt_id,
        claims.sub
    );

    let response = state.sessions.start_adaptive_round(&claims.sub, req).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    owned_session(&state, &claims, &session_id).await?;
    let view = state.sessions.get_session(&session_id).await?;
    Ok(Json(view))
}

pub async fn record_answer(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(session_id): Path<String>,
    ValidatedJson(req): ValidatedJson<RecordAnswerRequest>,
) -> Result<impl IntoResponse, ApiError> {
    owned_session(&state, &claims, &session_id).await?;
    require_id("question_id", &req.question_id)?;

    let response = state.sessions.record_answer(&session_id, req).await?;
    Ok(Json(response))
}

pub async fn score_answer(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path((session_id, question_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    owned_session(&state, &claims, &session_id).await?;
    require_id("question_id", &question_id)?;

    let outcome = state.sessions.score_answer(&session_id, &question_id).await?;
    Ok(Json(outcome))
}

pub async fn complete_round(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    owned_session(&state, &claims, &session_id).await?;
    tracing::info!("Completing session: {}", session_id);

    let result = state.sessions.complete_round(&session_id).await?;
    Ok(Json(result))
}

pub async fn resume_session(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    owned_session(&state, &claims, &session_id).await?;

    let resume = state.sessions.resume(&session_id).await?;
    Ok(Json(resume))
}

pub async fn validate_session(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    owned_session(&state, &claims, &session_id).await?;

    let report = state.sessions.validate_session(&session_id).await?;
    if !report.is_consistent() {
        tracing::warn!(
            "Session {} is inconsistent: {:?}",
            session_id,
            report.issues
        );
    }
    Ok(Json(report))
}
