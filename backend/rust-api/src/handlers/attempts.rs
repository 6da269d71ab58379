use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Extension, Json,
};
use serde::Deserialize;
use std::sync::Arc;

use super::{require_id, ApiError};
use crate::error::AssessmentError;
use crate::middlewares::auth::JwtClaims;
use crate::services::AppState;

#[derive(Debug, Deserialize)]
pub struct LeaderboardQuery {
    pub limit: Option<usize>,
}

pub async fn get_attempt(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(attempt_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    require_id("attempt_id", &attempt_id)?;

    let attempt = state
        .store
        .attempt(&claims.sub, &attempt_id)
        .await?
        .ok_or_else(|| AssessmentError::not_found(format!("attempt {}", attempt_id)))?;
    Ok(Json(attempt))
}

pub async fn get_attempt_ranking(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(attempt_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    require_id("attempt_id", &attempt_id)?;

    let ranking = state.ranking.ranking(&claims.sub, &attempt_id).await?;
    Ok(Json(ranking))
}

pub async fn get_leaderboard(
    State(state): State<Arc<AppState>>,
    Path(survey_id): Path<String>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<impl IntoResponse, ApiError> {
    require_id("survey_id", &survey_id)?;

    let limit = query.limit.unwrap_or(10).clamp(1, 100);
    let entries = state.ranking.leaderboard(&survey_id, limit).await?;
    Ok(Json(entries))
}

pub async fn get_my_stats(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
) -> Result<impl IntoResponse, ApiError> {
    let stats = state.ranking.learner_stats(&claims.sub).await?;
    Ok(Json(stats))
}
