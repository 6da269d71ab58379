use axum::{
    http::{header, Method},
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod metrics;
pub mod middlewares;
pub mod models;
pub mod services;
pub mod store;
pub mod utils;

pub use config::Config;
pub use error::{AssessmentError, AssessmentResult};
pub use services::AppState;

pub fn create_router(app_state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::HeaderName::from_static(middlewares::trace::TRACE_ID_HEADER),
        ])
        .allow_origin(tower_http::cors::Any);

    Router::new()
        // Public endpoints (no auth required)
        .route("/health", get(handlers::health_check))
        .route(
            "/metrics",
            get(handlers::metrics_handler)
                .layer(middleware::from_fn(handlers::metrics_auth_middleware)),
        )
        .nest(
            "/api/v1",
            api_routes().layer(middleware::from_fn_with_state(
                app_state.clone(),
                middlewares::auth::auth_middleware,
            )),
        )
        .with_state(app_state)
        .layer(cors)
        .layer(middleware::from_fn(middlewares::metrics::metrics_middleware))
        .layer(middleware::from_fn(
            middlewares::trace::trace_context_middleware,
        ))
        .layer(TraceLayer::new_for_http())
}

fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/assessments/rounds",
            post(handlers::sessions::start_round),
        )
        .route(
            "/assessments/rounds/adaptive",
            post(handlers::sessions::start_adaptive_round),
        )
        .nest("/sessions", sessions_routes())
        .route("/attempts/{attempt_id}", get(handlers::attempts::get_attempt))
        .route(
            "/attempts/{attempt_id}/ranking",
            get(handlers::attempts::get_attempt_ranking),
        )
        .route(
            "/surveys/{survey_id}/leaderboard",
            get(handlers::attempts::get_leaderboard),
        )
        .route("/learners/me/stats", get(handlers::attempts::get_my_stats))
}

fn sessions_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/{id}", get(handlers::sessions::get_session))
        .route("/{id}/answers", post(handlers::sessions::record_answer))
        .route(
            "/{id}/answers/{question_id}/score",
            post(handlers::sessions::score_answer),
        )
        .route("/{id}/complete", post(handlers::sessions::complete_round))
        .route("/{id}/resume", post(handlers::sessions::resume_session))
        .route(
            "/{id}/validation",
            get(handlers::sessions::validate_session),
        )
        .route("/{id}/stream", get(handlers::sse::session_stream))
}
