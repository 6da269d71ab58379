use axum::{
    extract::{Path, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    Extension,
};
use chrono::Utc;
use futures::stream::{self, Stream};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;

use super::{owned_session, ApiError};
use crate::metrics::SSE_CONNECTIONS_ACTIVE;
use crate::middlewares::auth::JwtClaims;
use crate::models::timer::{RoundClosed, TimeExpired, TimerEvent, TimerTick};
use crate::models::{RoundSession, SessionStatus};
use crate::services::session_service::SessionService;
use crate::services::AppState;

/// SSE endpoint for timer events
/// GET /api/v1/sessions/{id}/stream
pub async fn session_stream(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    owned_session(&state, &claims, &session_id).await?;

    let workers = &state.config.workers;
    let tick_interval = Duration::from_millis(workers.sse_tick_interval_ms.max(1));
    let max_duration = Duration::from_secs(u64::from(workers.sse_max_stream_secs));
    tracing::info!(
        "Client connected to SSE stream: session={}, max_duration={}s, tick_interval={}ms",
        session_id,
        max_duration.as_secs(),
        tick_interval.as_millis()
    );

    let stream = timer_stream(
        state.sessions.clone(),
        session_id,
        tick_interval,
        max_duration,
    );
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Keeps the active-connections gauge in step with the stream's lifetime.
struct ConnectionGuard;

impl ConnectionGuard {
    fn open() -> Self {
        SSE_CONNECTIONS_ACTIVE.inc();
        ConnectionGuard
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        SSE_CONNECTIONS_ACTIVE.dec();
    }
}

struct StreamState {
    sessions: Arc<SessionService>,
    session_id: String,
    opened_at: Instant,
    first: bool,
    finished: bool,
    _guard: ConnectionGuard,
}

/// Event describing the session right now.
pub fn timer_event(session: &RoundSession, now: chrono::DateTime<Utc>) -> TimerEvent {
    match session.status {
        SessionStatus::Completed => TimerEvent::RoundClosed(RoundClosed {
            session_id: session.id.clone(),
            status: session.status,
            timestamp: now,
        }),
        SessionStatus::Paused => TimerEvent::TimeExpired(TimeExpired {
            session_id: session.id.clone(),
            timestamp: now,
            message: "Round paused; resume to continue".to_string(),
        }),
        SessionStatus::InProgress if session.is_expired(now) => {
            TimerEvent::TimeExpired(TimeExpired {
                session_id: session.id.clone(),
                timestamp: now,
                message: "Time limit exceeded".to_string(),
            })
        }
        SessionStatus::InProgress => TimerEvent::TimerTick(TimerTick {
            session_id: session.id.clone(),
            status: session.status,
            remaining_seconds: session.remaining_seconds(now),
            total_seconds: session.time_limit_secs,
            timestamp: now,
        }),
    }
}

/// Polls the session every tick and stops after the first final event,
/// a lookup failure, or `max_duration`.
fn timer_stream(
    sessions: Arc<SessionService>,
    session_id: String,
    tick_interval: Duration,
    max_duration: Duration,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let initial = StreamState {
        sessions,
        session_id,
        opened_at: Instant::now(),
        first: true,
        finished: false,
        _guard: ConnectionGuard::open(),
    };

    stream::unfold(initial, move |mut st| async move {
        if st.finished {
            return None;
        }
        if !st.first {
            sleep(tick_interval).await;
        }
        st.first = false;

        if st.opened_at.elapsed() >= max_duration {
            tracing::info!("SSE stream reached its maximum duration: session={}", st.session_id);
            return None;
        }

        let session = match st.sessions.session(&st.session_id).await {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!("SSE stream stopped: session={}, error={}", st.session_id, e);
                return None;
            }
        };

        let timer = timer_event(&session, Utc::now());
        if timer.is_final() {
            tracing::info!(
                "SSE stream closing: session={}, event={}",
                st.session_id,
                timer.event_name()
            );
            st.finished = true;
        }

        let event = Event::default()
            .event(timer.event_name())
            .data(timer.to_sse_data());
        Some((Ok(event), st))
    })
}
