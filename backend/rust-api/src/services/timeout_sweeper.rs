use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::metrics::SWEEPER_TICKS_TOTAL;
use crate::services::session_service::SessionService;

/// Periodically pauses in-progress sessions whose time window has closed.
pub struct TimeoutSweeper {
    sessions: Arc<SessionService>,
    interval: Duration,
}

impl TimeoutSweeper {
    pub fn new(sessions: Arc<SessionService>, interval: Duration) -> Self {
        Self { sessions, interval }
    }

    pub async fn run(self) {
        tracing::info!(
            "Starting timeout sweeper loop (interval {}s)",
            self.interval.as_secs()
        );

        loop {
            self.run_once().await;
            sleep(self.interval).await;
        }
    }

    pub async fn run_once(&self) -> usize {
        match self.sessions.timeout_sweep(Utc::now()).await {
            Ok(paused) => {
                SWEEPER_TICKS_TOTAL.with_label_values(&["success"]).inc();
                debug!("Timeout sweep paused {} sessions", paused);
                paused
            }
            Err(err) => {
                SWEEPER_TICKS_TOTAL.with_label_values(&["error"]).inc();
                warn!(error = %err, "Timeout sweep failed");
                0
            }
        }
    }
}
