use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::error::AssessmentError;
use crate::metrics::RANKING_WORKER_TICKS_TOTAL;
use crate::services::ranking_service::RankingService;
use crate::utils::retry::{retry_when, RetryConfig};

/// Sender side of the recompute queue. Requests are survey ids.
#[derive(Clone)]
pub struct RankingHandle {
    tx: mpsc::UnboundedSender<String>,
}

impl RankingHandle {
    pub fn request(&self, survey_id: &str) {
        if self.tx.send(survey_id.to_string()).is_err() {
            warn!(
                "Ranking worker is not running; survey {} waits for the periodic recompute",
                survey_id
            );
        }
    }
}

pub fn ranking_channel() -> (RankingHandle, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (RankingHandle { tx }, rx)
}

async fn next_request(requests: &mut Option<mpsc::UnboundedReceiver<String>>) -> Option<String> {
    match requests {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn is_transient(err: &AssessmentError) -> bool {
    matches!(err, AssessmentError::Storage(_))
}

pub struct RankingWorker {
    service: Arc<RankingService>,
    requests: Option<mpsc::UnboundedReceiver<String>>,
    interval: Duration,
    retry: RetryConfig,
}

impl RankingWorker {
    pub fn new(
        service: Arc<RankingService>,
        requests: Option<mpsc::UnboundedReceiver<String>>,
        interval: Duration,
    ) -> Self {
        Self {
            service,
            requests,
            interval,
            retry: RetryConfig::background(),
        }
    }

    /// Serves queued requests and recomputes every survey on each interval tick.
    pub async fn run(mut self) {
        info!(
            "Starting ranking worker loop (interval {}s)",
            self.interval.as_secs()
        );

        let mut ticker = tokio::time::interval(self.interval);
        let mut requests = self.requests.take();

        loop {
            let wake = tokio::select! {
                _ = ticker.tick() => None,
                received = next_request(&mut requests) => Some(received),
            };

            match wake {
                None => self.run_once_all().await,
                Some(Some(first)) => {
                    let mut pending = BTreeSet::from([first]);
                    if let Some(rx) = requests.as_mut() {
                        while let Ok(more) = rx.try_recv() {
                            pending.insert(more);
                        }
                    }
                    self.process(pending).await;
                }
                Some(None) => {
                    warn!("Ranking request channel closed; continuing with periodic recomputes");
                    requests = None;
                }
            }
        }
    }

    /// Recomputes each requested survey once, however many times it was requested.
    pub async fn process(&self, surveys: BTreeSet<String>) {
        for survey_id in surveys {
            self.recompute_with_retry(&survey_id).await;
        }
    }

    async fn recompute_with_retry(&self, survey_id: &str) {
        let service = self.service.clone();
        let result = retry_when(
            self.retry.clone(),
            || {
                let service = service.clone();
                let survey_id = survey_id.to_string();
                async move { service.recompute(&survey_id).await }
            },
            is_transient,
        )
        .await;

        if let Err(err) = result {
            error!(error = %err, "Ranking recompute of survey {} failed", survey_id);
        }
    }

    pub async fn run_once_all(&self) {
        match self.service.recompute_all().await {
            Ok(surveys) => {
                RANKING_WORKER_TICKS_TOTAL
                    .with_label_values(&["success"])
                    .inc();
                info!("Ranking worker tick completed ({} surveys)", surveys);
            }
            Err(err) => {
                RANKING_WORKER_TICKS_TOTAL
                    .with_label_values(&["error"])
                    .inc();
                warn!(error = %err, "Ranking worker tick failed");
            }
        }
    }
}
