use std::sync::Arc;
use std::time::Duration;

use redis::aio::ConnectionManager;

use crate::config::{Config, StorageBackend};
use crate::store::{AssessmentStore, MemoryStore, MongoStore};

use self::attempt_aggregator::AttemptAggregator;
use self::grading::RuleGrader;
use self::question_generator::{HttpQuestionGenerator, QuestionGenerator};
use self::ranking_service::RankingService;
use self::ranking_worker::{ranking_channel, RankingWorker};
use self::session_lock::{RedisLease, SessionLocks};
use self::session_service::SessionService;

pub mod adaptive;
pub mod attempt_aggregator;
pub mod grading;
pub mod question_generator;
pub mod ranking_service;
pub mod ranking_worker;
pub mod round_scorer;
pub mod session_lock;
pub mod session_service;
pub mod timeout_sweeper;

pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn AssessmentStore>,
    pub sessions: Arc<SessionService>,
    pub ranking: Arc<RankingService>,
    pub redis: Option<ConnectionManager>,
}

impl AppState {
    /// Wires the services over a store. The returned worker must be spawned
    /// for ranking requests to be served.
    pub fn assemble(
        config: Config,
        store: Arc<dyn AssessmentStore>,
        generator: Arc<dyn QuestionGenerator>,
        redis: Option<ConnectionManager>,
    ) -> (Self, RankingWorker) {
        let (ranking_handle, ranking_requests) = ranking_channel();
        let ranking = Arc::new(RankingService::new(store.clone()));
        let aggregator = Arc::new(AttemptAggregator::new(
            store.clone(),
            config.assessment.expected_rounds,
            ranking_handle,
        ));

        let lease = match (&redis, config.assessment.distributed_locks) {
            (Some(conn), true) => Some(RedisLease::new(conn.clone())),
            _ => None,
        };

        let sessions = Arc::new(SessionService::new(
            store.clone(),
            generator,
            Arc::new(RuleGrader),
            aggregator,
            SessionLocks::new(lease),
            config.assessment.clone(),
        ));

        let worker = RankingWorker::new(
            ranking.clone(),
            Some(ranking_requests),
            Duration::from_secs(config.workers.ranking_interval_secs),
        );

        let state = Self {
            config,
            store,
            sessions,
            ranking,
            redis,
        };
        (state, worker)
    }

    /// Connects the configured backends and assembles the state.
    pub async fn connect(config: Config) -> anyhow::Result<(Self, RankingWorker)> {
        let store: Arc<dyn AssessmentStore> = match config.storage {
            StorageBackend::Mongo => {
                let store = MongoStore::connect(&config.mongo_uri, &config.mongo_database).await?;
                tracing::info!("MongoDB connected");
                Arc::new(store)
            }
            StorageBackend::Memory => {
                tracing::warn!("Using in-memory storage; data is lost on restart");
                Arc::new(MemoryStore::new())
            }
        };

        let redis = if config.assessment.distributed_locks {
            Some(connect_redis(&config.redis_uri).await?)
        } else {
            None
        };

        let generator = Arc::new(HttpQuestionGenerator::new(config.generator_api_url.clone()));
        Ok(Self::assemble(config, store, generator, redis))
    }
}

pub async fn connect_redis(uri: &str) -> anyhow::Result<ConnectionManager> {
    tracing::info!("Attempting to connect to Redis...");
    let client = redis::Client::open(uri)?;

    let redis = tokio::time::timeout(Duration::from_secs(30), ConnectionManager::new(client))
        .await
        .map_err(|_| anyhow::anyhow!("Redis connection timeout after 30s"))??;

    let mut conn = redis.clone();
    tokio::time::timeout(
        Duration::from_secs(5),
        redis::cmd("PING").query_async::<String>(&mut conn),
    )
    .await
    .map_err(|_| anyhow::anyhow!("Redis PING timeout after 5s"))??;

    tracing::info!("Redis connection established successfully");
    Ok(redis)
}
