use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::fmt::init;

use assessment_api::{
    config::{Config, StorageBackend},
    services::{ranking_service::RankingService, ranking_worker::RankingWorker},
    store::{AssessmentStore, MongoStore},
};

/// Standalone periodic ranking recompute, for deployments that keep the
/// API replicas free of background work.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init();

    let config = Config::load()?;
    if config.storage != StorageBackend::Mongo {
        anyhow::bail!("ranking-worker needs the mongo storage backend");
    }

    let store: Arc<dyn AssessmentStore> =
        Arc::new(MongoStore::connect(&config.mongo_uri, &config.mongo_database).await?);
    let service = Arc::new(RankingService::new(store));

    let worker = RankingWorker::new(
        service,
        None,
        Duration::from_secs(config.workers.ranking_interval_secs),
    );
    worker.run().await;

    Ok(())
}
