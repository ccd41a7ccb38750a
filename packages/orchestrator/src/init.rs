//! Startup wiring: configuration from the environment and system bootstrap.

use std::sync::Arc;

use db::{DbConfig, DbError, repositories::JobRepository};
use storage::{Storage, StorageConfig, StorageError};
use thiserror::Error;
use tokio::sync::broadcast;
use training_core::{JobError, PoolConfig};

use crate::invoker::{ProcessTrainer, TrainerConfig};
use crate::lifecycle::JobManager;
use crate::pool::WorkerPool;
use crate::trainer::Trainer;

/// Capacity of the lifecycle event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Errors while bringing the system up.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Db(#[from] DbError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Worker pool error: {0}")]
    Pool(#[source] JobError),
}

/// Everything needed to start a [`JobManager`].
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub pool: PoolConfig,
    pub db: DbConfig,
    pub storage: StorageConfig,
    pub trainer: TrainerConfig,
}

/// In-memory database and object store with the default trainer command.
impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            db: DbConfig::memory(),
            storage: StorageConfig::memory(),
            trainer: TrainerConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Read every section from the environment.
    ///
    /// Pool sizing comes from `TRAINQ_CONCURRENCY` and `TRAINQ_MAX_QUEUE`; the
    /// other sections read their own variables.
    pub fn from_env() -> Result<Self, BootstrapError> {
        let mut pool = PoolConfig::default();
        if let Some(concurrency) = env_usize("TRAINQ_CONCURRENCY")? {
            pool = pool.with_concurrency(concurrency);
        }
        if let Some(max) = env_usize("TRAINQ_MAX_QUEUE")? {
            pool = pool.with_max_queue_size(max);
        }

        Ok(Self {
            pool,
            db: DbConfig::from_env(),
            storage: StorageConfig::from_env()?,
            trainer: TrainerConfig::from_env(),
        })
    }
}

fn env_usize(key: &str) -> Result<Option<usize>, BootstrapError> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| BootstrapError::Config(format!("{} must be a positive integer", key))),
        _ => Ok(None),
    }
}

/// Connect the database and object store, then start the pool with the
/// external trainer process.
pub async fn bootstrap(config: OrchestratorConfig) -> Result<JobManager, BootstrapError> {
    let trainer = Arc::new(ProcessTrainer::new(config.trainer.clone()));
    bootstrap_with_trainer(config, trainer).await
}

/// Like [`bootstrap`] but with any [`Trainer`].
pub async fn bootstrap_with_trainer(
    config: OrchestratorConfig,
    trainer: Arc<dyn Trainer>,
) -> Result<JobManager, BootstrapError> {
    tracing::info!("Initializing training orchestrator...");

    let db = db::init(config.db).await?;
    let store = Arc::new(JobRepository::new(db));

    let artifacts = Arc::new(Storage::new(config.storage).await?);

    let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
    let pool = WorkerPool::start(config.pool, trainer, store.clone(), event_tx)
        .await
        .map_err(BootstrapError::Pool)?;

    tracing::info!("Training orchestrator initialized");
    Ok(JobManager::new(store, artifacts, pool))
}
