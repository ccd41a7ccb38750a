#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use tokio::sync::{Mutex, Semaphore, broadcast};

use db::{DbConfig, repositories::JobRepository};
use orchestrator::{
    EVENT_CHANNEL_CAPACITY, FnTrainer, JobManager, Trainer, TrainerError, TrainerFuture,
    TrainerOutput, WorkerPool,
};
use storage::{Storage, StorageConfig};
use training_core::{
    ArtifactError, ArtifactKind, ArtifactStore, JobEvent, JobFilter, JobId, JobRecord, JobStatus,
    JobStore, PageRequest, PoolConfig, RecordMutator, StoreError, TrainingMetadata, mutator,
};

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

pub const WAIT: Duration = Duration::from_secs(10);

pub async fn setup_store() -> Result<Arc<JobRepository>, Box<dyn std::error::Error>> {
    let db = db::init(DbConfig::memory()).await?;
    Ok(Arc::new(JobRepository::new(db)))
}

pub async fn memory_storage() -> Result<Arc<Storage>, Box<dyn std::error::Error>> {
    Ok(Arc::new(Storage::new(StorageConfig::memory()).await?))
}

/// A manager over a fresh in-memory store and object store.
pub async fn setup_manager(
    config: PoolConfig,
    trainer: Arc<dyn Trainer>,
) -> Result<(JobManager, Arc<JobRepository>), Box<dyn std::error::Error>> {
    let artifacts = memory_storage().await?;
    setup_manager_with(config, trainer, artifacts).await
}

pub async fn setup_manager_with(
    config: PoolConfig,
    trainer: Arc<dyn Trainer>,
    artifacts: Arc<dyn ArtifactStore>,
) -> Result<(JobManager, Arc<JobRepository>), Box<dyn std::error::Error>> {
    let store = setup_store().await?;
    let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
    let pool = WorkerPool::start(config, trainer, store.clone(), event_tx).await?;
    Ok((JobManager::new(store.clone(), artifacts, pool), store))
}

/// Record store whose writes fail whenever they would complete a job.
pub struct FailOnCompleteStore {
    pub inner: Arc<JobRepository>,
}

impl JobStore for FailOnCompleteStore {
    fn create(&self, record: JobRecord) -> BoxFuture<'_, Result<JobRecord, StoreError>> {
        JobStore::create(self.inner.as_ref(), record)
    }

    fn get(&self, id: JobId) -> BoxFuture<'_, Result<JobRecord, StoreError>> {
        JobStore::get(self.inner.as_ref(), id)
    }

    fn update(
        &self,
        id: JobId,
        edit: RecordMutator,
    ) -> BoxFuture<'_, Result<JobRecord, StoreError>> {
        Box::pin(async move {
            let mut next = JobStore::get(self.inner.as_ref(), id).await?;
            edit(&mut next)?;
            if next.status == JobStatus::Completed {
                return Err(StoreError::Backend("disk full".into()));
            }
            JobStore::update(
                self.inner.as_ref(),
                id,
                mutator(move |record| {
                    *record = next;
                    Ok(())
                }),
            )
            .await
        })
    }

    fn delete(&self, id: JobId) -> BoxFuture<'_, Result<(), StoreError>> {
        JobStore::delete(self.inner.as_ref(), id)
    }

    fn list(
        &self,
        filter: JobFilter,
        page: PageRequest,
    ) -> BoxFuture<'_, Result<(Vec<JobRecord>, u64), StoreError>> {
        JobStore::list(self.inner.as_ref(), filter, page)
    }
}

/// A manager whose store refuses to persist completed runs.
pub async fn setup_manager_on_flaky_store(
    config: PoolConfig,
    trainer: Arc<dyn Trainer>,
) -> Result<(JobManager, Arc<JobRepository>), Box<dyn std::error::Error>> {
    let repo = setup_store().await?;
    let store: Arc<dyn JobStore> = Arc::new(FailOnCompleteStore {
        inner: repo.clone(),
    });
    let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
    let pool = WorkerPool::start(config, trainer, store.clone(), event_tx).await?;
    Ok((JobManager::new(store, memory_storage().await?, pool), repo))
}

fn output_for(dataset_ref: &str) -> TrainerOutput {
    let stem = dataset_ref
        .rsplit('/')
        .next()
        .unwrap_or(dataset_ref)
        .trim_end_matches(".csv");
    TrainerOutput {
        model_ref: format!("models/{stem}.pkl"),
        doc_ref: format!("docs/{stem}.pdf"),
        metadata: TrainingMetadata {
            duration_ms: 5,
            algorithm: Some("random_forest".into()),
            dataset_rows: Some(150),
            feature_count: Some(4),
        },
    }
}

/// Succeeds immediately and counts invocations.
pub fn counting_trainer(calls: Arc<AtomicUsize>) -> Arc<dyn Trainer> {
    Arc::new(FnTrainer::new(
        "counting",
        move |dataset_ref: &str, _description: &str| {
            calls.fetch_add(1, Ordering::SeqCst);
            let output = output_for(dataset_ref);
            Box::pin(async move { Ok(output) }) as TrainerFuture
        },
    ))
}

/// Succeeds after `delay`.
pub fn slow_trainer(delay: Duration) -> Arc<dyn Trainer> {
    Arc::new(FnTrainer::new(
        "slow",
        move |dataset_ref: &str, _description: &str| {
            let output = output_for(dataset_ref);
            Box::pin(async move {
                tokio::time::sleep(delay).await;
                Ok(output)
            }) as TrainerFuture
        },
    ))
}

/// Exits non-zero with the given stderr.
pub fn failing_trainer(stderr: &'static str) -> Arc<dyn Trainer> {
    Arc::new(FnTrainer::new(
        "failing",
        move |_dataset_ref: &str, _description: &str| {
            Box::pin(async move {
                Err(TrainerError::Exit {
                    code: Some(1),
                    stderr: stderr.to_string(),
                })
            }) as TrainerFuture
        },
    ))
}

/// Panics when the description mentions "panic", otherwise succeeds.
pub fn panicking_trainer() -> Arc<dyn Trainer> {
    Arc::new(FnTrainer::new(
        "panicking",
        move |dataset_ref: &str, description: &str| {
            let output = output_for(dataset_ref);
            let explode = description.contains("panic");
            Box::pin(async move {
                if explode {
                    panic!("trainer blew up");
                }
                Ok(output)
            }) as TrainerFuture
        },
    ))
}

/// Blocks every invocation until a permit is added to the gate.
///
/// Tracks how many invocations are active at once and the order in which
/// datasets started.
#[derive(Clone)]
pub struct GatedTrainer {
    pub gate: Arc<Semaphore>,
    pub active: Arc<AtomicUsize>,
    pub peak: Arc<AtomicUsize>,
    pub started: Arc<Mutex<Vec<String>>>,
}

impl Default for GatedTrainer {
    fn default() -> Self {
        Self::new()
    }
}

impl GatedTrainer {
    pub fn new() -> Self {
        Self {
            gate: Arc::new(Semaphore::new(0)),
            active: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
            started: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub async fn started(&self) -> Vec<String> {
        self.started.lock().await.clone()
    }

    /// Wait until `n` invocations are blocked on the gate.
    pub async fn wait_active(&self, n: usize) {
        let deadline = tokio::time::Instant::now() + WAIT;
        while self.active.load(Ordering::SeqCst) < n {
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {n} active trainers"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    pub fn trainer(&self) -> Arc<dyn Trainer> {
        let this = self.clone();
        Arc::new(FnTrainer::new(
            "gated",
            move |dataset_ref: &str, _description: &str| {
                let this = this.clone();
                let dataset_ref = dataset_ref.to_string();
                Box::pin(async move {
                    this.started.lock().await.push(dataset_ref.clone());
                    let now = this.active.fetch_add(1, Ordering::SeqCst) + 1;
                    this.peak.fetch_max(now, Ordering::SeqCst);

                    let permit = this.gate.acquire().await;
                    this.active.fetch_sub(1, Ordering::SeqCst);
                    if let Ok(permit) = permit {
                        permit.forget();
                    }
                    Ok(output_for(&dataset_ref))
                }) as TrainerFuture
            },
        ))
    }
}

/// Artifact store that records delete calls and can be told to fail them.
#[derive(Default)]
pub struct RecordingArtifacts {
    pub deleted: Mutex<Vec<(ArtifactKind, String)>>,
    pub fail_deletes: bool,
    pub fail_uploads: bool,
}

impl ArtifactStore for RecordingArtifacts {
    fn upload(&self, _data: Bytes, kind: ArtifactKind) -> BoxFuture<'_, Result<String, ArtifactError>> {
        Box::pin(async move {
            if self.fail_uploads {
                return Err(ArtifactError::Upload {
                    kind: kind.to_string(),
                    reason: "bucket unavailable".into(),
                });
            }
            Ok(format!("{}/{}.{}", kind.folder(), JobId::new(), kind.extension()))
        })
    }

    fn delete<'a>(
        &'a self,
        location: &'a str,
        kind: ArtifactKind,
    ) -> BoxFuture<'a, Result<(), ArtifactError>> {
        Box::pin(async move {
            self.deleted.lock().await.push((kind, location.to_string()));
            if self.fail_deletes {
                return Err(ArtifactError::Delete {
                    location: location.to_string(),
                    reason: "access denied".into(),
                });
            }
            Ok(())
        })
    }
}

/// Poll the record until it reaches `status`.
pub async fn wait_for_status(
    manager: &JobManager,
    job_id: JobId,
    status: JobStatus,
) -> Result<JobRecord, Box<dyn std::error::Error>> {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let record = manager.get_job(job_id).await?;
        if record.status == status {
            return Ok(record);
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(format!("job {job_id} stuck in {} waiting for {status}", record.status).into());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Receive events until one matches.
pub async fn wait_for_event(
    rx: &mut broadcast::Receiver<JobEvent>,
    matches: impl Fn(&JobEvent) -> bool,
) -> Result<JobEvent, Box<dyn std::error::Error>> {
    let found = tokio::time::timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Ok(event) if matches(&event) => return Ok(event),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => return Err(e),
            }
        }
    })
    .await??;
    Ok(found)
}
