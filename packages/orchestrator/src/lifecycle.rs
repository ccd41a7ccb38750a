//! Job lifecycle manager: the public entry point for creating, editing,
//! retraining, deleting and querying jobs.

use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use training_core::{
    ArtifactKind, ArtifactStore, JobError, JobEvent, JobFilter, JobId, JobPage, JobRecord,
    JobStatus, JobStatusView, JobStore, MAX_PAGE_LIMIT, PageRequest, PoolStats, StoreError,
    mutator,
};

use crate::pool::{JobHandle, WorkerPool};

/// One artifact that could not be deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactFailure {
    pub kind: ArtifactKind,
    pub location: String,
    pub error: String,
}

/// What `delete_job` did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteReport {
    pub job_id: JobId,
    /// Number of artifact deletions attempted.
    pub attempted: usize,
    pub failures: Vec<ArtifactFailure>,
}

impl DeleteReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Creates records, enqueues training and keeps records and artifacts in step.
pub struct JobManager {
    store: Arc<dyn JobStore>,
    artifacts: Arc<dyn ArtifactStore>,
    pool: WorkerPool,
}

impl JobManager {
    pub fn new(
        store: Arc<dyn JobStore>,
        artifacts: Arc<dyn ArtifactStore>,
        pool: WorkerPool,
    ) -> Self {
        Self {
            store,
            artifacts,
            pool,
        }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.pool.subscribe()
    }

    fn broadcast(&self, event: JobEvent) {
        let _ = self.pool.events().send(event);
    }

    /// Best-effort: record why a task never reached the queue.
    ///
    /// `AlreadyInFlight` leaves the record alone: another task owns it.
    async fn mark_rejected(&self, job_id: JobId, error: &JobError) {
        if matches!(error, JobError::AlreadyInFlight(_)) {
            return;
        }
        let message = error.to_string();
        match self
            .store
            .update(job_id, mutator(move |record| Ok(record.fail(message)?)))
            .await
        {
            Ok(_) => self.broadcast(JobEvent::JobFailed {
                job_id,
                error: error.to_string(),
                timestamp: Utc::now(),
            }),
            Err(e) => tracing::warn!("Failed to mark job {} failed: {}", job_id, e),
        }
    }

    /// Create a record for an already-uploaded dataset and queue its training.
    ///
    /// The returned handle carries the job id and resolves with the outcome
    /// once the record reflects it. If the queue rejects the task the record is
    /// marked failed and the rejection is returned.
    pub async fn create_job(
        &self,
        dataset_ref: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<JobHandle, JobError> {
        let record = JobRecord::new(dataset_ref, description);
        let record = self.store.create(record).await?;
        let job_id = record.id;

        tracing::info!("Created job {}", job_id);
        self.broadcast(JobEvent::JobCreated {
            job_id,
            timestamp: Utc::now(),
        });

        let dataset_ref = record.dataset_ref.unwrap_or_default();
        match self.pool.submit(job_id, dataset_ref, record.description).await {
            Ok(handle) => Ok(handle),
            Err(e) => {
                tracing::warn!("Job {} could not be queued: {}", job_id, e);
                self.mark_rejected(job_id, &e).await;
                Err(e)
            }
        }
    }

    /// Upload a raw dataset, then [`create_job`](Self::create_job).
    ///
    /// An upload failure aborts before any record is written.
    pub async fn create_job_from_upload(
        &self,
        dataset: Bytes,
        description: impl Into<String>,
    ) -> Result<JobHandle, JobError> {
        let dataset_ref = self
            .artifacts
            .upload(dataset, ArtifactKind::Dataset)
            .await
            .map_err(JobError::ArtifactUpload)?;
        tracing::info!("Uploaded dataset to {}", dataset_ref);
        self.create_job(dataset_ref, description).await
    }

    /// Replace the description and mark the record `updated`.
    ///
    /// With `retrain`, the job is reserved in the queue before anything is
    /// written, so a retrain racing another one (or a running task) fails
    /// with [`JobError::AlreadyInFlight`] and changes nothing. The new task is
    /// queued after the edit is persisted and this returns without waiting
    /// for it. Its outcome is only recorded on the job and logged.
    pub async fn update_job(
        &self,
        job_id: JobId,
        description: impl Into<String>,
        retrain: bool,
    ) -> Result<JobRecord, JobError> {
        let description = description.into();
        let current = self.store.get(job_id).await?;

        let reservation = if retrain {
            if current.dataset_ref.is_none() {
                return Err(JobError::Validation(format!(
                    "job {} has no dataset to retrain on",
                    job_id
                )));
            }
            Some(self.pool.reserve(job_id).await?)
        } else {
            None
        };

        let edited = description.clone();
        let record = self
            .store
            .update(
                job_id,
                mutator(move |record| {
                    record.mark_updated(edited);
                    Ok(())
                }),
            )
            .await?;

        tracing::info!("Updated job {} (retrain: {})", job_id, retrain);
        self.broadcast(JobEvent::JobUpdated {
            job_id,
            status: record.status,
            retrain,
            timestamp: Utc::now(),
        });

        if let Some(reservation) = reservation {
            let dataset_ref = record.dataset_ref.clone().unwrap_or_default();
            match reservation.submit(dataset_ref, description).await {
                Ok(handle) => {
                    tokio::spawn(async move {
                        match handle.await {
                            Ok(outcome) => {
                                tracing::info!(
                                    "Retrain of job {} completed: model {}",
                                    outcome.job_id,
                                    outcome.model_ref
                                );
                            }
                            Err(e) => tracing::error!("Retrain of job {} failed: {}", job_id, e),
                        }
                    });
                }
                Err(e @ JobError::AlreadyInFlight(_)) => return Err(e),
                Err(e) => {
                    tracing::error!("Retrain of job {} could not be queued: {}", job_id, e);
                    self.mark_rejected(job_id, &e).await;
                }
            }
        }

        Ok(record)
    }

    /// Delete every artifact the job references, then the record.
    ///
    /// Each deletion is attempted independently; failures are collected in the
    /// report and do not keep the record alive.
    pub async fn delete_job(&self, job_id: JobId) -> Result<DeleteReport, JobError> {
        let record = self.store.get(job_id).await?;
        // Held until the record is gone so no retrain can slip in.
        let _reservation = self.pool.reserve(job_id).await?;

        let targets = record.artifacts();
        let results = join_all(
            targets
                .iter()
                .map(|(kind, location)| self.artifacts.delete(location, *kind)),
        )
        .await;

        let failures: Vec<ArtifactFailure> = targets
            .iter()
            .zip(results)
            .filter_map(|((kind, location), result)| {
                result.err().map(|e| ArtifactFailure {
                    kind: *kind,
                    location: location.to_string(),
                    error: e.to_string(),
                })
            })
            .collect();

        for failure in &failures {
            tracing::warn!(
                "Failed to delete {} artifact of job {}: {}",
                failure.kind,
                job_id,
                failure.error
            );
        }

        self.store.delete(job_id).await?;

        tracing::info!("Deleted job {}", job_id);
        self.broadcast(JobEvent::JobDeleted {
            job_id,
            failed_artifacts: failures.len(),
            timestamp: Utc::now(),
        });

        Ok(DeleteReport {
            job_id,
            attempted: targets.len(),
            failures,
        })
    }

    pub async fn get_job(&self, job_id: JobId) -> Result<JobRecord, JobError> {
        Ok(self.store.get(job_id).await?)
    }

    /// The `{id, status}` pair for polling.
    pub async fn get_status(&self, job_id: JobId) -> Result<JobStatusView, JobError> {
        Ok(self.store.get(job_id).await?.status_view())
    }

    /// One page of records, newest first.
    pub async fn list_jobs(
        &self,
        filter: JobFilter,
        page: u32,
        limit: u32,
    ) -> Result<JobPage, JobError> {
        let request = PageRequest::new(page, limit)?;
        let (records, total) = self.store.list(filter, request).await?;
        Ok(JobPage::new(records, request, total))
    }

    pub async fn pool_stats(&self) -> Result<PoolStats, JobError> {
        self.pool.stats().await
    }

    /// Fail records left `uploading` or `processing` by a previous process.
    ///
    /// Records with a task in this pool are left alone. Returns the ids that
    /// were marked failed.
    ///
    /// A retrain queued by a process that then crashed leaves its record
    /// `updated`, which is indistinguishable from a plain description edit,
    /// so such records are not recovered here and need a new retrain.
    pub async fn recover_interrupted(&self) -> Result<Vec<JobId>, JobError> {
        let mut candidates = Vec::new();
        for status in [JobStatus::Uploading, JobStatus::Processing] {
            let filter = JobFilter::default().with_status(status);
            let mut page = 1;
            loop {
                let request = PageRequest::new(page, MAX_PAGE_LIMIT)?;
                let (records, total) = self.store.list(filter.clone(), request).await?;
                let seen = request.offset() + records.len() as u64;
                candidates.extend(records.into_iter().map(|r| r.id));
                if seen >= total || seen == request.offset() {
                    break;
                }
                page += 1;
            }
        }

        let mut recovered = Vec::new();
        for job_id in candidates {
            let _reservation = match self.pool.reserve(job_id).await {
                Ok(reservation) => reservation,
                Err(JobError::AlreadyInFlight(_)) => continue,
                Err(e) => return Err(e),
            };

            let result = self
                .store
                .update(
                    job_id,
                    mutator(|record| {
                        if matches!(record.status, JobStatus::Uploading | JobStatus::Processing) {
                            record.fail("interrupted before training finished")?;
                        }
                        Ok(())
                    }),
                )
                .await;

            match result {
                Ok(record) if record.status == JobStatus::Failed => {
                    tracing::warn!("Recovered interrupted job {}", job_id);
                    self.broadcast(JobEvent::JobFailed {
                        job_id,
                        error: "interrupted before training finished".to_string(),
                        timestamp: Utc::now(),
                    });
                    recovered.push(job_id);
                }
                Ok(_) => {}
                Err(StoreError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }

        Ok(recovered)
    }

    /// Stop the worker pool.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }
}
