//! Worker actor for running training tasks.

use std::sync::Arc;

use chrono::Utc;
use ractor::{Actor, ActorProcessingErr, ActorRef};
use tokio::sync::broadcast;
use training_core::{JobError, JobEvent, JobId, JobStore, StoreError, TrainingOutcome, mutator};

use crate::messages::{QueueMessage, TrainingTask, WorkerMessage};
use crate::trainer::Trainer;

/// State for the worker actor.
pub struct WorkerActorState {
    /// Unique worker ID.
    pub worker_id: String,
    /// Queue actor reference.
    pub queue: ActorRef<QueueMessage>,
    pub trainer: Arc<dyn Trainer>,
    pub store: Arc<dyn JobStore>,
    /// Event broadcaster.
    pub event_tx: broadcast::Sender<JobEvent>,
}

impl WorkerActorState {
    fn broadcast(&self, event: JobEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Best-effort: record a failure that happened outside the trainer.
    async fn record_failure(&self, job_id: JobId, error: &JobError) {
        let message = error.to_string();
        if let Err(e) = self
            .store
            .update(job_id, mutator(move |record| Ok(record.fail(message)?)))
            .await
        {
            tracing::warn!("Failed to mark job {} failed: {}", job_id, e);
        }
    }

    /// Run one task: claim, train, persist the outcome.
    ///
    /// The outcome is persisted before this returns.
    async fn run(&self, task: &TrainingTask) -> Result<TrainingOutcome, JobError> {
        let job_id = task.job_id;

        if let Err(e) = self
            .store
            .update(job_id, mutator(|record| Ok(record.begin_processing()?)))
            .await
        {
            let error = match e {
                StoreError::NotFound(id) => JobError::NotFound(id),
                StoreError::Transition(t) => JobError::InvalidTransition(t),
                other => {
                    let error = JobError::StorePersistence(other.to_string());
                    self.record_failure(job_id, &error).await;
                    error
                }
            };
            tracing::warn!("Job {} could not start: {}", job_id, error);
            return Err(error);
        }

        self.broadcast(JobEvent::JobStarted {
            job_id,
            worker_id: self.worker_id.clone(),
            timestamp: Utc::now(),
        });
        tracing::info!(
            "Worker {} training job {} with {}",
            self.worker_id,
            job_id,
            self.trainer.name()
        );

        let output = match self
            .trainer
            .train(&task.dataset_ref, &task.description)
            .await
        {
            Ok(output) => output,
            Err(e) => {
                tracing::error!(
                    "Trainer failed for job {}: {} (stderr: {})",
                    job_id,
                    e,
                    e.stderr()
                );
                let error = JobError::from(e);
                self.record_failure(job_id, &error).await;
                return Err(error);
            }
        };

        let model_ref = output.model_ref.clone();
        let doc_ref = output.doc_ref.clone();
        let metadata = output.metadata.clone();
        if let Err(e) = self
            .store
            .update(
                job_id,
                mutator(move |record| Ok(record.complete(model_ref, doc_ref, metadata)?)),
            )
            .await
        {
            let error = JobError::StorePersistence(e.to_string());
            tracing::warn!("Failed to persist result of job {}: {}", job_id, e);
            self.record_failure(job_id, &error).await;
            return Err(error);
        }

        Ok(TrainingOutcome {
            job_id,
            model_ref: output.model_ref,
            doc_ref: output.doc_ref,
            metadata: output.metadata,
        })
    }
}

/// Worker actor arguments.
pub struct WorkerArgs {
    pub worker_id: String,
    pub queue: ActorRef<QueueMessage>,
    pub trainer: Arc<dyn Trainer>,
    pub store: Arc<dyn JobStore>,
    pub event_tx: broadcast::Sender<JobEvent>,
}

/// Worker actor that runs one training task at a time.
pub struct WorkerActor;

impl Actor for WorkerActor {
    type Msg = WorkerMessage;
    type State = WorkerActorState;
    type Arguments = WorkerArgs;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting worker: {}", args.worker_id);

        Ok(WorkerActorState {
            worker_id: args.worker_id,
            queue: args.queue,
            trainer: args.trainer,
            store: args.store,
            event_tx: args.event_tx,
        })
    }

    async fn post_start(
        &self,
        myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        state.queue.send_message(QueueMessage::WorkerIdle {
            worker_id: state.worker_id.clone(),
            worker: myself,
        })?;
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            WorkerMessage::Process { task } => {
                let task = *task;
                let job_id = task.job_id;
                let result = state.run(&task).await;
                let succeeded = result.is_ok();

                match &result {
                    Ok(outcome) => {
                        tracing::info!("Job {} completed", job_id);
                        state.broadcast(JobEvent::JobCompleted {
                            job_id,
                            model_ref: outcome.model_ref.clone(),
                            doc_ref: outcome.doc_ref.clone(),
                            metadata: outcome.metadata.clone(),
                            timestamp: Utc::now(),
                        });
                    }
                    Err(e) => {
                        state.broadcast(JobEvent::JobFailed {
                            job_id,
                            error: e.to_string(),
                            timestamp: Utc::now(),
                        });
                    }
                }

                // The queue must see the slot freed before the submitter does.
                if let Err(e) = state.queue.send_message(QueueMessage::TaskFinished {
                    worker_id: state.worker_id.clone(),
                    worker: myself,
                    job_id,
                    succeeded,
                }) {
                    tracing::warn!("Queue unavailable after job {}: {}", job_id, e);
                }

                if task.completion.send(result).is_err() {
                    tracing::debug!("Submitter of job {} stopped waiting", job_id);
                }
            }
        }

        Ok(())
    }
}
