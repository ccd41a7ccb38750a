//! Queue actor: the FIFO of pending tasks and the dispatcher to idle workers.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use ractor::{Actor, ActorProcessingErr, ActorRef, MessagingErr};
use tokio::sync::broadcast;
use training_core::{
    JobError, JobEvent, JobId, JobStatus, JobStore, PoolConfig, PoolStats, mutator,
};

use crate::messages::{QueueMessage, TrainingTask, WorkerMessage};

/// State for the queue actor.
pub struct QueueActorState {
    config: PoolConfig,
    /// Tasks waiting for a worker, oldest first.
    pending: VecDeque<TrainingTask>,
    /// Workers waiting for a task.
    idle: VecDeque<(String, ActorRef<WorkerMessage>)>,
    /// Running tasks by job, with the worker holding each.
    running: HashMap<JobId, String>,
    /// Jobs claimed by a caller that has not submitted yet.
    reserved: HashSet<JobId>,
    completed: u64,
    failed: u64,
    store: Arc<dyn JobStore>,
    event_tx: broadcast::Sender<JobEvent>,
}

impl QueueActorState {
    pub fn new(
        config: PoolConfig,
        store: Arc<dyn JobStore>,
        event_tx: broadcast::Sender<JobEvent>,
    ) -> Self {
        Self {
            config,
            pending: VecDeque::new(),
            idle: VecDeque::new(),
            running: HashMap::new(),
            reserved: HashSet::new(),
            completed: 0,
            failed: 0,
            store,
            event_tx,
        }
    }

    fn broadcast(&self, event: JobEvent) {
        let _ = self.event_tx.send(event);
    }

    fn is_in_flight(&self, job_id: JobId) -> bool {
        self.reserved.contains(&job_id)
            || self.running.contains_key(&job_id)
            || self.pending.iter().any(|t| t.job_id == job_id)
    }

    fn reserve(&mut self, job_id: JobId) -> Result<(), JobError> {
        if self.is_in_flight(job_id) {
            return Err(JobError::AlreadyInFlight(job_id));
        }
        self.reserved.insert(job_id);
        Ok(())
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            pending: self.pending.len() as u64,
            running: self.running.len() as u64,
            completed: self.completed,
            failed: self.failed,
            concurrency: self.config.concurrency,
        }
    }

    /// Check the in-flight guard and the optional bound, then append.
    ///
    /// A `reserved` task always gives up its reservation, even when rejected.
    fn enqueue(&mut self, task: TrainingTask, reserved: bool) -> Result<usize, JobError> {
        let held = reserved && self.reserved.remove(&task.job_id);
        if !held && self.is_in_flight(task.job_id) {
            return Err(JobError::AlreadyInFlight(task.job_id));
        }

        // With an idle worker the task starts immediately and never waits.
        if let Some(capacity) = self.config.max_queue_size
            && self.idle.is_empty()
            && self.pending.len() >= capacity
        {
            return Err(JobError::QueueFull { capacity });
        }

        self.pending.push_back(task);
        Ok(self.pending.len())
    }

    /// Hand pending tasks to idle workers, oldest task to longest-idle worker.
    fn dispatch(&mut self) {
        while !self.pending.is_empty() {
            let Some((worker_id, worker)) = self.idle.pop_front() else {
                break;
            };
            let Some(task) = self.pending.pop_front() else {
                self.idle.push_front((worker_id, worker));
                break;
            };

            let job_id = task.job_id;
            match worker.send_message(WorkerMessage::Process {
                task: Box::new(task),
            }) {
                Ok(()) => {
                    tracing::debug!("Dispatched job {} to {}", job_id, worker_id);
                    self.running.insert(job_id, worker_id);
                }
                Err(MessagingErr::SendErr(WorkerMessage::Process { task })) => {
                    // Worker is gone; keep the task at the head for the next one.
                    tracing::warn!("Worker {} unavailable, requeueing job {}", worker_id, job_id);
                    self.pending.push_front(*task);
                }
                Err(e) => {
                    tracing::error!("Failed to dispatch job {} to {}: {}", job_id, worker_id, e);
                }
            }
        }
    }

    /// Fail the record if it is still in one of `from`.
    ///
    /// `JobFailed` is emitted only when this call moved the record to failed.
    async fn fail_record(&self, job_id: JobId, reason: String, from: &'static [JobStatus]) {
        let moved = Arc::new(AtomicBool::new(false));
        let flag = moved.clone();
        let message = reason.clone();
        let result = self
            .store
            .update(
                job_id,
                mutator(move |record| {
                    if from.contains(&record.status) {
                        record.fail(message)?;
                        flag.store(true, Ordering::SeqCst);
                    }
                    Ok(())
                }),
            )
            .await;

        match result {
            Ok(_) if moved.load(Ordering::SeqCst) => {
                self.broadcast(JobEvent::JobFailed {
                    job_id,
                    error: reason,
                    timestamp: Utc::now(),
                });
            }
            Ok(record) => {
                tracing::debug!("Job {} already {}, left as is", job_id, record.status);
            }
            Err(e) => tracing::warn!("Failed to mark job {} failed: {}", job_id, e),
        }
    }

    /// Mark the record of a task whose worker died as failed.
    async fn fail_abandoned(&self, job_id: JobId, worker_id: &str) {
        let reason = format!("worker {} stopped before finishing", worker_id);
        self.fail_record(
            job_id,
            reason,
            &[JobStatus::Uploading, JobStatus::Updated, JobStatus::Processing],
        )
        .await;
    }

    /// Fail every task still waiting for a worker and resolve its handle.
    async fn drain_pending(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        for task in pending {
            let job_id = task.job_id;
            let error = JobError::Interrupted(job_id);
            self.fail_record(
                job_id,
                error.to_string(),
                &[JobStatus::Uploading, JobStatus::Updated],
            )
            .await;
            let _ = task.completion.send(Err(error));
        }
    }
}

/// Queue actor that owns the FIFO and dispatches to workers.
pub struct QueueActor;

impl Actor for QueueActor {
    type Msg = QueueMessage;
    type State = QueueActorState;
    type Arguments = QueueActorState;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(
            "Starting training queue (concurrency {}, bound {:?})",
            args.config.concurrency,
            args.config.max_queue_size
        );
        Ok(args)
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        if !state.pending.is_empty() {
            tracing::warn!(
                "Training queue stopped with {} pending tasks",
                state.pending.len()
            );
            state.drain_pending().await;
        }
        Ok(())
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            QueueMessage::Enqueue {
                task,
                reserved,
                reply,
            } => {
                let job_id = task.job_id;
                match state.enqueue(*task, reserved) {
                    Ok(position) => {
                        tracing::debug!("Queued job {} at position {}", job_id, position);
                        state.broadcast(JobEvent::JobQueued {
                            job_id,
                            position,
                            timestamp: Utc::now(),
                        });
                        state.dispatch();
                        let _ = reply.send(Ok(position));
                    }
                    Err(e) => {
                        tracing::warn!("Rejected job {}: {}", job_id, e);
                        let _ = reply.send(Err(e));
                    }
                }
            }

            QueueMessage::Reserve { job_id, reply } => {
                let _ = reply.send(state.reserve(job_id));
            }

            QueueMessage::Release { job_id } => {
                state.reserved.remove(&job_id);
            }

            QueueMessage::WorkerIdle { worker_id, worker } => {
                tracing::debug!("Worker {} ready", worker_id);
                state.idle.push_back((worker_id, worker));
                state.dispatch();
            }

            QueueMessage::TaskFinished {
                worker_id,
                worker,
                job_id,
                succeeded,
            } => {
                state.running.remove(&job_id);
                if succeeded {
                    state.completed += 1;
                } else {
                    state.failed += 1;
                }
                state.idle.push_back((worker_id, worker));
                state.dispatch();
            }

            QueueMessage::WorkerLost { worker_id } => {
                state.idle.retain(|(id, _)| *id != worker_id);

                let abandoned: Vec<JobId> = state
                    .running
                    .iter()
                    .filter(|(_, holder)| **holder == worker_id)
                    .map(|(job_id, _)| *job_id)
                    .collect();

                for job_id in abandoned {
                    state.running.remove(&job_id);
                    state.failed += 1;
                    tracing::error!("Job {} abandoned by worker {}", job_id, worker_id);
                    state.fail_abandoned(job_id, &worker_id).await;
                }
            }

            QueueMessage::IsInFlight { job_id, reply } => {
                let _ = reply.send(state.is_in_flight(job_id));
            }

            QueueMessage::GetStats { reply } => {
                let _ = reply.send(state.stats());
            }
        }

        Ok(())
    }
}
