//! Handle to a running worker pool.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use ractor::{ActorRef, RpcReplyPort};
use tokio::sync::{Mutex, broadcast, oneshot};
use tokio::task::JoinHandle;
use training_core::{JobError, JobEvent, JobId, JobStore, PoolConfig, PoolStats, TrainingOutcome};

use crate::messages::{QueueMessage, SupervisorMessage, TrainingTask};
use crate::supervisor::{PoolArgs, start_supervisor};
use crate::trainer::Trainer;

/// Completion signal for one submitted task.
///
/// Resolves once the record has been updated with the task's outcome. If the
/// task never gets a result (its worker died, or the pool stopped before it
/// started) it resolves with [`JobError::Interrupted`].
#[derive(Debug)]
pub struct JobHandle {
    job_id: JobId,
    position: usize,
    rx: oneshot::Receiver<Result<TrainingOutcome, JobError>>,
}

impl JobHandle {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// 1-based queue position at submission time.
    pub fn position(&self) -> usize {
        self.position
    }
}

impl Future for JobHandle {
    type Output = Result<TrainingOutcome, JobError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let job_id = self.job_id;
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(JobError::Interrupted(job_id))),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Exclusive claim on a job id, taken with [`WorkerPool::reserve`].
///
/// While held, no task for the job can be queued except through
/// [`submit`](Self::submit). Dropping it unused releases the id.
pub struct Reservation<'a> {
    pool: &'a WorkerPool,
    job_id: JobId,
    armed: bool,
}

impl Reservation<'_> {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Queue the task this reservation was held for.
    pub async fn submit(
        mut self,
        dataset_ref: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<JobHandle, JobError> {
        // The queue drops the reservation on receipt, accepted or not.
        self.armed = false;
        self.pool
            .enqueue(self.job_id, dataset_ref.into(), description.into(), true)
            .await
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.armed {
            let _ = self.pool.queue.send_message(QueueMessage::Release {
                job_id: self.job_id,
            });
        }
    }
}

/// Bounded-concurrency pool of training workers over one FIFO queue.
pub struct WorkerPool {
    supervisor: ActorRef<SupervisorMessage>,
    queue: ActorRef<QueueMessage>,
    event_tx: broadcast::Sender<JobEvent>,
    config: PoolConfig,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn the supervisor, the queue and `config.concurrency` workers.
    pub async fn start(
        config: PoolConfig,
        trainer: Arc<dyn Trainer>,
        store: Arc<dyn JobStore>,
        event_tx: broadcast::Sender<JobEvent>,
    ) -> Result<Self, JobError> {
        let args = PoolArgs {
            config: config.clone(),
            trainer,
            store,
            event_tx: event_tx.clone(),
        };
        let (supervisor, join) = start_supervisor(args)
            .await
            .map_err(|e| JobError::PoolUnavailable(format!("failed to start pool: {}", e)))?;

        let (tx, rx) = ractor::concurrency::oneshot();
        supervisor
            .send_message(SupervisorMessage::GetQueue { reply: tx.into() })
            .map_err(|e| JobError::PoolUnavailable(e.to_string()))?;
        let queue = rx
            .await
            .map_err(|_| JobError::PoolUnavailable("supervisor stopped".into()))?;

        tracing::info!("Worker pool started with {} workers", config.concurrency);

        Ok(Self {
            supervisor,
            queue,
            event_tx,
            config,
            join: Mutex::new(Some(join)),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Send a request to the queue actor and wait for its reply.
    async fn call<T>(
        &self,
        build: impl FnOnce(RpcReplyPort<T>) -> QueueMessage,
    ) -> Result<T, JobError>
    where
        T: Send + 'static,
    {
        let (tx, rx) = ractor::concurrency::oneshot();
        self.queue
            .send_message(build(tx.into()))
            .map_err(|e| JobError::PoolUnavailable(e.to_string()))?;
        rx.await
            .map_err(|_| JobError::PoolUnavailable("queue stopped".into()))
    }

    /// Append a task to the queue. Never waits for a free worker.
    pub async fn submit(
        &self,
        job_id: JobId,
        dataset_ref: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<JobHandle, JobError> {
        self.enqueue(job_id, dataset_ref.into(), description.into(), false)
            .await
    }

    /// Claim `job_id` so that checking it and acting on it cannot interleave
    /// with another caller.
    ///
    /// Fails with [`JobError::AlreadyInFlight`] when the job is reserved,
    /// pending or running.
    pub async fn reserve(&self, job_id: JobId) -> Result<Reservation<'_>, JobError> {
        self.call(|reply| QueueMessage::Reserve { job_id, reply })
            .await??;
        Ok(Reservation {
            pool: self,
            job_id,
            armed: true,
        })
    }

    async fn enqueue(
        &self,
        job_id: JobId,
        dataset_ref: String,
        description: String,
        reserved: bool,
    ) -> Result<JobHandle, JobError> {
        let (completion, rx) = oneshot::channel();
        let task = TrainingTask {
            job_id,
            dataset_ref,
            description,
            completion,
        };

        let position = self
            .call(|reply| QueueMessage::Enqueue {
                task: Box::new(task),
                reserved,
                reply,
            })
            .await??;

        Ok(JobHandle {
            job_id,
            position,
            rx,
        })
    }

    /// Whether `job_id` is reserved, pending or running.
    pub async fn is_in_flight(&self, job_id: JobId) -> Result<bool, JobError> {
        self.call(|reply| QueueMessage::IsInFlight { job_id, reply })
            .await
    }

    pub async fn stats(&self) -> Result<PoolStats, JobError> {
        self.call(|reply| QueueMessage::GetStats { reply }).await
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.event_tx.subscribe()
    }

    pub fn events(&self) -> &broadcast::Sender<JobEvent> {
        &self.event_tx
    }

    /// Stop every actor and wait for the supervisor to exit.
    ///
    /// Workers finish the task they hold. Pending tasks are never started:
    /// their records are marked failed and their handles resolve with
    /// [`JobError::Interrupted`].
    pub async fn shutdown(&self) {
        let _ = self.supervisor.send_message(SupervisorMessage::Shutdown);
        if let Some(join) = self.join.lock().await.take()
            && let Err(e) = join.await
        {
            tracing::warn!("Worker pool supervisor exited abnormally: {}", e);
        }
    }
}
