//! Message types for actor communication.

use ractor::{ActorRef, RpcReplyPort};
use tokio::sync::oneshot;
use training_core::{JobError, JobId, PoolStats, TrainingOutcome};

/// Where a finished task reports its result.
pub type CompletionSender = oneshot::Sender<Result<TrainingOutcome, JobError>>;

/// One unit of training work. Lives only in memory.
#[derive(Debug)]
pub struct TrainingTask {
    pub job_id: JobId,
    pub dataset_ref: String,
    pub description: String,
    pub completion: CompletionSender,
}

/// Messages for the QueueActor.
#[derive(Debug)]
pub enum QueueMessage {
    /// Append a task to the FIFO. Replies with its 1-based position.
    ///
    /// With `reserved`, the task consumes a reservation taken earlier for its
    /// job instead of being checked against it.
    Enqueue {
        task: Box<TrainingTask>,
        reserved: bool,
        reply: RpcReplyPort<Result<usize, JobError>>,
    },

    /// Claim a job id so no task for it can be queued by anyone else.
    Reserve {
        job_id: JobId,
        reply: RpcReplyPort<Result<(), JobError>>,
    },

    /// Give back a reservation that was not used.
    Release { job_id: JobId },

    /// A freshly started worker is ready for work.
    WorkerIdle {
        worker_id: String,
        worker: ActorRef<WorkerMessage>,
    },

    /// A worker finished a task and is ready for the next one.
    TaskFinished {
        worker_id: String,
        worker: ActorRef<WorkerMessage>,
        job_id: JobId,
        succeeded: bool,
    },

    /// A worker died; whatever it held will never finish.
    WorkerLost { worker_id: String },

    /// Whether a task for this job is reserved, pending or running.
    IsInFlight {
        job_id: JobId,
        reply: RpcReplyPort<bool>,
    },

    /// Get pool stats.
    GetStats { reply: RpcReplyPort<PoolStats> },
}

/// Messages for the WorkerActor.
#[derive(Debug)]
pub enum WorkerMessage {
    /// Run a training task to completion.
    Process { task: Box<TrainingTask> },
}

/// Messages for the PoolSupervisor.
#[derive(Debug)]
pub enum SupervisorMessage {
    /// Get the queue actor.
    GetQueue {
        reply: RpcReplyPort<ActorRef<QueueMessage>>,
    },

    /// Stop the queue and every worker.
    Shutdown,
}
