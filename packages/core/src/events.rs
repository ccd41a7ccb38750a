//! Event types for observing job lifecycles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{JobId, JobStatus, TrainingMetadata};

/// Events emitted by the orchestrator for every lifecycle transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    /// A record was written for a new job.
    JobCreated {
        job_id: JobId,
        timestamp: DateTime<Utc>,
    },
    /// A task was accepted by the queue.
    JobQueued {
        job_id: JobId,
        position: usize,
        timestamp: DateTime<Utc>,
    },
    /// A worker took the task and marked it processing.
    JobStarted {
        job_id: JobId,
        worker_id: String,
        timestamp: DateTime<Utc>,
    },
    JobCompleted {
        job_id: JobId,
        model_ref: String,
        doc_ref: String,
        metadata: TrainingMetadata,
        timestamp: DateTime<Utc>,
    },
    JobFailed {
        job_id: JobId,
        error: String,
        timestamp: DateTime<Utc>,
    },
    /// The description was edited.
    JobUpdated {
        job_id: JobId,
        status: JobStatus,
        retrain: bool,
        timestamp: DateTime<Utc>,
    },
    /// The record was removed.
    JobDeleted {
        job_id: JobId,
        failed_artifacts: usize,
        timestamp: DateTime<Utc>,
    },
    /// A dead worker was replaced by the supervisor.
    WorkerRestarted {
        worker_id: String,
        timestamp: DateTime<Utc>,
    },
}

impl JobEvent {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            JobEvent::JobCreated { timestamp, .. } => *timestamp,
            JobEvent::JobQueued { timestamp, .. } => *timestamp,
            JobEvent::JobStarted { timestamp, .. } => *timestamp,
            JobEvent::JobCompleted { timestamp, .. } => *timestamp,
            JobEvent::JobFailed { timestamp, .. } => *timestamp,
            JobEvent::JobUpdated { timestamp, .. } => *timestamp,
            JobEvent::JobDeleted { timestamp, .. } => *timestamp,
            JobEvent::WorkerRestarted { timestamp, .. } => *timestamp,
        }
    }

    /// Get the job ID associated with this event, if any.
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            JobEvent::JobCreated { job_id, .. } => Some(*job_id),
            JobEvent::JobQueued { job_id, .. } => Some(*job_id),
            JobEvent::JobStarted { job_id, .. } => Some(*job_id),
            JobEvent::JobCompleted { job_id, .. } => Some(*job_id),
            JobEvent::JobFailed { job_id, .. } => Some(*job_id),
            JobEvent::JobUpdated { job_id, .. } => Some(*job_id),
            JobEvent::JobDeleted { job_id, .. } => Some(*job_id),
            JobEvent::WorkerRestarted { .. } => None,
        }
    }

    /// Whether this event ends a training run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobEvent::JobCompleted { .. } | JobEvent::JobFailed { .. }
        )
    }

    /// Get a short description of this event for logging.
    pub fn description(&self) -> String {
        match self {
            JobEvent::JobCreated { job_id, .. } => format!("Job {} created", job_id),
            JobEvent::JobQueued {
                job_id, position, ..
            } => format!("Job {} queued at position {}", job_id, position),
            JobEvent::JobStarted {
                job_id, worker_id, ..
            } => format!("Job {} started by {}", job_id, worker_id),
            JobEvent::JobCompleted {
                job_id, metadata, ..
            } => format!("Job {} completed in {}ms", job_id, metadata.duration_ms),
            JobEvent::JobFailed { job_id, error, .. } => {
                format!("Job {} failed: {}", job_id, error)
            }
            JobEvent::JobUpdated {
                job_id, retrain, ..
            } => {
                let retrain = if *retrain { " (retraining)" } else { "" };
                format!("Job {} updated{}", job_id, retrain)
            }
            JobEvent::JobDeleted {
                job_id,
                failed_artifacts,
                ..
            } => format!(
                "Job {} deleted ({} artifact deletions failed)",
                job_id, failed_artifacts
            ),
            JobEvent::WorkerRestarted { worker_id, .. } => {
                format!("Worker {} restarted", worker_id)
            }
        }
    }
}
