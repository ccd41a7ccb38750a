//! Error taxonomy shared by every package.

use thiserror::Error;

use crate::job::{JobId, JobStatus};

/// A lifecycle transition the state machine does not allow.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("job {job_id} cannot move from {from} to {to}")]
pub struct TransitionError {
    pub job_id: JobId,
    pub from: JobStatus,
    pub to: JobStatus,
}

/// Errors raised by a job record store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("job already exists: {0}")]
    Duplicate(JobId),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("store backend error: {0}")]
    Backend(String),
}

/// Errors raised by an artifact backend.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("upload of {kind} failed: {reason}")]
    Upload { kind: String, reason: String },

    #[error("delete of {location} failed: {reason}")]
    Delete { location: String, reason: String },

    #[error("invalid artifact reference: {0}")]
    InvalidRef(String),
}

/// Public error type for every job operation.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("validation failed: {0}")]
    Validation(String),

    /// Dataset upload failed; no record was written.
    #[error("artifact upload failed: {0}")]
    ArtifactUpload(#[source] ArtifactError),

    #[error("trainer failed: {message}")]
    TrainerExecution { message: String, stderr: String },

    #[error("failed to persist job state: {0}")]
    StorePersistence(String),

    #[error("queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("job {0} already has a task pending or running")]
    AlreadyInFlight(JobId),

    #[error(transparent)]
    InvalidTransition(TransitionError),

    /// The task's worker went away, or the pool stopped before it started.
    #[error("job {0} was interrupted before it finished")]
    Interrupted(JobId),

    #[error("worker pool unavailable: {0}")]
    PoolUnavailable(String),
}

impl JobError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, JobError::NotFound(_))
    }

    /// Captured trainer stderr, if this is a trainer failure.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            JobError::TrainerExecution { stderr, .. } => Some(stderr),
            _ => None,
        }
    }
}

impl From<StoreError> for JobError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => JobError::NotFound(id),
            StoreError::Transition(t) => JobError::InvalidTransition(t),
            other => JobError::StorePersistence(other.to_string()),
        }
    }
}
