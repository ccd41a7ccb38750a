//! Core domain types for the training-job orchestrator.
//!
//! This crate contains shared types used across all packages:
//! - JobRecord and JobStatus with the lifecycle transition rules
//! - PoolConfig and PoolStats for the worker pool
//! - Events for observing lifecycles
//! - The record store and artifact backend interfaces

mod error;
mod events;
mod job;
mod queue;
mod store;
pub mod validate;

pub use error::{ArtifactError, JobError, StoreError, TransitionError};
pub use events::JobEvent;
pub use job::{
    ArtifactKind, JobId, JobRecord, JobStatus, JobStatusView, RetiredArtifact, TrainingMetadata,
    TrainingOutcome,
};
pub use queue::{DEFAULT_CONCURRENCY, PoolConfig, PoolStats};
pub use store::{
    ArtifactStore, JobFilter, JobPage, JobStore, MAX_PAGE_LIMIT, PageRequest, RecordMutator,
    mutator,
};
