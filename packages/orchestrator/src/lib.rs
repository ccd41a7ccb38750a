//! Training-job orchestration.
//!
//! This crate provides the Ractor-based worker pool that runs the external
//! trainer with bounded concurrency, and the lifecycle manager that keeps job
//! records and their artifacts consistent.
//!
//! # Architecture
//!
//! - `PoolSupervisor` - Top-level actor that owns the queue and restarts workers
//! - `QueueActor` - Holds the FIFO of pending tasks and dispatches to idle workers
//! - `WorkerActor` - Runs one training task at a time and persists its outcome
//! - `JobManager` - Create, update, retrain, delete and query jobs
//!
//! # Usage
//!
//! ```ignore
//! use orchestrator::{OrchestratorConfig, bootstrap};
//!
//! let manager = bootstrap(OrchestratorConfig::from_env()?).await?;
//! let handle = manager.create_job("datasets/churn.csv", "predict churn from usage").await?;
//! let outcome = handle.await?;
//! ```

mod init;
mod invoker;
mod lifecycle;
mod messages;
mod pool;
mod queue_actor;
mod supervisor;
mod trainer;
mod worker_actor;

pub use init::{
    BootstrapError, EVENT_CHANNEL_CAPACITY, OrchestratorConfig, bootstrap, bootstrap_with_trainer,
};
pub use invoker::{ProcessTrainer, TrainerConfig, TrainerReport, parse_trainer_output};
pub use lifecycle::{ArtifactFailure, DeleteReport, JobManager};
pub use messages::{QueueMessage, SupervisorMessage, TrainingTask, WorkerMessage};
pub use pool::{JobHandle, Reservation, WorkerPool};
pub use queue_actor::QueueActor;
pub use supervisor::PoolSupervisor;
pub use trainer::{FnTrainer, Trainer, TrainerError, TrainerFuture, TrainerOutput, TrainerResult};
pub use worker_actor::WorkerActor;

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef, RpcReplyPort, concurrency};
