//! Trainer trait and error types.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use training_core::{JobError, TrainingMetadata};

/// What a successful training run produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainerOutput {
    pub model_ref: String,
    pub doc_ref: String,
    pub metadata: TrainingMetadata,
}

/// Errors raised while invoking a trainer.
#[derive(Debug, thiserror::Error)]
pub enum TrainerError {
    #[error("failed to start trainer '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("trainer exited with {}", exit_label(.code))]
    Exit { code: Option<i32>, stderr: String },

    #[error("malformed trainer output: {reason}")]
    MalformedOutput { reason: String, stderr: String },
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {}", code),
        None => "no status (terminated by signal)".to_string(),
    }
}

impl TrainerError {
    /// Stderr captured from the trainer process, empty if it never ran.
    pub fn stderr(&self) -> &str {
        match self {
            TrainerError::Spawn { .. } => "",
            TrainerError::Exit { stderr, .. } => stderr,
            TrainerError::MalformedOutput { stderr, .. } => stderr,
        }
    }
}

impl From<TrainerError> for JobError {
    fn from(err: TrainerError) -> Self {
        JobError::TrainerExecution {
            message: err.to_string(),
            stderr: err.stderr().to_string(),
        }
    }
}

/// Result type for trainers.
pub type TrainerResult = Result<TrainerOutput, TrainerError>;

/// Future type for async trainers.
pub type TrainerFuture = Pin<Box<dyn Future<Output = TrainerResult> + Send>>;

/// Runs one training attempt for a dataset and description.
///
/// Implementations are invoked once per task; there are no retries.
pub trait Trainer: Send + Sync + 'static {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Train a model and return refs to the model and its documentation.
    fn train(&self, dataset_ref: &str, description: &str) -> TrainerFuture;
}

/// A simple function-based trainer.
pub struct FnTrainer<F>
where
    F: Fn(&str, &str) -> TrainerFuture + Send + Sync + 'static,
{
    name: String,
    train: F,
}

impl<F> FnTrainer<F>
where
    F: Fn(&str, &str) -> TrainerFuture + Send + Sync + 'static,
{
    /// Create a new function-based trainer.
    pub fn new(name: impl Into<String>, train: F) -> Self {
        Self {
            name: name.into(),
            train,
        }
    }
}

impl<F> Trainer for FnTrainer<F>
where
    F: Fn(&str, &str) -> TrainerFuture + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn train(&self, dataset_ref: &str, description: &str) -> TrainerFuture {
        (self.train)(dataset_ref, description)
    }
}
