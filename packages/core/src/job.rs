//! Job record types for training requests and their outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::TransitionError;

/// Unique identifier for a job, using ULID for chronological sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Ulid);

impl JobId {
    /// Create a new unique job ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse a job ID from a string.
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a job record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    /// Dataset uploaded and record persisted; waiting for a worker slot.
    Uploading,
    /// A worker holds processing rights and the trainer is running.
    Processing,
    Completed,
    Failed,
    /// Description edited outside of a training run.
    Updated,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Pending,
        JobStatus::Uploading,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Updated,
    ];

    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Check whether a record in this state may move to `next`.
    ///
    /// `Updated` is reachable from anywhere. `Processing` is entered only by a
    /// worker dequeuing a task, and is left only for a terminal state.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (_, Updated) => true,
            (Pending, Uploading) => true,
            (Uploading | Completed | Failed | Updated, Processing) => true,
            (Processing, Completed | Failed) => true,
            // A description edit landed while the run was in progress.
            (Updated, Completed | Failed) => true,
            // Enqueue rejected, or the process died before a worker picked it up.
            (Uploading, Failed) => true,
            _ => false,
        }
    }

    /// Get a simple status string for display and storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Uploading => "uploading",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Updated => "updated",
        }
    }

    /// Parse a status from its display string.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == s)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The kinds of object a job references in the artifact backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Dataset,
    Model,
    Doc,
}

impl ArtifactKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactKind::Dataset => "dataset",
            ArtifactKind::Model => "model",
            ArtifactKind::Doc => "doc",
        }
    }

    /// Folder that objects of this kind live under in the artifact backend.
    pub fn folder(self) -> &'static str {
        match self {
            ArtifactKind::Dataset => "datasets",
            ArtifactKind::Model => "models",
            ArtifactKind::Doc => "docs",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ArtifactKind::Dataset => "csv",
            ArtifactKind::Model => "pkl",
            ArtifactKind::Doc => "pdf",
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An artifact produced by an earlier run that is no longer current.
///
/// Kept so that deleting the job can still clean it up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetiredArtifact {
    pub kind: ArtifactKind,
    pub location: String,
}

/// Facts about a successful training run, as reported by the trainer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingMetadata {
    /// Wall-clock training time in milliseconds.
    pub duration_ms: u64,
    /// Algorithm identifier, e.g. `LogisticRegression`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<String>,
    /// Number of rows in the dataset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_rows: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_count: Option<u32>,
}

/// Result delivered to a submitter when a training task completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingOutcome {
    pub job_id: JobId,
    pub model_ref: String,
    pub doc_ref: String,
    pub metadata: TrainingMetadata,
}

/// The `{id, status}` pair returned by status polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatusView {
    pub id: JobId,
    pub status: JobStatus,
}

/// Durable representation of one dataset-to-model training request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    /// Reference to the uploaded dataset. Only records imported without an
    /// upload lack one; such records cannot be retrained.
    pub dataset_ref: Option<String>,
    pub description: String,
    pub status: JobStatus,
    pub model_ref: Option<String>,
    pub doc_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub training_metadata: Option<TrainingMetadata>,
    /// Artifacts of earlier runs awaiting deletion with the job.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retired_artifacts: Vec<RetiredArtifact>,
    /// Failure message of the most recent failed run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// Create a record for a dataset that has already been uploaded.
    ///
    /// The record starts in `Uploading`: the raw file upload precedes record
    /// creation, and the status stays there until a worker picks the task up.
    pub fn new(dataset_ref: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            dataset_ref: Some(dataset_ref.into()),
            description: description.into(),
            status: JobStatus::Uploading,
            model_ref: None,
            doc_ref: None,
            training_metadata: None,
            retired_artifacts: Vec::new(),
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn status_view(&self) -> JobStatusView {
        JobStatusView {
            id: self.id,
            status: self.status,
        }
    }

    fn ensure_transition(&self, next: JobStatus) -> Result<(), TransitionError> {
        if self.status.can_transition_to(next) {
            Ok(())
        } else {
            Err(TransitionError {
                job_id: self.id,
                from: self.status,
                to: next,
            })
        }
    }

    /// Stamp `updated_at`, never moving it backwards.
    pub fn touch(&mut self) {
        let now = Utc::now();
        self.updated_at = if now > self.updated_at {
            now
        } else {
            self.updated_at + chrono::Duration::microseconds(1)
        };
    }

    /// Move current artifact refs to the retired list and drop run metadata.
    fn retire_artifacts(&mut self) {
        if let Some(location) = self.model_ref.take() {
            self.retired_artifacts.push(RetiredArtifact {
                kind: ArtifactKind::Model,
                location,
            });
        }
        if let Some(location) = self.doc_ref.take() {
            self.retired_artifacts.push(RetiredArtifact {
                kind: ArtifactKind::Doc,
                location,
            });
        }
        self.training_metadata = None;
    }

    /// A worker took the task: claim processing rights.
    pub fn begin_processing(&mut self) -> Result<(), TransitionError> {
        self.ensure_transition(JobStatus::Processing)?;
        self.retire_artifacts();
        self.last_error = None;
        self.status = JobStatus::Processing;
        self.touch();
        Ok(())
    }

    /// The trainer succeeded.
    pub fn complete(
        &mut self,
        model_ref: impl Into<String>,
        doc_ref: impl Into<String>,
        metadata: TrainingMetadata,
    ) -> Result<(), TransitionError> {
        self.ensure_transition(JobStatus::Completed)?;
        self.model_ref = Some(model_ref.into());
        self.doc_ref = Some(doc_ref.into());
        self.training_metadata = Some(metadata);
        self.last_error = None;
        self.status = JobStatus::Completed;
        self.touch();
        Ok(())
    }

    /// The run failed. A failed record never carries artifact refs.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), TransitionError> {
        self.ensure_transition(JobStatus::Failed)?;
        self.retire_artifacts();
        self.last_error = Some(error.into());
        self.status = JobStatus::Failed;
        self.touch();
        Ok(())
    }

    /// Edit the description without training.
    pub fn mark_updated(&mut self, description: impl Into<String>) {
        self.retire_artifacts();
        self.description = description.into();
        self.status = JobStatus::Updated;
        self.touch();
    }

    /// Every artifact this record references, current and retired.
    pub fn artifacts(&self) -> Vec<(ArtifactKind, &str)> {
        let mut out = Vec::new();
        if let Some(dataset) = self.dataset_ref.as_deref() {
            out.push((ArtifactKind::Dataset, dataset));
        }
        if let Some(model) = self.model_ref.as_deref() {
            out.push((ArtifactKind::Model, model));
        }
        if let Some(doc) = self.doc_ref.as_deref() {
            out.push((ArtifactKind::Doc, doc));
        }
        for retired in &self.retired_artifacts {
            out.push((retired.kind, retired.location.as_str()));
        }
        out
    }

    /// Check the artifact invariants: `completed` iff both refs are set.
    pub fn artifacts_consistent(&self) -> bool {
        let has_both = self.model_ref.is_some() && self.doc_ref.is_some();
        let has_any = self.model_ref.is_some() || self.doc_ref.is_some();
        match self.status {
            JobStatus::Completed => has_both,
            _ => !has_any,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed_record() -> JobRecord {
        let mut record = JobRecord::new("datasets/a.csv", "predict churn from usage");
        record.begin_processing().unwrap();
        record
            .complete("models/a.pkl", "docs/a.pdf", TrainingMetadata::default())
            .unwrap();
        record
    }

    #[test]
    fn new_record_starts_uploading() {
        let record = JobRecord::new("datasets/a.csv", "predict churn from usage");
        assert_eq!(record.status, JobStatus::Uploading);
        assert_eq!(record.created_at, record.updated_at);
        assert!(record.artifacts_consistent());
    }

    #[test]
    fn successful_run_sets_both_refs() {
        let record = completed_record();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.model_ref.as_deref(), Some("models/a.pkl"));
        assert_eq!(record.doc_ref.as_deref(), Some("docs/a.pdf"));
        assert!(record.training_metadata.is_some());
        assert!(record.artifacts_consistent());
    }

    #[test]
    fn retrain_retires_previous_artifacts() {
        let mut record = completed_record();
        record.mark_updated("predict churn from usage and tenure");
        assert_eq!(record.status, JobStatus::Updated);
        assert!(record.model_ref.is_none());
        assert_eq!(record.retired_artifacts.len(), 2);
        assert!(record.artifacts_consistent());

        record.begin_processing().unwrap();
        record.fail("trainer exited with status 1").unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert!(record.artifacts_consistent());
        assert_eq!(record.artifacts().len(), 3);
    }

    #[test]
    fn processing_cannot_be_entered_twice() {
        let mut record = JobRecord::new("datasets/a.csv", "predict churn from usage");
        record.begin_processing().unwrap();
        let err = record.begin_processing().unwrap_err();
        assert_eq!(err.from, JobStatus::Processing);
        assert_eq!(err.to, JobStatus::Processing);
    }

    #[test]
    fn completion_requires_processing() {
        let mut record = JobRecord::new("datasets/a.csv", "predict churn from usage");
        assert!(
            record
                .complete("m", "d", TrainingMetadata::default())
                .is_err()
        );
        assert_eq!(record.status, JobStatus::Uploading);
    }

    #[test]
    fn updated_is_reachable_from_every_state() {
        for status in JobStatus::ALL {
            assert!(status.can_transition_to(JobStatus::Updated), "{status}");
        }
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Processing));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Failed));
        assert!(JobStatus::Updated.can_transition_to(JobStatus::Completed));
    }

    #[test]
    fn touch_is_monotonic() {
        let mut record = JobRecord::new("datasets/a.csv", "predict churn from usage");
        let before = record.updated_at;
        record.touch();
        record.touch();
        assert!(record.updated_at > before);
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in JobStatus::ALL {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::parse("running"), None);
    }
}
