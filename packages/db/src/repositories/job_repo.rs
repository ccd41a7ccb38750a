//! Job repository for record persistence.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use surrealdb::sql::Thing;
use tokio::sync::Mutex;
use training_core::{
    JobFilter, JobId, JobRecord, JobStatus, JobStore, PageRequest, RecordMutator,
    RetiredArtifact, StoreError, TrainingMetadata,
};

use crate::{Database, DbError};

const TABLE: &str = "job";

/// Repository for job record persistence.
///
/// Read-modify-write updates are serialized through a write guard so that a
/// mutator always sees the latest stored state.
#[derive(Clone)]
pub struct JobRepository {
    db: Database,
    write_guard: Arc<Mutex<()>>,
}

/// Internal record type for SurrealDB.
#[derive(Debug, Serialize, Deserialize)]
struct JobRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<Thing>,
    job_id: JobId,
    dataset_ref: Option<String>,
    description: String,
    status: JobStatus,
    model_ref: Option<String>,
    doc_ref: Option<String>,
    #[serde(default)]
    training_metadata: Option<TrainingMetadata>,
    #[serde(default)]
    retired_artifacts: Vec<RetiredArtifact>,
    #[serde(default)]
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    created_us: i64,
}

impl From<JobRecord> for JobRow {
    fn from(record: JobRecord) -> Self {
        Self {
            id: None,
            job_id: record.id,
            dataset_ref: record.dataset_ref,
            description: record.description,
            status: record.status,
            model_ref: record.model_ref,
            doc_ref: record.doc_ref,
            training_metadata: record.training_metadata,
            retired_artifacts: record.retired_artifacts,
            last_error: record.last_error,
            created_us: record.created_at.timestamp_micros(),
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

impl From<JobRow> for JobRecord {
    fn from(row: JobRow) -> Self {
        Self {
            id: row.job_id,
            dataset_ref: row.dataset_ref,
            description: row.description,
            status: row.status,
            model_ref: row.model_ref,
            doc_ref: row.doc_ref,
            training_metadata: row.training_metadata,
            retired_artifacts: row.retired_artifacts,
            last_error: row.last_error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CountRow {
    total: i64,
}

/// Build the WHERE clause and its bindings for a listing filter.
fn filter_clause(filter: &JobFilter) -> (String, Vec<(&'static str, serde_json::Value)>) {
    let mut conditions = Vec::new();
    let mut bindings: Vec<(&'static str, serde_json::Value)> = Vec::new();

    if let Some(status) = filter.status {
        conditions.push("status = $status");
        bindings.push(("status", serde_json::json!(status.as_str())));
    }

    if let Some(after) = filter.created_after {
        conditions.push("created_us >= $created_after");
        bindings.push(("created_after", serde_json::json!(after.timestamp_micros())));
    }

    if let Some(before) = filter.created_before {
        conditions.push("created_us <= $created_before");
        bindings.push(("created_before", serde_json::json!(before.timestamp_micros())));
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    (where_clause, bindings)
}

impl JobRepository {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            write_guard: Arc::new(Mutex::new(())),
        }
    }

    async fn fetch(&self, id: JobId) -> Result<Option<JobRecord>, DbError> {
        let row: Option<JobRow> = self.db.select((TABLE, id.to_string())).await?;
        Ok(row.map(JobRecord::from))
    }

    /// Insert a new record.
    pub async fn create(&self, record: JobRecord) -> Result<JobRecord, StoreError> {
        let _guard = self.write_guard.lock().await;

        if self.fetch(record.id).await?.is_some() {
            return Err(StoreError::Duplicate(record.id));
        }

        let id = record.id;
        let row: Option<JobRow> = self
            .db
            .create((TABLE, id.to_string()))
            .content(JobRow::from(record))
            .await
            .map_err(DbError::from)?;

        tracing::debug!("Created job record {}", id);

        row.map(JobRecord::from)
            .ok_or_else(|| DbError::Query(format!("Failed to create job {}", id)).into())
    }

    /// Get a record by ID.
    pub async fn get(&self, id: JobId) -> Result<JobRecord, StoreError> {
        self.fetch(id).await?.ok_or(StoreError::NotFound(id))
    }

    /// Apply a mutator to the stored record and write the result back.
    ///
    /// `id` and `created_at` are restored after the mutator runs; `updated_at`
    /// always advances.
    pub async fn update(&self, id: JobId, mutator: RecordMutator) -> Result<JobRecord, StoreError> {
        let _guard = self.write_guard.lock().await;

        let current = self.fetch(id).await?.ok_or(StoreError::NotFound(id))?;
        let created_at = current.created_at;

        let mut next = current;
        mutator(&mut next)?;
        next.id = id;
        next.created_at = created_at;
        next.touch();

        let row: Option<JobRow> = self
            .db
            .update((TABLE, id.to_string()))
            .content(JobRow::from(next))
            .await
            .map_err(DbError::from)?;

        row.map(JobRecord::from).ok_or(StoreError::NotFound(id))
    }

    /// Delete a record.
    pub async fn delete(&self, id: JobId) -> Result<(), StoreError> {
        let _guard = self.write_guard.lock().await;

        let row: Option<JobRow> = self
            .db
            .delete((TABLE, id.to_string()))
            .await
            .map_err(DbError::from)?;

        match row {
            Some(_) => {
                tracing::debug!("Deleted job record {}", id);
                Ok(())
            }
            None => Err(StoreError::NotFound(id)),
        }
    }

    /// List records newest first, with the total number of matches.
    pub async fn list(
        &self,
        filter: JobFilter,
        page: PageRequest,
    ) -> Result<(Vec<JobRecord>, u64), StoreError> {
        let (where_clause, bindings) = filter_clause(&filter);

        let query = format!(
            "SELECT * FROM {table} {filter} ORDER BY created_us DESC, job_id DESC LIMIT {limit} START {offset};
             SELECT count() AS total FROM {table} {filter} GROUP ALL;",
            table = TABLE,
            filter = where_clause,
            limit = page.limit(),
            offset = page.offset(),
        );

        let mut request = self.db.query(&query);
        for (name, value) in bindings {
            request = request.bind((name, value));
        }

        let mut response = request.await.map_err(DbError::from)?;
        let rows: Vec<JobRow> = response.take(0).map_err(DbError::from)?;
        let count: Option<CountRow> = response.take(1).map_err(DbError::from)?;

        let total = count.map(|c| c.total.max(0) as u64).unwrap_or(0);
        Ok((rows.into_iter().map(JobRecord::from).collect(), total))
    }
}

impl JobStore for JobRepository {
    fn create(&self, record: JobRecord) -> BoxFuture<'_, Result<JobRecord, StoreError>> {
        Box::pin(JobRepository::create(self, record))
    }

    fn get(&self, id: JobId) -> BoxFuture<'_, Result<JobRecord, StoreError>> {
        Box::pin(JobRepository::get(self, id))
    }

    fn update(
        &self,
        id: JobId,
        mutator: RecordMutator,
    ) -> BoxFuture<'_, Result<JobRecord, StoreError>> {
        Box::pin(JobRepository::update(self, id, mutator))
    }

    fn delete(&self, id: JobId) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(JobRepository::delete(self, id))
    }

    fn list(
        &self,
        filter: JobFilter,
        page: PageRequest,
    ) -> BoxFuture<'_, Result<(Vec<JobRecord>, u64), StoreError>> {
        Box::pin(JobRepository::list(self, filter, page))
    }
}
