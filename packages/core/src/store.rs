//! Interfaces to the durable record store and the artifact backend.
//!
//! Both traits return boxed futures so that they can be shared as
//! `Arc<dyn JobStore>` / `Arc<dyn ArtifactStore>` between the caller path and
//! the worker actors.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::error::{ArtifactError, JobError, StoreError};
use crate::job::{ArtifactKind, JobId, JobRecord, JobStatus};

/// Maximum page size accepted by listings.
pub const MAX_PAGE_LIMIT: u32 = 50;

/// In-place edit applied to a record under the store's write guard.
///
/// Returning an error aborts the update and leaves the stored record unchanged.
pub type RecordMutator = Box<dyn FnOnce(&mut JobRecord) -> Result<(), StoreError> + Send>;

/// Box a closure as a [`RecordMutator`].
pub fn mutator<F>(f: F) -> RecordMutator
where
    F: FnOnce(&mut JobRecord) -> Result<(), StoreError> + Send + 'static,
{
    Box::new(f)
}

/// Filters for listing records. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    /// Inclusive lower bound on `created_at`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_after: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `created_at`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_before: Option<DateTime<Utc>>,
}

impl JobFilter {
    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_created_after(mut self, after: DateTime<Utc>) -> Self {
        self.created_after = Some(after);
        self
    }

    pub fn with_created_before(mut self, before: DateTime<Utc>) -> Self {
        self.created_before = Some(before);
        self
    }

    /// Check a record against the filter.
    pub fn matches(&self, record: &JobRecord) -> bool {
        self.status.is_none_or(|s| record.status == s)
            && self.created_after.is_none_or(|t| record.created_at >= t)
            && self.created_before.is_none_or(|t| record.created_at <= t)
    }
}

/// A validated 1-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    page: u32,
    limit: u32,
}

impl PageRequest {
    /// Validate page ≥ 1 and limit in `1..=50`.
    pub fn new(page: u32, limit: u32) -> Result<Self, JobError> {
        if page < 1 {
            return Err(JobError::Validation("page must be at least 1".into()));
        }
        if !(1..=MAX_PAGE_LIMIT).contains(&limit) {
            return Err(JobError::Validation(format!(
                "limit must be between 1 and {}",
                MAX_PAGE_LIMIT
            )));
        }
        Ok(Self { page, limit })
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Number of records to skip.
    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.limit)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { page: 1, limit: 10 }
    }
}

/// One page of a listing, newest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPage {
    pub records: Vec<JobRecord>,
    pub page: u32,
    pub limit: u32,
    /// Records matching the filter across all pages.
    pub total: u64,
    pub total_pages: u64,
}

impl JobPage {
    pub fn new(records: Vec<JobRecord>, request: PageRequest, total: u64) -> Self {
        Self {
            records,
            page: request.page(),
            limit: request.limit(),
            total,
            total_pages: total.div_ceil(u64::from(request.limit())),
        }
    }
}

/// Durable store of job records keyed by id.
pub trait JobStore: Send + Sync {
    fn create(&self, record: JobRecord) -> BoxFuture<'_, Result<JobRecord, StoreError>>;

    fn get(&self, id: JobId) -> BoxFuture<'_, Result<JobRecord, StoreError>>;

    /// Apply `mutator` to the stored record and persist the result.
    ///
    /// Updates to one record are serialized; the mutator sees the latest state.
    fn update(
        &self,
        id: JobId,
        mutator: RecordMutator,
    ) -> BoxFuture<'_, Result<JobRecord, StoreError>>;

    fn delete(&self, id: JobId) -> BoxFuture<'_, Result<(), StoreError>>;

    /// Matching records ordered newest first, plus the total match count.
    fn list(
        &self,
        filter: JobFilter,
        page: PageRequest,
    ) -> BoxFuture<'_, Result<(Vec<JobRecord>, u64), StoreError>>;
}

/// Backend holding datasets, models and generated documentation.
pub trait ArtifactStore: Send + Sync {
    /// Store `data` and return a reference to it.
    fn upload(&self, data: Bytes, kind: ArtifactKind) -> BoxFuture<'_, Result<String, ArtifactError>>;

    /// Remove the object behind `location`. Missing objects count as deleted.
    fn delete<'a>(
        &'a self,
        location: &'a str,
        kind: ArtifactKind,
    ) -> BoxFuture<'a, Result<(), ArtifactError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_request_bounds() {
        assert!(PageRequest::new(0, 10).is_err());
        assert!(PageRequest::new(1, 0).is_err());
        assert!(PageRequest::new(1, 51).is_err());
        let page = PageRequest::new(3, 20).unwrap();
        assert_eq!(page.offset(), 40);
    }

    #[test]
    fn page_counts_round_up() {
        let request = PageRequest::new(1, 10).unwrap();
        assert_eq!(JobPage::new(Vec::new(), request, 0).total_pages, 0);
        assert_eq!(JobPage::new(Vec::new(), request, 10).total_pages, 1);
        assert_eq!(JobPage::new(Vec::new(), request, 11).total_pages, 2);
    }

    #[test]
    fn filter_matches_status_and_dates() {
        let record = JobRecord::new("datasets/a.csv", "predict churn from usage");
        assert!(JobFilter::default().matches(&record));
        assert!(
            JobFilter::default()
                .with_status(JobStatus::Uploading)
                .matches(&record)
        );
        assert!(
            !JobFilter::default()
                .with_status(JobStatus::Completed)
                .matches(&record)
        );
        let later = record.created_at + chrono::Duration::seconds(1);
        assert!(!JobFilter::default().with_created_after(later).matches(&record));
        assert!(
            JobFilter::default()
                .with_created_before(later)
                .matches(&record)
        );
    }
}
