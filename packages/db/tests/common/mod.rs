use chrono::{DateTime, Duration, Utc};
use training_core::JobRecord;

use db::{DbConfig, DbError, repositories::JobRepository};

/// Fresh in-memory database per test.
pub async fn setup_repo() -> Result<JobRepository, DbError> {
    let db = db::init(DbConfig::memory()).await?;
    Ok(JobRepository::new(db))
}

/// A record created `offset_secs` after `base`.
pub fn record_at(base: DateTime<Utc>, offset_secs: i64, description: &str) -> JobRecord {
    let mut record = JobRecord::new(format!("datasets/{}.csv", offset_secs), description);
    record.created_at = base + Duration::seconds(offset_secs);
    record.updated_at = record.created_at;
    record
}
