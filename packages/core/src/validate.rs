//! Input validation for user-supplied fields.

use chrono::{DateTime, NaiveDate, Utc};

use crate::error::JobError;
use crate::job::JobStatus;

pub const DESCRIPTION_MIN_CHARS: usize = 10;
pub const DESCRIPTION_MAX_CHARS: usize = 1000;

/// Trim a description and check its length in characters.
pub fn description(raw: &str) -> Result<String, JobError> {
    let trimmed = raw.trim();
    let len = trimmed.chars().count();
    if !(DESCRIPTION_MIN_CHARS..=DESCRIPTION_MAX_CHARS).contains(&len) {
        return Err(JobError::Validation(format!(
            "description must be between {} and {} characters (got {})",
            DESCRIPTION_MIN_CHARS, DESCRIPTION_MAX_CHARS, len
        )));
    }
    Ok(trimmed.to_string())
}

/// Parse a status filter value.
pub fn status(raw: &str) -> Result<JobStatus, JobError> {
    JobStatus::parse(raw.trim()).ok_or_else(|| {
        let allowed: Vec<&str> = JobStatus::ALL.iter().map(|s| s.as_str()).collect();
        JobError::Validation(format!(
            "invalid status '{}', expected one of: {}",
            raw,
            allowed.join(", ")
        ))
    })
}

/// Parse an ISO 8601 timestamp or a bare date (taken as midnight UTC).
pub fn timestamp(raw: &str) -> Result<DateTime<Utc>, JobError> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| JobError::Validation(format!("invalid ISO 8601 date: '{}'", raw)))
}

/// Parse a job id.
pub fn job_id(raw: &str) -> Result<crate::JobId, JobError> {
    crate::JobId::parse(raw.trim())
        .map_err(|e| JobError::Validation(format!("invalid job id '{}': {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn description_is_trimmed_and_bounded() {
        assert_eq!(
            description("  predict churn  ").unwrap(),
            "predict churn"
        );
        assert!(description("too short").is_err());
        assert!(description(&"x".repeat(1001)).is_err());
        assert!(description(&"x".repeat(1000)).is_ok());
    }

    #[test]
    fn status_filter_rejects_unknown_values() {
        assert_eq!(status("failed").unwrap(), JobStatus::Failed);
        assert!(matches!(status("running"), Err(JobError::Validation(_))));
    }

    #[test]
    fn timestamps_accept_dates_and_rfc3339() {
        let date = timestamp("2024-03-01").unwrap();
        assert_eq!(date.to_rfc3339(), "2024-03-01T00:00:00+00:00");
        let full = timestamp("2024-03-01T12:30:00+02:00").unwrap();
        assert_eq!(full.to_rfc3339(), "2024-03-01T10:30:00+00:00");
        assert!(timestamp("yesterday").is_err());
    }
}
