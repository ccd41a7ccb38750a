//! One function per subcommand.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use bytes::Bytes;
use orchestrator::JobManager;
use serde::Serialize;
use tracing::info;
use training_core::{JobEvent, JobFilter, validate};

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Build a list filter from raw flag values.
pub fn build_filter(
    status: Option<&str>,
    after: Option<&str>,
    before: Option<&str>,
) -> Result<JobFilter> {
    let mut filter = JobFilter::default();
    if let Some(status) = status {
        filter = filter.with_status(validate::status(status)?);
    }
    if let Some(after) = after {
        filter = filter.with_created_after(validate::timestamp(after)?);
    }
    if let Some(before) = before {
        filter = filter.with_created_before(validate::timestamp(before)?);
    }
    Ok(filter)
}

pub async fn submit(
    manager: &JobManager,
    file: Option<PathBuf>,
    dataset_ref: Option<String>,
    description: &str,
) -> Result<()> {
    let description = validate::description(description)?;

    let handle = match (file, dataset_ref) {
        (Some(path), _) => {
            let data = tokio::fs::read(&path)
                .await
                .with_context(|| format!("failed to read dataset {}", path.display()))?;
            info!(path = %path.display(), bytes = data.len(), "Uploading dataset");
            manager
                .create_job_from_upload(Bytes::from(data), description)
                .await?
        }
        (None, Some(dataset_ref)) => manager.create_job(dataset_ref, description).await?,
        (None, None) => bail!("either --file or --dataset-ref is required"),
    };

    let job_id = handle.job_id();
    info!(%job_id, position = handle.position(), "Job queued, waiting for training");
    let outcome = handle.await?;
    info!(%job_id, "Training completed");
    print_json(&outcome)
}

pub async fn status(manager: &JobManager, id: &str) -> Result<()> {
    let job_id = validate::job_id(id)?;
    print_json(&manager.get_status(job_id).await?)
}

pub async fn show(manager: &JobManager, id: &str) -> Result<()> {
    let job_id = validate::job_id(id)?;
    print_json(&manager.get_job(job_id).await?)
}

pub async fn list(manager: &JobManager, filter: JobFilter, page: u32, limit: u32) -> Result<()> {
    print_json(&manager.list_jobs(filter, page, limit).await?)
}

/// With `retrain`, waits for the background run to finish before printing.
pub async fn update(manager: &JobManager, id: &str, description: &str, retrain: bool) -> Result<()> {
    let job_id = validate::job_id(id)?;
    let description = validate::description(description)?;

    let mut events = manager.subscribe();
    let record = manager.update_job(job_id, description, retrain).await?;
    if !retrain {
        return print_json(&record);
    }

    info!(%job_id, "Retraining queued, waiting for the run to finish");
    loop {
        match events.recv().await {
            Ok(event) if event.job_id() == Some(job_id) => {
                tracing::debug!("{}", event.description());
                if let JobEvent::JobFailed { error, .. } = &event {
                    tracing::error!(%job_id, "Retraining failed: {}", error);
                }
                if event.is_terminal() {
                    break;
                }
            }
            Ok(_) | Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
            Err(e) => bail!("event stream closed before job {} finished: {}", job_id, e),
        }
    }

    print_json(&manager.get_job(job_id).await?)
}

pub async fn delete(manager: &JobManager, id: &str) -> Result<()> {
    let job_id = validate::job_id(id)?;
    let report = manager.delete_job(job_id).await?;
    if !report.is_clean() {
        tracing::warn!(
            %job_id,
            "{} of {} artifacts could not be deleted",
            report.failures.len(),
            report.attempted
        );
    }
    print_json(&report)
}

pub async fn recover(manager: &JobManager) -> Result<()> {
    let recovered = manager.recover_interrupted().await?;
    info!("Marked {} interrupted jobs as failed", recovered.len());
    print_json(&recovered)
}
