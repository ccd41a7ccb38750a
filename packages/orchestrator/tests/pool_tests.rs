#![allow(clippy::disallowed_methods)]

mod common;

use common::{GatedTrainer, TestResult};
use orchestrator::WorkerPool;
use tokio::sync::broadcast;
use training_core::{JobError, JobEvent, JobRecord, JobStatus, PoolConfig};

#[tokio::test]
async fn test_concurrency_never_exceeds_slots() -> TestResult {
    let gated = GatedTrainer::new();
    let (manager, _store) =
        common::setup_manager(PoolConfig::default().with_concurrency(2), gated.trainer()).await?;

    let mut handles = Vec::new();
    for i in 0..6 {
        let handle = manager
            .create_job(format!("datasets/burst-{i}.csv"), "predict churn from usage")
            .await?;
        handles.push(handle);
    }

    gated.wait_active(2).await;
    let stats = manager.pool_stats().await?;
    assert_eq!(stats.running, 2);
    assert_eq!(stats.pending, 4);

    gated.release(6);
    for handle in handles {
        handle.await?;
    }

    assert_eq!(gated.peak(), 2);
    let stats = manager.pool_stats().await?;
    assert_eq!(stats.completed, 6);
    assert_eq!(stats.active(), 0);

    manager.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_single_slot_runs_in_submission_order() -> TestResult {
    let gated = GatedTrainer::new();
    let (manager, _store) =
        common::setup_manager(PoolConfig::default().with_concurrency(1), gated.trainer()).await?;

    let mut handles = Vec::new();
    for name in ["a", "b", "c", "d"] {
        handles.push(
            manager
                .create_job(format!("datasets/{name}.csv"), "classify iris species")
                .await?,
        );
    }

    gated.release(4);
    for handle in handles {
        handle.await?;
    }

    assert_eq!(
        gated.started().await,
        vec![
            "datasets/a.csv",
            "datasets/b.csv",
            "datasets/c.csv",
            "datasets/d.csv"
        ]
    );
    assert_eq!(gated.peak(), 1);

    manager.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_duplicate_submission_is_rejected() -> TestResult {
    let gated = GatedTrainer::new();
    let store = common::setup_store().await?;
    let (event_tx, _) = broadcast::channel(64);
    let pool = WorkerPool::start(
        PoolConfig::default().with_concurrency(1),
        gated.trainer(),
        store.clone(),
        event_tx,
    )
    .await?;

    let record = store
        .create(JobRecord::new("datasets/dup.csv", "forecast weekly demand"))
        .await?;
    let handle = pool
        .submit(record.id, "datasets/dup.csv", &record.description)
        .await?;
    assert!(pool.is_in_flight(record.id).await?);

    let second = pool
        .submit(record.id, "datasets/dup.csv", &record.description)
        .await;
    assert!(matches!(second, Err(JobError::AlreadyInFlight(id)) if id == record.id));

    gated.release(1);
    let outcome = handle.await?;
    assert_eq!(outcome.job_id, record.id);
    assert!(!pool.is_in_flight(record.id).await?);

    pool.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_bounded_queue_rejects_and_fails_record() -> TestResult {
    let gated = GatedTrainer::new();
    let config = PoolConfig::default()
        .with_concurrency(1)
        .with_max_queue_size(1);
    let (manager, _store) = common::setup_manager(config, gated.trainer()).await?;

    let running = manager
        .create_job("datasets/first.csv", "predict churn from usage")
        .await?;
    gated.wait_active(1).await;

    let waiting = manager
        .create_job("datasets/second.csv", "predict churn from usage")
        .await?;
    assert_eq!(waiting.position(), 1);

    let mut events = manager.subscribe();
    let rejected = manager
        .create_job("datasets/third.csv", "predict churn from usage")
        .await;
    assert!(matches!(rejected, Err(JobError::QueueFull { capacity: 1 })));

    let failed = common::wait_for_event(&mut events, |e| {
        matches!(e, JobEvent::JobFailed { .. })
    })
    .await?;
    let rejected_id = failed.job_id().ok_or("failed event without job id")?;
    let record = manager.get_job(rejected_id).await?;
    assert_eq!(record.status, JobStatus::Failed);
    assert!(record.last_error.is_some());

    gated.release(2);
    running.await?;
    waiting.await?;

    manager.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_failing_trainer_fails_record() -> TestResult {
    let (manager, _store) = common::setup_manager(
        PoolConfig::default(),
        common::failing_trainer("ValueError: could not convert string to float"),
    )
    .await?;

    let handle = manager
        .create_job("datasets/broken.csv", "predict churn from usage")
        .await?;
    let job_id = handle.job_id();

    let result = handle.await;
    match result {
        Err(JobError::TrainerExecution { stderr, .. }) => {
            assert!(stderr.contains("could not convert"));
        }
        other => panic!("expected trainer failure, got {:?}", other),
    }

    let record = manager.get_job(job_id).await?;
    assert_eq!(record.status, JobStatus::Failed);
    assert!(record.model_ref.is_none());
    assert!(record.doc_ref.is_none());
    assert!(record.artifacts_consistent());

    let stats = manager.pool_stats().await?;
    assert_eq!(stats.failed, 1);

    manager.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_worker_panic_is_replaced() -> TestResult {
    let (manager, _store) = common::setup_manager(
        PoolConfig::default().with_concurrency(1),
        common::panicking_trainer(),
    )
    .await?;
    let mut events = manager.subscribe();

    let doomed = manager
        .create_job("datasets/doomed.csv", "this one will panic mid-training")
        .await?;
    let doomed_id = doomed.job_id();
    assert!(matches!(doomed.await, Err(JobError::Interrupted(id)) if id == doomed_id));

    common::wait_for_event(&mut events, |e| {
        matches!(e, JobEvent::WorkerRestarted { .. })
    })
    .await?;
    let record = common::wait_for_status(&manager, doomed_id, JobStatus::Failed).await?;
    assert!(record.artifacts_consistent());

    let healthy = manager
        .create_job("datasets/healthy.csv", "predict churn from usage")
        .await?;
    let outcome = healthy.await?;
    assert_eq!(outcome.model_ref, "models/healthy.pkl");

    manager.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_shutdown_interrupts_pending_tasks() -> TestResult {
    let gated = GatedTrainer::new();
    let (manager, _store) =
        common::setup_manager(PoolConfig::default().with_concurrency(1), gated.trainer()).await?;

    let running = manager
        .create_job("datasets/running.csv", "predict churn from usage")
        .await?;
    gated.wait_active(1).await;
    let pending = manager
        .create_job("datasets/pending.csv", "predict churn from usage")
        .await?;
    let pending_id = pending.job_id();

    let drain = async {
        let interrupted = pending.await;
        gated.release(1);
        (interrupted, running.await)
    };
    let ((interrupted, finished), ()) = tokio::join!(drain, manager.shutdown());

    assert!(matches!(interrupted, Err(JobError::Interrupted(id)) if id == pending_id));
    let outcome = finished?;
    assert_eq!(outcome.model_ref, "models/running.pkl");
    assert_eq!(gated.started().await, vec!["datasets/running.csv"]);

    let dropped = manager.get_job(pending_id).await?;
    assert_eq!(dropped.status, JobStatus::Failed);
    assert!(dropped.last_error.as_ref().is_some_and(|e| e.contains("interrupted")));
    assert!(dropped.artifacts_consistent());
    let ran = manager.get_job(outcome.job_id).await?;
    assert_eq!(ran.status, JobStatus::Completed);
    Ok(())
}
