//! Integration tests for the full scheduler pipeline.
//!
//! These tests exercise submit-to-completion flows through the public
//! facade: queue, worker pool, retry machinery, and circuit breakers
//! working together against an in-memory store.

use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracklift_jobs::{
    JobError, JobFilter, JobStatus, JobsConfig, MemoryStore, Priority, QueueSnapshot, Scheduler,
};

fn fast_config(concurrency: usize) -> JobsConfig {
    let mut config = JobsConfig::default();
    config.worker.concurrency = concurrency;
    config.worker.poll_interval_ms = 10;
    config.retry.base_delay_ms = 10;
    config.breaker.failure_threshold = 2;
    config.breaker.timeout_secs = 1;
    config
}

fn scheduler_with(store: Arc<MemoryStore>, concurrency: usize) -> Scheduler {
    Scheduler::builder(store).config(fast_config(concurrency)).build()
}

async fn wait_until<F>(scheduler: &Scheduler, what: &str, done: F)
where
    F: Fn(&QueueSnapshot) -> bool,
{
    for _ in 0..300 {
        if done(&scheduler.snapshot().await) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn test_jobs_complete_in_priority_order() {
    let scheduler = scheduler_with(Arc::new(MemoryStore::new()), 1);
    let completions: Arc<parking_lot::Mutex<Vec<String>>> = Arc::default();

    let log = completions.clone();
    scheduler.register_fn("work", move |payload, _ctx| {
        let log = log.clone();
        Box::pin(async move {
            let name = payload["name"].as_str().unwrap_or("?").to_string();
            log.lock().push(name);
            Ok(json!(null))
        })
    });

    // Fill the queue before any worker runs so claiming order is pure
    // priority order.
    scheduler
        .submit("work", json!({ "name": "bulk" }), Priority::Background)
        .await
        .expect("Failed to submit");
    scheduler
        .submit("work", json!({ "name": "user-1" }), Priority::Urgent)
        .await
        .expect("Failed to submit");
    scheduler
        .submit("work", json!({ "name": "refresh" }), Priority::Normal)
        .await
        .expect("Failed to submit");
    scheduler
        .submit("work", json!({ "name": "user-2" }), Priority::Urgent)
        .await
        .expect("Failed to submit");

    scheduler.start().await.expect("Failed to start");
    wait_until(&scheduler, "all jobs to complete", |s| s.completed == 4).await;

    assert_eq!(
        *completions.lock(),
        vec!["user-1", "user-2", "refresh", "bulk"]
    );
    scheduler.shutdown(true).await.expect("Failed to shut down");
}

#[tokio::test]
async fn test_transient_failure_retries_then_succeeds() {
    let scheduler = scheduler_with(Arc::new(MemoryStore::new()), 2);
    let attempts = Arc::new(AtomicU32::new(0));

    let counter = attempts.clone();
    scheduler.register_fn("flaky_download", move |_payload, _ctx| {
        let counter = counter.clone();
        Box::pin(async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(JobError::ExecutionFailed("connection reset".into()))
            } else {
                Ok(json!({ "path": "/music/track.flac" }))
            }
        })
    });
    scheduler.start().await.expect("Failed to start");

    let id = scheduler
        .submit("flaky_download", json!({}), Priority::Normal)
        .await
        .expect("Failed to submit");

    wait_until(&scheduler, "retried job to complete", |s| s.completed == 1).await;

    let job = scheduler
        .get_job(&id)
        .await
        .expect("Lookup failed")
        .expect("Job not found");
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.attempt_count, 3);
    assert_eq!(job.result, Some(json!({ "path": "/music/track.flac" })));
    scheduler.shutdown(true).await.expect("Failed to shut down");
}

#[tokio::test]
async fn test_retry_budget_exhaustion_marks_failed() {
    let store = Arc::new(MemoryStore::new());
    let scheduler = scheduler_with(store, 1);

    scheduler.register_fn("doomed", |_payload, _ctx| {
        Box::pin(async move { Err(JobError::ExecutionFailed("upstream 500".into())) })
    });
    scheduler.start().await.expect("Failed to start");

    let id = scheduler
        .submit_with_retries("doomed", json!({}), Priority::Normal, 1)
        .await
        .expect("Failed to submit");

    wait_until(&scheduler, "job to exhaust retries", |s| s.failed == 1).await;

    // max_retries = 1: two attempts total.
    let job = scheduler
        .get_job(&id)
        .await
        .expect("Lookup failed")
        .expect("Job not found");
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempt_count, 2);
    assert!(job.error_message.expect("No error recorded").contains("upstream 500"));
    scheduler.shutdown(true).await.expect("Failed to shut down");
}

#[tokio::test]
async fn test_open_breaker_defers_job_until_service_recovers() {
    let scheduler = scheduler_with(Arc::new(MemoryStore::new()), 1);
    let upstream_calls = Arc::new(AtomicU32::new(0));

    // The upstream is down for its first two calls; the breaker opens
    // at the configured threshold of 2 and later attempts are rejected
    // without touching the service until the 1s open timeout passes.
    let breaker = scheduler.breaker("slskd");
    let calls = upstream_calls.clone();
    scheduler.register_fn("daemon_fetch", move |_payload, _ctx| {
        let breaker = breaker.clone();
        let calls = calls.clone();
        Box::pin(async move {
            breaker
                .call(|| async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(JobError::ExecutionFailed("upstream timeout".into()))
                    } else {
                        Ok(json!({ "bytes": 4096 }))
                    }
                })
                .await
                .map_err(JobError::from)
        })
    });

    scheduler.start().await.expect("Failed to start");
    let id = scheduler
        .submit_with_retries("daemon_fetch", json!({}), Priority::Urgent, 10)
        .await
        .expect("Failed to submit");

    wait_until(&scheduler, "job to complete after breaker recovery", |s| {
        s.completed == 1
    })
    .await;

    let job = scheduler
        .get_job(&id)
        .await
        .expect("Lookup failed")
        .expect("Job not found");
    assert_eq!(job.status, JobStatus::Completed);
    // Probe after recovery succeeded; the breaker closed again by the
    // time the job finished.
    assert_eq!(upstream_calls.load(Ordering::SeqCst), 3);
    scheduler.shutdown(true).await.expect("Failed to shut down");
}

#[tokio::test]
async fn test_cancel_running_job_discards_its_result() {
    let scheduler = scheduler_with(Arc::new(MemoryStore::new()), 1);
    let started = Arc::new(tokio::sync::Notify::new());
    let release = Arc::new(tokio::sync::Notify::new());

    let started_tx = started.clone();
    let release_rx = release.clone();
    scheduler.register_fn("long_sync", move |_payload, _ctx| {
        let started_tx = started_tx.clone();
        let release_rx = release_rx.clone();
        Box::pin(async move {
            started_tx.notify_one();
            release_rx.notified().await;
            Ok(json!({ "synced": true }))
        })
    });
    scheduler.start().await.expect("Failed to start");

    let id = scheduler
        .submit("long_sync", json!({}), Priority::Normal)
        .await
        .expect("Failed to submit");
    started.notified().await;

    scheduler.cancel(&id).await.expect("Failed to cancel");
    release.notify_one();

    // The worker finishes its attempt but the outcome is dropped.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let job = scheduler
        .get_job(&id)
        .await
        .expect("Lookup failed")
        .expect("Job not found");
    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(job.result, None);
    scheduler.shutdown(true).await.expect("Failed to shut down");
}

#[tokio::test]
async fn test_global_pause_holds_pending_jobs() {
    let scheduler = scheduler_with(Arc::new(MemoryStore::new()), 2);
    scheduler.register_fn("quick", |_payload, _ctx| {
        Box::pin(async move { Ok(json!(null)) })
    });

    scheduler.pause_all();
    scheduler.start().await.expect("Failed to start");
    scheduler
        .submit("quick", json!({}), Priority::Urgent)
        .await
        .expect("Failed to submit");

    tokio::time::sleep(Duration::from_millis(100)).await;
    let snap = scheduler.snapshot().await;
    assert_eq!(snap.pending, 1);
    assert_eq!(snap.completed, 0);

    scheduler.resume_all();
    wait_until(&scheduler, "job to run after resume", |s| s.completed == 1).await;
    scheduler.shutdown(true).await.expect("Failed to shut down");
}

#[tokio::test]
async fn test_interrupted_jobs_resume_after_restart() {
    let store = Arc::new(MemoryStore::new());

    // First process: submit jobs but stop before the workers touch
    // them (workers never started).
    {
        let scheduler = scheduler_with(store.clone(), 1);
        scheduler
            .submit("import", json!({ "album": "a" }), Priority::Normal)
            .await
            .expect("Failed to submit");
        scheduler
            .submit("import", json!({ "album": "b" }), Priority::Normal)
            .await
            .expect("Failed to submit");
    }
    assert_eq!(store.job_count(), 2);

    // Second process rehydrates and drains them.
    let scheduler = scheduler_with(store, 2);
    scheduler.register_fn("import", |payload, _ctx| {
        Box::pin(async move { Ok(payload) })
    });
    scheduler.start().await.expect("Failed to start");

    wait_until(&scheduler, "rehydrated jobs to complete", |s| {
        s.completed == 2
    })
    .await;

    let completed = scheduler
        .list_jobs(&JobFilter {
            status: Some(JobStatus::Completed),
            ..Default::default()
        })
        .await
        .expect("List failed");
    assert_eq!(completed.len(), 2);
    scheduler.shutdown(true).await.expect("Failed to shut down");
}

#[tokio::test]
async fn test_concurrency_scales_at_runtime() {
    let scheduler = scheduler_with(Arc::new(MemoryStore::new()), 1);
    scheduler.register_fn("tick", |_payload, _ctx| {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(json!(null))
        })
    });
    scheduler.start().await.expect("Failed to start");

    for _ in 0..10 {
        scheduler
            .submit("tick", json!({}), Priority::Normal)
            .await
            .expect("Failed to submit");
    }
    scheduler.set_concurrency(4);

    wait_until(&scheduler, "all jobs to drain", |s| s.completed == 10).await;
    assert_eq!(scheduler.jobs_processed(), 10);
    scheduler.shutdown(true).await.expect("Failed to shut down");
}
