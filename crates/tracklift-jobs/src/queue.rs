//! Priority job queue: admission, eligibility, and atomic lifecycle
//! transitions.
//!
//! The queue owns every job record for its entire lifecycle and is the
//! single source of truth for scheduling decisions. All transitions go
//! through one async mutex; handler execution happens outside it. Each
//! transition is written to the store before the in-memory commit, so a
//! failed persistence write leaves queue state untouched.

use crate::error::{JobError, JobResult};
use crate::events::JobEventSink;
use crate::job::{Job, JobFilter, JobId, JobStatus, Priority};
use crate::metrics;
use crate::retry::RetryPolicy;
use crate::store::{rehydrate_status, JobStore};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

/// Read-only status report over the whole queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSnapshot {
    /// Jobs waiting to be claimed (including those in backoff).
    pub pending: usize,
    /// Jobs currently executing.
    pub running: usize,
    /// Jobs completed successfully.
    pub completed: usize,
    /// Jobs permanently failed.
    pub failed: usize,
    /// Jobs cancelled.
    pub cancelled: usize,
    /// Jobs paused.
    pub paused: usize,
    /// Pending jobs broken down by priority.
    pub pending_by_priority: BTreeMap<Priority, usize>,
}

/// Priority-ordered job queue backed by a persistence store.
///
/// Eligible pending jobs are claimed in `(priority, created_at)` order,
/// oldest first within a priority. Strict priority without aging: a
/// sustained stream of urgent jobs starves background ones. That is the
/// intended, predictable policy.
pub struct JobQueue {
    store: Arc<dyn JobStore>,
    events: Arc<dyn JobEventSink>,
    retry_policy: RetryPolicy,
    jobs: Mutex<HashMap<JobId, Job>>,
    paused: AtomicBool,
    notify: Notify,
}

impl JobQueue {
    /// Creates an empty queue.
    pub fn new(
        store: Arc<dyn JobStore>,
        events: Arc<dyn JobEventSink>,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            store,
            events,
            retry_policy,
            jobs: Mutex::new(HashMap::new()),
            paused: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Reloads non-terminal jobs from the store after a restart.
    ///
    /// Jobs that were running when the process stopped return to
    /// pending without consuming an attempt. Returns the number of
    /// rehydrated jobs.
    pub async fn rehydrate(&self) -> JobResult<usize> {
        let stored = self.store.load_pending_jobs().await?;
        let mut jobs = self.jobs.lock().await;

        let mut count = 0;
        for mut job in stored {
            let restored = rehydrate_status(job.status);
            if restored != job.status {
                job.status = restored;
                self.store.save_job(&job).await?;
            }
            jobs.insert(job.id.clone(), job);
            count += 1;
        }

        if count > 0 {
            info!(count, "Rehydrated jobs from store");
            self.notify.notify_waiters();
        }
        Ok(count)
    }

    /// Admits a new job in `Pending` state. Never blocks on execution.
    pub async fn submit(
        &self,
        job_type: impl Into<String>,
        payload: serde_json::Value,
        priority: Priority,
        max_retries: u32,
    ) -> JobResult<JobId> {
        let job = Job::new(job_type, payload, priority, max_retries);
        let job_id = job.id.clone();

        {
            let mut jobs = self.jobs.lock().await;
            self.store.save_job(&job).await?;
            jobs.insert(job_id.clone(), job.clone());
            self.update_depth_gauges(&jobs);
        }

        debug!(job_id = %job_id, job_type = %job.job_type, priority = %priority, "Submitted job");
        metrics::job_submitted(&job.job_type);
        self.events.on_job_event(
            &job_id,
            JobStatus::Pending,
            &json!({ "job_type": job.job_type, "priority": priority }),
        );
        self.notify.notify_one();

        Ok(job_id)
    }

    /// Claims the highest-priority eligible pending job and atomically
    /// transitions it to `Running`, incrementing its attempt counter.
    ///
    /// At most one caller receives a given job; returns `None` when no
    /// job is eligible or the queue is globally paused.
    pub async fn claim_next(&self, worker_id: &str) -> JobResult<Option<Job>> {
        if self.paused.load(Ordering::SeqCst) {
            return Ok(None);
        }

        let now = Utc::now();
        let claimed = {
            let mut jobs = self.jobs.lock().await;

            let next_id = jobs
                .values()
                .filter(|job| job.status == JobStatus::Pending && job.backoff_elapsed(now))
                .min_by(|a, b| {
                    (a.priority, a.created_at, a.id.as_str())
                        .cmp(&(b.priority, b.created_at, b.id.as_str()))
                })
                .map(|job| job.id.clone());

            let Some(job_id) = next_id else {
                return Ok(None);
            };

            // Mutate a copy; commit only after the store accepted it.
            let mut job = jobs[&job_id].clone();
            job.status = JobStatus::Running;
            job.started_at = Some(now);
            job.attempt_count += 1;
            job.next_eligible_at = None;

            self.store.save_job(&job).await?;
            jobs.insert(job_id, job.clone());
            self.update_depth_gauges(&jobs);
            job
        };

        debug!(
            job_id = %claimed.id,
            job_type = %claimed.job_type,
            attempt = claimed.attempt_count,
            worker_id,
            "Claimed job"
        );
        metrics::job_claimed(&claimed.job_type);
        self.events.on_job_event(
            &claimed.id,
            JobStatus::Running,
            &json!({ "attempt": claimed.attempt_count, "worker_id": worker_id }),
        );

        Ok(Some(claimed))
    }

    /// Transitions `Running -> Completed`, recording the handler result.
    pub async fn complete(&self, job_id: &JobId, result: serde_json::Value) -> JobResult<()> {
        let job = {
            let mut jobs = self.jobs.lock().await;
            let mut job = Self::expect_status(&jobs, job_id, JobStatus::Running)?.clone();

            job.status = JobStatus::Completed;
            job.completed_at = Some(Utc::now());
            job.result = Some(result);

            self.store.save_job(&job).await?;
            jobs.insert(job_id.clone(), job.clone());
            self.update_depth_gauges(&jobs);
            job
        };

        let duration = job
            .completed_at
            .zip(job.started_at)
            .map(|(done, started)| (done - started).to_std().unwrap_or(Duration::ZERO))
            .unwrap_or(Duration::ZERO);

        debug!(job_id = %job_id, job_type = %job.job_type, "Completed job");
        metrics::job_completed(&job.job_type, duration);
        self.events.on_job_event(
            job_id,
            JobStatus::Completed,
            &json!({ "duration_ms": duration.as_millis() as u64 }),
        );

        Ok(())
    }

    /// Records a failed attempt.
    ///
    /// If the error is retryable and retries remain, the job returns to
    /// `Pending` with a backoff deadline and `true` is returned. A
    /// circuit breaker's `retry_after` hint extends the backoff when it
    /// is longer. Otherwise the job is permanently `Failed` and `false`
    /// is returned.
    pub async fn fail(&self, job_id: &JobId, error: &JobError) -> JobResult<bool> {
        let (job, retry_scheduled, delay) = {
            let mut jobs = self.jobs.lock().await;
            let mut job = Self::expect_status(&jobs, job_id, JobStatus::Running)?.clone();

            job.error_message = Some(error.to_string());

            let retryable = error.is_retryable()
                && self
                    .retry_policy
                    .should_retry(job.attempt_count, job.max_retries);

            let delay = if retryable {
                let mut delay = self.retry_policy.next_delay(job.attempt_count);
                if let Some(hint) = error.retry_after() {
                    delay = delay.max(hint);
                }
                job.status = JobStatus::Pending;
                job.next_eligible_at =
                    Some(Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default());
                Some(delay)
            } else {
                job.status = JobStatus::Failed;
                job.completed_at = Some(Utc::now());
                None
            };

            self.store.save_job(&job).await?;
            jobs.insert(job_id.clone(), job.clone());
            self.update_depth_gauges(&jobs);
            (job, delay.is_some(), delay)
        };

        if retry_scheduled {
            warn!(
                job_id = %job_id,
                job_type = %job.job_type,
                attempt = job.attempt_count,
                delay_ms = delay.map(|d| d.as_millis() as u64),
                error = %error,
                "Job attempt failed, retry scheduled"
            );
            metrics::job_retried(&job.job_type);
            self.events.on_job_event(
                job_id,
                JobStatus::Pending,
                &json!({
                    "attempt": job.attempt_count,
                    "error": job.error_message,
                    "next_eligible_at": job.next_eligible_at,
                }),
            );
        } else {
            warn!(
                job_id = %job_id,
                job_type = %job.job_type,
                attempts = job.attempt_count,
                error = %error,
                "Job permanently failed"
            );
            metrics::job_failed(&job.job_type);
            self.events.on_job_event(
                job_id,
                JobStatus::Failed,
                &json!({ "attempts": job.attempt_count, "error": job.error_message }),
            );
        }

        Ok(retry_scheduled)
    }

    /// Transitions any non-terminal state to `Cancelled`.
    ///
    /// For a running job the cancellation is advisory: the in-flight
    /// attempt finishes, but its outcome is discarded (the worker's
    /// later `complete`/`fail` is rejected) and the job is not retried.
    pub async fn cancel(&self, job_id: &JobId) -> JobResult<()> {
        let job = {
            let mut jobs = self.jobs.lock().await;
            let existing = jobs
                .get(job_id)
                .ok_or_else(|| JobError::NotFound(job_id.to_string()))?;

            if existing.is_terminal() {
                return Err(Self::invalid_state(existing, "non-terminal"));
            }

            let mut job = existing.clone();
            job.status = JobStatus::Cancelled;
            job.completed_at = Some(Utc::now());

            self.store.save_job(&job).await?;
            jobs.insert(job_id.clone(), job.clone());
            self.update_depth_gauges(&jobs);
            job
        };

        info!(job_id = %job_id, job_type = %job.job_type, "Cancelled job");
        metrics::job_cancelled(&job.job_type);
        self.events
            .on_job_event(job_id, JobStatus::Cancelled, &json!({}));
        Ok(())
    }

    /// Changes a pending job's priority.
    pub async fn reprioritize(&self, job_id: &JobId, priority: Priority) -> JobResult<()> {
        {
            let mut jobs = self.jobs.lock().await;
            let mut job = Self::expect_status(&jobs, job_id, JobStatus::Pending)?.clone();

            job.priority = priority;
            self.store.save_job(&job).await?;
            jobs.insert(job_id.clone(), job);
        }

        debug!(job_id = %job_id, priority = %priority, "Reprioritized job");
        self.events
            .on_job_event(job_id, JobStatus::Pending, &json!({ "priority": priority }));
        self.notify.notify_one();
        Ok(())
    }

    /// Excludes a pending job from claiming until resumed.
    pub async fn pause_job(&self, job_id: &JobId) -> JobResult<()> {
        self.transition_between(job_id, JobStatus::Pending, JobStatus::Paused)
            .await?;
        debug!(job_id = %job_id, "Paused job");
        self.events
            .on_job_event(job_id, JobStatus::Paused, &json!({}));
        Ok(())
    }

    /// Returns a paused job to the pending pool.
    pub async fn resume_job(&self, job_id: &JobId) -> JobResult<()> {
        self.transition_between(job_id, JobStatus::Paused, JobStatus::Pending)
            .await?;
        debug!(job_id = %job_id, "Resumed job");
        self.events
            .on_job_event(job_id, JobStatus::Pending, &json!({}));
        self.notify.notify_one();
        Ok(())
    }

    /// Stops all claiming. Running jobs are unaffected.
    pub fn pause_all(&self) {
        self.paused.store(true, Ordering::SeqCst);
        info!("Queue globally paused");
    }

    /// Resumes claiming.
    pub fn resume_all(&self) {
        self.paused.store(false, Ordering::SeqCst);
        info!("Queue globally resumed");
        self.notify.notify_waiters();
    }

    /// Returns true if claiming is globally paused.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Returns a copy of one job record.
    pub async fn get_job(&self, job_id: &JobId) -> JobResult<Option<Job>> {
        Ok(self.jobs.lock().await.get(job_id).cloned())
    }

    /// Returns jobs matching the filter, in claim order.
    pub async fn list_jobs(&self, filter: &JobFilter) -> JobResult<Vec<Job>> {
        let jobs = self.jobs.lock().await;
        let mut matched: Vec<Job> = jobs.values().filter(|j| filter.matches(j)).cloned().collect();
        matched.sort_by(|a, b| {
            (a.priority, a.created_at, a.id.as_str())
                .cmp(&(b.priority, b.created_at, b.id.as_str()))
        });
        Ok(matched)
    }

    /// Read-only status report.
    pub async fn snapshot(&self) -> QueueSnapshot {
        let jobs = self.jobs.lock().await;

        let mut snapshot = QueueSnapshot {
            pending: 0,
            running: 0,
            completed: 0,
            failed: 0,
            cancelled: 0,
            paused: 0,
            pending_by_priority: BTreeMap::new(),
        };

        for job in jobs.values() {
            match job.status {
                JobStatus::Pending => {
                    snapshot.pending += 1;
                    *snapshot
                        .pending_by_priority
                        .entry(job.priority)
                        .or_insert(0) += 1;
                }
                JobStatus::Running => snapshot.running += 1,
                JobStatus::Completed => snapshot.completed += 1,
                JobStatus::Failed => snapshot.failed += 1,
                JobStatus::Cancelled => snapshot.cancelled += 1,
                JobStatus::Paused => snapshot.paused += 1,
            }
        }

        snapshot
    }

    /// Blocks until new work may be available or the timeout elapses.
    pub async fn wait_for_work(&self, timeout: Duration) {
        let _ = tokio::time::timeout(timeout, self.notify.notified()).await;
    }

    /// Wakes every waiting worker (used during shutdown).
    pub fn wake_workers(&self) {
        self.notify.notify_waiters();
    }

    async fn transition_between(
        &self,
        job_id: &JobId,
        from: JobStatus,
        to: JobStatus,
    ) -> JobResult<()> {
        let mut jobs = self.jobs.lock().await;
        let mut job = Self::expect_status(&jobs, job_id, from)?.clone();

        job.status = to;
        self.store.save_job(&job).await?;
        jobs.insert(job_id.clone(), job);
        self.update_depth_gauges(&jobs);
        Ok(())
    }

    fn expect_status<'a>(
        jobs: &'a HashMap<JobId, Job>,
        job_id: &JobId,
        expected: JobStatus,
    ) -> JobResult<&'a Job> {
        let job = jobs
            .get(job_id)
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))?;
        if job.status != expected {
            return Err(Self::invalid_state(job, &expected.to_string()));
        }
        Ok(job)
    }

    fn invalid_state(job: &Job, expected: &str) -> JobError {
        JobError::InvalidState {
            job_id: job.id.to_string(),
            expected: expected.to_string(),
            actual: job.status.to_string(),
        }
    }

    fn update_depth_gauges(&self, jobs: &HashMap<JobId, Job>) {
        let pending = jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending)
            .count();
        let running = jobs
            .values()
            .filter(|j| j.status == JobStatus::Running)
            .count();
        metrics::set_queue_depth(pending, running);
    }
}
