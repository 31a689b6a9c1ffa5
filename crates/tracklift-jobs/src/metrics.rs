//! Metrics for job queue monitoring.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Duration;

/// Metric names for the job subsystem.
pub mod names {
    /// Total jobs submitted.
    pub const JOBS_SUBMITTED_TOTAL: &str = "tracklift_jobs_submitted_total";
    /// Total jobs claimed by workers.
    pub const JOBS_CLAIMED_TOTAL: &str = "tracklift_jobs_claimed_total";
    /// Total jobs completed successfully.
    pub const JOBS_COMPLETED_TOTAL: &str = "tracklift_jobs_completed_total";
    /// Total jobs permanently failed.
    pub const JOBS_FAILED_TOTAL: &str = "tracklift_jobs_failed_total";
    /// Total retry attempts scheduled.
    pub const JOBS_RETRIED_TOTAL: &str = "tracklift_jobs_retried_total";
    /// Total jobs cancelled.
    pub const JOBS_CANCELLED_TOTAL: &str = "tracklift_jobs_cancelled_total";

    /// Current pending jobs.
    pub const JOBS_PENDING: &str = "tracklift_jobs_pending";
    /// Current running jobs.
    pub const JOBS_RUNNING: &str = "tracklift_jobs_running";

    /// Job execution duration in seconds.
    pub const JOB_DURATION_SECONDS: &str = "tracklift_job_duration_seconds";

    /// Worker pool target concurrency.
    pub const WORKERS_CONCURRENCY: &str = "tracklift_workers_concurrency";
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(names::JOBS_SUBMITTED_TOTAL, "Total number of jobs submitted");
    describe_counter!(
        names::JOBS_CLAIMED_TOTAL,
        "Total number of jobs claimed by workers"
    );
    describe_counter!(
        names::JOBS_COMPLETED_TOTAL,
        "Total number of jobs completed successfully"
    );
    describe_counter!(
        names::JOBS_FAILED_TOTAL,
        "Total number of jobs permanently failed"
    );
    describe_counter!(
        names::JOBS_RETRIED_TOTAL,
        "Total number of retry attempts scheduled"
    );
    describe_counter!(names::JOBS_CANCELLED_TOTAL, "Total number of jobs cancelled");

    describe_gauge!(names::JOBS_PENDING, "Current number of pending jobs");
    describe_gauge!(names::JOBS_RUNNING, "Current number of running jobs");
    describe_gauge!(names::WORKERS_CONCURRENCY, "Worker pool target concurrency");

    describe_histogram!(
        names::JOB_DURATION_SECONDS,
        "Job execution duration in seconds"
    );
}

pub(crate) fn job_submitted(job_type: &str) {
    counter!(names::JOBS_SUBMITTED_TOTAL, "job_type" => job_type.to_string()).increment(1);
}

pub(crate) fn job_claimed(job_type: &str) {
    counter!(names::JOBS_CLAIMED_TOTAL, "job_type" => job_type.to_string()).increment(1);
}

pub(crate) fn job_completed(job_type: &str, duration: Duration) {
    counter!(names::JOBS_COMPLETED_TOTAL, "job_type" => job_type.to_string()).increment(1);
    histogram!(names::JOB_DURATION_SECONDS, "job_type" => job_type.to_string())
        .record(duration.as_secs_f64());
}

pub(crate) fn job_failed(job_type: &str) {
    counter!(names::JOBS_FAILED_TOTAL, "job_type" => job_type.to_string()).increment(1);
}

pub(crate) fn job_retried(job_type: &str) {
    counter!(names::JOBS_RETRIED_TOTAL, "job_type" => job_type.to_string()).increment(1);
}

pub(crate) fn job_cancelled(job_type: &str) {
    counter!(names::JOBS_CANCELLED_TOTAL, "job_type" => job_type.to_string()).increment(1);
}

pub(crate) fn set_queue_depth(pending: usize, running: usize) {
    gauge!(names::JOBS_PENDING).set(pending as f64);
    gauge!(names::JOBS_RUNNING).set(running as f64);
}

pub(crate) fn set_worker_concurrency(n: usize) {
    gauge!(names::WORKERS_CONCURRENCY).set(n as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_metrics_is_idempotent() {
        register_metrics();
        register_metrics();
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        // Without an installed recorder these must not panic.
        job_submitted("track_download");
        job_completed("track_download", Duration::from_millis(5));
        set_queue_depth(3, 1);
        set_worker_concurrency(4);
    }
}
