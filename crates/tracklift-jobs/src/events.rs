//! Job lifecycle event sink.
//!
//! The queue emits an event after every committed state transition.
//! Delivery is fire-and-forget: a sink that drops or mishandles an
//! event never affects job execution, so implementations must not
//! panic and must handle their own errors.

use crate::job::{JobId, JobStatus};
use tracing::debug;

/// Receiver for job lifecycle events.
pub trait JobEventSink: Send + Sync {
    /// Called after a job transition has been committed.
    ///
    /// `metadata` carries transition-specific fields (job type,
    /// attempt, error message, backoff deadline).
    fn on_job_event(&self, job_id: &JobId, status: JobStatus, metadata: &serde_json::Value);
}

/// Sink that logs every event through `tracing`.
pub struct TracingEventSink;

impl JobEventSink for TracingEventSink {
    fn on_job_event(&self, job_id: &JobId, status: JobStatus, metadata: &serde_json::Value) {
        debug!(job_id = %job_id, status = %status, metadata = %metadata, "Job event");
    }
}

/// Sink that discards every event.
pub struct NullEventSink;

impl JobEventSink for NullEventSink {
    fn on_job_event(&self, _job_id: &JobId, _status: JobStatus, _metadata: &serde_json::Value) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    /// Test sink capturing events in order.
    pub struct RecordingSink {
        pub events: Mutex<Vec<(JobId, JobStatus)>>,
    }

    impl RecordingSink {
        pub fn new() -> Self {
            Self {
                events: Mutex::new(Vec::new()),
            }
        }
    }

    impl JobEventSink for RecordingSink {
        fn on_job_event(&self, job_id: &JobId, status: JobStatus, _metadata: &serde_json::Value) {
            self.events.lock().push((job_id.clone(), status));
        }
    }

    #[test]
    fn test_recording_sink_captures_events() {
        let sink = RecordingSink::new();
        let id = JobId::new();
        sink.on_job_event(&id, JobStatus::Pending, &json!({}));
        sink.on_job_event(&id, JobStatus::Running, &json!({"attempt": 1}));

        let events = sink.events.lock();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].1, JobStatus::Pending);
        assert_eq!(events[1].1, JobStatus::Running);
    }

    #[test]
    fn test_null_sink_accepts_events() {
        let sink = NullEventSink;
        sink.on_job_event(&JobId::new(), JobStatus::Completed, &json!({}));
    }
}
