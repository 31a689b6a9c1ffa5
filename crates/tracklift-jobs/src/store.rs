//! Persistence interface for job records and breaker state.
//!
//! The queue is the source of truth while the process runs; the store
//! makes non-terminal jobs and breaker state durable enough to resume
//! after a clean restart. Persistence schema is a collaborator concern.

use crate::error::{JobError, JobResult};
use crate::job::{Job, JobId, JobStatus};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracklift_resilience::CircuitBreakerSnapshot;

/// Durable storage for job records and circuit breaker state.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persists a job record, replacing any previous version.
    async fn save_job(&self, job: &Job) -> JobResult<()>;

    /// Loads one job record.
    async fn load_job(&self, id: &JobId) -> JobResult<Option<Job>>;

    /// Loads every non-terminal job, used at startup to rehydrate the
    /// queue after a restart.
    async fn load_pending_jobs(&self) -> JobResult<Vec<Job>>;

    /// Persists one service's circuit breaker state.
    async fn save_breaker_state(
        &self,
        service: &str,
        snapshot: &CircuitBreakerSnapshot,
    ) -> JobResult<()>;

    /// Loads one service's circuit breaker state.
    async fn load_breaker_state(&self, service: &str)
        -> JobResult<Option<CircuitBreakerSnapshot>>;

    /// Loads all persisted circuit breaker states.
    async fn load_breaker_states(&self) -> JobResult<HashMap<String, CircuitBreakerSnapshot>>;
}

/// In-process store.
///
/// Backs tests and single-process deployments that accept losing queue
/// state on restart.
#[derive(Default)]
pub struct MemoryStore {
    jobs: RwLock<HashMap<JobId, Job>>,
    breakers: RwLock<HashMap<String, CircuitBreakerSnapshot>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored job records, terminal included.
    pub fn job_count(&self) -> usize {
        self.jobs.read().len()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn save_job(&self, job: &Job) -> JobResult<()> {
        self.jobs.write().insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn load_job(&self, id: &JobId) -> JobResult<Option<Job>> {
        Ok(self.jobs.read().get(id).cloned())
    }

    async fn load_pending_jobs(&self) -> JobResult<Vec<Job>> {
        Ok(self
            .jobs
            .read()
            .values()
            .filter(|job| !job.status.is_terminal())
            .cloned()
            .collect())
    }

    async fn save_breaker_state(
        &self,
        service: &str,
        snapshot: &CircuitBreakerSnapshot,
    ) -> JobResult<()> {
        self.breakers
            .write()
            .insert(service.to_string(), snapshot.clone());
        Ok(())
    }

    async fn load_breaker_state(
        &self,
        service: &str,
    ) -> JobResult<Option<CircuitBreakerSnapshot>> {
        Ok(self.breakers.read().get(service).cloned())
    }

    async fn load_breaker_states(&self) -> JobResult<HashMap<String, CircuitBreakerSnapshot>> {
        Ok(self.breakers.read().clone())
    }
}

/// Store wrapper that fails every write, for exercising the
/// persistence-failure path in tests.
#[cfg(test)]
pub(crate) struct FailingStore;

#[cfg(test)]
#[async_trait]
impl JobStore for FailingStore {
    async fn save_job(&self, _job: &Job) -> JobResult<()> {
        Err(JobError::Persistence("store unavailable".into()))
    }

    async fn load_job(&self, _id: &JobId) -> JobResult<Option<Job>> {
        Ok(None)
    }

    async fn load_pending_jobs(&self) -> JobResult<Vec<Job>> {
        Ok(Vec::new())
    }

    async fn save_breaker_state(
        &self,
        _service: &str,
        _snapshot: &CircuitBreakerSnapshot,
    ) -> JobResult<()> {
        Err(JobError::Persistence("store unavailable".into()))
    }

    async fn load_breaker_state(
        &self,
        _service: &str,
    ) -> JobResult<Option<CircuitBreakerSnapshot>> {
        Ok(None)
    }

    async fn load_breaker_states(&self) -> JobResult<HashMap<String, CircuitBreakerSnapshot>> {
        Ok(HashMap::new())
    }
}

/// Helper used by rehydration: jobs interrupted mid-run return to
/// pending without consuming an attempt (handlers are idempotent by
/// contract).
pub(crate) fn rehydrate_status(status: JobStatus) -> JobStatus {
    match status {
        JobStatus::Running => JobStatus::Pending,
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Priority;
    use serde_json::json;

    #[tokio::test]
    async fn test_save_and_load_job() {
        let store = MemoryStore::new();
        let job = Job::new("track_download", json!({"track": "t-1"}), Priority::Normal, 2);

        store.save_job(&job).await.unwrap();
        let loaded = store.load_job(&job.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, job.id);
        assert_eq!(loaded.job_type, "track_download");
    }

    #[tokio::test]
    async fn test_load_missing_job() {
        let store = MemoryStore::new();
        assert!(store.load_job(&JobId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_load_pending_skips_terminal() {
        let store = MemoryStore::new();

        let pending = Job::new("a", json!({}), Priority::Normal, 0);
        let mut done = Job::new("b", json!({}), Priority::Normal, 0);
        done.status = JobStatus::Completed;

        store.save_job(&pending).await.unwrap();
        store.save_job(&done).await.unwrap();

        let loaded = store.load_pending_jobs().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, pending.id);
    }

    #[tokio::test]
    async fn test_breaker_state_round_trip() {
        let store = MemoryStore::new();
        let snap = CircuitBreakerSnapshot {
            state: tracklift_resilience::CircuitState::Open,
            failure_count: 5,
            success_count: 0,
            opened_at: Some(chrono::Utc::now()),
        };

        store.save_breaker_state("slskd", &snap).await.unwrap();
        let loaded = store.load_breaker_state("slskd").await.unwrap().unwrap();
        assert_eq!(loaded.state, tracklift_resilience::CircuitState::Open);
        assert_eq!(loaded.failure_count, 5);

        let all = store.load_breaker_states().await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn test_rehydrate_status() {
        assert_eq!(rehydrate_status(JobStatus::Running), JobStatus::Pending);
        assert_eq!(rehydrate_status(JobStatus::Paused), JobStatus::Paused);
        assert_eq!(rehydrate_status(JobStatus::Pending), JobStatus::Pending);
    }
}
