//! Scheduler: the single entry point tying queue, workers, handlers,
//! and circuit breakers together.
//!
//! Application code constructs one [`Scheduler`], registers handlers,
//! calls [`Scheduler::start`], and talks only to this facade. Breaker
//! state is persisted on shutdown and restored on startup so an
//! unhealthy external service stays fenced off across restarts.

use crate::config::JobsConfig;
use crate::error::{JobError, JobResult};
use crate::events::{JobEventSink, TracingEventSink};
use crate::handler::{HandlerRegistry, JobHandler};
use crate::job::{Job, JobFilter, JobId, Priority};
use crate::metrics;
use crate::queue::{JobQueue, QueueSnapshot};
use crate::retry::RetryPolicy;
use crate::store::JobStore;
use crate::worker::WorkerPool;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracklift_core::TrackliftResult;
use tracklift_resilience::{CircuitBreaker, CircuitBreakerRegistry, CircuitBreakerSnapshot};
use tracing::{info, warn};

/// Builder for [`Scheduler`].
pub struct SchedulerBuilder {
    store: Arc<dyn JobStore>,
    config: JobsConfig,
    events: Arc<dyn JobEventSink>,
}

impl SchedulerBuilder {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            config: JobsConfig::default(),
            events: Arc::new(TracingEventSink),
        }
    }

    pub fn config(mut self, config: JobsConfig) -> Self {
        self.config = config;
        self
    }

    pub fn events(mut self, events: Arc<dyn JobEventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn build(self) -> Scheduler {
        let retry_policy = RetryPolicy::from(&self.config.retry);
        let queue = Arc::new(JobQueue::new(
            self.store.clone(),
            self.events,
            retry_policy.clone(),
        ));
        let handlers = Arc::new(HandlerRegistry::new());
        let pool = WorkerPool::new(queue.clone(), handlers.clone(), self.config.worker.clone());
        let breakers = Arc::new(CircuitBreakerRegistry::new((&self.config.breaker).into()));

        Scheduler {
            queue,
            pool,
            handlers,
            breakers,
            store: self.store,
            retry_policy,
        }
    }
}

/// Facade over the job execution core.
pub struct Scheduler {
    queue: Arc<JobQueue>,
    pool: WorkerPool,
    handlers: Arc<HandlerRegistry>,
    breakers: Arc<CircuitBreakerRegistry>,
    store: Arc<dyn JobStore>,
    retry_policy: RetryPolicy,
}

impl Scheduler {
    /// Builder with a persistence store and otherwise default config.
    pub fn builder(store: Arc<dyn JobStore>) -> SchedulerBuilder {
        SchedulerBuilder::new(store)
    }

    /// Registers a handler for a job type. Later registrations replace
    /// earlier ones.
    pub fn register_handler(&self, job_type: impl Into<String>, handler: Arc<dyn JobHandler>) {
        self.handlers.register(job_type, handler);
    }

    /// Registers an async closure as a handler.
    pub fn register_fn<F>(&self, job_type: impl Into<String>, f: F)
    where
        F: Fn(
                Value,
                crate::job::JobContext,
            ) -> futures::future::BoxFuture<'static, Result<Value, JobError>>
            + Send
            + Sync
            + 'static,
    {
        self.handlers.register_fn(job_type, f);
    }

    /// Restores persisted state and starts the workers.
    ///
    /// Order matters: breaker state first (so rehydrated jobs cannot
    /// hammer a service that was fenced off before the restart), then
    /// job rehydration, then workers.
    pub async fn start(&self) -> JobResult<()> {
        metrics::register_metrics();

        let breaker_states = self
            .store
            .load_breaker_states()
            .await
            .unwrap_or_else(|err| {
                warn!(error = %err, "Could not load breaker state, starting fresh");
                Default::default()
            });
        for (service, snapshot) in breaker_states {
            self.breakers.restore(&service, &snapshot).await;
        }

        let rehydrated = self.queue.rehydrate().await?;
        info!(rehydrated, "Scheduler starting");
        self.pool.start();
        Ok(())
    }

    /// Stops the workers and persists breaker state.
    ///
    /// With `drain` set, waits for in-flight jobs to finish first.
    /// Without it, in-flight attempts are interrupted and recorded as
    /// failures so their jobs retry on the next run.
    pub async fn shutdown(&self, drain: bool) -> JobResult<()> {
        info!(drain, "Scheduler shutting down");
        self.pool.stop(drain).await;

        for (service, snapshot) in self.breakers.snapshot_all().await {
            if let Err(err) = self.store.save_breaker_state(&service, &snapshot).await {
                warn!(service, error = %err, "Could not persist breaker state");
            }
        }
        Ok(())
    }

    /// Submits a job with the policy's default retry ceiling.
    pub async fn submit(
        &self,
        job_type: impl Into<String>,
        payload: Value,
        priority: Priority,
    ) -> JobResult<JobId> {
        self.queue
            .submit(job_type, payload, priority, self.retry_policy.max_retries)
            .await
    }

    /// Submits a job with an explicit retry ceiling.
    pub async fn submit_with_retries(
        &self,
        job_type: impl Into<String>,
        payload: Value,
        priority: Priority,
        max_retries: u32,
    ) -> JobResult<JobId> {
        self.queue.submit(job_type, payload, priority, max_retries).await
    }

    pub async fn cancel(&self, job_id: &JobId) -> JobResult<()> {
        self.queue.cancel(job_id).await
    }

    pub async fn reprioritize(&self, job_id: &JobId, priority: Priority) -> JobResult<()> {
        self.queue.reprioritize(job_id, priority).await
    }

    pub async fn pause_job(&self, job_id: &JobId) -> JobResult<()> {
        self.queue.pause_job(job_id).await
    }

    pub async fn resume_job(&self, job_id: &JobId) -> JobResult<()> {
        self.queue.resume_job(job_id).await
    }

    pub fn pause_all(&self) {
        self.queue.pause_all();
    }

    pub fn resume_all(&self) {
        self.queue.resume_all();
    }

    pub async fn get_job(&self, job_id: &JobId) -> JobResult<Option<Job>> {
        self.queue.get_job(job_id).await
    }

    pub async fn list_jobs(&self, filter: &JobFilter) -> JobResult<Vec<Job>> {
        self.queue.list_jobs(filter).await
    }

    pub async fn snapshot(&self) -> QueueSnapshot {
        self.queue.snapshot().await
    }

    /// Adjusts worker concurrency at runtime.
    pub fn set_concurrency(&self, concurrency: usize) {
        self.pool.set_concurrency(concurrency);
    }

    /// The breaker guarding calls to one external service, created on
    /// first use. Handlers wrap their outbound calls with it:
    ///
    /// ```ignore
    /// let breaker = scheduler.breaker("slskd");
    /// let response = breaker.call(|| client.download(&track)).await?;
    /// ```
    pub fn breaker(&self, service: &str) -> Arc<CircuitBreaker> {
        self.breakers.breaker(service)
    }

    /// Runs a fallible operation through the named service's breaker,
    /// mapping rejection and failure into [`JobError`].
    pub async fn guarded<T, F, Fut>(&self, service: &str, f: F) -> JobResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = TrackliftResult<T>>,
    {
        self.breakers
            .call(service, f)
            .await
            .map_err(JobError::from)
    }

    /// Breaker state for every service seen so far.
    pub async fn breaker_snapshots(&self) -> HashMap<String, CircuitBreakerSnapshot> {
        self.breakers.snapshot_all().await
    }

    /// Jobs whose attempts finished successfully since startup.
    pub fn jobs_processed(&self) -> u64 {
        self.pool.jobs_processed()
    }

    /// Attempts that ended in an error since startup.
    pub fn jobs_failed(&self) -> u64 {
        self.pool.jobs_failed()
    }
}
