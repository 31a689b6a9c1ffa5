//! Worker pool: a fixed but adjustable set of async tasks that claim
//! jobs from the queue and run their handlers.
//!
//! Workers are plain tokio tasks identified by a slot number. Slots
//! stay dense in `0..target`: resizing moves the target, growing fills
//! the free slots immediately and shrinking lets surplus slots exit
//! after finishing their current job. Handlers run inside a nested
//! `tokio::spawn` so a panic is contained to the attempt and surfaces
//! as a failed job, not a dead worker. A worker never leaves a claimed
//! job `Running`: a non-drain stop interrupts the attempt and records
//! it as a failure so the retry policy decides what happens next.

use crate::config::WorkerConfig;
use crate::error::JobError;
use crate::handler::HandlerRegistry;
use crate::job::Job;
use crate::metrics;
use crate::queue::JobQueue;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Pool of workers draining a [`JobQueue`].
pub struct WorkerPool {
    queue: Arc<JobQueue>,
    handlers: Arc<HandlerRegistry>,
    config: WorkerConfig,
    /// Desired worker count. Workers whose slot falls outside
    /// `0..target` retire after their current job.
    target: Arc<AtomicUsize>,
    stopping: Arc<AtomicBool>,
    running: AtomicBool,
    workers: Arc<parking_lot::Mutex<HashMap<usize, JoinHandle<()>>>>,
    /// Flips to true on a non-drain stop to interrupt in-flight attempts.
    abort_tx: watch::Sender<bool>,
    jobs_processed: Arc<AtomicU64>,
    jobs_failed: Arc<AtomicU64>,
}

impl WorkerPool {
    pub fn new(queue: Arc<JobQueue>, handlers: Arc<HandlerRegistry>, config: WorkerConfig) -> Self {
        let (abort_tx, _) = watch::channel(false);
        let target = config.concurrency;
        Self {
            queue,
            handlers,
            config,
            target: Arc::new(AtomicUsize::new(target)),
            stopping: Arc::new(AtomicBool::new(false)),
            running: AtomicBool::new(false),
            workers: Arc::new(parking_lot::Mutex::new(HashMap::new())),
            abort_tx,
            jobs_processed: Arc::new(AtomicU64::new(0)),
            jobs_failed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Starts the pool at the desired concurrency. Idempotent.
    ///
    /// The desired count starts at the configured concurrency; a
    /// `set_concurrency` issued before `start` takes effect here.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stopping.store(false, Ordering::SeqCst);
        let _ = self.abort_tx.send(false);
        let target = self.target.load(Ordering::SeqCst);
        info!(concurrency = target, "Starting worker pool");
        self.set_concurrency(target);
    }

    /// Adjusts the number of workers.
    ///
    /// Growing spawns workers immediately. Shrinking lets surplus
    /// workers finish their current job before exiting; no job is
    /// interrupted. Before `start` (or after `stop`) this only records
    /// the desired count.
    pub fn set_concurrency(&self, concurrency: usize) {
        let previous = self.target.swap(concurrency, Ordering::SeqCst);
        if previous != concurrency {
            info!(from = previous, to = concurrency, "Adjusting worker concurrency");
        }
        metrics::set_worker_concurrency(concurrency);

        if !self.running.load(Ordering::SeqCst) {
            return;
        }

        let mut workers = self.workers.lock();
        workers.retain(|_, handle| !handle.is_finished());

        // Slots stay dense in 0..concurrency. A live worker already in
        // a slot is kept; it sees the raised target and keeps running
        // even if it was about to retire.
        for slot in 0..concurrency {
            if !workers.contains_key(&slot) {
                let handle = self.spawn_worker(slot);
                workers.insert(slot, handle);
            }
        }

        if previous > concurrency {
            // Surplus workers notice the lowered target on their next
            // loop iteration; wake any that are idle.
            self.queue.wake_workers();
        }
    }

    /// Current desired concurrency.
    pub fn concurrency(&self) -> usize {
        self.target.load(Ordering::SeqCst)
    }

    /// Jobs whose attempts finished successfully since startup.
    pub fn jobs_processed(&self) -> u64 {
        self.jobs_processed.load(Ordering::Relaxed)
    }

    /// Attempts that ended in an error since startup.
    pub fn jobs_failed(&self) -> u64 {
        self.jobs_failed.load(Ordering::Relaxed)
    }

    /// Stops the pool.
    ///
    /// With `drain` set, waits (up to the configured shutdown timeout)
    /// for in-flight jobs to finish. Without it, in-flight attempts are
    /// interrupted and recorded as failures so the retry policy decides
    /// what happens to the job; no job is left `Running`. The desired
    /// concurrency is kept for a later `start`.
    pub async fn stop(&self, drain: bool) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!(drain, "Stopping worker pool");
        self.stopping.store(true, Ordering::SeqCst);
        self.queue.wake_workers();
        if !drain {
            let _ = self.abort_tx.send(true);
        }

        let handles: Vec<JoinHandle<()>> = {
            let mut workers = self.workers.lock();
            workers.drain().map(|(_, h)| h).collect()
        };

        let deadline = tokio::time::Instant::now() + self.config.shutdown_timeout();
        for mut handle in handles {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if tokio::time::timeout(remaining, &mut handle).await.is_err() {
                warn!("Worker did not finish within shutdown timeout");
                handle.abort();
            }
        }
    }

    fn spawn_worker(&self, slot: usize) -> JoinHandle<()> {
        let queue = self.queue.clone();
        let handlers = self.handlers.clone();
        let target = self.target.clone();
        let stopping = self.stopping.clone();
        let registry = self.workers.clone();
        let mut abort_rx = self.abort_tx.subscribe();
        let poll_interval = self.config.poll_interval();
        let processed = self.jobs_processed.clone();
        let failed = self.jobs_failed.clone();

        tokio::spawn(async move {
            let worker_id = format!("worker-{slot}");
            debug!(%worker_id, "Worker started");

            loop {
                if stopping.load(Ordering::SeqCst) {
                    break;
                }
                if slot >= target.load(Ordering::SeqCst) {
                    // Retire under the registry lock: a concurrent grow
                    // either raised the target before we got the lock,
                    // in which case this worker stays, or finds the
                    // freed slot and spawns a replacement.
                    let mut registry = registry.lock();
                    if slot >= target.load(Ordering::SeqCst) {
                        registry.remove(&slot);
                        break;
                    }
                }

                match queue.claim_next(&worker_id).await {
                    Ok(Some(job)) => {
                        let job_id = job.id.clone();
                        let outcome = tokio::select! {
                            ok = run_one(&queue, &handlers, &worker_id, job) => Some(ok),
                            _ = abort_rx.changed() => None,
                        };
                        match outcome {
                            Some(true) => {
                                processed.fetch_add(1, Ordering::Relaxed);
                            }
                            Some(false) => {
                                failed.fetch_add(1, Ordering::Relaxed);
                            }
                            None => {
                                // Interrupted by a non-drain stop. The
                                // attempt is charged so the job is not
                                // left Running.
                                let err = JobError::Worker("worker pool shut down".into());
                                match queue.fail(&job_id, &err).await {
                                    Ok(_) => {
                                        failed.fetch_add(1, Ordering::Relaxed);
                                    }
                                    Err(JobError::InvalidState { .. }) => {
                                        debug!(%worker_id, job_id = %job_id, "Interrupted job already settled");
                                    }
                                    Err(other) => {
                                        error!(%worker_id, job_id = %job_id, error = %other, "Failed to record interrupted job");
                                    }
                                }
                                break;
                            }
                        }
                    }
                    Ok(None) => {
                        queue.wait_for_work(poll_interval).await;
                    }
                    Err(err) => {
                        error!(%worker_id, error = %err, "Claim failed, backing off");
                        tokio::time::sleep(poll_interval).await;
                    }
                }
            }

            debug!(%worker_id, "Worker stopped");
        })
    }
}

/// Runs one claimed job to its outcome. Returns true if the attempt
/// succeeded.
async fn run_one(
    queue: &Arc<JobQueue>,
    handlers: &Arc<HandlerRegistry>,
    worker_id: &str,
    job: Job,
) -> bool {
    let job_id = job.id.clone();
    let job_type = job.job_type.clone();

    let outcome = match handlers.get(&job_type) {
        Some(handler) => {
            let ctx = job.to_context(worker_id);
            let payload = job.payload.clone();
            // Nested spawn contains handler panics.
            let attempt = tokio::spawn(async move { handler.run(payload, ctx).await });
            match attempt.await {
                Ok(result) => result,
                Err(join_err) => Err(JobError::Worker(format!(
                    "handler panicked: {join_err}"
                ))),
            }
        }
        None => Err(JobError::UnknownJobType(job_type.clone())),
    };

    let succeeded = outcome.is_ok();
    let record = match outcome {
        Ok(result) => queue.complete(&job_id, result).await,
        Err(job_err) => queue.fail(&job_id, &job_err).await.map(|_| ()),
    };

    if let Err(err) = record {
        match err {
            // The job was cancelled while running; its outcome is
            // discarded by design of the advisory cancel.
            JobError::InvalidState { .. } => {
                debug!(worker_id, job_id = %job_id, "Outcome discarded, job no longer running");
            }
            other => {
                error!(worker_id, job_id = %job_id, error = %other, "Failed to record job outcome");
            }
        }
        return false;
    }

    succeeded
}
