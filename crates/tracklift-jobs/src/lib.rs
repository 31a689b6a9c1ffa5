//! Tracklift Jobs - Background Job Execution Core
//!
//! The asynchronous backbone of the media acquisition pipeline:
//! - Priority job queue with atomic lifecycle transitions
//! - Worker pool with runtime-adjustable concurrency
//! - Exponential backoff retries with per-job ceilings
//! - Per-service circuit breakers fencing off failing upstreams
//! - Crash recovery via store rehydration
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       Scheduler                          │
//! │                                                          │
//! │  submit ──▶ ┌──────────┐  claim  ┌─────────────────┐     │
//! │             │ JobQueue │◀───────▶│   WorkerPool    │     │
//! │  cancel ──▶ │ (priority│         │ ┌────┐   ┌────┐ │     │
//! │  pause  ──▶ │  order)  │         │ │ W1 │ … │ Wn │ │     │
//! │             └────┬─────┘         │ └──┬─┘   └──┬─┘ │     │
//! │                  │               └────┼────────┼───┘     │
//! │                  ▼                    ▼        ▼         │
//! │             ┌──────────┐         ┌─────────────────┐     │
//! │             │ JobStore │         │ HandlerRegistry │     │
//! │             └──────────┘         └────────┬────────┘     │
//! │                                           ▼              │
//! │                                  ┌─────────────────┐     │
//! │                                  │ CircuitBreakers │     │
//! │                                  │  (per service)  │     │
//! │                                  └─────────────────┘     │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use tracklift_jobs::{MemoryStore, Priority, Scheduler};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let scheduler = Scheduler::builder(Arc::new(MemoryStore::new())).build();
//!
//! scheduler.register_handler("track_download", Arc::new(DownloadHandler::new(client)));
//! scheduler.start().await?;
//!
//! let job_id = scheduler
//!     .submit("track_download", json!({ "track_id": "abc" }), Priority::Urgent)
//!     .await?;
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod handler;
pub mod job;
pub mod metrics;
pub mod queue;
pub mod retry;
pub mod scheduler;
pub mod store;
pub mod worker;

pub use config::{BreakerConfig, JobsConfig, RetryConfig, WorkerConfig};
pub use error::{JobError, JobResult};
pub use events::{JobEventSink, NullEventSink, TracingEventSink};
pub use handler::{HandlerRegistry, JobHandler};
pub use job::{Job, JobContext, JobFilter, JobId, JobStatus, Priority};
pub use metrics::register_metrics;
pub use queue::{JobQueue, QueueSnapshot};
pub use retry::RetryPolicy;
pub use scheduler::{Scheduler, SchedulerBuilder};
pub use store::{JobStore, MemoryStore};
pub use worker::WorkerPool;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::handler::{HandlerRegistry, JobHandler};
    pub use crate::job::{Job, JobStatus, Priority};
    pub use crate::retry::RetryPolicy;
    pub use crate::scheduler::Scheduler;
    pub use crate::store::JobStore;
    pub use crate::{JobContext, JobError, JobId, JobResult};
}
