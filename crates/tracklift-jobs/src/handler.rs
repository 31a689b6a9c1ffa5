//! Job handlers and the handler registry.
//!
//! Handlers are the pluggable business logic of the pipeline: fetch a
//! track from the download daemon, look up metadata, synchronize a
//! remote collection. The registry is an explicit object constructed at
//! startup and passed into the worker pool; there is no ambient global
//! state.

use crate::error::JobError;
use crate::job::JobContext;
use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Business logic registered against a job type.
///
/// The payload is whatever the submitter provided; the handler decodes
/// and validates its own shape. Errors propagate into the job's
/// fail/retry machinery, including [`JobError::CircuitOpen`] from a
/// breaker-wrapped upstream call.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Executes one attempt.
    async fn run(
        &self,
        payload: serde_json::Value,
        ctx: JobContext,
    ) -> Result<serde_json::Value, JobError>;
}

/// Adapter turning an async closure into a [`JobHandler`].
struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F> JobHandler for FnHandler<F>
where
    F: Fn(serde_json::Value, JobContext) -> BoxFuture<'static, Result<serde_json::Value, JobError>>
        + Send
        + Sync,
{
    async fn run(
        &self,
        payload: serde_json::Value,
        ctx: JobContext,
    ) -> Result<serde_json::Value, JobError> {
        (self.f)(payload, ctx).await
    }
}

/// Registry mapping job-type tags to handlers.
///
/// Registration before worker start is the normal path; late
/// registration is tolerated, jobs of a not-yet-registered type simply
/// fail immediately when claimed.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn JobHandler>>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Associates a job type with a handler, replacing any previous one.
    pub fn register(&self, job_type: impl Into<String>, handler: Arc<dyn JobHandler>) {
        let job_type = job_type.into();
        info!(job_type = %job_type, "Registered job handler");
        self.handlers.write().insert(job_type, handler);
    }

    /// Registers an async closure as a handler.
    pub fn register_fn<F>(&self, job_type: impl Into<String>, f: F)
    where
        F: Fn(
                serde_json::Value,
                JobContext,
            ) -> BoxFuture<'static, Result<serde_json::Value, JobError>>
            + Send
            + Sync
            + 'static,
    {
        self.register(job_type, Arc::new(FnHandler { f }));
    }

    /// Resolves the handler for a job type.
    pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.read().get(job_type).cloned()
    }

    /// Returns the registered job types.
    pub fn registered_types(&self) -> Vec<String> {
        self.handlers.read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{Job, Priority};
    use serde_json::json;

    #[tokio::test]
    async fn test_register_and_run_fn_handler() {
        let registry = HandlerRegistry::new();
        registry.register_fn("track_download", |payload, _ctx| {
            Box::pin(async move {
                let track = payload["track_id"].as_str().unwrap_or("unknown").to_string();
                Ok(json!({"downloaded": track}))
            })
        });

        let job = Job::new(
            "track_download",
            json!({"track_id": "t-7"}),
            Priority::Normal,
            0,
        );
        let handler = registry.get("track_download").unwrap();
        let result = handler
            .run(job.payload.clone(), job.to_context("worker-1"))
            .await
            .unwrap();
        assert_eq!(result["downloaded"], "t-7");
    }

    #[test]
    fn test_unknown_type_resolves_to_none() {
        let registry = HandlerRegistry::new();
        assert!(registry.get("collection_sync").is_none());
    }

    #[test]
    fn test_registered_types() {
        let registry = HandlerRegistry::new();
        registry.register_fn("a", |_, _| Box::pin(async { Ok(json!(null)) }));
        registry.register_fn("b", |_, _| Box::pin(async { Ok(json!(null)) }));

        let mut types = registry.registered_types();
        types.sort();
        assert_eq!(types, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_reregistration_replaces_handler() {
        let registry = HandlerRegistry::new();
        registry.register_fn("a", |_, _| Box::pin(async { Ok(json!(1)) }));
        registry.register_fn("a", |_, _| Box::pin(async { Ok(json!(2)) }));
        assert_eq!(registry.registered_types().len(), 1);
    }
}
