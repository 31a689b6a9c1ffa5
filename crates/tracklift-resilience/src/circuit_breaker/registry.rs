//! Named circuit breaker registry.
//!
//! One breaker per upstream service, shared by every worker and handler
//! calling that service. Breakers for different services are fully
//! independent and never block each other.

use super::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerSnapshot};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Registry of circuit breakers keyed by service name.
pub struct CircuitBreakerRegistry {
    default_config: CircuitBreakerConfig,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    /// Creates a registry whose breakers use the given default config.
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            default_config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a registry with default breaker configuration.
    pub fn with_defaults() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }

    /// Registers a breaker with service-specific configuration.
    ///
    /// Replaces any existing breaker for the service.
    pub fn configure(&self, service: impl Into<String>, config: CircuitBreakerConfig) {
        let service = service.into();
        let breaker = Arc::new(CircuitBreaker::new(service.clone(), config));
        self.breakers.write().insert(service, breaker);
    }

    /// Returns the breaker for a service, creating it on first use.
    pub fn breaker(&self, service: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().get(service) {
            return breaker.clone();
        }

        let mut breakers = self.breakers.write();
        breakers
            .entry(service.to_string())
            .or_insert_with(|| {
                debug!(service, "Creating circuit breaker");
                Arc::new(CircuitBreaker::new(service, self.default_config.clone()))
            })
            .clone()
    }

    /// Executes an operation guarded by the named service's breaker.
    pub async fn call<F, Fut, T, E>(&self, service: &str, f: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        self.breaker(service).call(f).await
    }

    /// Returns the names of all registered services.
    pub fn services(&self) -> Vec<String> {
        self.breakers.read().keys().cloned().collect()
    }

    /// Captures a snapshot of every registered breaker.
    pub async fn snapshot_all(&self) -> HashMap<String, CircuitBreakerSnapshot> {
        let breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.read().values().cloned().collect();

        let mut snapshots = HashMap::with_capacity(breakers.len());
        for breaker in breakers {
            let snap = breaker.snapshot().await;
            snapshots.insert(breaker.service_name().to_string(), snap);
        }
        snapshots
    }

    /// Restores one service's breaker from a persisted snapshot,
    /// creating the breaker if it is not registered yet.
    pub async fn restore(&self, service: &str, snapshot: &CircuitBreakerSnapshot) {
        self.breaker(service).restore(snapshot).await;
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitState;
    use std::time::Duration;

    #[tokio::test]
    async fn test_breaker_created_on_first_use() {
        let registry = CircuitBreakerRegistry::with_defaults();
        assert!(registry.services().is_empty());

        let _ = registry
            .call("slskd", || async { Ok::<i32, &str>(1) })
            .await;
        assert_eq!(registry.services(), vec!["slskd".to_string()]);
    }

    #[tokio::test]
    async fn test_same_breaker_returned_for_service() {
        let registry = CircuitBreakerRegistry::with_defaults();
        let a = registry.breaker("catalog");
        let b = registry.breaker("catalog");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_services_are_independent() {
        let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        });

        let _ = registry
            .call("slskd", || async { Err::<i32, &str>("down") })
            .await;
        assert_eq!(registry.breaker("slskd").state(), CircuitState::Open);
        assert_eq!(registry.breaker("catalog").state(), CircuitState::Closed);

        // Catalog calls still pass through.
        let result = registry
            .call("catalog", || async { Ok::<i32, &str>(1) })
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_configure_overrides_default() {
        let registry = CircuitBreakerRegistry::with_defaults();
        registry.configure(
            "metadata",
            CircuitBreakerConfig {
                failure_threshold: 1,
                timeout: Duration::from_secs(300),
                ..Default::default()
            },
        );

        let _ = registry
            .call("metadata", || async { Err::<i32, &str>("down") })
            .await;
        assert_eq!(registry.breaker("metadata").state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_snapshot_all_and_restore() {
        let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        });
        let _ = registry
            .call("slskd", || async { Err::<i32, &str>("down") })
            .await;

        let snapshots = registry.snapshot_all().await;
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots["slskd"].state, CircuitState::Open);

        let fresh = CircuitBreakerRegistry::with_defaults();
        fresh.restore("slskd", &snapshots["slskd"]).await;
        assert_eq!(fresh.breaker("slskd").state(), CircuitState::Open);
    }
}
