//! Circuit breaker implementation.

mod registry;

pub use registry::CircuitBreakerRegistry;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use tracklift_core::TrackliftError;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum CircuitState {
    /// Circuit is closed - calls pass through.
    Closed = 0,
    /// Circuit is open - calls are rejected without invoking the dependency.
    Open = 1,
    /// Circuit is half-open - a limited number of trial calls are allowed.
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Open,
            2 => Self::HalfOpen,
            _ => Self::Closed,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit.
    pub failure_threshold: u64,
    /// Consecutive successes needed to close the circuit from half-open.
    pub success_threshold: u64,
    /// Duration to wait before transitioning from open to half-open.
    pub timeout: Duration,
    /// Number of trial calls admitted in half-open state.
    pub half_open_max_calls: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            timeout: Duration::from_secs(30),
            half_open_max_calls: 3,
        }
    }
}

/// Serializable snapshot of a breaker, durable across a clean restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerSnapshot {
    /// State at snapshot time.
    pub state: CircuitState,
    /// Consecutive failures observed while closed.
    pub failure_count: u64,
    /// Consecutive successes observed while half-open.
    pub success_count: u64,
    /// Last transition into open, if any.
    pub opened_at: Option<DateTime<Utc>>,
}

/// Circuit breaker guarding calls to one named unreliable dependency.
///
/// The open-to-half-open transition is lazy: it happens on the first
/// call attempted after the timeout has elapsed, not on a background
/// timer.
pub struct CircuitBreaker {
    service_name: String,
    state: AtomicU8,
    failure_count: AtomicU64,
    success_count: AtomicU64,
    half_open_calls: AtomicU64,
    opened_at: RwLock<Option<Instant>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    /// Creates a new circuit breaker for the named service.
    pub fn new(service_name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            service_name: service_name.into(),
            state: AtomicU8::new(CircuitState::Closed as u8),
            failure_count: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            half_open_calls: AtomicU64::new(0),
            opened_at: RwLock::new(None),
            config,
        }
    }

    /// Creates a new circuit breaker with default configuration.
    pub fn with_defaults(service_name: impl Into<String>) -> Self {
        Self::new(service_name, CircuitBreakerConfig::default())
    }

    /// Returns the current state of the circuit breaker.
    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::SeqCst))
    }

    /// Returns the name of the guarded service.
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Executes an operation with circuit breaker protection.
    ///
    /// Either invokes `f` and records the outcome, or short-circuits
    /// with [`CircuitBreakerError::Open`] without invoking `f`. The
    /// rejection carries a `retry_after` hint: how long until the
    /// breaker would admit a trial call.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        if let Some(retry_after) = self.reject_with_hint().await {
            return Err(CircuitBreakerError::Open {
                service: self.service_name.clone(),
                retry_after,
            });
        }

        match f().await {
            Ok(result) => {
                self.record_success();
                Ok(result)
            }
            Err(e) => {
                self.record_failure().await;
                Err(CircuitBreakerError::Failure(e))
            }
        }
    }

    /// Returns `None` if the call is admitted, otherwise the suggested
    /// wait before retrying.
    async fn reject_with_hint(&self) -> Option<Option<Duration>> {
        match self.state() {
            CircuitState::Closed => None,
            CircuitState::Open => {
                let opened = *self.opened_at.read().await;
                match opened {
                    Some(at) => {
                        let elapsed = at.elapsed();
                        if elapsed >= self.config.timeout {
                            // First caller past the timeout flips the
                            // breaker and is let through as a probe.
                            if self
                                .state
                                .compare_exchange(
                                    CircuitState::Open as u8,
                                    CircuitState::HalfOpen as u8,
                                    Ordering::SeqCst,
                                    Ordering::SeqCst,
                                )
                                .is_ok()
                            {
                                self.success_count.store(0, Ordering::SeqCst);
                                self.half_open_calls.store(1, Ordering::SeqCst);
                                debug!(
                                    service = %self.service_name,
                                    "Circuit breaker transitioning to half-open"
                                );
                                None
                            } else {
                                // Lost the race; count as a half-open probe.
                                self.admit_half_open()
                            }
                        } else {
                            Some(Some(self.config.timeout - elapsed))
                        }
                    }
                    None => Some(Some(self.config.timeout)),
                }
            }
            CircuitState::HalfOpen => self.admit_half_open(),
        }
    }

    fn admit_half_open(&self) -> Option<Option<Duration>> {
        let admitted = self.half_open_calls.fetch_add(1, Ordering::SeqCst);
        if admitted < self.config.half_open_max_calls {
            None
        } else {
            Some(Some(self.config.timeout))
        }
    }

    /// Records a successful call.
    fn record_success(&self) {
        match self.state() {
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::SeqCst);
            }
            CircuitState::HalfOpen => {
                let successes = self.success_count.fetch_add(1, Ordering::SeqCst) + 1;
                if successes >= self.config.success_threshold {
                    self.state
                        .store(CircuitState::Closed as u8, Ordering::SeqCst);
                    self.failure_count.store(0, Ordering::SeqCst);
                    self.success_count.store(0, Ordering::SeqCst);
                    debug!(
                        service = %self.service_name,
                        "Circuit breaker closed after successful recovery"
                    );
                }
            }
            CircuitState::Open => {
                // A probe admitted just before the state flipped back;
                // its outcome no longer matters.
            }
        }
    }

    /// Records a failed call.
    async fn record_failure(&self) {
        match self.state() {
            CircuitState::Closed => {
                let failures = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= self.config.failure_threshold {
                    self.state.store(CircuitState::Open as u8, Ordering::SeqCst);
                    *self.opened_at.write().await = Some(Instant::now());
                    warn!(
                        service = %self.service_name,
                        failures,
                        "Circuit breaker opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                // Any failure while half-open reopens the circuit.
                self.state.store(CircuitState::Open as u8, Ordering::SeqCst);
                self.success_count.store(0, Ordering::SeqCst);
                *self.opened_at.write().await = Some(Instant::now());
                warn!(
                    service = %self.service_name,
                    "Circuit breaker reopened after failure in half-open state"
                );
            }
            CircuitState::Open => {
                *self.opened_at.write().await = Some(Instant::now());
            }
        }
    }

    /// Manually resets the circuit breaker to closed state.
    pub async fn reset(&self) {
        self.state
            .store(CircuitState::Closed as u8, Ordering::SeqCst);
        self.failure_count.store(0, Ordering::SeqCst);
        self.success_count.store(0, Ordering::SeqCst);
        self.half_open_calls.store(0, Ordering::SeqCst);
        *self.opened_at.write().await = None;
        debug!(service = %self.service_name, "Circuit breaker manually reset");
    }

    /// Captures the breaker state for persistence.
    pub async fn snapshot(&self) -> CircuitBreakerSnapshot {
        let opened_at = self.opened_at.read().await.map(|at| {
            let elapsed =
                chrono::Duration::from_std(at.elapsed()).unwrap_or(chrono::Duration::zero());
            Utc::now() - elapsed
        });

        CircuitBreakerSnapshot {
            state: self.state(),
            failure_count: self.failure_count.load(Ordering::SeqCst),
            success_count: self.success_count.load(Ordering::SeqCst),
            opened_at,
        }
    }

    /// Restores breaker state from a persisted snapshot.
    pub async fn restore(&self, snapshot: &CircuitBreakerSnapshot) {
        self.state.store(snapshot.state as u8, Ordering::SeqCst);
        self.failure_count
            .store(snapshot.failure_count, Ordering::SeqCst);
        self.success_count
            .store(snapshot.success_count, Ordering::SeqCst);
        self.half_open_calls.store(0, Ordering::SeqCst);

        let opened = snapshot.opened_at.map(|at| {
            let elapsed = (Utc::now() - at).to_std().unwrap_or(Duration::ZERO);
            Instant::now().checked_sub(elapsed).unwrap_or_else(Instant::now)
        });
        *self.opened_at.write().await = opened;

        debug!(
            service = %self.service_name,
            state = ?snapshot.state,
            "Circuit breaker state restored"
        );
    }
}

/// Error type for circuit breaker operations.
#[derive(Debug)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open, the call was rejected without invoking the
    /// dependency. `retry_after` suggests how long until a trial call
    /// would be admitted.
    Open {
        service: String,
        retry_after: Option<Duration>,
    },
    /// The underlying operation failed.
    Failure(E),
}

impl<E> CircuitBreakerError<E> {
    /// Returns the suggested wait if the circuit rejected the call.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Open { retry_after, .. } => *retry_after,
            Self::Failure(_) => None,
        }
    }
}

impl<E: std::fmt::Display> std::fmt::Display for CircuitBreakerError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open { service, .. } => write!(f, "Circuit breaker '{}' is open", service),
            Self::Failure(e) => write!(f, "Operation failed: {}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for CircuitBreakerError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Open { .. } => None,
            Self::Failure(e) => Some(e),
        }
    }
}

impl<E> From<CircuitBreakerError<E>> for TrackliftError
where
    E: std::fmt::Display,
{
    fn from(err: CircuitBreakerError<E>) -> Self {
        match err {
            CircuitBreakerError::Open { service, .. } => {
                TrackliftError::CircuitBreakerOpen(service)
            }
            CircuitBreakerError::Failure(e) => TrackliftError::Internal(e.to_string()),
        }
    }
}
