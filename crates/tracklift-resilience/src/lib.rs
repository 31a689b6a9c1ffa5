//! # Tracklift Resilience
//!
//! Failure isolation for the Tracklift pipeline's unreliable upstreams
//! (the peer-to-peer download daemon, the streaming-catalog API, the
//! metadata-lookup API). Provides per-service circuit breakers and a
//! named-breaker registry with persistable state.

pub mod circuit_breaker;

pub use circuit_breaker::*;
