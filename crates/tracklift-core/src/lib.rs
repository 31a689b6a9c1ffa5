//! # Tracklift Core
//!
//! Core types and error definitions shared across the Tracklift
//! media-acquisition pipeline crates.

pub mod error;
pub mod result;
pub mod telemetry;

pub use error::*;
pub use result::*;
pub use telemetry::{init_telemetry, TelemetryConfig};
