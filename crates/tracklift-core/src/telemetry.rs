//! Tracing subscriber initialization.
//!
//! One call at process startup wires up structured logging for every
//! crate in the pipeline. Filtering follows `RUST_LOG` when set.

use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Service name included in log lines.
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Default filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json_output: bool,
}

fn default_service_name() -> String {
    "tracklift".to_string()
}

fn default_log_filter() -> String {
    "info,tracklift=debug".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            log_filter: default_log_filter(),
            json_output: false,
        }
    }
}

/// Initializes the global tracing subscriber.
///
/// Call once at startup. A second call is a no-op error in the
/// subscriber machinery; this function swallows it so tests can share
/// a process.
pub fn init_telemetry(config: &TelemetryConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_filter.clone()));

    let result = if config.json_output {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()
    };

    if result.is_ok() {
        tracing::info!(
            service_name = %config.service_name,
            json_output = config.json_output,
            "Telemetry initialized"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "tracklift");
        assert!(config.log_filter.contains("tracklift=debug"));
        assert!(!config.json_output);
    }

    #[test]
    fn test_init_is_idempotent() {
        let config = TelemetryConfig::default();
        init_telemetry(&config);
        init_telemetry(&config);
    }
}
