//! Tracing bootstrap for the relay daemon.

use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Configuration for log output.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Filter applied when `RUST_LOG` is not set.
    pub default_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            default_level: "info".to_string(),
        }
    }
}

/// Install the global tracing subscriber.
///
/// Honors `RUST_LOG` when present, otherwise falls back to the configured
/// default level. Safe to call more than once; later calls are no-ops.
pub fn init_tracing(config: &TelemetryConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber).ok();
}
