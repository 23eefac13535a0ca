//! Process-wide structured logging: a global `tracing-subscriber`
//! subscriber with an `env-filter` plus a `fmt` layer, pretty in dev
//! builds and JSON in release, no OpenTelemetry exporter.

use bookmarks_core::LogFormat;
use tracing_subscriber::{fmt, EnvFilter};

/// What to install. `level` is an `env-filter` directive string (e.g.
/// `"info"`, `"bookmarks_broker=debug,info"`); it is combined with
/// `RUST_LOG` when set, `RUST_LOG` taking precedence.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

/// Install the global `tracing` subscriber. Idempotent-safe to call more
/// than once per process (later calls are no-ops) because tests may share
/// a process; production binaries call it exactly once at startup.
pub fn init(config: LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    let result = match config.format {
        LogFormat::Json => fmt().with_env_filter(filter).json().try_init(),
        LogFormat::Pretty => fmt().with_env_filter(filter).pretty().try_init(),
    };

    if let Err(err) = result {
        tracing::debug!(error = %err, "tracing subscriber already installed");
    }
}
