//! Recognized configuration options and their defaults: a plain struct per
//! concern with a `Default` impl carrying every default.

use std::time::Duration;

/// SSE broker tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct SseConfig {
    pub heartbeat_interval: Duration,
    pub write_timeout: Duration,
    pub publish_timeout: Duration,
    pub subscriber_queue_capacity: usize,
}

impl Default for SseConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(15),
            write_timeout: Duration::from_secs(10),
            publish_timeout: Duration::from_millis(100),
            subscriber_queue_capacity: 64,
        }
    }
}

/// Client reconnection policy.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: f64,
    pub stable_threshold: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(60_000),
            multiplier: 2.0,
            jitter: 0.3,
            stable_threshold: Duration::from_secs(30),
        }
    }
}

/// Sync engine tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    pub batch_window: Duration,
    pub max_retries: u32,
    pub retry_delays: Vec<Duration>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_window: Duration::from_millis(100),
            max_retries: 5,
            retry_delays: [1u64, 2, 5, 10, 30]
                .into_iter()
                .map(Duration::from_secs)
                .collect(),
        }
    }
}

impl SyncConfig {
    /// `retryDelays[min(retryCount, len-1)]`.
    pub fn retry_delay_for(&self, retry_count: u32) -> Duration {
        let idx = (retry_count as usize).min(self.retry_delays.len() - 1);
        self.retry_delays[idx]
    }
}

/// Reachability monitor tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct ReachabilityConfig {
    pub probe_interval: Duration,
    pub probe_timeout: Duration,
}

impl Default for ReachabilityConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

/// Logging format, the knob `bookmarks_logging::LogConfig` reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl Default for LogFormat {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            LogFormat::Pretty
        } else {
            LogFormat::Json
        }
    }
}
