//! Client-wide configuration, bundling the per-component tuning knobs
//! `bookmarks_core::config` already defines with the bits specific to
//! having an upstream broker to talk to.

use bookmarks_core::{ReachabilityConfig, ReconnectConfig, SyncConfig};

/// Everything the shared coordinator needs to run, bundling the
/// per-component sub-configs behind one constructor.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the broker, e.g. `http://127.0.0.1:8787`.
    pub base_url: String,
    /// Sent as `clientId` on every sync batch.
    pub client_id: String,
    pub reconnect: ReconnectConfig,
    pub sync: SyncConfig,
    pub reachability: ReachabilityConfig,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client_id: uuid::Uuid::new_v4().to_string(),
            reconnect: ReconnectConfig::default(),
            sync: SyncConfig::default(),
            reachability: ReachabilityConfig::default(),
        }
    }
}
