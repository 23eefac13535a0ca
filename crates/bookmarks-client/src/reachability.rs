//! Reachability Monitor — periodically probes the broker and flips an
//! online/offline flag the sync engine gates batch delivery on, firing a
//! callback on every transition rather than requiring the sync engine to
//! poll it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bookmarks_core::ReachabilityConfig;
use tokio::task::JoinHandle;
use tracing::{debug, instrument};

pub struct ReachabilityMonitor {
    config: ReachabilityConfig,
    http: reqwest::Client,
    base_url: String,
    online: AtomicBool,
}

impl ReachabilityMonitor {
    pub fn new(config: ReachabilityConfig, http: reqwest::Client, base_url: String) -> Self {
        Self {
            config,
            http,
            base_url,
            // Optimistic until the first probe; the sync engine gates on
            // this only once a batch is actually pending.
            online: AtomicBool::new(true),
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    /// Spawn the probe loop. `on_change` fires whenever reachability
    /// flips, so the sync engine can immediately retry a drain on
    /// offline -> online transitions instead of waiting for the next
    /// scheduled batch.
    pub fn spawn(self: Arc<Self>, on_change: impl Fn(bool) + Send + Sync + 'static) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.probe_interval);
            loop {
                interval.tick().await;
                let reachable = self.probe().await;
                let previous = self.online.swap(reachable, Ordering::AcqRel);
                if previous != reachable {
                    debug!(reachable, "reachability changed");
                    on_change(reachable);
                }
            }
        })
    }

    #[instrument(skip(self))]
    async fn probe(&self) -> bool {
        let url = format!("{}/api/ping", self.base_url);
        let attempt = self.http.head(&url).send();
        match tokio::time::timeout(self.config.probe_timeout, attempt).await {
            Ok(Ok(response)) => response.status().is_success(),
            Ok(Err(_)) | Err(_) => false,
        }
    }
}
