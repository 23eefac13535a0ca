//! The reconnect state machine backs off with growing, capped delays when
//! the broker is unreachable, verified under a paused clock so the test
//! doesn't actually wait out real backoff delays.

use std::sync::Arc;
use std::time::Duration;

use bookmarks_client::config::ClientConfig;
use bookmarks_client::coordinator::NamespaceConnection;
use bookmarks_client::ports::PortRegistry;
use bookmarks_client::reachability::ReachabilityMonitor;
use bookmarks_client::sync_engine::SyncEngine;
use bookmarks_client::OutboundMessage;
use bookmarks_core::{InMemoryOperationLog, Namespace, OperationLog, ReconnectConfig};

#[tokio::test(start_paused = true)]
async fn reconnects_with_growing_backoff_when_broker_is_unreachable() {
    let ports = Arc::new(PortRegistry::new());
    let namespace = Namespace::from("default");
    let (port_id, mut rx) = ports.register();
    ports.attach(&port_id, namespace.clone());

    let reconnect = ReconnectConfig {
        base_delay: Duration::from_millis(50),
        max_delay: Duration::from_secs(2),
        jitter: 0.0,
        ..ReconnectConfig::default()
    };

    let base_url = "http://127.0.0.1:1".to_string(); // nothing listens here; every attempt fails immediately
    let http = reqwest::Client::new();
    let config = Arc::new(ClientConfig::new(base_url.clone()));
    let reachability = Arc::new(ReachabilityMonitor::new(config.reachability.clone(), http.clone(), base_url.clone()));
    let log: Arc<dyn OperationLog> = Arc::new(InMemoryOperationLog::new());
    let sync_engine = Arc::new(SyncEngine::new(config, http.clone(), log, ports.clone(), reachability));

    let _conn = NamespaceConnection::spawn(namespace, base_url, reconnect, http, ports.clone(), sync_engine);

    tokio::time::advance(Duration::from_secs(10)).await;
    tokio::task::yield_now().await;

    let mut attempts_seen = Vec::new();
    while let Ok(message) = rx.try_recv() {
        if let OutboundMessage::Reconnecting { data, .. } = message {
            attempts_seen.push(data.attempt);
        }
    }

    assert!(!attempts_seen.is_empty(), "expected at least one reconnect attempt to be broadcast");
    assert!(attempts_seen.windows(2).all(|w| w[1] >= w[0]), "attempt counter should never decrease");
}
