//! # bookmarks-client
//!
//! The browser-process side of the real-time coordination core: one
//! [`SharedCoordinator`] per process holds the single upstream connection
//! per namespace, the batching sync engine and offline operation log, a
//! reachability probe, and the registry of tab ports talking to it.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod ports;
pub mod protocol;
pub mod reachability;
pub mod sync_engine;

use std::sync::Arc;

use bookmarks_core::{Namespace, NodeId, OperationLog};
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::instrument;

pub use config::ClientConfig;
pub use coordinator::{ConnectionState, NamespaceConnection};
pub use error::{ClientError, ClientResult};
pub use ports::PortRegistry;
pub use protocol::{InboundMessage, OutboundMessage, ReconnectingData};
pub use reachability::ReachabilityMonitor;
pub use sync_engine::SyncEngine;

/// Snapshot returned for `getStatus`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StatusSnapshot {
    pub namespace: Namespace,
    pub state: &'static str,
    #[serde(rename = "pendingCount")]
    pub pending_count: usize,
    pub online: bool,
}

/// The process-wide coordinator tying C6-C9 together. One instance per
/// browser extension background process / service worker.
pub struct SharedCoordinator {
    config: Arc<ClientConfig>,
    http: reqwest::Client,
    ports: Arc<PortRegistry>,
    sync_engine: Arc<SyncEngine>,
    reachability: Arc<ReachabilityMonitor>,
    connections: DashMap<Namespace, Arc<NamespaceConnection>>,
}

impl SharedCoordinator {
    pub fn new(config: ClientConfig, log: Arc<dyn OperationLog>) -> Arc<Self> {
        let config = Arc::new(config);
        let http = reqwest::Client::new();
        let ports = Arc::new(PortRegistry::new());
        let reachability = Arc::new(ReachabilityMonitor::new(
            config.reachability.clone(),
            http.clone(),
            config.base_url.clone(),
        ));
        let sync_engine = Arc::new(SyncEngine::new(
            config.clone(),
            http.clone(),
            log,
            ports.clone(),
            reachability.clone(),
        ));

        let coordinator = Arc::new(Self {
            config,
            http,
            ports,
            sync_engine: sync_engine.clone(),
            reachability: reachability.clone(),
            connections: DashMap::new(),
        });

        let engine_for_callback = sync_engine;
        reachability.clone().spawn(move |online| {
            if online {
                let engine = engine_for_callback.clone();
                tokio::spawn(async move {
                    for entry in engine.replica_namespaces() {
                        engine.drain(entry).await;
                    }
                });
            }
        });

        coordinator
    }

    /// Register a new tab port. Returns its id and the receiving half of
    /// its outbound channel — the caller is responsible for forwarding
    /// those messages over whatever transport the tab actually uses
    /// (`postMessage`, a `BroadcastChannel`, ...).
    pub fn register_port(&self) -> (bookmarks_core::PortId, mpsc::UnboundedReceiver<OutboundMessage>) {
        self.ports.register()
    }

    pub fn remove_port(&self, port_id: &bookmarks_core::PortId) {
        self.ports.remove(port_id);
    }

    /// Dispatch one inbound port message.
    #[instrument(skip(self, message))]
    pub async fn handle_message(&self, port_id: bookmarks_core::PortId, message: InboundMessage) {
        let request_id = message.request_id().map(str::to_string);
        match message {
            InboundMessage::Connect { namespace, .. } => self.connect(port_id, namespace).await,
            InboundMessage::Disconnect { .. } => self.ports.detach(&port_id),
            InboundMessage::EnqueueOperation { namespace, op, .. } => {
                self.sync_engine.enqueue(namespace, op).await;
            }
            InboundMessage::SyncNow { namespace, .. } => self.sync_engine.sync_now(namespace).await,
            InboundMessage::GetStatus { namespace, .. } => {
                self.reply_status(&port_id, namespace, request_id).await;
            }
            InboundMessage::GetPendingCount { namespace, .. } => {
                let count = self.sync_engine.pending_count(&namespace);
                self.ports.send_to(&port_id, OutboundMessage::PendingCount { count, request_id });
            }
            InboundMessage::ResetDatabase { .. } => {
                self.sync_engine.reset();
            }
            InboundMessage::FetchInitialData { namespace, .. } => {
                match self.sync_engine.fetch_initial_data(&namespace, &NodeId::root()).await {
                    Ok(nodes) => self.ports.send_to(
                        &port_id,
                        OutboundMessage::DataChanged { namespace, nodes: Some(nodes), request_id },
                    ),
                    Err(err) => self.ports.send_to(
                        &port_id,
                        OutboundMessage::Error { message: err.to_string(), request_id },
                    ),
                }
            }
        }
    }

    async fn connect(&self, port_id: bookmarks_core::PortId, namespace: Namespace) {
        self.ports.attach(&port_id, namespace.clone());
        self.connections.entry(namespace.clone()).or_insert_with(|| {
            NamespaceConnection::spawn(
                namespace,
                self.config.base_url.clone(),
                self.config.reconnect.clone(),
                self.http.clone(),
                self.ports.clone(),
                self.sync_engine.clone(),
            )
        });
    }

    async fn reply_status(&self, port_id: &bookmarks_core::PortId, namespace: Option<Namespace>, request_id: Option<String>) {
        let Some(namespace) = namespace.or_else(|| self.ports.namespace_of(port_id)) else {
            self.ports.send_to(
                port_id,
                OutboundMessage::Error { message: "no namespace to report status for".to_string(), request_id },
            );
            return;
        };

        // Clone the handle out of the shard before awaiting on it, so the
        // DashMap shard lock isn't held across an await point.
        let handle = self.connections.get(&namespace).map(|entry| entry.value().clone());
        let state = match handle {
            Some(conn) => conn.state().await,
            None => ConnectionState::Idle,
        };

        let snapshot = StatusSnapshot {
            namespace: namespace.clone(),
            state: state_label(state),
            pending_count: self.sync_engine.pending_count(&namespace),
            online: self.reachability.is_online(),
        };
        self.ports.send_to(
            port_id,
            OutboundMessage::Event {
                event_type: "status".to_string(),
                data: serde_json::to_value(&snapshot).unwrap_or_default(),
                request_id,
            },
        );
    }
}

fn state_label(state: ConnectionState) -> &'static str {
    match state {
        ConnectionState::Idle => "idle",
        ConnectionState::Connecting => "connecting",
        ConnectionState::Connected => "connected",
        ConnectionState::Reconnecting => "reconnecting",
        ConnectionState::Closed => "closed",
    }
}
