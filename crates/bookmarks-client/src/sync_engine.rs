//! Sync Engine — batches pending operations from the durable log, posts
//! them to the broker, and reconciles the local replica with the server's
//! response (applied statuses + id mappings).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bookmarks_core::{EnvelopeId, Namespace, Node, NodeId, Op, OperationEnvelope, OperationLog};
use bookmarks_replica::TreeReplica;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{instrument, warn};

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::ports::PortRegistry;
use crate::reachability::ReachabilityMonitor;
use crate::protocol::OutboundMessage;

#[derive(Debug, Serialize)]
struct SyncRequestBody<'a> {
    #[serde(rename = "clientId")]
    client_id: &'a str,
    operations: &'a [OperationEnvelope],
}

#[derive(Debug, Deserialize)]
struct AppliedResult {
    #[serde(rename = "operationId")]
    operation_id: EnvelopeId,
    status: String,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SyncResponseBody {
    applied: Vec<AppliedResult>,
    #[serde(default)]
    mappings: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct TreeNodeResponse {
    nodes: HashMap<String, Node>,
}

/// The node id an op mutates or creates, for skipping server-authoritative
/// upserts against nodes a still-pending envelope is targeting.
fn touched_node_id(op: &Op) -> Option<NodeId> {
    match op {
        Op::CreateFolder { id, .. } => id.clone(),
        Op::CreateBookmark { id, .. } => id.clone(),
        Op::MoveNode { node_id, .. } => Some(node_id.clone()),
        Op::UpdateNode { node_id, .. } => Some(node_id.clone()),
        Op::ToggleFolder { folder_id, .. } => Some(folder_id.clone()),
        Op::RemoveNode { node_id } => Some(node_id.clone()),
    }
}

/// Batches and ships one namespace's pending operations, and owns that
/// namespace's optimistic local replica.
pub struct SyncEngine {
    config: Arc<ClientConfig>,
    http: reqwest::Client,
    log: Arc<dyn OperationLog>,
    ports: Arc<PortRegistry>,
    reachability: Arc<ReachabilityMonitor>,
    replicas: DashMap<Namespace, Arc<RwLock<TreeReplica>>>,
    /// Presence means a batch timer is already armed for that namespace —
    /// further `enqueue` calls coalesce into it instead of arming another
    /// (`batchWindow`).
    scheduled: DashMap<Namespace, ()>,
    /// Presence means a batch is currently in flight for that namespace —
    /// a concurrent `drain` call is a no-op, the in-flight one will pick
    /// up whatever else accumulated by the time it next runs.
    in_flight: DashMap<Namespace, ()>,
}

impl SyncEngine {
    pub fn new(
        config: Arc<ClientConfig>,
        http: reqwest::Client,
        log: Arc<dyn OperationLog>,
        ports: Arc<PortRegistry>,
        reachability: Arc<ReachabilityMonitor>,
    ) -> Self {
        Self {
            config,
            http,
            log,
            ports,
            reachability,
            replicas: DashMap::new(),
            scheduled: DashMap::new(),
            in_flight: DashMap::new(),
        }
    }

    pub fn replica_for(&self, namespace: &Namespace) -> Arc<RwLock<TreeReplica>> {
        self.replicas
            .entry(namespace.clone())
            .or_insert_with(|| Arc::new(RwLock::new(TreeReplica::new(namespace.clone(), "root"))))
            .clone()
    }

    pub async fn subtree(&self, namespace: &Namespace, root_id: &NodeId) -> Vec<Node> {
        let replica = self.replica_for(namespace);
        let guard = replica.read().await;
        guard.get_subtree_respecting_open(root_id)
    }

    async fn pending_node_ids(&self, namespace: &Namespace) -> HashSet<NodeId> {
        self.log
            .list_pending(namespace)
            .unwrap_or_default()
            .iter()
            .filter_map(|env| touched_node_id(&env.op))
            .collect()
    }

    /// Apply one upstream application event (`folder_created`,
    /// `item_moved`, `item_deleted`, ...) to the local replica, so a
    /// mutation made on another device lands in this process's tree
    /// instead of only being forwarded to tab ports.
    #[instrument(skip(self, data), fields(namespace = %namespace, event = event_type))]
    pub async fn apply_remote_event(&self, namespace: &Namespace, event_type: &str, data: &serde_json::Value) {
        let pending_ids = self.pending_node_ids(namespace).await;
        let replica = self.replica_for(namespace);
        let mut guard = replica.write().await;

        if event_type == "item_deleted" {
            if let Some(id) = data.get("id").and_then(|v| v.as_str()) {
                guard.remove_remote_node(&NodeId::from(id), &pending_ids);
            }
            return;
        }

        match serde_json::from_value::<Node>(data.clone()) {
            Ok(node) => guard.upsert_remote_node(node, &pending_ids),
            Err(err) => warn!(namespace = %namespace, event = event_type, error = %err, "could not parse application event as a node"),
        }
    }

    /// Hydrate this namespace's replica from server-authoritative state
    /// (`GET /api/:ns/tree/node/:id`) and return the resulting subtree, so
    /// a freshly-opened tab sees the server tree instead of only whatever
    /// this process's replica happened to already hold.
    #[instrument(skip(self), fields(namespace = %namespace, root = %root_id))]
    pub async fn fetch_initial_data(&self, namespace: &Namespace, root_id: &NodeId) -> ClientResult<Vec<Node>> {
        let url = format!("{}/api/{}/tree/node/{}", self.config.base_url, namespace, root_id);
        let response = self.http.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(ClientError::ServerStatus { status: response.status().as_u16(), body: String::new() });
        }
        let parsed: TreeNodeResponse = response.json().await?;
        let server_nodes: HashMap<NodeId, Node> =
            parsed.nodes.into_iter().map(|(id, node)| (NodeId::from(id), node)).collect();

        let pending_ids = self.pending_node_ids(namespace).await;
        let replica = self.replica_for(namespace);
        {
            let mut guard = replica.write().await;
            guard.reconcile(server_nodes, &pending_ids);
        }
        Ok(self.subtree(namespace, root_id).await)
    }

    /// Apply `op` optimistically against the local replica, persist it as
    /// a `pending` envelope, then arm (or coalesce into) the batch timer
    /// for this namespace.
    #[instrument(skip(self, op), fields(namespace = %namespace, op = op.kind()))]
    pub async fn enqueue(self: &Arc<Self>, namespace: Namespace, op: Op) -> EnvelopeId {
        let envelope = OperationEnvelope::new(namespace.clone(), op.clone());
        let id = envelope.id.clone();

        let replica = self.replica_for(&namespace);
        {
            let mut guard = replica.write().await;
            if let Err(err) = guard.apply(&envelope.id, &op, envelope.ts) {
                warn!(id = %id, error = %err, "optimistic apply rejected locally");
                self.ports.broadcast(
                    &namespace,
                    OutboundMessage::Error { message: err.to_string(), request_id: None },
                );
            }
        }

        if let Err(err) = self.log.append(envelope) {
            warn!(id = %id, error = %err, "failed to persist pending envelope");
        }

        self.broadcast_pending_count(&namespace);
        self.schedule_batch(namespace);
        id
    }

    fn broadcast_pending_count(&self, namespace: &Namespace) {
        let count = self.log.count_pending(namespace).unwrap_or(0);
        self.ports
            .broadcast(namespace, OutboundMessage::PendingCount { count, request_id: None });
    }

    fn schedule_batch(self: &Arc<Self>, namespace: Namespace) {
        if self.scheduled.insert(namespace.clone(), ()).is_some() {
            return;
        }
        let this = self.clone();
        let window = this.config.sync.batch_window;
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            this.scheduled.remove(&namespace);
            this.drain(namespace).await;
        });
    }

    /// Drain one namespace's pending envelopes in a single batch, if any
    /// are pending and the broker is currently reachable.
    pub async fn drain(self: &Arc<Self>, namespace: Namespace) {
        if !self.reachability.is_online() {
            return; // resumed by the reachability monitor's on_change callback
        }
        if self.in_flight.insert(namespace.clone(), ()).is_some() {
            return;
        }
        let result = self.drain_once(&namespace).await;
        self.in_flight.remove(&namespace);
        if let Err(err) = result {
            warn!(namespace = %namespace, error = %err, "sync batch failed");
            self.ports.broadcast(
                &namespace,
                OutboundMessage::SyncStatus { status: "error", error: Some(err.to_string()), request_id: None },
            );
        }
    }

    async fn drain_once(self: &Arc<Self>, namespace: &Namespace) -> ClientResult<()> {
        let pending = self.log.list_pending(namespace)?;
        if pending.is_empty() {
            return Ok(());
        }

        self.ports.broadcast(
            namespace,
            OutboundMessage::SyncStatus { status: "syncing", error: None, request_id: None },
        );

        let url = format!("{}/api/sync/{}/operations", self.config.base_url, namespace);
        let body = SyncRequestBody { client_id: &self.config.client_id, operations: &pending };
        let response = self.http.post(&url).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(ClientError::ServerStatus { status: response.status().as_u16(), body: String::new() });
        }
        let parsed: SyncResponseBody = response.json().await?;

        self.apply_response(namespace, parsed).await?;
        self.broadcast_pending_count(namespace);
        self.ports.broadcast(
            namespace,
            OutboundMessage::SyncStatus { status: "synced", error: None, request_id: None },
        );
        Ok(())
    }

    async fn apply_response(self: &Arc<Self>, namespace: &Namespace, response: SyncResponseBody) -> ClientResult<()> {
        for applied in response.applied {
            match applied.status.as_str() {
                "success" => {
                    self.log.mark_synced(&applied.operation_id)?;
                    self.ports.broadcast(
                        namespace,
                        OutboundMessage::Ack { operation_id: applied.operation_id.to_string(), request_id: None },
                    );
                }
                _ => {
                    self.log.mark_failed(&applied.operation_id, applied.error.as_deref().unwrap_or(""))?;
                    self.schedule_retry_or_give_up(namespace.clone(), applied.operation_id, applied.error).await?;
                }
            }
        }

        if !response.mappings.is_empty() {
            let mapping: HashMap<NodeId, NodeId> = response
                .mappings
                .into_iter()
                .map(|(k, v)| (NodeId::from(k), NodeId::from(v)))
                .collect();
            let replica = self.replica_for(namespace);
            let mut guard = replica.write().await;
            guard.remap_ids(&mapping);
        }
        Ok(())
    }

    async fn schedule_retry_or_give_up(
        self: &Arc<Self>,
        namespace: Namespace,
        id: EnvelopeId,
        error: Option<String>,
    ) -> ClientResult<()> {
        let Some(env) = self.log.get(&id)? else { return Ok(()) };
        if env.retry_count >= self.config.sync.max_retries {
            self.ports.broadcast(
                &namespace,
                OutboundMessage::SyncStatus { status: "error", error, request_id: None },
            );
            return Ok(());
        }
        let delay = self.config.sync.retry_delay_for(env.retry_count);
        let this = self.clone();
        let log = self.log.clone();
        let max_retries = self.config.sync.max_retries;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if matches!(log.retry(&id, max_retries, false), Ok(true)) {
                this.schedule_batch(namespace);
            }
        });
        Ok(())
    }

    /// User-initiated immediate sync: reset every `failed` envelope's
    /// retry bookkeeping in the target namespace(s) and drain right away,
    /// bypassing the batch window.
    pub async fn sync_now(self: &Arc<Self>, namespace: Option<Namespace>) {
        let namespaces: Vec<Namespace> = match namespace {
            Some(ns) => vec![ns],
            None => self.replicas.iter().map(|e| e.key().clone()).collect(),
        };
        for ns in namespaces {
            if let Ok(failed) = self.log.list_failed(&ns) {
                for env in failed {
                    let _ = self.log.retry(&env.id, self.config.sync.max_retries, true);
                }
            }
            self.drain(ns).await;
        }
    }

    pub fn pending_count(&self, namespace: &Namespace) -> usize {
        self.log.count_pending(namespace).unwrap_or(0)
    }

    /// Every namespace this engine has materialized a replica for, used
    /// to re-drain all of them on an offline -> online transition.
    pub fn replica_namespaces(&self) -> Vec<Namespace> {
        self.replicas.iter().map(|e| e.key().clone()).collect()
    }

    /// Drop every namespace's in-memory replica, forcing a fresh
    /// `fetchInitialData` round-trip on next use (`resetDatabase`).
    pub fn reset(&self) {
        self.replicas.clear();
    }
}
