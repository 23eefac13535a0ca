//! Operation Applicator — idempotent envelope application against the
//! namespace's tree, publishing the resulting event through the broker
//! only after the store commit.

use std::collections::HashMap;
use std::sync::Arc;

use bookmarks_core::{
    BrokerEvent, EnvelopeId, EnvelopeStatus, EventType, Namespace, Node, NodeId, Op,
    OperationEnvelope, OperationLog,
};
use bookmarks_replica::TreeReplica;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

use crate::broker::Broker;

/// Response to a single-envelope apply (`POST /api/:ns/operations/apply`).
#[derive(Debug, Serialize)]
pub struct ApplyOutcome {
    pub success: bool,
    #[serde(rename = "operationId")]
    pub operation_id: EnvelopeId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Node>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AppliedResult {
    #[serde(rename = "operationId")]
    pub operation_id: EnvelopeId,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response to a batched sync (`POST /api/sync/:ns/operations`).
#[derive(Debug, Serialize)]
pub struct SyncResponse {
    pub applied: Vec<AppliedResult>,
    pub mappings: HashMap<String, String>,
    #[serde(rename = "serverTimestamp")]
    pub server_timestamp: DateTime<Utc>,
}

/// One entry of `GET /api/namespaces`.
#[derive(Debug, Serialize)]
pub struct NamespaceSummary {
    pub namespace: Namespace,
    #[serde(rename = "rootNodeId")]
    pub root_node_id: NodeId,
    #[serde(rename = "rootNodeTitle")]
    pub root_node_title: String,
}

pub struct Applicator {
    broker: Arc<Broker>,
    log: Arc<dyn OperationLog>,
    trees: DashMap<Namespace, Arc<RwLock<TreeReplica>>>,
}

impl Applicator {
    pub fn new(broker: Arc<Broker>, log: Arc<dyn OperationLog>) -> Self {
        Self {
            broker,
            log,
            trees: DashMap::new(),
        }
    }

    fn tree_for(&self, namespace: &Namespace) -> Arc<RwLock<TreeReplica>> {
        self.trees
            .entry(namespace.clone())
            .or_insert_with(|| Arc::new(RwLock::new(TreeReplica::new(namespace.clone(), "root"))))
            .clone()
    }

    /// A read-only snapshot of one namespace's tree, for `GET
    /// /api/:ns/tree/node/:id` — children are only included under open
    /// folders.
    pub async fn subtree(&self, namespace: &Namespace, root_id: &NodeId) -> Vec<Node> {
        let tree = self.tree_for(namespace);
        let guard = tree.read().await;
        guard.get_subtree_respecting_open(root_id)
    }

    /// Every namespace this process has materialized a tree for, with its
    /// root folder's id and title.
    pub async fn namespaces(&self) -> Vec<NamespaceSummary> {
        let snapshot: Vec<(Namespace, Arc<RwLock<TreeReplica>>)> =
            self.trees.iter().map(|e| (e.key().clone(), e.value().clone())).collect();
        let mut out = Vec::with_capacity(snapshot.len());
        for (namespace, tree) in snapshot {
            let guard = tree.read().await;
            if let Some(root) = guard.get(&NodeId::root()) {
                out.push(NamespaceSummary {
                    namespace,
                    root_node_id: NodeId::root(),
                    root_node_title: root.title().to_string(),
                });
            }
        }
        out
    }

    /// Apply one envelope. Idempotent: re-applying an envelope id already
    /// in the log returns the prior outcome without re-executing or
    /// re-publishing.
    ///
    /// Always available as a library call for tests/tooling; only its HTTP
    /// exposure is gated behind the `direct-apply` feature (see `routes`).
    #[instrument(skip(self, envelope), fields(id = %envelope.id, namespace = %envelope.namespace, op = envelope.op.kind()))]
    pub async fn apply_one(&self, envelope: OperationEnvelope) -> ApplyOutcome {
        if let Ok(Some(existing)) = self.log.get(&envelope.id) {
            return ApplyOutcome {
                success: existing.status != EnvelopeStatus::Failed,
                operation_id: envelope.id,
                data: None,
                error: None,
            };
        }

        let namespace = envelope.namespace.clone();
        let tree = self.tree_for(&namespace);
        let outcome = {
            let mut guard = tree.write().await;
            guard.apply(&envelope.id, &envelope.op, envelope.ts)
        };

        match outcome {
            Ok(post_image) => {
                let mut to_log = envelope.clone();
                to_log.mark_synced();
                if let Err(err) = self.log.append(to_log) {
                    warn!(id = %envelope.id, error = %err, "failed to durably log applied envelope");
                    return ApplyOutcome {
                        success: false,
                        operation_id: envelope.id,
                        data: None,
                        error: Some(err.to_string()),
                    };
                }
                if let Some((event_type, data)) = event_for(&envelope.op, &envelope.id, &post_image) {
                    self.broker
                        .publish(&namespace, BrokerEvent::new(event_type, namespace.clone(), data))
                        .await;
                }
                info!(id = %envelope.id, "envelope applied");
                ApplyOutcome {
                    success: true,
                    operation_id: envelope.id,
                    data: post_image,
                    error: None,
                }
            }
            Err(err) => ApplyOutcome {
                success: false,
                operation_id: envelope.id,
                data: None,
                error: Some(err.to_string()),
            },
        }
    }

    /// Apply a client's batch in submission order, resolving any
    /// client-generated temp ids to server-assigned real ones along the
    /// way.
    #[instrument(skip(self, operations), fields(namespace = %namespace, count = operations.len()))]
    pub async fn apply_batch(
        &self,
        namespace: &Namespace,
        operations: Vec<OperationEnvelope>,
    ) -> SyncResponse {
        let mut mapping: HashMap<NodeId, NodeId> = HashMap::new();
        let mut applied = Vec::with_capacity(operations.len());
        let tree = self.tree_for(namespace);

        for mut envelope in operations {
            if let Ok(Some(existing)) = self.log.get(&envelope.id) {
                applied.push(AppliedResult {
                    operation_id: envelope.id,
                    status: if existing.status == EnvelopeStatus::Failed { "failed" } else { "success" },
                    error: None,
                });
                continue;
            }

            envelope.op = remap_op(envelope.op, &mapping);
            assign_real_id(&mut envelope.op, &mut mapping);

            let result = {
                let mut guard = tree.write().await;
                guard.apply(&envelope.id, &envelope.op, envelope.ts)
            };

            match result {
                Ok(post_image) => {
                    let mut to_log = envelope.clone();
                    to_log.mark_synced();
                    if let Err(err) = self.log.append(to_log) {
                        applied.push(AppliedResult {
                            operation_id: envelope.id,
                            status: "failed",
                            error: Some(err.to_string()),
                        });
                        continue;
                    }
                    if let Some((event_type, data)) = event_for(&envelope.op, &envelope.id, &post_image) {
                        self.broker
                            .publish(namespace, BrokerEvent::new(event_type, namespace.clone(), data))
                            .await;
                    }
                    applied.push(AppliedResult {
                        operation_id: envelope.id,
                        status: "success",
                        error: None,
                    });
                }
                Err(err) => {
                    warn!(id = %envelope.id, error = %err, "envelope rejected");
                    applied.push(AppliedResult {
                        operation_id: envelope.id,
                        status: "failed",
                        error: Some(err.to_string()),
                    });
                }
            }
        }

        SyncResponse {
            applied,
            mappings: mapping.into_iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            server_timestamp: Utc::now(),
        }
    }
}

/// Rewrite any node-id fields still carrying a temp id this batch has
/// already resolved.
fn remap_op(op: Op, mapping: &HashMap<NodeId, NodeId>) -> Op {
    let resolve = |id: NodeId| mapping.get(&id).cloned().unwrap_or(id);
    match op {
        Op::CreateFolder { id, parent_id, title, is_open, placement } => Op::CreateFolder {
            id,
            parent_id: parent_id.map(resolve),
            title,
            is_open,
            placement,
        },
        Op::CreateBookmark { id, parent_id, title, url, placement } => Op::CreateBookmark {
            id,
            parent_id: parent_id.map(resolve),
            title,
            url,
            placement,
        },
        Op::MoveNode { node_id, to_folder_id, placement } => Op::MoveNode {
            node_id: resolve(node_id),
            to_folder_id: resolve(to_folder_id),
            placement,
        },
        Op::UpdateNode { node_id, title, url } => Op::UpdateNode { node_id: resolve(node_id), title, url },
        Op::ToggleFolder { folder_id, open } => Op::ToggleFolder { folder_id: resolve(folder_id), open },
        Op::RemoveNode { node_id } => Op::RemoveNode { node_id: resolve(node_id) },
    }
}

/// If a create op's own id is a client temp id, mint a real one and record
/// the mapping for the sync response.
fn assign_real_id(op: &mut Op, mapping: &mut HashMap<NodeId, NodeId>) {
    let id_field = match op {
        Op::CreateFolder { id, .. } => id,
        Op::CreateBookmark { id, .. } => id,
        _ => return,
    };
    if let Some(temp_id) = id_field.clone() {
        if temp_id.is_temp() {
            let real_id = NodeId::generate();
            mapping.insert(temp_id, real_id.clone());
            *id_field = Some(real_id);
        }
    }
}

fn event_for(op: &Op, envelope_id: &EnvelopeId, post_image: &Option<Node>) -> Option<(EventType, serde_json::Value)> {
    let (event_type, mut data) = match op {
        Op::CreateFolder { .. } => (EventType::FolderCreated, serde_json::to_value(post_image.as_ref()?).ok()?),
        Op::CreateBookmark { .. } => (EventType::BookmarkCreated, serde_json::to_value(post_image.as_ref()?).ok()?),
        Op::MoveNode { .. } => (EventType::ItemMoved, serde_json::to_value(post_image.as_ref()?).ok()?),
        Op::ToggleFolder { .. } => (EventType::FolderToggled, serde_json::to_value(post_image.as_ref()?).ok()?),
        Op::UpdateNode { .. } => {
            let node = post_image.as_ref()?;
            let event_type = if node.is_folder() { EventType::FolderUpdated } else { EventType::BookmarkUpdated };
            (event_type, serde_json::to_value(node).ok()?)
        }
        Op::RemoveNode { node_id } => (EventType::ItemDeleted, json!({ "id": node_id.to_string() })),
    };
    if let serde_json::Value::Object(map) = &mut data {
        map.insert("type".into(), json!(event_type.as_wire_str()));
        map.insert("timestamp".into(), json!(Utc::now()));
        map.insert("operationId".into(), json!(envelope_id.to_string()));
    }
    Some((event_type, data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bookmarks_core::{InMemoryOperationLog, Placement, SseConfig};

    fn applicator() -> Applicator {
        let broker = Arc::new(Broker::new(SseConfig::default()));
        let log: Arc<dyn OperationLog> = Arc::new(InMemoryOperationLog::new());
        Applicator::new(broker, log)
    }

    #[tokio::test]
    async fn batch_applies_in_order_and_remaps_temp_ids() {
        let app = applicator();
        let ns = Namespace::from("default");

        let folder_env = OperationEnvelope::new(
            ns.clone(),
            Op::CreateFolder {
                id: Some(NodeId::from("temp_1")),
                parent_id: Some(NodeId::root()),
                title: "Dev".into(),
                is_open: None,
                placement: None,
            },
        );
        let bookmark_env = OperationEnvelope::new(
            ns.clone(),
            Op::CreateBookmark {
                id: Some(NodeId::from("temp_2")),
                parent_id: Some(NodeId::from("temp_1")),
                title: "MDN".into(),
                url: "https://developer.mozilla.org".into(),
                placement: Some(Placement::Index(0)),
            },
        );

        let response = app.apply_batch(&ns, vec![folder_env, bookmark_env]).await;
        assert_eq!(response.applied.len(), 2);
        assert!(response.applied.iter().all(|a| a.status == "success"));
        assert_eq!(response.mappings.len(), 2);

        let real_folder = response.mappings.get("temp_1").unwrap().clone();
        let subtree = app.subtree(&ns, &NodeId::from(real_folder.as_str())).await;
        assert_eq!(subtree.len(), 2); // folder + bookmark
    }

    #[tokio::test]
    async fn batch_is_idempotent_on_replay() {
        let app = applicator();
        let ns = Namespace::from("default");
        let env = OperationEnvelope::new(
            ns.clone(),
            Op::CreateFolder { id: Some(NodeId::from("f1")), parent_id: None, title: "Dev".into(), is_open: None, placement: None },
        );
        let first = app.apply_batch(&ns, vec![env.clone()]).await;
        assert_eq!(first.applied[0].status, "success");
        let second = app.apply_batch(&ns, vec![env]).await;
        assert_eq!(second.applied[0].status, "success");

        let subtree = app.subtree(&ns, &NodeId::root()).await;
        assert_eq!(subtree.iter().filter(|n| n.id() == &NodeId::from("f1")).count(), 1);
    }

    #[tokio::test]
    async fn conflicting_op_is_reported_failed_without_publish() {
        let app = applicator();
        let ns = Namespace::from("default");
        let env = OperationEnvelope::new(
            ns.clone(),
            Op::MoveNode { node_id: NodeId::root(), to_folder_id: NodeId::from("nowhere"), placement: None },
        );
        let response = app.apply_batch(&ns, vec![env]).await;
        assert_eq!(response.applied[0].status, "failed");
        assert!(response.applied[0].error.is_some());
    }
}
