//! Operation envelopes — typed mutations wrapped with an id,
//! timestamp and lifecycle status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{EnvelopeId, Namespace, NodeId};

/// An alternative to an explicit `order_key`: a position among current
/// siblings, resolved against the server's current sibling list at apply
/// time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Placement {
    Index(usize),
    OrderKey(String),
}

/// The tagged union of mutation kinds an envelope can carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Op {
    CreateFolder {
        id: Option<NodeId>,
        parent_id: Option<NodeId>,
        title: String,
        is_open: Option<bool>,
        placement: Option<Placement>,
    },
    CreateBookmark {
        id: Option<NodeId>,
        parent_id: Option<NodeId>,
        title: String,
        url: String,
        placement: Option<Placement>,
    },
    MoveNode {
        node_id: NodeId,
        to_folder_id: NodeId,
        placement: Option<Placement>,
    },
    UpdateNode {
        node_id: NodeId,
        title: Option<String>,
        url: Option<String>,
    },
    ToggleFolder {
        folder_id: NodeId,
        open: Option<bool>,
    },
    RemoveNode {
        node_id: NodeId,
    },
}

impl Op {
    /// A short machine name for logging/metrics, matching the `op.type`
    /// discriminator used on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Op::CreateFolder { .. } => "create_folder",
            Op::CreateBookmark { .. } => "create_bookmark",
            Op::MoveNode { .. } => "move_node",
            Op::UpdateNode { .. } => "update_node",
            Op::ToggleFolder { .. } => "toggle_folder",
            Op::RemoveNode { .. } => "remove_node",
        }
    }
}

/// Lifecycle state of an [`OperationEnvelope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeStatus {
    Pending,
    Synced,
    Failed,
}

/// An immutable record of one tree mutation, plus the status/retryCount
/// fields that are the only ones ever mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationEnvelope {
    pub id: EnvelopeId,
    pub ts: DateTime<Utc>,
    pub namespace: Namespace,
    pub op: Op,
    pub status: EnvelopeStatus,
    pub retry_count: u32,
}

impl OperationEnvelope {
    /// Construct a new, `pending` envelope. This is the only way to
    /// populate the non-status fields — there are no setters for them,
    /// enforcing immutability at the type level.
    pub fn new(namespace: Namespace, op: Op) -> Self {
        Self {
            id: EnvelopeId::generate_temp(),
            ts: Utc::now(),
            namespace,
            op,
            status: EnvelopeStatus::Pending,
            retry_count: 0,
        }
    }

    pub fn with_id(mut self, id: EnvelopeId) -> Self {
        self.id = id;
        self
    }

    pub fn mark_synced(&mut self) {
        self.status = EnvelopeStatus::Synced;
    }

    pub fn mark_failed(&mut self) {
        self.status = EnvelopeStatus::Failed;
        self.retry_count = self.retry_count.saturating_add(1);
    }

    /// Reset a `failed` envelope back to `pending` for manual/forced retry,
    /// without bumping `retry_count` again.
    pub fn requeue(&mut self) {
        self.status = EnvelopeStatus::Pending;
    }

    /// Reset retry bookkeeping entirely, as `syncNow` does.
    pub fn reset_retries(&mut self) {
        self.retry_count = 0;
        self.status = EnvelopeStatus::Pending;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_envelope_is_pending() {
        let env = OperationEnvelope::new(
            Namespace::from("default"),
            Op::ToggleFolder {
                folder_id: NodeId::from("f1"),
                open: Some(true),
            },
        );
        assert_eq!(env.status, EnvelopeStatus::Pending);
        assert_eq!(env.retry_count, 0);
    }

    #[test]
    fn mark_failed_increments_retry_count() {
        let mut env = OperationEnvelope::new(
            Namespace::from("default"),
            Op::RemoveNode { node_id: NodeId::from("b1") },
        );
        env.mark_failed();
        env.mark_failed();
        assert_eq!(env.retry_count, 2);
        assert_eq!(env.status, EnvelopeStatus::Failed);
    }
}
