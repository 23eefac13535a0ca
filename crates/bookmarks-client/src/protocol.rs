//! The tab port wire protocol: what a tab can ask the shared coordinator
//! for, and what the coordinator broadcasts back.

use bookmarks_core::{Namespace, Node, Op};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A message a tab port sends to the coordinator.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum InboundMessage {
    Connect {
        namespace: Namespace,
        #[serde(rename = "requestId", default)]
        request_id: Option<String>,
    },
    Disconnect {
        namespace: Namespace,
        #[serde(rename = "requestId", default)]
        request_id: Option<String>,
    },
    EnqueueOperation {
        namespace: Namespace,
        op: Op,
        #[serde(rename = "requestId", default)]
        request_id: Option<String>,
    },
    SyncNow {
        #[serde(default)]
        namespace: Option<Namespace>,
        #[serde(rename = "requestId", default)]
        request_id: Option<String>,
    },
    GetStatus {
        #[serde(default)]
        namespace: Option<Namespace>,
        #[serde(rename = "requestId", default)]
        request_id: Option<String>,
    },
    GetPendingCount {
        namespace: Namespace,
        #[serde(rename = "requestId", default)]
        request_id: Option<String>,
    },
    ResetDatabase {
        #[serde(rename = "requestId", default)]
        request_id: Option<String>,
    },
    FetchInitialData {
        namespace: Namespace,
        #[serde(rename = "requestId", default)]
        request_id: Option<String>,
    },
}

impl InboundMessage {
    pub fn request_id(&self) -> Option<&str> {
        match self {
            InboundMessage::Connect { request_id, .. }
            | InboundMessage::Disconnect { request_id, .. }
            | InboundMessage::EnqueueOperation { request_id, .. }
            | InboundMessage::SyncNow { request_id, .. }
            | InboundMessage::GetStatus { request_id, .. }
            | InboundMessage::GetPendingCount { request_id, .. }
            | InboundMessage::ResetDatabase { request_id }
            | InboundMessage::FetchInitialData { request_id, .. } => request_id.as_deref(),
        }
    }
}

/// A message the coordinator broadcasts or replies to a tab port with.
/// Every variant carries `requestId` so a direct request (`getStatus`,
/// `getPendingCount`) can be correlated with its reply; it is `None` on
/// messages that are broadcast rather than requested.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum OutboundMessage {
    #[serde(rename = "connected")]
    Connected {
        namespace: Namespace,
        #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
    #[serde(rename = "disconnected")]
    Disconnected {
        namespace: Namespace,
        #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
    #[serde(rename = "connecting")]
    Connecting {
        namespace: Namespace,
        #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
    #[serde(rename = "reconnecting")]
    Reconnecting {
        data: ReconnectingData,
        #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
    #[serde(rename = "event")]
    Event {
        #[serde(rename = "eventType")]
        event_type: String,
        data: serde_json::Value,
        #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
    #[serde(rename = "connection-count")]
    ConnectionCount {
        count: usize,
        #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
    #[serde(rename = "dataChanged")]
    DataChanged {
        namespace: Namespace,
        #[serde(skip_serializing_if = "Option::is_none")]
        nodes: Option<Vec<Node>>,
        #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
    #[serde(rename = "pendingCount")]
    PendingCount {
        count: usize,
        #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
    #[serde(rename = "syncStatus")]
    SyncStatus {
        status: &'static str,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
    #[serde(rename = "error")]
    Error {
        message: String,
        #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
    #[serde(rename = "ack")]
    Ack {
        #[serde(rename = "operationId")]
        operation_id: String,
        #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconnectingData {
    pub attempt: u32,
    #[serde(rename = "delayMs")]
    pub delay_ms: u64,
    #[serde(rename = "nextRetryAt")]
    pub next_retry_at: DateTime<Utc>,
}
