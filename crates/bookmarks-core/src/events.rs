//! Broker event types and SSE wire framing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::Namespace;

/// The enumeration of event types the broker emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Connection,
    Heartbeat,
    Close,
    FolderCreated,
    BookmarkCreated,
    FolderUpdated,
    BookmarkUpdated,
    ItemMoved,
    FolderToggled,
    BookmarkFavoriteToggled,
    ItemDeleted,
    Trigger,
    Notification,
}

impl EventType {
    /// The literal used on the SSE `event:` line.
    pub fn as_wire_str(self) -> &'static str {
        match self {
            EventType::Connection => "connection",
            EventType::Heartbeat => "heartbeat",
            EventType::Close => "close",
            EventType::FolderCreated => "folder_created",
            EventType::BookmarkCreated => "bookmark_created",
            EventType::FolderUpdated => "folder_updated",
            EventType::BookmarkUpdated => "bookmark_updated",
            EventType::ItemMoved => "item_moved",
            EventType::FolderToggled => "folder_toggled",
            EventType::BookmarkFavoriteToggled => "bookmark_favorite_toggled",
            EventType::ItemDeleted => "item_deleted",
            EventType::Trigger => "trigger",
            EventType::Notification => "notification",
        }
    }
}

/// One event published to a namespace's subscribers.
///
/// `data` always contains at least `{type, timestamp}`; `id`/`type`/
/// `timestamp`/`namespace` are carried alongside for the SSE envelope and
/// for client-side demultiplexing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub namespace: Namespace,
}

impl BrokerEvent {
    pub fn new(event_type: EventType, namespace: Namespace, data: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event_type,
            data,
            timestamp: Utc::now(),
            namespace,
        }
    }

    /// Render as one complete SSE frame: `id:`, `event:`, `data:`, blank
    /// line.
    pub fn to_sse_frame(&self) -> String {
        let data = serde_json::to_string(&self.data).unwrap_or_else(|_| "{}".to_string());
        format!(
            "id: {}\nevent: {}\ndata: {}\n\n",
            self.id,
            self.event_type.as_wire_str(),
            data
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_has_expected_shape() {
        let ev = BrokerEvent::new(
            EventType::FolderCreated,
            Namespace::from("default"),
            serde_json::json!({"type": "folder_created", "timestamp": 0, "id": "f1"}),
        );
        let frame = ev.to_sse_frame();
        assert!(frame.starts_with("id: "));
        assert!(frame.contains("event: folder_created\n"));
        assert!(frame.ends_with("\n\n"));
    }
}
