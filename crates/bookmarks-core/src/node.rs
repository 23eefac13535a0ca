//! The tree node data model.
//!
//! A tagged sum dispatched on a `kind` discriminator rather than an
//! inheritance hierarchy, keeping folder- and bookmark-specific fields on
//! their own variants instead of a shared struct with optional fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::NodeId;

/// One node in a namespace's bookmarks tree: a folder or a bookmark.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    Folder(FolderNode),
    Bookmark(BookmarkNode),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolderNode {
    pub id: NodeId,
    pub parent_id: Option<NodeId>,
    pub title: String,
    pub is_open: bool,
    pub order_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookmarkNode {
    pub id: NodeId,
    pub parent_id: Option<NodeId>,
    pub title: String,
    pub url: String,
    pub order_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Node {
    pub fn id(&self) -> &NodeId {
        match self {
            Node::Folder(f) => &f.id,
            Node::Bookmark(b) => &b.id,
        }
    }

    pub fn parent_id(&self) -> Option<&NodeId> {
        match self {
            Node::Folder(f) => f.parent_id.as_ref(),
            Node::Bookmark(b) => b.parent_id.as_ref(),
        }
    }

    pub fn order_key(&self) -> &str {
        match self {
            Node::Folder(f) => &f.order_key,
            Node::Bookmark(b) => &b.order_key,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Node::Folder(f) => &f.title,
            Node::Bookmark(b) => &b.title,
        }
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        match self {
            Node::Folder(f) => f.updated_at,
            Node::Bookmark(b) => b.updated_at,
        }
    }

    pub fn is_folder(&self) -> bool {
        matches!(self, Node::Folder(_))
    }

    pub fn set_parent(&mut self, parent_id: Option<NodeId>) {
        match self {
            Node::Folder(f) => f.parent_id = parent_id,
            Node::Bookmark(b) => b.parent_id = parent_id,
        }
    }

    pub fn set_order_key(&mut self, order_key: String) {
        match self {
            Node::Folder(f) => f.order_key = order_key,
            Node::Bookmark(b) => b.order_key = order_key,
        }
    }

    pub fn touch(&mut self, ts: DateTime<Utc>) {
        let updated_at = match self {
            Node::Folder(f) => &mut f.updated_at,
            Node::Bookmark(b) => &mut b.updated_at,
        };
        // updated_at is monotonically non-decreasing per node.
        if ts > *updated_at {
            *updated_at = ts;
        }
    }
}

/// Whether `url` is well-formed enough to accept into the tree.
///
/// Requires a scheme and a non-empty authority/path, not a full RFC 3986
/// parse — the tree store is not in the business of normalizing URLs, only
/// rejecting obvious garbage.
pub fn is_well_formed_url(url: &str) -> bool {
    match url.split_once("://") {
        Some((scheme, rest)) => !scheme.is_empty() && !rest.is_empty(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_validation() {
        assert!(is_well_formed_url("https://developer.mozilla.org"));
        assert!(!is_well_formed_url("not a url"));
        assert!(!is_well_formed_url("://missing-scheme"));
        assert!(!is_well_formed_url("https://"));
    }

    #[test]
    fn touch_is_monotonic() {
        let now = Utc::now();
        let mut f = Node::Folder(FolderNode {
            id: NodeId::from("f1"),
            parent_id: None,
            title: "Dev".into(),
            is_open: true,
            order_key: "V".into(),
            created_at: now,
            updated_at: now,
        });
        let earlier = now - chrono::Duration::seconds(10);
        f.touch(earlier);
        assert_eq!(f.updated_at(), now);
        let later = now + chrono::Duration::seconds(10);
        f.touch(later);
        assert_eq!(f.updated_at(), later);
    }
}
