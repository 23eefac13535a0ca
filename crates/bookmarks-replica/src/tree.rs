//! Local Tree Replica.
//!
//! Ownership lives with the flat node map, not with parent/child pointers.
//! The `children` index is a derived view rebuilt incrementally on every
//! mutation, kept in `order_key` order with `id` as tiebreaker.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::{instrument, trace};

use bookmarks_core::{
    generate_key_between, is_well_formed_url, BookmarkNode, EnvelopeId, FolderNode, Namespace,
    Node, NodeId, Op, Placement, TreeError,
};

/// The in-memory replica of one namespace's tree.
pub struct TreeReplica {
    namespace: Namespace,
    nodes: HashMap<NodeId, Node>,
    children: HashMap<NodeId, Vec<NodeId>>,
    /// The envelope that last wrote each node's mutable fields, used to
    /// break `update_node` ties when two envelopes share a `ts` — the
    /// higher envelope id wins.
    last_writer: HashMap<NodeId, EnvelopeId>,
}

impl TreeReplica {
    /// Create a replica with a freshly-minted root folder.
    pub fn new(namespace: Namespace, root_title: impl Into<String>) -> Self {
        let now = Utc::now();
        let root = Node::Folder(FolderNode {
            id: NodeId::root(),
            parent_id: None,
            title: root_title.into(),
            is_open: true,
            order_key: generate_key_between(None, None).unwrap(),
            created_at: now,
            updated_at: now,
        });
        let mut nodes = HashMap::new();
        nodes.insert(NodeId::root(), root);
        Self {
            namespace,
            nodes,
            children: HashMap::new(),
            last_writer: HashMap::new(),
        }
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn get(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Children of `parent_id`, in render order.
    pub fn children_of(&self, parent_id: &NodeId) -> &[NodeId] {
        self.children.get(parent_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// A snapshot of `root_id` and every descendant; each node's own
    /// children appear in render order.
    pub fn get_subtree(&self, root_id: &NodeId) -> Vec<Node> {
        let mut out = Vec::new();
        let Some(root) = self.nodes.get(root_id) else {
            return out;
        };
        out.push(root.clone());
        let mut frontier = vec![root_id.clone()];
        while let Some(parent) = frontier.pop() {
            for child_id in self.children_of(&parent).to_vec() {
                if let Some(node) = self.nodes.get(&child_id) {
                    out.push(node.clone());
                    frontier.push(child_id);
                }
            }
        }
        out
    }

    /// Like [`Self::get_subtree`], but only descends into folders that are
    /// `is_open` — a closed folder's own node is included, its children are
    /// not.
    pub fn get_subtree_respecting_open(&self, root_id: &NodeId) -> Vec<Node> {
        let mut out = Vec::new();
        let Some(root) = self.nodes.get(root_id) else {
            return out;
        };
        out.push(root.clone());
        let mut frontier = if matches!(root, Node::Folder(f) if f.is_open) {
            vec![root_id.clone()]
        } else {
            Vec::new()
        };
        while let Some(parent) = frontier.pop() {
            for child_id in self.children_of(&parent).to_vec() {
                let Some(node) = self.nodes.get(&child_id) else { continue };
                out.push(node.clone());
                if matches!(node, Node::Folder(f) if f.is_open) {
                    frontier.push(child_id);
                }
            }
        }
        out
    }

    fn insert_into_children(&mut self, parent_id: &NodeId, child_id: NodeId, order_key: &str) {
        let pos = {
            let siblings = self.children.get(parent_id).map(Vec::as_slice).unwrap_or(&[]);
            siblings
                .binary_search_by(|existing| {
                    let existing_key = self.nodes[existing].order_key();
                    existing_key
                        .cmp(order_key)
                        .then_with(|| existing.cmp(&child_id))
                })
                .unwrap_or_else(|p| p)
        };
        self.children.entry(parent_id.clone()).or_default().insert(pos, child_id);
    }

    fn remove_from_children(&mut self, parent_id: &NodeId, child_id: &NodeId) {
        if let Some(siblings) = self.children.get_mut(parent_id) {
            siblings.retain(|id| id != child_id);
        }
    }

    fn is_descendant_of(&self, candidate: &NodeId, ancestor: &NodeId) -> bool {
        let mut current = candidate.clone();
        loop {
            let Some(node) = self.nodes.get(&current) else {
                return false;
            };
            match node.parent_id() {
                Some(parent) if parent == ancestor => return true,
                Some(parent) => current = parent.clone(),
                None => return false,
            }
        }
    }

    fn resolve_placement(
        &self,
        parent_id: &NodeId,
        placement: Option<&Placement>,
        exclude: Option<&NodeId>,
    ) -> Result<String, TreeError> {
        let siblings: Vec<NodeId> = self
            .children_of(parent_id)
            .iter()
            .filter(|id| Some(*id) != exclude)
            .cloned()
            .collect();

        match placement {
            Some(Placement::OrderKey(key)) => Ok(key.clone()),
            Some(Placement::Index(idx)) => {
                let idx = (*idx).min(siblings.len());
                let left = idx
                    .checked_sub(1)
                    .and_then(|i| siblings.get(i))
                    .map(|id| self.nodes[id].order_key());
                let right = siblings.get(idx).map(|id| self.nodes[id].order_key());
                Ok(generate_key_between(left, right)?)
            }
            None => {
                let left = siblings.last().map(|id| self.nodes[id].order_key());
                Ok(generate_key_between(left, None)?)
            }
        }
    }

    /// Apply one operation, mutating the replica in place. On error the
    /// replica is left exactly as it was.
    ///
    /// Returns the post-image node, or `None` for `remove_node` (there is
    /// no post-image for a deleted node) and for a `move_node` that landed
    /// on an already-removed subtree (a no-op rather than an error).
    #[instrument(skip(self), fields(namespace = %self.namespace, op = op.kind()))]
    pub fn apply(
        &mut self,
        envelope_id: &EnvelopeId,
        op: &Op,
        ts: DateTime<Utc>,
    ) -> Result<Option<Node>, TreeError> {
        match op {
            Op::CreateFolder { id, parent_id, title, is_open, placement } => {
                let node = self.create_folder(id.clone(), parent_id.clone(), title, *is_open, placement.as_ref(), ts)?;
                Ok(Some(node))
            }
            Op::CreateBookmark { id, parent_id, title, url, placement } => {
                let node = self.create_bookmark(id.clone(), parent_id.clone(), title, url, placement.as_ref(), ts)?;
                Ok(Some(node))
            }
            Op::MoveNode { node_id, to_folder_id, placement } => {
                self.move_node(node_id, to_folder_id, placement.as_ref(), ts)
            }
            Op::UpdateNode { node_id, title, url } => {
                let node = self.update_node(envelope_id, node_id, title.as_deref(), url.as_deref(), ts)?;
                Ok(Some(node))
            }
            Op::ToggleFolder { folder_id, open } => {
                let node = self.toggle_folder(folder_id, *open, ts)?;
                Ok(Some(node))
            }
            Op::RemoveNode { node_id } => {
                self.remove_node(node_id)?;
                Ok(None)
            }
        }
    }

    fn require_folder(&self, id: &NodeId) -> Result<(), TreeError> {
        match self.nodes.get(id) {
            Some(Node::Folder(_)) => Ok(()),
            Some(_) => Err(TreeError::NotAFolder(id.to_string())),
            None => Err(TreeError::NotFound(id.to_string())),
        }
    }

    fn create_folder(
        &mut self,
        id: Option<NodeId>,
        parent_id: Option<NodeId>,
        title: &str,
        is_open: Option<bool>,
        placement: Option<&Placement>,
        ts: DateTime<Utc>,
    ) -> Result<Node, TreeError> {
        let parent = parent_id.unwrap_or_else(NodeId::root);
        self.require_folder(&parent)?;
        let order_key = self.resolve_placement(&parent, placement, None)?;
        let id = id.unwrap_or_else(NodeId::generate);
        let node = Node::Folder(FolderNode {
            id: id.clone(),
            parent_id: Some(parent.clone()),
            title: title.to_string(),
            is_open: is_open.unwrap_or(true),
            order_key: order_key.clone(),
            created_at: ts,
            updated_at: ts,
        });
        self.nodes.insert(id.clone(), node.clone());
        self.insert_into_children(&parent, id, &order_key);
        Ok(node)
    }

    fn create_bookmark(
        &mut self,
        id: Option<NodeId>,
        parent_id: Option<NodeId>,
        title: &str,
        url: &str,
        placement: Option<&Placement>,
        ts: DateTime<Utc>,
    ) -> Result<Node, TreeError> {
        if !is_well_formed_url(url) {
            return Err(TreeError::MalformedUrl(url.to_string()));
        }
        let parent = parent_id.unwrap_or_else(NodeId::root);
        self.require_folder(&parent)?;
        let order_key = self.resolve_placement(&parent, placement, None)?;
        let id = id.unwrap_or_else(NodeId::generate);
        let node = Node::Bookmark(BookmarkNode {
            id: id.clone(),
            parent_id: Some(parent.clone()),
            title: title.to_string(),
            url: url.to_string(),
            order_key: order_key.clone(),
            created_at: ts,
            updated_at: ts,
        });
        self.nodes.insert(id.clone(), node.clone());
        self.insert_into_children(&parent, id, &order_key);
        Ok(node)
    }

    fn move_node(
        &mut self,
        node_id: &NodeId,
        to_folder_id: &NodeId,
        placement: Option<&Placement>,
        ts: DateTime<Utc>,
    ) -> Result<Option<Node>, TreeError> {
        if node_id.is_root() {
            return Err(TreeError::RootImmutable);
        }
        if !self.nodes.contains_key(node_id) {
            // Arrived after the node's subtree was already removed: no-op.
            trace!(node = %node_id, "move_node targets removed subtree, skipping");
            return Ok(None);
        }
        self.require_folder(to_folder_id)?;
        if to_folder_id == node_id || self.is_descendant_of(to_folder_id, node_id) {
            return Err(TreeError::Cycle);
        }

        let old_parent = self.nodes[node_id].parent_id().cloned();
        let order_key = self.resolve_placement(to_folder_id, placement, Some(node_id))?;

        if let Some(old_parent) = &old_parent {
            self.remove_from_children(old_parent, node_id);
        }
        let node = self.nodes.get_mut(node_id).expect("checked above");
        node.set_parent(Some(to_folder_id.clone()));
        node.set_order_key(order_key.clone());
        node.touch(ts);
        let node = node.clone();
        self.insert_into_children(to_folder_id, node_id.clone(), &order_key);
        Ok(Some(node))
    }

    fn update_node(
        &mut self,
        envelope_id: &EnvelopeId,
        node_id: &NodeId,
        title: Option<&str>,
        url: Option<&str>,
        ts: DateTime<Utc>,
    ) -> Result<Node, TreeError> {
        if let Some(url) = url {
            if !is_well_formed_url(url) {
                return Err(TreeError::MalformedUrl(url.to_string()));
            }
        }
        let node = self
            .nodes
            .get(node_id)
            .ok_or_else(|| TreeError::NotFound(node_id.to_string()))?;

        // Field-wise last-writer-wins: apply only if this write is at least
        // as new as the current one, breaking ties on envelope id.
        let should_apply = match (node.updated_at(), self.last_writer.get(node_id)) {
            (current_ts, Some(last_id)) if ts == current_ts => envelope_id > last_id,
            (current_ts, _) => ts >= current_ts,
        };

        if should_apply {
            let node = self.nodes.get_mut(node_id).unwrap();
            match (node, title, url) {
                (Node::Folder(f), Some(t), _) => f.title = t.to_string(),
                (Node::Bookmark(b), Some(t), Some(u)) => {
                    b.title = t.to_string();
                    b.url = u.to_string();
                }
                (Node::Bookmark(b), Some(t), None) => b.title = t.to_string(),
                (Node::Bookmark(b), None, Some(u)) => b.url = u.to_string(),
                _ => {}
            }
            let node = self.nodes.get_mut(node_id).unwrap();
            node.touch(ts);
            self.last_writer.insert(node_id.clone(), envelope_id.clone());
        }

        Ok(self.nodes[node_id].clone())
    }

    fn toggle_folder(
        &mut self,
        folder_id: &NodeId,
        open: Option<bool>,
        ts: DateTime<Utc>,
    ) -> Result<Node, TreeError> {
        let node = self
            .nodes
            .get_mut(folder_id)
            .ok_or_else(|| TreeError::NotFound(folder_id.to_string()))?;
        match node {
            Node::Folder(f) => f.is_open = open.unwrap_or(!f.is_open),
            _ => return Err(TreeError::NotAFolder(folder_id.to_string())),
        }
        node.touch(ts);
        Ok(self.nodes[folder_id].clone())
    }

    fn remove_node(&mut self, node_id: &NodeId) -> Result<(), TreeError> {
        if node_id.is_root() {
            return Err(TreeError::RootImmutable);
        }
        if !self.nodes.contains_key(node_id) {
            return Err(TreeError::NotFound(node_id.to_string()));
        }
        let mut to_remove = vec![node_id.clone()];
        let mut stack = vec![node_id.clone()];
        while let Some(id) = stack.pop() {
            for child in self.children_of(&id).to_vec() {
                to_remove.push(child.clone());
                stack.push(child);
            }
        }
        let parent = self.nodes[node_id].parent_id().cloned();
        for id in &to_remove {
            self.nodes.remove(id);
            self.children.remove(id);
            self.last_writer.remove(id);
        }
        if let Some(parent) = parent {
            self.remove_from_children(&parent, node_id);
        }
        Ok(())
    }

    /// Replace server-authoritative nodes, preserving any node whose
    /// originating op is still `pending`.
    pub fn reconcile(&mut self, server_nodes: HashMap<NodeId, Node>, pending_ids: &HashSet<NodeId>) {
        for (id, node) in server_nodes {
            if pending_ids.contains(&id) {
                continue;
            }
            self.nodes.insert(id, node);
        }
        self.rebuild_children_index();
    }

    /// Upsert one server-authoritative node that arrived via an
    /// application event rather than through `reconcile`'s batch path,
    /// skipping it if a still-pending envelope targets this node.
    pub fn upsert_remote_node(&mut self, node: Node, pending_ids: &HashSet<NodeId>) {
        if pending_ids.contains(node.id()) {
            return;
        }
        self.nodes.insert(node.id().clone(), node);
        self.rebuild_children_index();
    }

    /// Remove one server-authoritative node (and its subtree, if any)
    /// following an `item_deleted` application event, skipping it if a
    /// still-pending envelope targets this node.
    pub fn remove_remote_node(&mut self, node_id: &NodeId, pending_ids: &HashSet<NodeId>) {
        if pending_ids.contains(node_id) {
            return;
        }
        let _ = self.remove_node(node_id);
    }

    /// Rewrite temp node ids (and any `parent_id` referencing them) to the
    /// server-assigned real ids.
    pub fn remap_ids(&mut self, mappings: &HashMap<NodeId, NodeId>) {
        if mappings.is_empty() {
            return;
        }
        let mut remapped = HashMap::with_capacity(self.nodes.len());
        for (id, mut node) in self.nodes.drain() {
            let new_id = mappings.get(&id).cloned().unwrap_or(id);
            if let Some(old_parent) = node.parent_id().cloned() {
                if let Some(real_parent) = mappings.get(&old_parent) {
                    node.set_parent(Some(real_parent.clone()));
                }
            }
            match &mut node {
                Node::Folder(f) => f.id = new_id.clone(),
                Node::Bookmark(b) => b.id = new_id.clone(),
            }
            remapped.insert(new_id, node);
        }
        self.nodes = remapped;
        self.rebuild_children_index();
    }

    fn rebuild_children_index(&mut self) {
        self.children.clear();
        let mut ids: Vec<NodeId> = self.nodes.keys().cloned().collect();
        ids.sort();
        for id in ids {
            if let Some(parent) = self.nodes[&id].parent_id().cloned() {
                let order_key = self.nodes[&id].order_key().to_string();
                self.insert_into_children(&parent, id, &order_key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bookmarks_core::EnvelopeId;

    fn env_id() -> EnvelopeId {
        EnvelopeId::generate_temp()
    }

    #[test]
    fn create_folder_under_root() {
        let mut tree = TreeReplica::new(Namespace::from("default"), "Root");
        let node = tree
            .apply(
                &env_id(),
                &Op::CreateFolder {
                    id: Some(NodeId::from("f1")),
                    parent_id: Some(NodeId::root()),
                    title: "Dev".into(),
                    is_open: None,
                    placement: None,
                },
                Utc::now(),
            )
            .unwrap()
            .unwrap();
        assert_eq!(node.id(), &NodeId::from("f1"));
        assert_eq!(tree.children_of(&NodeId::root()), &[NodeId::from("f1")]);
    }

    #[test]
    fn malformed_url_rejected_without_mutation() {
        let mut tree = TreeReplica::new(Namespace::from("default"), "Root");
        let err = tree
            .apply(
                &env_id(),
                &Op::CreateBookmark {
                    id: Some(NodeId::from("b1")),
                    parent_id: None,
                    title: "bad".into(),
                    url: "not-a-url".into(),
                    placement: None,
                },
                Utc::now(),
            )
            .unwrap_err();
        assert_eq!(err, TreeError::MalformedUrl("not-a-url".into()));
        assert!(!tree.contains(&NodeId::from("b1")));
    }

    #[test]
    fn move_under_own_descendant_is_conflict() {
        let mut tree = TreeReplica::new(Namespace::from("default"), "Root");
        let ts = Utc::now();
        tree.apply(&env_id(), &Op::CreateFolder { id: Some(NodeId::from("f1")), parent_id: None, title: "A".into(), is_open: None, placement: None }, ts).unwrap();
        tree.apply(&env_id(), &Op::CreateFolder { id: Some(NodeId::from("f2")), parent_id: Some(NodeId::from("f1")), title: "B".into(), is_open: None, placement: None }, ts).unwrap();

        let err = tree
            .apply(
                &env_id(),
                &Op::MoveNode { node_id: NodeId::from("f1"), to_folder_id: NodeId::from("f2"), placement: None },
                ts,
            )
            .unwrap_err();
        assert_eq!(err, TreeError::Cycle);
        // replica unchanged: f1 still under root
        assert_eq!(tree.get(&NodeId::from("f1")).unwrap().parent_id(), Some(&NodeId::root()));
    }

    #[test]
    fn remove_then_move_descendant_is_noop() {
        let mut tree = TreeReplica::new(Namespace::from("default"), "Root");
        let ts = Utc::now();
        tree.apply(&env_id(), &Op::CreateFolder { id: Some(NodeId::from("f1")), parent_id: None, title: "A".into(), is_open: None, placement: None }, ts).unwrap();
        tree.apply(&env_id(), &Op::RemoveNode { node_id: NodeId::from("f1") }, ts).unwrap();

        let result = tree
            .apply(
                &env_id(),
                &Op::MoveNode { node_id: NodeId::from("f1"), to_folder_id: NodeId::root(), placement: None },
                ts,
            )
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn update_node_last_writer_wins_by_ts() {
        let mut tree = TreeReplica::new(Namespace::from("default"), "Root");
        let t0 = Utc::now();
        tree.apply(&env_id(), &Op::CreateFolder { id: Some(NodeId::from("f1")), parent_id: None, title: "A".into(), is_open: None, placement: None }, t0).unwrap();

        let later = t0 + chrono::Duration::seconds(5);
        let earlier = t0 - chrono::Duration::seconds(5);

        tree.apply(&env_id(), &Op::UpdateNode { node_id: NodeId::from("f1"), title: Some("Later".into()), url: None }, later).unwrap();
        tree.apply(&env_id(), &Op::UpdateNode { node_id: NodeId::from("f1"), title: Some("Earlier".into()), url: None }, earlier).unwrap();

        assert_eq!(tree.get(&NodeId::from("f1")).unwrap().title(), "Later");
    }

    #[test]
    fn children_ordered_by_order_key() {
        let mut tree = TreeReplica::new(Namespace::from("default"), "Root");
        let ts = Utc::now();
        tree.apply(&env_id(), &Op::CreateFolder { id: Some(NodeId::from("f1")), parent_id: None, title: "A".into(), is_open: None, placement: Some(Placement::OrderKey("M".into())) }, ts).unwrap();
        tree.apply(&env_id(), &Op::CreateFolder { id: Some(NodeId::from("f2")), parent_id: None, title: "B".into(), is_open: None, placement: Some(Placement::OrderKey("A".into())) }, ts).unwrap();
        let children = tree.children_of(&NodeId::root());
        assert_eq!(children, &[NodeId::from("f2"), NodeId::from("f1")]);
    }

    #[test]
    fn remap_ids_rewrites_id_and_parent_references() {
        let mut tree = TreeReplica::new(Namespace::from("default"), "Root");
        let ts = Utc::now();
        let temp_folder = NodeId::from("temp_1");
        let temp_bookmark = NodeId::from("temp_2");
        tree.apply(&env_id(), &Op::CreateFolder { id: Some(temp_folder.clone()), parent_id: None, title: "A".into(), is_open: None, placement: None }, ts).unwrap();
        tree.apply(&env_id(), &Op::CreateBookmark { id: Some(temp_bookmark.clone()), parent_id: Some(temp_folder.clone()), title: "MDN".into(), url: "https://developer.mozilla.org".into(), placement: None }, ts).unwrap();

        let mut mappings = HashMap::new();
        mappings.insert(temp_folder.clone(), NodeId::from("R1"));
        mappings.insert(temp_bookmark.clone(), NodeId::from("R2"));
        tree.remap_ids(&mappings);

        assert!(tree.get(&temp_folder).is_none());
        assert!(tree.get(&NodeId::from("R1")).is_some());
        let bookmark = tree.get(&NodeId::from("R2")).unwrap();
        assert_eq!(bookmark.parent_id(), Some(&NodeId::from("R1")));
        assert_eq!(tree.children_of(&NodeId::from("R1")), &[NodeId::from("R2")]);
    }
}
