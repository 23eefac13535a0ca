//! # bookmarks-replica
//!
//! The optimistic local tree replica: the in-memory structure both the
//! broker and the client keep of one namespace's bookmarks tree, with
//! `apply`/`reconcile` semantics shared by both sides so a client-applied
//! operation and the eventual server-confirmed state converge to the same
//! tree.

pub mod tree;

pub use tree::TreeReplica;
