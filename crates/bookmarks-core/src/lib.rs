//! # bookmarks-core
//!
//! Shared data model, order-key allocation and the durable operation log
//! for the bookmarks tree real-time coordination core.
//!
//! This crate has no opinion about transport (HTTP/SSE) or process
//! topology (server vs. client) — those live in `bookmarks-broker` and
//! `bookmarks-client` respectively. It provides the vocabulary both sides
//! share: [`NodeId`]/[`Node`], [`OperationEnvelope`]/[`Op`], the order key
//! allocator, and the [`OperationLog`] trait with its two implementations.

pub mod config;
pub mod envelope;
pub mod error;
pub mod events;
pub mod ids;
pub mod log;
pub mod node;
pub mod order_key;

pub use config::{ReachabilityConfig, ReconnectConfig, SseConfig, SyncConfig};
pub use envelope::{EnvelopeStatus, Op, OperationEnvelope, Placement};
pub use error::{CoreError, CoreResult, LogError, OrderKeyError, SyncErrorKind, TreeError};
pub use events::{BrokerEvent, EventType};
pub use ids::{EnvelopeId, Namespace, NodeId, PortId, SubscriptionId};
pub use log::{InMemoryOperationLog, OperationLog, RedbOperationLog};
pub use node::{is_well_formed_url, BookmarkNode, FolderNode, Node};
pub use order_key::generate_key_between;
