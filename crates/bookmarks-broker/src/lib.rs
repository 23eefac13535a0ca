//! # bookmarks-broker
//!
//! The server half of the coordination core: the per-namespace SSE broker,
//! the operation applicator, and the `axum` HTTP surface that exposes both
//! to clients.

pub mod applicator;
pub mod broker;
pub mod error;
pub mod routes;
pub mod state;

pub use applicator::{ApplyOutcome, Applicator, AppliedResult, NamespaceSummary, SyncResponse};
pub use broker::{Broker, SubscribeReply};
pub use error::{BrokerError, BrokerResult};
pub use routes::router;
pub use state::AppState;
