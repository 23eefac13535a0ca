//! Error types for the bookmarks sync core

use thiserror::Error;

/// Top-level error type for `bookmarks-core`
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("order key error: {0}")]
    OrderKey(#[from] OrderKeyError),

    #[error("tree error: {0}")]
    Tree(#[from] TreeError),

    #[error("log error: {0}")]
    Log(#[from] LogError),
}

/// Errors raised by the order key allocator
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OrderKeyError {
    /// Caller passed `left >= right`, or otherwise gave operands with no
    /// room between them.
    #[error("invalid order: left must be strictly less than right")]
    InvalidOrder,
}

/// Errors raised while mutating the local tree replica
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TreeError {
    #[error("node not found: {0}")]
    NotFound(String),

    #[error("node is not a folder: {0}")]
    NotAFolder(String),

    #[error("operation would create a cycle")]
    Cycle,

    #[error("cannot move or remove the root node")]
    RootImmutable,

    #[error("malformed url: {0}")]
    MalformedUrl(String),

    #[error("order key error: {0}")]
    OrderKey(#[from] OrderKeyError),
}

/// Errors raised by the durable operation log
#[derive(Debug, Error)]
pub enum LogError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("envelope not found: {0}")]
    NotFound(String),
}

impl From<redb::Error> for LogError {
    fn from(e: redb::Error) -> Self {
        LogError::Storage(e.to_string())
    }
}

impl From<redb::DatabaseError> for LogError {
    fn from(e: redb::DatabaseError) -> Self {
        LogError::Storage(e.to_string())
    }
}

impl From<redb::TransactionError> for LogError {
    fn from(e: redb::TransactionError) -> Self {
        LogError::Storage(e.to_string())
    }
}

impl From<redb::TableError> for LogError {
    fn from(e: redb::TableError) -> Self {
        LogError::Storage(e.to_string())
    }
}

impl From<redb::StorageError> for LogError {
    fn from(e: redb::StorageError) -> Self {
        LogError::Storage(e.to_string())
    }
}

impl From<redb::CommitError> for LogError {
    fn from(e: redb::CommitError) -> Self {
        LogError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for LogError {
    fn from(e: serde_json::Error) -> Self {
        LogError::Serialization(e.to_string())
    }
}

/// The outcome classification used when an envelope fails to apply.
///
/// Distinct from the `thiserror` types above: this classifies the *result*
/// of applying an envelope, carried on `OperationEnvelope::status` /
/// surfaced to `syncStatus`, not a library-internal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncErrorKind {
    /// Envelope/op shape invalid. Not retried.
    Validation,
    /// Referent missing, cycle, or wrong kind. Not retried.
    Conflict,
    /// Network/timeout/5xx. Retried up to `maxRetries` with backoff.
    Transient,
    /// Non-validation 4xx from server. Not retried.
    Permanent,
    /// Persistent-store corruption. Surfaced; recovery via database reset.
    Fatal,
}

impl SyncErrorKind {
    /// Whether an envelope that failed with this kind should be retried.
    pub fn is_retryable(self) -> bool {
        matches!(self, SyncErrorKind::Transient)
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
