//! Error types for the broker and applicator (C4/C5).

use bookmarks_core::{LogError, TreeError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("tree error: {0}")]
    Tree(#[from] TreeError),

    #[error("log error: {0}")]
    Log(#[from] LogError),

    #[error("namespace not found: {0}")]
    NamespaceNotFound(String),

    #[error("node not found: {0}")]
    NodeNotFound(String),
}

pub type BrokerResult<T> = Result<T, BrokerError>;
