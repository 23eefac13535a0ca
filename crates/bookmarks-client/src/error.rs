//! Client-side error taxonomy, one variant per component.

use bookmarks_core::{LogError, TreeError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned {status}: {body}")]
    ServerStatus { status: u16, body: String },

    #[error("tree error: {0}")]
    Tree(#[from] TreeError),

    #[error("log error: {0}")]
    Log(#[from] LogError),

    #[error("stream error: {0}")]
    Stream(String),

    #[error("namespace not connected: {0}")]
    NotConnected(String),
}

pub type ClientResult<T> = Result<T, ClientError>;
