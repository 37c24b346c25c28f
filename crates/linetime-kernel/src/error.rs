//! Error types for the session layer.

use std::path::PathBuf;
use std::time::Duration;

use linetime_history::HistoryError;
use linetime_types::{BlockId, RequestId, SessionId};

/// Errors surfaced at the session boundary.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    #[error(transparent)]
    History(#[from] HistoryError),

    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("request needs a session id")]
    MissingSession,

    #[error("block not found in session: {0}")]
    BlockNotFound(BlockId),

    #[error("not a document root: {0}")]
    NotARoot(BlockId),

    #[error("{0} is not handled at this level")]
    Misrouted(&'static str),

    #[error("file in use by another session: {}", .0.display())]
    FileInUse(PathBuf),

    #[error("request {request} did not complete within {waited:?}")]
    CausalTimeout { request: RequestId, waited: Duration },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("store writer has stopped")]
    StoreClosed,

    #[error("{} store write(s) failed: {}", .0.len(), .0.join("; "))]
    Durability(Vec<String>),

    #[error("config error: {0}")]
    Config(String),
}
