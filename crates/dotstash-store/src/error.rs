// ABOUTME: Error type shared by every storage backend and auxiliary store.
// ABOUTME: Wraps io, json, and sqlite failures plus corruption and invalid-key conditions.

use std::path::PathBuf;

use dotstash_core::PathError;
use thiserror::Error;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("invalid key: {0}")]
    InvalidKey(#[from] PathError),

    #[error("{} is corrupt, refusing to overwrite it: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("cannot move '{from}' to '{to}': destination is inside the source")]
    InvalidMove { from: String, to: String },
}
