// ABOUTME: Error types for reference interpolation.
// ABOUTME: Each variant names the offending reference so authoring mistakes are easy to find.

use std::time::Duration;

use dotstash_store::StoreError;
use thiserror::Error;

/// Errors that can occur while expanding `${ref}` and `$(ref)` tokens.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("reference '{reference}' not found")]
    NotFound { reference: String },

    #[error("reference '{reference}' points at a subtree, not a value")]
    NotALeaf { reference: String },

    #[error("reference '{reference}' is encrypted and cannot be interpolated")]
    Encrypted { reference: String },

    #[error("circular reference: {}", chain.join(" -> "))]
    Circular { chain: Vec<String> },

    #[error("reference '{reference}' exceeds the maximum depth of {limit}")]
    DepthExceeded { reference: String, limit: usize },

    #[error("command '{path}' exited with status {code}")]
    CommandFailed {
        path: String,
        code: i32,
        stderr: String,
    },

    #[error("command '{path}' timed out after {}s", timeout.as_secs_f64())]
    CommandTimeout { path: String, timeout: Duration },

    #[error("command '{path}' could not be started: {source}")]
    Spawn {
        path: String,
        source: std::io::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}
