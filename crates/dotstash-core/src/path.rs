// ABOUTME: Dot-path parsing and prefix relationships for hierarchical keys like `server.prod.ip`.
// ABOUTME: Validates segments and enumerates ancestors so both backends apply identical edit rules.

use thiserror::Error;

/// Separator between the segments of a dot-path.
pub const SEPARATOR: char = '.';

/// Errors produced when a dot-path is malformed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("key must not be empty")]
    Empty,

    #[error("key '{0}' contains an empty segment")]
    EmptySegment(String),
}

/// Split a key into its segments, rejecting empty keys and empty segments.
pub fn segments(key: &str) -> Result<Vec<&str>, PathError> {
    if key.is_empty() {
        return Err(PathError::Empty);
    }
    let parts: Vec<&str> = key.split(SEPARATOR).collect();
    if parts.iter().any(|p| p.is_empty()) {
        return Err(PathError::EmptySegment(key.to_string()));
    }
    Ok(parts)
}

/// Validate a key without allocating its segments.
pub fn validate(key: &str) -> Result<(), PathError> {
    segments(key).map(|_| ())
}

/// Every strict ancestor of `key`, shortest first. `a.b.c` yields `a`, `a.b`.
pub fn ancestors(key: &str) -> Vec<&str> {
    key.char_indices()
        .filter(|(_, c)| *c == SEPARATOR)
        .map(|(i, _)| &key[..i])
        .filter(|prefix| !prefix.is_empty())
        .collect()
}

/// Join a parent path and a child segment. An empty parent yields the child.
pub fn join(parent: &str, child: &str) -> String {
    if parent.is_empty() {
        child.to_string()
    } else {
        format!("{parent}{SEPARATOR}{child}")
    }
}

/// True when `candidate` is `path` itself or lies underneath it.
pub fn is_self_or_descendant(candidate: &str, path: &str) -> bool {
    candidate == path || is_descendant(candidate, path)
}

/// True when `candidate` lies strictly underneath `path`.
pub fn is_descendant(candidate: &str, path: &str) -> bool {
    candidate.len() > path.len()
        && candidate.starts_with(path)
        && candidate[path.len()..].starts_with(SEPARATOR)
}

/// Strip `path.` from a descendant key, returning the relative remainder.
pub fn relative_to<'a>(candidate: &'a str, path: &str) -> Option<&'a str> {
    if is_descendant(candidate, path) {
        Some(&candidate[path.len() + 1..])
    } else {
        None
    }
}
