// ABOUTME: Defines the Value sum type (Leaf or Branch) and the Document tree built from it.
// ABOUTME: Implements the tree-edit rules, flatten/unflatten, and JSON ingestion shared by every backend.

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

use crate::path::{self, PathError};

/// Children of a branch node, sorted by segment name.
pub type Branch = BTreeMap<String, Value>;

/// The root branch holding the whole store.
pub type Document = Branch;

/// Every leaf of a document keyed by its full dot-path.
pub type FlatMap = BTreeMap<String, String>;

/// A node in the document tree. A path is either a leaf or a parent, never both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Leaf(String),
    Branch(Branch),
}

/// Errors raised while turning raw JSON into a Document.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("document root must be a JSON object, found {0}")]
    NotAnObject(&'static str),
}

impl Value {
    pub fn leaf(value: impl Into<String>) -> Self {
        Value::Leaf(value.into())
    }

    pub fn as_branch(&self) -> Option<&Branch> {
        match self {
            Value::Leaf(_) => None,
            Value::Branch(children) => Some(children),
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Value::Leaf(_))
    }

    /// Convert arbitrary JSON into a Value. Strings become leaves, objects
    /// become branches, numbers and booleans keep their textual form. Nulls
    /// and empty objects carry no leaves and are dropped.
    pub fn from_json(json: serde_json::Value) -> Option<Self> {
        match json {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(Value::Leaf(s)),
            serde_json::Value::Bool(b) => Some(Value::Leaf(b.to_string())),
            serde_json::Value::Number(n) => Some(Value::Leaf(n.to_string())),
            serde_json::Value::Array(items) => {
                Some(Value::Leaf(serde_json::Value::Array(items).to_string()))
            }
            serde_json::Value::Object(map) => {
                let mut children = Branch::new();
                for (key, json) in map {
                    let Some(node) = Value::from_json(json) else {
                        continue;
                    };
                    if let Err(e) = graft_merged(&mut children, &key, node) {
                        tracing::warn!("skipping JSON key '{}': {}", key, e);
                    }
                }
                if children.is_empty() {
                    None
                } else {
                    Some(Value::Branch(children))
                }
            }
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Leaf(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Leaf(value)
    }
}

/// Build a Document from parsed JSON. The root must be an object.
pub fn document_from_json(json: serde_json::Value) -> Result<Document, DocumentError> {
    match json {
        serde_json::Value::Object(_) => match Value::from_json(json) {
            Some(Value::Branch(children)) => Ok(children),
            _ => Ok(Document::new()),
        },
        serde_json::Value::Null => Err(DocumentError::NotAnObject("null")),
        serde_json::Value::Bool(_) => Err(DocumentError::NotAnObject("a boolean")),
        serde_json::Value::Number(_) => Err(DocumentError::NotAnObject("a number")),
        serde_json::Value::String(_) => Err(DocumentError::NotAnObject("a string")),
        serde_json::Value::Array(_) => Err(DocumentError::NotAnObject("an array")),
    }
}

/// Parse serialized document text.
pub fn parse_document(text: &str) -> Result<Document, DocumentError> {
    let json: serde_json::Value = serde_json::from_str(text)?;
    document_from_json(json)
}

/// Look up the node at `key`. The empty key addresses the whole document;
/// an empty document or a malformed key is absent.
pub fn lookup(doc: &Document, key: &str) -> Option<Value> {
    if key.is_empty() {
        return (!doc.is_empty()).then(|| Value::Branch(doc.clone()));
    }
    let segs = path::segments(key).ok()?;
    let mut node = doc;
    let (last, parents) = segs.split_last()?;
    for seg in parents {
        match node.get(*seg)? {
            Value::Branch(children) => node = children,
            Value::Leaf(_) => return None,
        }
    }
    match node.get(*last)? {
        Value::Branch(children) if children.is_empty() => None,
        found => Some(found.clone()),
    }
}

/// Write a leaf at `key`, replacing any subtree there and turning any leaf
/// found at an ancestor into a branch.
pub fn insert_leaf(doc: &mut Document, key: &str, value: String) -> Result<(), PathError> {
    let segs = path::segments(key)?;
    insert_at(doc, &segs, value);
    Ok(())
}

fn insert_at(node: &mut Branch, segs: &[&str], value: String) {
    match segs {
        [] => {}
        [last] => {
            node.insert((*last).to_string(), Value::Leaf(value));
        }
        [head, rest @ ..] => {
            let child = node
                .entry((*head).to_string())
                .or_insert_with(|| Value::Branch(Branch::new()));
            if child.is_leaf() {
                *child = Value::Branch(Branch::new());
            }
            if let Value::Branch(children) = child {
                insert_at(children, rest, value);
            }
        }
    }
}

/// Detach and return the node at `key`, pruning ancestors left empty.
pub fn take(doc: &mut Document, key: &str) -> Option<Value> {
    let segs = path::segments(key).ok()?;
    take_at(doc, &segs)
}

fn take_at(node: &mut Branch, segs: &[&str]) -> Option<Value> {
    match segs {
        [] => None,
        [last] => node.remove(*last),
        [head, rest @ ..] => {
            let Some(Value::Branch(children)) = node.get_mut(*head) else {
                return None;
            };
            let taken = take_at(children, rest);
            if taken.is_some() && children.is_empty() {
                node.remove(*head);
            }
            taken
        }
    }
}

/// Remove the leaf or subtree at `key`. Returns whether anything was removed.
pub fn remove(doc: &mut Document, key: &str) -> bool {
    take(doc, key).is_some()
}

/// Place a whole node at `key` with the same eviction rules as `insert_leaf`.
pub fn graft(doc: &mut Document, key: &str, value: Value) -> Result<(), PathError> {
    path::validate(key)?;
    if !value.is_leaf() {
        take(doc, key);
    }
    graft_merged(doc, key, value)
}

/// Place `node` at `key`, nesting dotted keys and merging with whatever is
/// already there leaf by leaf.
fn graft_merged(doc: &mut Document, key: &str, node: Value) -> Result<(), PathError> {
    match node {
        Value::Leaf(v) => insert_leaf(doc, key, v),
        Value::Branch(children) => {
            path::validate(key)?;
            for (rel, v) in flatten(&children) {
                insert_leaf(doc, &path::join(key, &rel), v)?;
            }
            Ok(())
        }
    }
}

/// Flatten a branch into `{full.path: leaf}` pairs.
pub fn flatten(branch: &Branch) -> FlatMap {
    let mut out = FlatMap::new();
    flatten_into(branch, "", &mut out);
    out
}

fn flatten_into(branch: &Branch, prefix: &str, out: &mut FlatMap) {
    for (name, value) in branch {
        let full = path::join(prefix, name);
        match value {
            Value::Leaf(v) => {
                out.insert(full, v.clone());
            }
            Value::Branch(children) => flatten_into(children, &full, out),
        }
    }
}

/// Rebuild a document from flattened pairs. Pairs are applied in sorted order,
/// so a descendant always wins over a conflicting ancestor leaf. Malformed keys
/// are skipped.
pub fn unflatten<'a, I>(pairs: I) -> Document
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    let mut sorted: Vec<(&String, &String)> = pairs.into_iter().collect();
    sorted.sort();
    let mut doc = Document::new();
    for (key, value) in sorted {
        if let Err(e) = insert_leaf(&mut doc, key, value.clone()) {
            tracing::warn!("skipping malformed key while rebuilding document: {}", e);
        }
    }
    doc
}
