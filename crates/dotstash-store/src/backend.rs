// ABOUTME: The KeyStore trait implemented by the document and relational backends.
// ABOUTME: Both apply the same tree-edit rules so callers cannot tell them apart.

use dotstash_core::{Document, FlatMap, Value};

use crate::error::StoreError;

/// Path-addressed storage over the whole document.
///
/// Keys passed to mutating methods are already validated by the engine.
pub trait KeyStore {
    /// The leaf at `key`, the branch under it, or `None`. The empty key
    /// returns the whole document.
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Write a leaf, evicting the subtree at `key` and any ancestor leaf.
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Delete the leaf or subtree at `key`; report whether anything went.
    fn remove(&self, key: &str) -> Result<bool, StoreError>;

    /// Move the node at `from` to `to` in a single write.
    fn rename(&self, from: &str, to: &str) -> Result<bool, StoreError>;

    fn flatten(&self) -> Result<FlatMap, StoreError>;

    fn load_all(&self) -> Result<Document, StoreError>;

    /// Replace the entire store with `doc`.
    fn save_all(&self, doc: &Document) -> Result<(), StoreError>;

    /// Apply every leaf of `doc` as a `set`, in one write.
    fn merge(&self, doc: &Document) -> Result<(), StoreError>;

    /// Release handles and cached state.
    fn close(&self);
}
