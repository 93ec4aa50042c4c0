// ABOUTME: Alias table mapping short names to canonical dot-paths.
// ABOUTME: Lives in aliases.json or in the SQLite aliases table, following the active backend.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use dotstash_core::{BackendKind, BackendSelector, path};

use crate::error::StoreError;
use crate::mapfile::MapFile;
use crate::sqlite::RelationalBackend;

/// Name -> target path table.
pub struct AliasStore {
    selector: Arc<dyn BackendSelector>,
    file: MapFile<String>,
    relational: Arc<RelationalBackend>,
}

impl AliasStore {
    pub fn new(
        selector: Arc<dyn BackendSelector>,
        file: impl Into<PathBuf>,
        relational: Arc<RelationalBackend>,
    ) -> Self {
        Self {
            selector,
            file: MapFile::new(file),
            relational,
        }
    }

    /// All aliases, sorted by name.
    pub fn list(&self) -> Result<BTreeMap<String, String>, StoreError> {
        match self.selector.current() {
            BackendKind::Json => Ok((*self.file.load()?).clone()),
            BackendKind::Sqlite => self.relational.load_aliases(),
        }
    }

    pub fn get(&self, name: &str) -> Result<Option<String>, StoreError> {
        match self.selector.current() {
            BackendKind::Json => Ok(self.file.load()?.get(name).cloned()),
            BackendKind::Sqlite => Ok(self.relational.load_aliases()?.remove(name)),
        }
    }

    /// The target of `name` if it is an alias, otherwise `name` itself, so
    /// callers may pass either form.
    pub fn resolve(&self, name: &str) -> Result<String, StoreError> {
        Ok(self.get(name)?.unwrap_or_else(|| name.to_string()))
    }

    /// Point `name` at `target`, replacing any previous target.
    pub fn set(&self, name: &str, target: &str) -> Result<(), StoreError> {
        path::validate(name)?;
        path::validate(target)?;
        match self.selector.current() {
            BackendKind::Json => self.file.update(|map| {
                map.insert(name.to_string(), target.to_string());
            }),
            BackendKind::Sqlite => self.relational.upsert_alias(name, target),
        }
    }

    pub fn remove(&self, name: &str) -> Result<bool, StoreError> {
        match self.selector.current() {
            BackendKind::Json => self.file.update(|map| map.remove(name).is_some()),
            BackendKind::Sqlite => self.relational.delete_alias(name),
        }
    }

    /// Names currently pointing exactly at `target`.
    pub fn names_for_target(&self, target: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|(_, t)| t == target)
            .map(|(name, _)| name)
            .collect())
    }

    /// Drop every alias whose target is `path` or lies underneath it.
    pub fn remove_for_path(&self, path: &str) -> Result<usize, StoreError> {
        match self.selector.current() {
            BackendKind::Json => self.file.update(|map| {
                let before = map.len();
                map.retain(|_, target| !path::is_self_or_descendant(target, path));
                before - map.len()
            }),
            BackendKind::Sqlite => self.relational.delete_aliases_for_path(path),
        }
    }

    pub fn clear_cache(&self) {
        self.file.clear_cache();
    }
}
