// ABOUTME: The set of paths that require confirmation before their command is executed.
// ABOUTME: Persisted as `{"path": true}` in confirm.json with the same caching as the alias file.

use std::path::PathBuf;

use dotstash_core::path;

use crate::error::StoreError;
use crate::mapfile::MapFile;

#[derive(Debug)]
pub struct ConfirmStore {
    file: MapFile<bool>,
}

impl ConfirmStore {
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self {
            file: MapFile::new(file),
        }
    }

    pub fn requires_confirmation(&self, path: &str) -> Result<bool, StoreError> {
        Ok(self.file.load()?.get(path).copied().unwrap_or(false))
    }

    pub fn add(&self, key: &str) -> Result<(), StoreError> {
        path::validate(key)?;
        self.file.update(|map| {
            map.insert(key.to_string(), true);
        })
    }

    pub fn remove(&self, key: &str) -> Result<bool, StoreError> {
        self.file.update(|map| map.remove(key).is_some())
    }

    /// Flagged paths, sorted.
    pub fn list(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .file
            .load()?
            .iter()
            .filter(|(_, flagged)| **flagged)
            .map(|(key, _)| key.clone())
            .collect())
    }

    /// Drop the flag on `key` and on everything underneath it.
    pub fn remove_for_path(&self, key: &str) -> Result<usize, StoreError> {
        self.file.update(|map| {
            let before = map.len();
            map.retain(|flagged, _| !path::is_self_or_descendant(flagged, key));
            before - map.len()
        })
    }

    pub fn clear_cache(&self) {
        self.file.clear_cache();
    }
}
