// ABOUTME: A small JSON object on disk (`{"key": value}`) behind an mtime cache.
// ABOUTME: Saves sorted, atomically, and write-through; tolerates missing, empty, or truncated files.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::atomic::write_atomic;
use crate::cache::MtimeCache;
use crate::error::StoreError;

/// A persisted string-keyed map.
#[derive(Debug)]
pub struct MapFile<V> {
    path: PathBuf,
    cache: MtimeCache<BTreeMap<String, V>>,
}

impl<V> MapFile<V>
where
    V: Clone + PartialEq + Serialize + DeserializeOwned,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: MtimeCache::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Arc<BTreeMap<String, V>>, StoreError> {
        self.cache.get_or_load(&self.path, || read_map(&self.path))
    }

    pub fn save(&self, map: BTreeMap<String, V>) -> Result<(), StoreError> {
        let mut json = serde_json::to_string_pretty(&map)?;
        json.push('\n');
        write_atomic(&self.path, json.as_bytes())?;
        self.cache.store(&self.path, map)?;
        Ok(())
    }

    /// Load, apply `edit`, and save only if the map actually changed.
    pub fn update<R>(
        &self,
        edit: impl FnOnce(&mut BTreeMap<String, V>) -> R,
    ) -> Result<R, StoreError> {
        let current = self.load()?;
        let mut next = (*current).clone();
        let result = edit(&mut next);
        if next != *current {
            self.save(next)?;
        }
        Ok(result)
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}

fn read_map<V: DeserializeOwned>(path: &Path) -> Result<BTreeMap<String, V>, StoreError> {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => return Err(e.into()),
    };
    if contents.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    match serde_json::from_str(&contents) {
        Ok(map) => Ok(map),
        // A half-written file from an interrupted editor session.
        Err(e) if e.is_eof() => {
            tracing::debug!("{} is truncated, treating as empty", path.display());
            Ok(BTreeMap::new())
        }
        Err(e) => {
            tracing::warn!("cannot parse {}, treating as empty: {}", path.display(), e);
            Ok(BTreeMap::new())
        }
    }
}
