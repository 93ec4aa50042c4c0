// ABOUTME: Document backend: the whole store serialized as one pretty-printed JSON file.
// ABOUTME: Reads go through the mtime cache; writes mutate a copy, save atomically, and update the cache.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dotstash_core::value::{self, Document, FlatMap, Value};

use crate::atomic::write_atomic;
use crate::backend::KeyStore;
use crate::cache::MtimeCache;
use crate::error::StoreError;

/// What was found on disk at the last load.
#[derive(Debug, Clone, Default)]
struct Snapshot {
    doc: Document,
    /// Set when the file held content that could not be parsed.
    corrupt: Option<String>,
}

/// Stores the document as a single JSON file.
#[derive(Debug)]
pub struct DocumentBackend {
    path: PathBuf,
    cache: MtimeCache<Snapshot>,
}

impl DocumentBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: MtimeCache::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn snapshot(&self) -> Result<Arc<Snapshot>, StoreError> {
        self.cache.get_or_load(&self.path, || read_snapshot(&self.path))
    }

    /// A mutable copy of the document, refusing to proceed over a corrupt
    /// file so a damaged document is never silently replaced.
    fn load_for_write(&self) -> Result<Document, StoreError> {
        let snap = self.snapshot()?;
        if let Some(reason) = &snap.corrupt {
            return Err(StoreError::Corrupt {
                path: self.path.clone(),
                reason: reason.clone(),
            });
        }
        Ok(snap.doc.clone())
    }

    fn write(&self, doc: Document) -> Result<(), StoreError> {
        let mut json = serde_json::to_string_pretty(&doc)?;
        json.push('\n');
        write_atomic(&self.path, json.as_bytes())?;
        self.cache.store(&self.path, Snapshot { doc, corrupt: None })?;
        Ok(())
    }
}

fn read_snapshot(path: &Path) -> Result<Snapshot, StoreError> {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Snapshot::default()),
        Err(e) => return Err(e.into()),
    };
    if contents.trim().is_empty() {
        return Ok(Snapshot::default());
    }
    match value::parse_document(&contents) {
        Ok(doc) => Ok(Snapshot { doc, corrupt: None }),
        Err(e) => {
            tracing::warn!("{} is corrupt, reading it as empty: {}", path.display(), e);
            Ok(Snapshot {
                doc: Document::new(),
                corrupt: Some(e.to_string()),
            })
        }
    }
}

impl KeyStore for DocumentBackend {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(value::lookup(&self.snapshot()?.doc, key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut doc = self.load_for_write()?;
        value::insert_leaf(&mut doc, key, value.to_string())?;
        self.write(doc)
    }

    fn remove(&self, key: &str) -> Result<bool, StoreError> {
        let mut doc = self.load_for_write()?;
        if !value::remove(&mut doc, key) {
            return Ok(false);
        }
        self.write(doc)?;
        Ok(true)
    }

    fn rename(&self, from: &str, to: &str) -> Result<bool, StoreError> {
        let mut doc = self.load_for_write()?;
        let Some(node) = value::take(&mut doc, from) else {
            return Ok(false);
        };
        value::graft(&mut doc, to, node)?;
        self.write(doc)?;
        Ok(true)
    }

    fn flatten(&self) -> Result<FlatMap, StoreError> {
        Ok(value::flatten(&self.snapshot()?.doc))
    }

    fn load_all(&self) -> Result<Document, StoreError> {
        Ok(self.snapshot()?.doc.clone())
    }

    fn save_all(&self, doc: &Document) -> Result<(), StoreError> {
        self.write(doc.clone())
    }

    fn merge(&self, incoming: &Document) -> Result<(), StoreError> {
        let mut doc = self.load_for_write()?;
        for (key, leaf) in value::flatten(incoming) {
            value::insert_leaf(&mut doc, &key, leaf)?;
        }
        self.write(doc)
    }

    fn close(&self) {
        self.cache.clear();
    }
}
