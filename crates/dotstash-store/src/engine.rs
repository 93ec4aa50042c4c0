// ABOUTME: StorageEngine facade: picks the backend on every call and exposes path-addressed operations.
// ABOUTME: Owns the alias and confirm stores so key removal cascades to them in exactly one place.

use std::sync::Arc;

use dotstash_core::value::{Document, FlatMap, Value};
use dotstash_core::{BackendKind, BackendSelector, StashConfig, path};

use crate::aliases::AliasStore;
use crate::backend::KeyStore;
use crate::confirm::ConfirmStore;
use crate::document::DocumentBackend;
use crate::error::StoreError;
use crate::sqlite::RelationalBackend;

/// How `import` combines incoming data with what is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportMode {
    /// Replace the whole store.
    Replace,
    /// Apply each incoming leaf as a `set`.
    Merge,
}

/// Backend-independent access to the key space.
pub struct StorageEngine {
    selector: Arc<dyn BackendSelector>,
    document: DocumentBackend,
    relational: Arc<RelationalBackend>,
    aliases: AliasStore,
    confirm: ConfirmStore,
}

impl StorageEngine {
    /// Engine over `config`'s layout, choosing the backend from its settings file.
    pub fn open(config: &StashConfig) -> Self {
        Self::with_selector(config, config.selector())
    }

    pub fn with_selector(config: &StashConfig, selector: impl BackendSelector + 'static) -> Self {
        let selector: Arc<dyn BackendSelector> = Arc::new(selector);
        let relational = Arc::new(RelationalBackend::new(&config.database_file));
        Self {
            aliases: AliasStore::new(
                Arc::clone(&selector),
                &config.aliases_file,
                Arc::clone(&relational),
            ),
            confirm: ConfirmStore::new(&config.confirm_file),
            document: DocumentBackend::new(&config.data_file),
            relational,
            selector,
        }
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.selector.current()
    }

    fn backend(&self) -> &dyn KeyStore {
        match self.selector.current() {
            BackendKind::Json => &self.document,
            BackendKind::Sqlite => self.relational.as_ref(),
        }
    }

    pub fn aliases(&self) -> &AliasStore {
        &self.aliases
    }

    pub fn confirm(&self) -> &ConfirmStore {
        &self.confirm
    }

    /// Leaf or branch at `key`; `""` is the whole document.
    pub fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        self.backend().get(key)
    }

    pub fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        path::validate(key)?;
        self.backend().set(key, value)
    }

    /// Delete the leaf or subtree at `key`, then drop aliases and confirm
    /// flags that pointed into it.
    pub fn remove(&self, key: &str) -> Result<bool, StoreError> {
        path::validate(key)?;
        let removed = self.backend().remove(key)?;
        if removed {
            self.cascade(key)?;
        }
        Ok(removed)
    }

    /// Move the node at `from` to `to`. References to `from` are dropped, as
    /// on removal.
    pub fn rename(&self, from: &str, to: &str) -> Result<bool, StoreError> {
        path::validate(from)?;
        path::validate(to)?;
        if path::is_self_or_descendant(to, from) {
            return Err(StoreError::InvalidMove {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        let moved = self.backend().rename(from, to)?;
        if moved {
            self.cascade(from)?;
        }
        Ok(moved)
    }

    fn cascade(&self, key: &str) -> Result<(), StoreError> {
        let aliases = self.aliases.remove_for_path(key)?;
        let flags = self.confirm.remove_for_path(key)?;
        if aliases > 0 || flags > 0 {
            tracing::debug!(
                "removing '{}' dropped {} aliases and {} confirm flags",
                key,
                aliases,
                flags
            );
        }
        Ok(())
    }

    pub fn flatten(&self) -> Result<FlatMap, StoreError> {
        self.backend().flatten()
    }

    pub fn load_all(&self) -> Result<Document, StoreError> {
        self.backend().load_all()
    }

    pub fn save_all(&self, doc: &Document) -> Result<(), StoreError> {
        self.backend().save_all(doc)
    }

    pub fn import(&self, doc: &Document, mode: ImportMode) -> Result<(), StoreError> {
        match mode {
            ImportMode::Replace => self.backend().save_all(doc),
            ImportMode::Merge => self.backend().merge(doc),
        }
    }

    /// Entries whose path or value contains `needle`, ignoring case.
    pub fn search(&self, needle: &str) -> Result<FlatMap, StoreError> {
        let needle = needle.to_lowercase();
        Ok(self
            .flatten()?
            .into_iter()
            .filter(|(key, leaf)| {
                key.to_lowercase().contains(&needle) || leaf.to_lowercase().contains(&needle)
            })
            .collect())
    }

    /// Release the database connection and forget cached files. Required
    /// before another process takes over the SQLite file.
    pub fn close(&self) {
        self.relational.close();
        self.document.close();
        self.aliases.clear_cache();
        self.confirm.clear_cache();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    fn engine(dir: &TempDir, kind: BackendKind) -> StorageEngine {
        StorageEngine::with_selector(&StashConfig::in_dir(dir.path()), kind)
    }

    /// Selector flipped at runtime, standing in for a settings change.
    struct Switch(AtomicBool);

    impl BackendSelector for Switch {
        fn current(&self) -> BackendKind {
            if self.0.load(Ordering::SeqCst) {
                BackendKind::Sqlite
            } else {
                BackendKind::Json
            }
        }
    }

    #[test]
    fn server_scenario() {
        for kind in [BackendKind::Json, BackendKind::Sqlite] {
            let dir = TempDir::new().unwrap();
            let store = engine(&dir, kind);

            store.set("server.ip", "1.2.3.4").unwrap();
            store.set("server.port", "22").unwrap();
            let server = store.get("server").unwrap().unwrap();
            let children = server.as_branch().unwrap();
            assert_eq!(children.get("ip"), Some(&Value::leaf("1.2.3.4")));
            assert_eq!(children.get("port"), Some(&Value::leaf("22")));

            store.set("server", "flat").unwrap();
            assert_eq!(store.get("server.ip").unwrap(), None, "{kind}");
            assert_eq!(store.get("server").unwrap(), Some(Value::leaf("flat")), "{kind}");
        }
    }

    #[test]
    fn remove_cascades_to_aliases_and_confirm() {
        for kind in [BackendKind::Json, BackendKind::Sqlite] {
            let dir = TempDir::new().unwrap();
            let store = engine(&dir, kind);
            store.set("deploy.prod.cmd", "make deploy").unwrap();
            store.set("deploy.dev.cmd", "make dev").unwrap();
            store.aliases().set("ship", "deploy.prod.cmd").unwrap();
            store.aliases().set("dev", "deploy.dev.cmd").unwrap();
            store.confirm().add("deploy.prod.cmd").unwrap();

            assert!(store.remove("deploy.prod").unwrap());

            assert_eq!(store.aliases().get("ship").unwrap(), None, "{kind}");
            assert_eq!(store.aliases().resolve("dev").unwrap(), "deploy.dev.cmd");
            assert!(!store.confirm().requires_confirmation("deploy.prod.cmd").unwrap());
        }
    }

    #[test]
    fn remove_of_absent_key_leaves_aliases() {
        let dir = TempDir::new().unwrap();
        let store = engine(&dir, BackendKind::Json);
        store.aliases().set("x", "dangling").unwrap();

        assert!(!store.remove("dangling").unwrap());
        assert_eq!(store.aliases().get("x").unwrap().as_deref(), Some("dangling"));
    }

    #[test]
    fn rename_rejects_moving_into_itself() {
        let dir = TempDir::new().unwrap();
        let store = engine(&dir, BackendKind::Json);
        store.set("a.b", "1").unwrap();

        assert!(matches!(store.rename("a", "a.c"), Err(StoreError::InvalidMove { .. })));
        assert!(matches!(store.rename("a", "a"), Err(StoreError::InvalidMove { .. })));
        assert!(store.rename("a", "z").unwrap());
        assert_eq!(store.get("z.b").unwrap(), Some(Value::leaf("1")));
    }

    #[test]
    fn invalid_keys_are_rejected_on_write() {
        let dir = TempDir::new().unwrap();
        let store = engine(&dir, BackendKind::Sqlite);
        assert!(matches!(store.set("a..b", "1"), Err(StoreError::InvalidKey(_))));
        assert!(matches!(store.set("", "1"), Err(StoreError::InvalidKey(_))));
        assert!(matches!(store.remove("."), Err(StoreError::InvalidKey(_))));
        assert_eq!(store.get("a..b").unwrap(), None);
    }

    #[test]
    fn backend_is_chosen_on_every_call() {
        let dir = TempDir::new().unwrap();
        let switch = Arc::new(Switch(AtomicBool::new(false)));
        let store = StorageEngine::with_selector(&StashConfig::in_dir(dir.path()), Arc::clone(&switch));

        store.set("where", "json").unwrap();
        switch.0.store(true, Ordering::SeqCst);
        assert_eq!(store.backend_kind(), BackendKind::Sqlite);
        assert_eq!(store.get("where").unwrap(), None);

        store.set("where", "sqlite").unwrap();
        switch.0.store(false, Ordering::SeqCst);
        assert_eq!(store.get("where").unwrap(), Some(Value::leaf("json")));
    }

    #[test]
    fn import_merge_and_replace() {
        let dir = TempDir::new().unwrap();
        let store = engine(&dir, BackendKind::Sqlite);
        store.set("keep", "1").unwrap();

        let incoming = dotstash_core::value::parse_document(r#"{"new": {"a": "2"}}"#).unwrap();
        store.import(&incoming, ImportMode::Merge).unwrap();
        assert_eq!(store.flatten().unwrap().len(), 2);

        store.import(&incoming, ImportMode::Replace).unwrap();
        let flat = store.flatten().unwrap();
        assert_eq!(flat.len(), 1);
        assert!(flat.contains_key("new.a"));
    }

    #[test]
    fn search_matches_paths_and_values() {
        let dir = TempDir::new().unwrap();
        let store = engine(&dir, BackendKind::Json);
        store.set("server.ip", "10.0.0.1").unwrap();
        store.set("notes.todo", "Check the SERVER logs").unwrap();
        store.set("misc", "nothing").unwrap();

        let hits = store.search("server").unwrap();
        assert_eq!(hits.len(), 2);
        assert!(!hits.contains_key("misc"));
    }

    #[test]
    fn close_releases_the_database() {
        let dir = TempDir::new().unwrap();
        let store = engine(&dir, BackendKind::Sqlite);
        store.set("a", "1").unwrap();
        store.close();
        std::fs::remove_file(dir.path().join("dotstash.db")).unwrap();
        assert_eq!(store.get("a").unwrap(), None);
    }
}
