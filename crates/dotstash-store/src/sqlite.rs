// ABOUTME: SQLite backend storing one row per leaf, keyed by full dot-path, plus the aliases table.
// ABOUTME: Opens lazily, migrates the legacy single-blob schema once, and reads a corrupt database as empty.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use dotstash_core::path;
use dotstash_core::value::{self, Document, FlatMap, Value};
use rusqlite::{Connection, params};

use crate::backend::KeyStore;
use crate::error::StoreError;

const LEGACY_DATA_TABLE: &str = "data_store";
const LEGACY_ALIAS_TABLE: &str = "alias_store";

/// Normalized relational storage. The connection is opened on first use and
/// held until `close()`.
pub struct RelationalBackend {
    path: PathBuf,
    conn: Mutex<Option<Connection>>,
    corruption_reported: AtomicBool,
    legacy_reported: AtomicBool,
}

impl std::fmt::Debug for RelationalBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationalBackend")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl RelationalBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            conn: Mutex::new(None),
            corruption_reported: AtomicBool::new(false),
            legacy_reported: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.conn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn with_conn<T>(
        &self,
        op: impl FnOnce(&mut Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut guard = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let conn = match guard.take() {
            Some(conn) => conn,
            None => {
                let (conn, kept) = open_connection(&self.path)?;
                self.report_kept_legacy(&kept);
                conn
            }
        };
        op(guard.insert(conn))
    }

    /// Log legacy tables that could not be migrated. Only the first report
    /// for this backend is an error; reconnects repeat it at debug level.
    /// Returns whether the error was emitted.
    fn report_kept_legacy(&self, kept: &[KeptLegacy]) -> bool {
        if kept.is_empty() {
            return false;
        }
        let first = !self.legacy_reported.swap(true, Ordering::SeqCst);
        for table in kept {
            if first {
                tracing::error!("legacy {} is unreadable, leaving it in place: {}", table.name, table.reason);
            } else {
                tracing::debug!("legacy {} is still unreadable: {}", table.name, table.reason);
            }
        }
        first
    }

    /// Run a read. A database fault is reported once and read as empty.
    fn read_or_empty<T: Default>(
        &self,
        op: impl FnOnce(&mut Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        match self.with_conn(op) {
            Err(StoreError::Sqlite(e)) => {
                if !self.corruption_reported.swap(true, Ordering::SeqCst) {
                    tracing::error!(
                        "database {} is unreadable, treating it as empty: {}",
                        self.path.display(),
                        e
                    );
                }
                Ok(T::default())
            }
            other => other,
        }
    }

    /// Every alias stored in the aliases table.
    pub fn load_aliases(&self) -> Result<BTreeMap<String, String>, StoreError> {
        self.read_or_empty(|conn| {
            let mut stmt = conn.prepare("SELECT name, target FROM aliases ORDER BY name")?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;

            let mut aliases = BTreeMap::new();
            for row in rows {
                let (name, target): (String, String) = row?;
                aliases.insert(name, target);
            }
            Ok(aliases)
        })
    }

    pub fn upsert_alias(&self, name: &str, target: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO aliases (name, target) VALUES (?1, ?2)
                 ON CONFLICT(name) DO UPDATE SET target = excluded.target",
                params![name, target],
            )?;
            Ok(())
        })
    }

    pub fn delete_alias(&self, name: &str) -> Result<bool, StoreError> {
        self.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM aliases WHERE name = ?1", params![name])?;
            Ok(changed > 0)
        })
    }

    /// Delete aliases targeting `path` or anything underneath it.
    pub fn delete_aliases_for_path(&self, path: &str) -> Result<usize, StoreError> {
        self.with_conn(|conn| {
            let (lower, upper) = descendant_range(path);
            let changed = conn.execute(
                "DELETE FROM aliases WHERE target = ?1 OR (target >= ?2 AND target < ?3)",
                params![path, lower, upper],
            )?;
            Ok(changed)
        })
    }
}

/// A legacy table left in place because its newest blob did not parse.
#[derive(Debug)]
struct KeptLegacy {
    name: &'static str,
    reason: String,
}

fn open_connection(path: &Path) -> Result<(Connection, Vec<KeptLegacy>), StoreError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }

    let mut conn = Connection::open(path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS entries (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS aliases (
            name TEXT PRIMARY KEY,
            target TEXT NOT NULL
        );",
    )?;

    let kept = migrate_legacy(&mut conn)?;

    Ok((conn, kept))
}

/// Fold the old single-row JSON tables into the normalized ones and drop
/// them. Does nothing once the legacy tables are gone. Tables whose blob
/// cannot be parsed are kept and returned.
fn migrate_legacy(conn: &mut Connection) -> Result<Vec<KeptLegacy>, StoreError> {
    let has_data = table_exists(conn, LEGACY_DATA_TABLE)?;
    let has_aliases = table_exists(conn, LEGACY_ALIAS_TABLE)?;
    let mut kept = Vec::new();
    if !has_data && !has_aliases {
        return Ok(kept);
    }

    let tx = conn.transaction()?;

    if has_data {
        match latest_blob(&tx, LEGACY_DATA_TABLE)?.map(|blob| value::parse_document(&blob)) {
            Some(Err(e)) => kept.push(KeptLegacy {
                name: LEGACY_DATA_TABLE,
                reason: e.to_string(),
            }),
            parsed => {
                let doc = parsed.and_then(Result::ok).unwrap_or_default();
                let flat = value::flatten(&doc);
                for (key, leaf) in &flat {
                    set_in(&tx, key, leaf)?;
                }
                tx.execute_batch(&format!("DROP TABLE {LEGACY_DATA_TABLE};"))?;
                tracing::info!("migrated {} entries from legacy {}", flat.len(), LEGACY_DATA_TABLE);
            }
        }
    }

    if has_aliases {
        let parsed = latest_blob(&tx, LEGACY_ALIAS_TABLE)?
            .map(|blob| serde_json::from_str::<BTreeMap<String, String>>(&blob));
        match parsed {
            Some(Err(e)) => kept.push(KeptLegacy {
                name: LEGACY_ALIAS_TABLE,
                reason: e.to_string(),
            }),
            parsed => {
                let aliases = parsed.and_then(Result::ok).unwrap_or_default();
                for (name, target) in &aliases {
                    tx.execute(
                        "INSERT OR REPLACE INTO aliases (name, target) VALUES (?1, ?2)",
                        params![name, target],
                    )?;
                }
                tx.execute_batch(&format!("DROP TABLE {LEGACY_ALIAS_TABLE};"))?;
                tracing::info!("migrated {} aliases from legacy {}", aliases.len(), LEGACY_ALIAS_TABLE);
            }
        }
    }

    tx.commit()?;
    Ok(kept)
}

fn table_exists(conn: &Connection, name: &str) -> Result<bool, StoreError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// The newest `data` column of a legacy table, if it has any rows.
fn latest_blob(conn: &Connection, table: &str) -> Result<Option<String>, StoreError> {
    let result = conn.query_row(
        &format!("SELECT data FROM {table} ORDER BY id DESC LIMIT 1"),
        [],
        |row| row.get::<_, String>(0),
    );

    match result {
        Ok(blob) => Ok(Some(blob)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(StoreError::Sqlite(e)),
    }
}

/// Half-open bounds `[key., key/)` covering every strict descendant of `key`.
/// `/` sorts directly after `.`, and the BINARY collation keeps it case-exact.
fn descendant_range(key: &str) -> (String, String) {
    (format!("{key}."), format!("{key}/"))
}

/// Write one leaf inside an open transaction, evicting its subtree and any
/// ancestor leaf first.
fn set_in(conn: &Connection, key: &str, value: &str) -> Result<(), StoreError> {
    let (lower, upper) = descendant_range(key);
    conn.execute(
        "DELETE FROM entries WHERE key >= ?1 AND key < ?2",
        params![lower, upper],
    )?;
    for ancestor in path::ancestors(key) {
        conn.execute("DELETE FROM entries WHERE key = ?1", params![ancestor])?;
    }
    conn.execute(
        "INSERT INTO entries (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

/// Rows at `key` or underneath it, ordered by key.
fn select_subtree(conn: &Connection, key: &str) -> Result<Vec<(String, String)>, StoreError> {
    let (lower, upper) = descendant_range(key);
    let mut stmt = conn.prepare(
        "SELECT key, value FROM entries
         WHERE key = ?1 OR (key >= ?2 AND key < ?3)
         ORDER BY key",
    )?;
    let rows = stmt.query_map(params![key, lower, upper], |row| {
        Ok((row.get(0)?, row.get(1)?))
    })?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn delete_subtree(conn: &Connection, key: &str) -> Result<usize, StoreError> {
    let (lower, upper) = descendant_range(key);
    let changed = conn.execute(
        "DELETE FROM entries WHERE key = ?1 OR (key >= ?2 AND key < ?3)",
        params![key, lower, upper],
    )?;
    Ok(changed)
}

/// Rebuild the node at `key` from its subtree rows.
fn rows_to_value(key: &str, rows: Vec<(String, String)>) -> Option<Value> {
    let mut exact = None;
    let mut children = FlatMap::new();
    for (row_key, leaf) in rows {
        if row_key == key {
            exact = Some(leaf);
        } else if let Some(rel) = path::relative_to(&row_key, key) {
            children.insert(rel.to_string(), leaf);
        }
    }

    if children.is_empty() {
        return exact.map(Value::Leaf);
    }
    if exact.is_some() {
        tracing::warn!("'{}' is stored both as a leaf and a parent, showing the children", key);
    }
    Some(Value::Branch(value::unflatten(&children)))
}

impl KeyStore for RelationalBackend {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        if key.is_empty() {
            return Ok(value::lookup(&self.load_all()?, ""));
        }
        if path::validate(key).is_err() {
            return Ok(None);
        }
        let rows = self.read_or_empty(|conn| select_subtree(conn, key))?;
        Ok(rows_to_value(key, rows))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            set_in(&tx, key, value)?;
            tx.commit()?;
            Ok(())
        })
    }

    fn remove(&self, key: &str) -> Result<bool, StoreError> {
        self.with_conn(|conn| Ok(delete_subtree(conn, key)? > 0))
    }

    fn rename(&self, from: &str, to: &str) -> Result<bool, StoreError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let rows = select_subtree(&tx, from)?;
            if rows.is_empty() {
                return Ok(false);
            }
            delete_subtree(&tx, from)?;
            delete_subtree(&tx, to)?;
            for (key, leaf) in rows {
                let moved = match path::relative_to(&key, from) {
                    Some(rel) => path::join(to, rel),
                    None => to.to_string(),
                };
                set_in(&tx, &moved, &leaf)?;
            }
            tx.commit()?;
            Ok(true)
        })
    }

    fn flatten(&self) -> Result<FlatMap, StoreError> {
        self.read_or_empty(|conn| {
            let mut stmt = conn.prepare("SELECT key, value FROM entries ORDER BY key")?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;

            let mut flat = FlatMap::new();
            for row in rows {
                let (key, leaf): (String, String) = row?;
                flat.insert(key, leaf);
            }
            Ok(flat)
        })
    }

    fn load_all(&self) -> Result<Document, StoreError> {
        Ok(value::unflatten(&self.flatten()?))
    }

    fn save_all(&self, doc: &Document) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM entries", [])?;
            for (key, leaf) in value::flatten(doc) {
                tx.execute(
                    "INSERT INTO entries (key, value) VALUES (?1, ?2)",
                    params![key, leaf],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    fn merge(&self, doc: &Document) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            for (key, leaf) in value::flatten(doc) {
                set_in(&tx, &key, &leaf)?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    fn close(&self) {
        let conn = self
            .conn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(conn) = conn
            && let Err((_, e)) = conn.close()
        {
            tracing::warn!("closing {} failed: {}", self.path.display(), e);
        }
        self.corruption_reported.store(false, Ordering::SeqCst);
    }
}
