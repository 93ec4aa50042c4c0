// ABOUTME: Integration tests running the same operations against the JSON and SQLite backends.
// ABOUTME: Covers backend equivalence, tree-edit scenarios, cascades, and the legacy database upgrade.

use dotstash_core::value::{self, Value};
use dotstash_core::{BackendKind, StashConfig};
use dotstash_store::{ImportMode, StorageEngine};
use tempfile::TempDir;

fn engine(dir: &TempDir, kind: BackendKind) -> StorageEngine {
    StorageEngine::with_selector(&StashConfig::in_dir(dir.path()), kind)
}

enum Op {
    Set(&'static str, &'static str),
    Remove(&'static str),
    Rename(&'static str, &'static str),
}

const SCRIPT: &[Op] = &[
    Op::Set("server.prod.ip", "10.0.0.1"),
    Op::Set("server.prod.port", "22"),
    Op::Set("server.dev.ip", "127.0.0.1"),
    Op::Set("notes", "hello"),
    Op::Set("notes.first", "nested now"),
    Op::Set("server.prod", "flattened"),
    Op::Remove("server.dev.ip"),
    Op::Set("a.b.c.d", "deep"),
    Op::Rename("a.b", "moved"),
    Op::Remove("does.not.exist"),
    Op::Set("wild%card_key", "literal"),
    Op::Set("Server.prod", "case matters"),
    Op::Remove("server"),
];

const PROBES: &[&str] = &[
    "", "server", "server.prod", "server.dev", "notes", "notes.first", "a", "moved",
    "moved.c.d", "wild%card_key", "Server", "Server.prod",
];

#[test]
fn backends_agree_on_a_scripted_session() {
    let json_dir = TempDir::new().unwrap();
    let sqlite_dir = TempDir::new().unwrap();
    let json = engine(&json_dir, BackendKind::Json);
    let sqlite = engine(&sqlite_dir, BackendKind::Sqlite);

    for (step, op) in SCRIPT.iter().enumerate() {
        let (a, b) = match *op {
            Op::Set(key, val) => {
                json.set(key, val).unwrap();
                sqlite.set(key, val).unwrap();
                (true, true)
            }
            Op::Remove(key) => (json.remove(key).unwrap(), sqlite.remove(key).unwrap()),
            Op::Rename(from, to) => (json.rename(from, to).unwrap(), sqlite.rename(from, to).unwrap()),
        };
        assert_eq!(a, b, "step {step} reported differently");
        assert_eq!(json.flatten().unwrap(), sqlite.flatten().unwrap(), "step {step}");
        for probe in PROBES {
            assert_eq!(json.get(probe).unwrap(), sqlite.get(probe).unwrap(), "step {step}, get {probe:?}");
        }
    }
}

#[test]
fn flatten_matches_load_all_and_save_all_is_idempotent() {
    for kind in [BackendKind::Json, BackendKind::Sqlite] {
        let dir = TempDir::new().unwrap();
        let store = engine(&dir, kind);
        store.set("x.y", "1").unwrap();
        store.set("x.z.w", "2").unwrap();
        store.set("top", "3").unwrap();

        let doc = store.load_all().unwrap();
        assert_eq!(store.flatten().unwrap(), value::flatten(&doc), "{kind}");

        store.save_all(&doc).unwrap();
        assert_eq!(store.load_all().unwrap(), doc, "{kind}");
    }
}

#[test]
fn setting_under_a_leaf_turns_it_into_a_branch() {
    for kind in [BackendKind::Json, BackendKind::Sqlite] {
        let dir = TempDir::new().unwrap();
        let store = engine(&dir, kind);
        store.set("p", "leaf").unwrap();
        store.set("p.q", "child").unwrap();

        assert!(matches!(store.get("p").unwrap(), Some(Value::Branch(_))), "{kind}");
        assert_eq!(store.get("p.q").unwrap(), Some(Value::leaf("child")));
        assert_eq!(store.get("p.q.r").unwrap(), None);
    }
}

#[test]
fn removing_a_subtree_clears_every_descendant() {
    for kind in [BackendKind::Json, BackendKind::Sqlite] {
        let dir = TempDir::new().unwrap();
        let store = engine(&dir, kind);
        store.set("svc.a.b", "1").unwrap();
        store.set("svc.c", "2").unwrap();
        store.set("svcx", "3").unwrap();

        assert!(store.remove("svc").unwrap());
        assert_eq!(store.get("svc").unwrap(), None, "{kind}");
        assert_eq!(store.get("svc.a.b").unwrap(), None, "{kind}");
        assert_eq!(store.get("svcx").unwrap(), Some(Value::leaf("3")), "{kind}");
    }
}

#[test]
fn aliases_follow_the_active_backend_and_cascade() {
    for kind in [BackendKind::Json, BackendKind::Sqlite] {
        let dir = TempDir::new().unwrap();
        let store = engine(&dir, kind);
        store.set("db.primary.host", "pg1").unwrap();
        store.aliases().set("pg", "db.primary.host").unwrap();
        store.aliases().set("db", "db.primary").unwrap();
        store.confirm().add("db.primary.host").unwrap();

        assert_eq!(store.aliases().resolve("pg").unwrap(), "db.primary.host");
        assert_eq!(store.aliases().names_for_target("db.primary.host").unwrap(), vec!["pg"]);

        assert!(store.rename("db.primary", "db.replica").unwrap());
        assert!(store.aliases().list().unwrap().is_empty(), "{kind}");
        assert!(store.confirm().list().unwrap().is_empty(), "{kind}");
        assert_eq!(store.get("db.replica.host").unwrap(), Some(Value::leaf("pg1")));
    }
}

#[test]
fn dotted_import_keys_are_addressable_on_both_backends() {
    for kind in [BackendKind::Json, BackendKind::Sqlite] {
        let dir = TempDir::new().unwrap();
        let store = engine(&dir, kind);

        let doc = value::parse_document(r#"{"a.b": "v", "a": {"c": "w"}}"#).unwrap();
        store.import(&doc, ImportMode::Replace).unwrap();

        let flat = store.flatten().unwrap();
        for key in flat.keys() {
            assert!(store.get(key).unwrap().is_some(), "{kind}: {key} listed but absent");
        }
        assert_eq!(store.get("a.b").unwrap(), Some(Value::leaf("v")), "{kind}");
        assert!(store.remove("a.b").unwrap(), "{kind}");
        assert_eq!(store.get("a.b").unwrap(), None, "{kind}");
        assert_eq!(store.flatten().unwrap().len(), 1, "{kind}");
    }
}

#[test]
fn import_replace_then_merge() {
    for kind in [BackendKind::Json, BackendKind::Sqlite] {
        let dir = TempDir::new().unwrap();
        let store = engine(&dir, kind);
        store.set("old", "gone").unwrap();

        let doc = value::parse_document(r#"{"net": {"port": 8080, "tls": true, "skip": null}}"#).unwrap();
        store.import(&doc, ImportMode::Replace).unwrap();
        let extra = value::parse_document(r#"{"net": {"host": "example.com"}}"#).unwrap();
        store.import(&extra, ImportMode::Merge).unwrap();

        let flat = store.flatten().unwrap();
        let keys: Vec<&str> = flat.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["net.host", "net.port", "net.tls"], "{kind}");
        assert_eq!(flat["net.port"], "8080");
        assert_eq!(flat["net.tls"], "true");
    }
}

#[test]
fn legacy_database_is_upgraded_through_the_engine() {
    let dir = TempDir::new().unwrap();
    let config = StashConfig::in_dir(dir.path());
    {
        let conn = rusqlite::Connection::open(&config.database_file).unwrap();
        conn.execute_batch(
            r#"CREATE TABLE data_store (id INTEGER PRIMARY KEY, data TEXT NOT NULL);
               CREATE TABLE alias_store (id INTEGER PRIMARY KEY, data TEXT NOT NULL);
               INSERT INTO data_store (id, data) VALUES (1, '{"stale": "x"}');
               INSERT INTO data_store (id, data) VALUES (2, '{"server": {"ip": "1.2.3.4"}}');
               INSERT INTO alias_store (id, data) VALUES (1, '{"srv": "server.ip"}');"#,
        )
        .unwrap();
    }

    let store = StorageEngine::with_selector(&config, BackendKind::Sqlite);
    assert_eq!(store.get("server.ip").unwrap(), Some(Value::leaf("1.2.3.4")));
    assert_eq!(store.get("stale").unwrap(), None);
    assert_eq!(store.aliases().resolve("srv").unwrap(), "server.ip");
    store.close();

    let conn = rusqlite::Connection::open(&config.database_file).unwrap();
    let legacy: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('data_store', 'alias_store')",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(legacy, 0);
}

#[test]
fn settings_file_switches_backends_between_calls() {
    let dir = TempDir::new().unwrap();
    let config = StashConfig::in_dir(dir.path());
    let store = StorageEngine::with_selector(&config, config.selector());

    // SAFETY: test-only code, no other test in this binary reads DOTSTASH_BACKEND
    unsafe {
        std::env::remove_var("DOTSTASH_BACKEND");
    }

    store.set("where", "file").unwrap();
    std::fs::write(&config.settings_file, r#"{"backend": "sqlite"}"#).unwrap();
    assert_eq!(store.backend_kind(), BackendKind::Sqlite);
    assert_eq!(store.get("where").unwrap(), None);

    std::fs::write(&config.settings_file, r#"{"backend": "json"}"#).unwrap();
    assert_eq!(store.get("where").unwrap(), Some(Value::leaf("file")));
}
