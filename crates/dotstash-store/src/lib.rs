// ABOUTME: Persistence layer for dotstash: JSON document and SQLite backends behind one engine.
// ABOUTME: Provides atomic file writes, mtime caching, the alias table, and the confirm set.

pub mod aliases;
pub mod atomic;
pub mod backend;
pub mod cache;
pub mod confirm;
pub mod document;
pub mod engine;
pub mod error;
pub mod mapfile;
pub mod sqlite;

pub use aliases::AliasStore;
pub use atomic::write_atomic;
pub use backend::KeyStore;
pub use confirm::ConfirmStore;
pub use document::DocumentBackend;
pub use engine::{ImportMode, StorageEngine};
pub use error::StoreError;
pub use sqlite::RelationalBackend;
