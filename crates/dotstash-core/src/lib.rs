// ABOUTME: Core library for dotstash, containing the value model, dot-path rules, and configuration.
// ABOUTME: This crate defines the shared data model used by the storage and interpolation crates.

pub mod config;
pub mod crypto;
pub mod path;
pub mod value;

pub use config::{BackendKind, BackendSelector, ConfigError, SettingsFile, StashConfig};
pub use crypto::{EncryptionProbe, PrefixProbe};
pub use path::PathError;
pub use value::{Branch, Document, DocumentError, FlatMap, Value};
