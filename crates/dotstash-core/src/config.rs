// ABOUTME: Configuration loading for dotstash: data directory layout, limits, and backend choice.
// ABOUTME: Reads environment variables with defaults and re-reads the backend setting on every call.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default recursion ceiling for reference interpolation.
pub const DEFAULT_MAX_DEPTH: usize = 10;

/// Default time a command substitution may run before it is killed.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Environment variable naming the active backend.
pub const BACKEND_ENV: &str = "DOTSTASH_BACKEND";

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown backend '{0}', expected 'json' or 'sqlite'")]
    UnknownBackend(String),

    #[error("DOTSTASH_MAX_DEPTH is not a positive integer: {0}")]
    InvalidMaxDepth(String),

    #[error("DOTSTASH_COMMAND_TIMEOUT_SECS is not a positive integer: {0}")]
    InvalidTimeout(String),
}

/// Which storage medium holds the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Json,
    Sqlite,
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" | "file" | "document" => Ok(BackendKind::Json),
            "sqlite" | "db" | "relational" => Ok(BackendKind::Sqlite),
            other => Err(ConfigError::UnknownBackend(other.to_string())),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Json => f.write_str("json"),
            BackendKind::Sqlite => f.write_str("sqlite"),
        }
    }
}

/// Source of the current backend choice. Consulted on every storage call,
/// so implementations must not cache a stale answer.
pub trait BackendSelector: Send + Sync {
    fn current(&self) -> BackendKind;
}

impl BackendSelector for BackendKind {
    fn current(&self) -> BackendKind {
        *self
    }
}

impl<T: BackendSelector + ?Sized> BackendSelector for Arc<T> {
    fn current(&self) -> BackendKind {
        (**self).current()
    }
}

#[derive(Debug, Default, Deserialize)]
struct Settings {
    backend: Option<String>,
}

/// Selects the backend from `DOTSTASH_BACKEND`, falling back to the
/// `backend` field of a JSON settings file, then to `json`.
#[derive(Debug, Clone)]
pub struct SettingsFile {
    path: PathBuf,
}

impl SettingsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn from_file(&self) -> Option<BackendKind> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!("cannot read settings {}: {}", self.path.display(), e);
                return None;
            }
        };
        if contents.trim().is_empty() {
            return None;
        }
        let settings: Settings = match serde_json::from_str(&contents) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("ignoring unparsable settings {}: {}", self.path.display(), e);
                return None;
            }
        };
        match settings.backend?.parse() {
            Ok(kind) => Some(kind),
            Err(e) => {
                tracing::warn!("ignoring backend in {}: {}", self.path.display(), e);
                None
            }
        }
    }
}

impl BackendSelector for SettingsFile {
    fn current(&self) -> BackendKind {
        if let Ok(raw) = std::env::var(BACKEND_ENV)
            && !raw.trim().is_empty()
        {
            match raw.parse() {
                Ok(kind) => return kind,
                Err(e) => tracing::warn!("ignoring {}: {}", BACKEND_ENV, e),
            }
        }
        self.from_file().unwrap_or_default()
    }
}

/// File layout and limits for one store.
#[derive(Debug, Clone)]
pub struct StashConfig {
    pub home: PathBuf,
    pub data_file: PathBuf,
    pub aliases_file: PathBuf,
    pub confirm_file: PathBuf,
    pub database_file: PathBuf,
    pub settings_file: PathBuf,
    pub max_depth: usize,
    pub command_timeout: Duration,
}

impl StashConfig {
    /// Standard layout rooted at `home` with default limits.
    pub fn in_dir(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        Self {
            data_file: home.join("data.json"),
            aliases_file: home.join("aliases.json"),
            confirm_file: home.join("confirm.json"),
            database_file: home.join("dotstash.db"),
            settings_file: home.join("settings.json"),
            home,
            max_depth: DEFAULT_MAX_DEPTH,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Load configuration from environment variables with sensible defaults.
    ///
    /// Environment variables:
    /// - DOTSTASH_HOME: data directory (default: ~/.dotstash)
    /// - DOTSTASH_MAX_DEPTH: interpolation recursion ceiling (default: 10)
    /// - DOTSTASH_COMMAND_TIMEOUT_SECS: command substitution timeout (default: 30)
    ///
    /// DOTSTASH_BACKEND is not captured here; `SettingsFile` reads it per call.
    pub fn from_env() -> Result<Self, ConfigError> {
        let home = std::env::var("DOTSTASH_HOME")
            .ok()
            .filter(|h| !h.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from("/tmp"))
                    .join(".dotstash")
            });

        let mut config = Self::in_dir(home);

        if let Ok(raw) = std::env::var("DOTSTASH_MAX_DEPTH") {
            config.max_depth = raw
                .parse::<usize>()
                .ok()
                .filter(|d| *d > 0)
                .ok_or(ConfigError::InvalidMaxDepth(raw))?;
        }

        if let Ok(raw) = std::env::var("DOTSTASH_COMMAND_TIMEOUT_SECS") {
            let secs = raw
                .parse::<u64>()
                .ok()
                .filter(|s| *s > 0)
                .ok_or(ConfigError::InvalidTimeout(raw))?;
            config.command_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }

    /// Backend selector backed by this layout's settings file.
    pub fn selector(&self) -> SettingsFile {
        SettingsFile::new(&self.settings_file)
    }
}
