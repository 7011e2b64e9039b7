//! Persisted key-value state.
//!
//! The only thing kb remembers between invocations is which plugins have
//! completed their one-time setup. Storage sits behind the narrow
//! [`StateStore`] trait; the default backend is a single JSON file.
//!
//! The file is shared by concurrent invocations without locking. Writes go
//! through a temporary file and a rename, so readers never see a torn file,
//! but two processes racing on a first run may both run setup.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors raised by state backends.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("State file I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed state file {path}: {source}")]
    Serde {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("State store unavailable: {0}")]
    Unavailable(String),
}

/// Time-to-live of a stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// Kept until explicitly deleted.
    Infinite,
    /// Expires after the given number of seconds.
    Seconds(u64),
}

/// Narrow get/set/delete interface over persisted state.
pub trait StateStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, StateError>;

    fn set(&self, key: &str, value: Value, ttl: Ttl) -> Result<(), StateError>;

    /// Remove a key. Returns whether it existed.
    fn delete(&self, key: &str) -> Result<bool, StateError>;
}

/// Record persisted once a plugin's setup succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupState {
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Plugin version that ran setup.
    pub version: String,
}

impl SetupState {
    /// Record for a setup completed now.
    pub fn now(version: impl Into<String>) -> Self {
        Self { timestamp: chrono::Utc::now().timestamp_millis(), version: version.into() }
    }
}

/// State key marking a plugin's setup as done.
pub fn setup_state_key(plugin_id: &str) -> String {
    format!("plugin:{plugin_id}:setup-done")
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StateFile {
    #[serde(default)]
    entries: BTreeMap<String, StateEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StateEntry {
    value: Value,
    #[serde(rename = "expiresAt", default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<i64>,
}

impl StateEntry {
    fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at.is_some_and(|at| at <= now_ms)
    }
}

/// State store backed by one JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileStateStore {
    path: PathBuf,
}

impl JsonFileStateStore {
    /// Open (and if needed, prepare the directory for) a state file.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StateError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|source| StateError::Io { path: parent.to_path_buf(), source })?;
        }
        if path.is_dir() {
            return Err(StateError::Unavailable(format!("{} is a directory", path.display())));
        }
        Ok(Self { path })
    }

    /// Location of the state file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<StateFile, StateError> {
        if !self.path.exists() {
            return Ok(StateFile::default());
        }
        let content = std::fs::read_to_string(&self.path)
            .map_err(|source| StateError::Io { path: self.path.clone(), source })?;
        if content.trim().is_empty() {
            return Ok(StateFile::default());
        }
        serde_json::from_str(&content)
            .map_err(|source| StateError::Serde { path: self.path.clone(), source })
    }

    fn write(&self, file: &StateFile) -> Result<(), StateError> {
        let content = serde_json::to_string_pretty(file)
            .map_err(|source| StateError::Serde { path: self.path.clone(), source })?;
        let tmp = self.path.with_extension(format!("tmp.{}", std::process::id()));
        std::fs::write(&tmp, content)
            .map_err(|source| StateError::Io { path: tmp.clone(), source })?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|source| StateError::Io { path: self.path.clone(), source })
    }
}

impl StateStore for JsonFileStateStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StateError> {
        let file = self.read()?;
        let now = chrono::Utc::now().timestamp_millis();
        Ok(file.entries.get(key).filter(|e| !e.is_expired(now)).map(|e| e.value.clone()))
    }

    fn set(&self, key: &str, value: Value, ttl: Ttl) -> Result<(), StateError> {
        let mut file = self.read()?;
        let expires_at = match ttl {
            Ttl::Infinite => None,
            Ttl::Seconds(secs) => {
                let ms = i64::try_from(secs.saturating_mul(1000)).unwrap_or(i64::MAX);
                Some(chrono::Utc::now().timestamp_millis().saturating_add(ms))
            }
        };
        file.entries.insert(key.to_string(), StateEntry { value, expires_at });
        self.write(&file)
    }

    fn delete(&self, key: &str) -> Result<bool, StateError> {
        let mut file = self.read()?;
        let existed = file.entries.remove(key).is_some();
        if existed {
            self.write(&file)?;
        }
        Ok(existed)
    }
}
