//! Plugin system error types.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for plugin operations.
pub type PluginResult<T> = Result<T, PluginError>;

/// Errors that can occur while loading plugins and their commands.
#[derive(Debug, Error)]
pub enum PluginError {
    /// Manifest or package file not found.
    #[error("Not found: {0}")]
    NotFound(PathBuf),

    /// A file exists but could not be read.
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A file could not be parsed as JSON.
    #[error("Malformed JSON in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The manifest matched a schema but its fields are invalid.
    #[error("Invalid plugin manifest: {0}")]
    InvalidManifest(String),

    /// The manifest matched neither the legacy nor the current schema.
    #[error("Unrecognized manifest schema in {0}")]
    UnknownSchema(PathBuf),

    /// Workspace declaration (package.json or pnpm-workspace.yaml) is invalid.
    #[error("Invalid workspace declaration in {path}: {message}")]
    Workspace { path: PathBuf, message: String },

    /// A command declares neither a handler nor a run line.
    #[error("Command '{0}' declares no handler")]
    MissingHandler(String),

    /// A command references a handler the host never registered.
    #[error("No handler registered under '{0}'")]
    UnknownHandler(String),
}
