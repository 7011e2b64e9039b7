//! Per-run manifest document loader.
//!
//! A loader is created for each discovery run and handed to every strategy
//! through the discovery context, so a file referenced by several sources is
//! read and parsed once per run and nothing leaks between runs.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use super::{PluginError, PluginResult};

/// Caching loader for manifest documents.
#[derive(Debug, Default)]
pub struct ModuleLoader {
    cache: Mutex<HashMap<PathBuf, Arc<Value>>>,
}

impl ModuleLoader {
    /// Create an empty loader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a manifest document and resolve its export.
    pub fn load(&self, path: &Path) -> PluginResult<Arc<Value>> {
        if let Some(doc) = self.cache.lock().get(path) {
            return Ok(Arc::clone(doc));
        }

        if !path.is_file() {
            return Err(PluginError::NotFound(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path)
            .map_err(|source| PluginError::Read { path: path.to_path_buf(), source })?;
        let doc: Value = serde_json::from_str(&content)
            .map_err(|source| PluginError::Parse { path: path.to_path_buf(), source })?;
        let doc = Arc::new(resolve_export(doc));

        self.cache.lock().insert(path.to_path_buf(), Arc::clone(&doc));
        Ok(doc)
    }

    /// Number of documents loaded so far.
    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    /// Whether nothing has been loaded yet.
    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }
}

/// Pick the manifest out of a document.
///
/// A `default` object wins, then a `manifest` object, then the document
/// itself.
pub fn resolve_export(doc: Value) -> Value {
    match doc {
        Value::Object(mut map) => {
            for key in ["default", "manifest"] {
                if matches!(map.get(key), Some(Value::Object(_))) {
                    if let Some(export) = map.remove(key) {
                        return export;
                    }
                }
            }
            Value::Object(map)
        }
        other => other,
    }
}
