//! Plugin discovery data model.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::Manifest;

/// File name the directory strategy looks for.
pub const MANIFEST_FILE: &str = "kb.plugin.json";

/// Where a plugin was found.
///
/// The declaration order doubles as the origin priority used during
/// reconciliation: workspace plugins are the most authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Package inside a monorepo workspace.
    Workspace,
    /// `kbLabs` fields of a package.json.
    Pkg,
    /// Conventional manifest file found in a directory tree.
    Dir,
    /// Manifest passed explicitly as a file root.
    File,
}

impl SourceKind {
    /// All source kinds, most authoritative first.
    pub const ALL: [Self; 4] = [Self::Workspace, Self::Pkg, Self::Dir, Self::File];

    /// Origin priority (lower wins).
    pub const fn priority(self) -> u8 {
        match self {
            Self::Workspace => 1,
            Self::Pkg => 2,
            Self::Dir => 3,
            Self::File => 4,
        }
    }

    /// Short name used in config files and output.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Workspace => "workspace",
            Self::Pkg => "pkg",
            Self::Dir => "dir",
            Self::File => "file",
        }
    }

    /// Parse a source kind from its config name.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "workspace" => Some(Self::Workspace),
            "pkg" | "package" => Some(Self::Pkg),
            "dir" | "directory" => Some(Self::Dir),
            "file" => Some(Self::File),
            _ => None,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Manifest schema generation of a loaded plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManifestKind {
    Legacy,
    Current,
}

impl fmt::Display for ManifestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Legacy => f.write_str("legacy"),
            Self::Current => f.write_str("current"),
        }
    }
}

/// Origin of a plugin brief.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PluginSource {
    pub kind: SourceKind,
    pub path: PathBuf,
}

/// Human-facing plugin metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// One discovered plugin candidate.
///
/// Several briefs may share an `id` until the discovery manager reconciles
/// them. The brief keeps a handle to the manifest it was parsed from, so after
/// reconciliation each surviving manifest belongs to exactly one brief.
#[derive(Debug, Clone, Serialize)]
pub struct PluginBrief {
    pub id: String,
    pub version: String,
    pub kind: ManifestKind,
    pub source: PluginSource,
    pub display: DisplayInfo,
    #[serde(skip)]
    pub manifest: Arc<Manifest>,
}

impl PluginBrief {
    /// Build a brief for a parsed manifest.
    pub fn new(manifest: Manifest, source: SourceKind) -> Self {
        Self {
            id: manifest.plugin_id.clone(),
            version: manifest.version.clone(),
            kind: manifest.kind,
            source: PluginSource { kind: source, path: manifest.source_path.clone() },
            display: manifest.display.clone(),
            manifest: Arc::new(manifest),
        }
    }
}

/// A per-path failure recorded during discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveryError {
    pub path: PathBuf,
    pub error: String,
}

/// A non-fatal observation made during discovery (dual manifests and the like).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveryWarning {
    pub path: PathBuf,
    pub message: String,
}

/// Output of one discovery strategy, or the reconciled output of all of them.
///
/// Failures are data: nothing in here is ever raised to the caller.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryResult {
    pub plugins: Vec<PluginBrief>,
    pub manifests: BTreeMap<String, Arc<Manifest>>,
    pub errors: Vec<DiscoveryError>,
    pub warnings: Vec<DiscoveryWarning>,
    /// Reconciliation trace, filled in by the discovery manager only.
    pub resolutions: Vec<crate::discovery::Resolution>,
}

impl DiscoveryResult {
    /// Create an empty result.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a plugin and its manifest.
    pub fn push_plugin(&mut self, brief: PluginBrief) {
        self.manifests.insert(brief.id.clone(), Arc::clone(&brief.manifest));
        self.plugins.push(brief);
    }

    /// Record a failure against a path.
    pub fn push_error(&mut self, path: impl AsRef<Path>, error: impl fmt::Display) {
        self.errors
            .push(DiscoveryError { path: path.as_ref().to_path_buf(), error: error.to_string() });
    }

    /// Record a warning against a path.
    pub fn push_warning(&mut self, path: impl AsRef<Path>, message: impl Into<String>) {
        self.warnings
            .push(DiscoveryWarning { path: path.as_ref().to_path_buf(), message: message.into() });
    }

    /// Whether any source failed.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Merge several results.
    ///
    /// Plugins, errors and warnings are concatenated in input order. Manifest
    /// maps are unioned with the last writer winning on id collisions.
    pub fn merge(results: impl IntoIterator<Item = Self>) -> Self {
        let mut merged = Self::new();
        for result in results {
            merged.plugins.extend(result.plugins);
            merged.manifests.extend(result.manifests);
            merged.errors.extend(result.errors);
            merged.warnings.extend(result.warnings);
            merged.resolutions.extend(result.resolutions);
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::manifest::tests::sample_manifest;

    #[test]
    fn test_source_priority_order() {
        let priorities: Vec<u8> = SourceKind::ALL.iter().map(|k| k.priority()).collect();
        assert_eq!(priorities, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_source_kind_parse() {
        assert_eq!(SourceKind::parse("workspace"), Some(SourceKind::Workspace));
        assert_eq!(SourceKind::parse("package"), Some(SourceKind::Pkg));
        assert_eq!(SourceKind::parse(" DIR "), Some(SourceKind::Dir));
        assert_eq!(SourceKind::parse("file"), Some(SourceKind::File));
        assert_eq!(SourceKind::parse("registry"), None);
    }

    #[test]
    fn test_merge_keeps_everything() {
        let mut a = DiscoveryResult::new();
        let manifest = sample_manifest("p", "1.0.0", "/a/kb.plugin.json");
        a.push_plugin(PluginBrief::new(manifest, SourceKind::Dir));
        a.push_error("/broken", "boom");

        let mut b = DiscoveryResult::new();
        let manifest = sample_manifest("p", "2.0.0", "/b/kb.plugin.json");
        b.push_plugin(PluginBrief::new(manifest, SourceKind::Pkg));

        let merged = DiscoveryResult::merge([a, b]);
        assert_eq!(merged.plugins.len(), 2);
        assert_eq!(merged.errors.len(), 1);
        // Last writer wins at the manifest-map level.
        assert_eq!(merged.manifests["p"].version, "2.0.0");
    }
}
