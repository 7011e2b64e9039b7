//! Plugin discovery strategies.
//!
//! Each strategy knows one place plugins can live and turns the roots it is
//! given into a [`DiscoveryResult`]. Strategies never fail as a whole: a broken
//! root or manifest becomes an entry in `errors` and scanning moves on.
//!
//! The [`DiscoveryManager`] runs every enabled strategy concurrently, merges
//! the outputs and reconciles plugins that share an id.

mod dedup;
mod directory;
mod file;
mod manager;
mod package;
mod workspace;

pub use dedup::{compare, dedup, Candidate, Decision, DedupOptions, DedupRule, Resolution};
pub use directory::DirectoryStrategy;
pub use file::ExplicitFileStrategy;
pub use manager::DiscoveryManager;
pub use package::{
    read_package_json, KbLabsField, PackageJson, PackageManifestStrategy, Workspaces,
};
pub use workspace::{workspace_patterns, WorkspaceStrategy};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::plugin::{
    check_dual_manifest, classify, migrate_legacy_to_current, ClassifiedManifest,
    DiscoveryResult, Manifest, ModuleLoader, PackageMeta, PluginBrief, PluginError,
    PluginResult, SourceKind,
};

/// Shared, read-only inputs of one discovery run.
#[derive(Debug)]
pub struct DiscoveryContext {
    /// Manifest loader scoped to this run.
    pub loader: Arc<ModuleLoader>,
    /// Maximum directory depth for tree walks.
    pub max_depth: usize,
    /// Directory names never descended into.
    pub ignore_dirs: Vec<String>,
}

impl DiscoveryContext {
    /// Create a context with a fresh loader.
    pub fn new(max_depth: usize, ignore_dirs: Vec<String>) -> Self {
        Self { loader: Arc::new(ModuleLoader::new()), max_depth, ignore_dirs }
    }

    /// Check if a directory should be skipped during scanning.
    pub fn is_ignored(&self, name: &str) -> bool {
        self.ignore_dirs.iter().any(|d| d == name)
    }
}

impl Default for DiscoveryContext {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH, default_ignore_dirs())
    }
}

/// Default depth for directory tree walks.
pub const DEFAULT_MAX_DEPTH: usize = 4;

/// Directories skipped by tree walks unless configured otherwise.
pub fn default_ignore_dirs() -> Vec<String> {
    ["node_modules", ".git", "target", "dist", "build", ".next", ".turbo", ".cache", "coverage"]
        .iter()
        .map(|s| (*s).to_string())
        .collect()
}

/// Trait for plugin discovery strategies.
pub trait DiscoveryStrategy: Send + Sync {
    /// Get the name of this strategy.
    fn name(&self) -> &str;

    /// Source kind attached to every plugin this strategy finds.
    fn source_kind(&self) -> SourceKind;

    /// Fixed priority (lower is more authoritative).
    fn priority(&self) -> u8 {
        self.source_kind().priority()
    }

    /// Scan the roots. Failures are recorded in the result, never returned.
    fn discover(&self, roots: &[PathBuf], ctx: &DiscoveryContext) -> DiscoveryResult;
}

/// Build the strategy for a source kind.
pub fn strategy_for(kind: SourceKind) -> Arc<dyn DiscoveryStrategy> {
    match kind {
        SourceKind::Workspace => Arc::new(WorkspaceStrategy),
        SourceKind::Pkg => Arc::new(PackageManifestStrategy),
        SourceKind::Dir => Arc::new(DirectoryStrategy),
        SourceKind::File => Arc::new(ExplicitFileStrategy),
    }
}

/// Which package.json, if any, owns a manifest.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Owner<'a> {
    /// The package.json that pointed at the manifest.
    Package(&'a PackageJson),
    /// Look for a sibling package.json, but only for current-schema manifests.
    SiblingWhenCurrent,
    /// No package metadata.
    Detached,
}

/// Load one manifest and record the outcome in `out`.
pub(crate) fn load_candidate(
    ctx: &DiscoveryContext,
    manifest_path: &Path,
    owner: Owner<'_>,
    source: SourceKind,
    out: &mut DiscoveryResult,
) {
    match build_brief(ctx, manifest_path, owner, source, out) {
        Ok(brief) => {
            tracing::debug!(
                plugin = %brief.id,
                version = %brief.version,
                kind = %brief.kind,
                source = %source,
                "Discovered plugin"
            );
            out.push_plugin(brief);
        }
        Err(e) => {
            tracing::warn!(path = %manifest_path.display(), error = %e, "Failed to load plugin");
            out.push_error(manifest_path, e);
        }
    }
}

fn build_brief(
    ctx: &DiscoveryContext,
    manifest_path: &Path,
    owner: Owner<'_>,
    source: SourceKind,
    out: &mut DiscoveryResult,
) -> PluginResult<PluginBrief> {
    let raw = ctx.loader.load(manifest_path)?;
    let dual = check_dual_manifest(&raw);
    let classified = classify(&raw).map_err(|e| {
        PluginError::InvalidManifest(format!("{}: {e}", manifest_path.display()))
    })?;

    let mut manifest = match classified {
        ClassifiedManifest::Unknown => {
            return Err(PluginError::UnknownSchema(manifest_path.to_path_buf()));
        }
        ClassifiedManifest::Current(doc) => {
            let package = match owner {
                Owner::Package(pkg) => Some(pkg.meta()),
                Owner::SiblingWhenCurrent => sibling_package(manifest_path, out),
                Owner::Detached => None,
            };
            Manifest::from_current(doc, (*raw).clone(), manifest_path, package.as_ref())?
        }
        ClassifiedManifest::Legacy(doc) => {
            let package = match owner {
                Owner::Package(pkg) => Some(pkg.meta()),
                Owner::SiblingWhenCurrent | Owner::Detached => None,
            };
            let manifest =
                Manifest::from_legacy(doc, (*raw).clone(), manifest_path, package.as_ref())?;
            let shim = migrate_legacy_to_current(&raw, &manifest.plugin_id);
            let migrated_id = shim["id"].as_str().unwrap_or(&manifest.plugin_id);
            tracing::debug!(plugin = %manifest.plugin_id, migrated_id, "Loaded legacy manifest");
            out.push_warning(
                manifest_path,
                format!("legacy manifest schema; migrates to current as '{migrated_id}'"),
            );
            manifest
        }
    };

    if dual {
        manifest.dual = true;
        out.push_warning(
            manifest_path,
            format!(
                "manifest carries both legacy and current schema fields; loaded as {}",
                manifest.kind
            ),
        );
        tracing::warn!(path = %manifest_path.display(), "Dual-schema plugin manifest");
    }

    Ok(PluginBrief::new(manifest, source))
}

/// Read the package.json next to a manifest, if any.
///
/// A broken sibling package.json only costs display enrichment, so it is
/// reported as a warning rather than an error.
fn sibling_package(manifest_path: &Path, out: &mut DiscoveryResult) -> Option<PackageMeta> {
    let dir = manifest_path.parent()?;
    match read_package_json(dir) {
        Ok(package) => package.map(|p| p.meta()),
        Err(e) => {
            let path = dir.join("package.json");
            out.push_warning(path, format!("ignored sibling package.json: {e}"));
            None
        }
    }
}
