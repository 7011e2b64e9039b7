//! package.json reading and the package-manifest strategy.
//!
//! Looks at the `kbLabs` field of each root's package.json:
//!
//! ```json
//! {
//!   "name": "@kb/devkit",
//!   "kbLabs": {
//!     "manifest": "./kb.plugin.json",
//!     "plugins": ["./plugins/release", "./plugins/mind"]
//!   }
//! }
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::{load_candidate, DiscoveryContext, DiscoveryStrategy, Owner};
use crate::plugin::{DiscoveryResult, PackageMeta, PluginError, PluginResult, SourceKind};

/// Parsed package.json structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PackageJson {
    /// Package name
    pub name: Option<String>,

    /// Package version
    pub version: Option<String>,

    /// Package description
    pub description: Option<String>,

    /// Workspace configuration
    pub workspaces: Option<Workspaces>,

    /// kb plugin declarations
    #[serde(rename = "kbLabs")]
    pub kb_labs: Option<KbLabsField>,
}

impl PackageJson {
    /// Identity fields handed to manifests this package owns.
    pub fn meta(&self) -> PackageMeta {
        PackageMeta {
            name: self.name.clone(),
            version: self.version.clone(),
            description: self.description.clone(),
        }
    }

    /// Relative path of the package's own plugin manifest.
    pub fn manifest_path(&self) -> Option<&str> {
        self.kb_labs.as_ref().and_then(|k| k.manifest.as_deref())
    }
}

/// The `kbLabs` field of a package.json.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KbLabsField {
    /// Relative path to a single plugin manifest.
    #[serde(default)]
    pub manifest: Option<String>,

    /// Relative sub-package directories, each with its own package.json.
    #[serde(default)]
    pub plugins: Vec<String>,
}

/// Workspace configuration (can be array or object).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Workspaces {
    /// Simple array of globs
    Array(Vec<String>),

    /// Object with packages field
    Object {
        /// Package globs
        #[serde(default)]
        packages: Vec<String>,
    },
}

impl Workspaces {
    /// Get the package glob patterns.
    pub fn patterns(&self) -> Vec<String> {
        match self {
            Self::Array(patterns) => patterns.clone(),
            Self::Object { packages } => packages.clone(),
        }
    }
}

/// Read `dir/package.json`.
///
/// Returns `Ok(None)` when the file does not exist.
pub fn read_package_json(dir: &Path) -> PluginResult<Option<PackageJson>> {
    let path = dir.join("package.json");
    if !path.is_file() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(&path)
        .map_err(|source| PluginError::Read { path: path.clone(), source })?;
    let package =
        serde_json::from_str(&content).map_err(|source| PluginError::Parse { path, source })?;
    Ok(Some(package))
}

/// Strategy reading `kbLabs` fields of package.json files.
#[derive(Debug, Clone, Copy, Default)]
pub struct PackageManifestStrategy;

impl DiscoveryStrategy for PackageManifestStrategy {
    fn name(&self) -> &str {
        "package"
    }

    fn source_kind(&self) -> SourceKind {
        SourceKind::Pkg
    }

    fn discover(&self, roots: &[PathBuf], ctx: &DiscoveryContext) -> DiscoveryResult {
        let mut out = DiscoveryResult::new();

        for root in roots.iter().filter(|r| r.is_dir()) {
            let package = match read_package_json(root) {
                Ok(Some(package)) => package,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(root = %root.display(), error = %e, "Unreadable package.json");
                    out.push_error(root.join("package.json"), e);
                    continue;
                }
            };

            let Some(kb_labs) = &package.kb_labs else {
                continue;
            };

            if let Some(manifest) = &kb_labs.manifest {
                let path = root.join(manifest);
                load_candidate(ctx, &path, Owner::Package(&package), self.source_kind(), &mut out);
            }

            for sub in &kb_labs.plugins {
                load_sub_package(ctx, &root.join(sub), self.source_kind(), &mut out);
            }
        }

        tracing::debug!(
            strategy = self.name(),
            plugins = out.plugins.len(),
            errors = out.errors.len(),
            "Strategy finished"
        );
        out
    }
}

/// Resolve a `kbLabs.plugins` entry through its own package.json.
fn load_sub_package(
    ctx: &DiscoveryContext,
    dir: &Path,
    source: SourceKind,
    out: &mut DiscoveryResult,
) {
    match read_package_json(dir) {
        Ok(Some(package)) => match package.manifest_path() {
            Some(manifest) => {
                load_candidate(ctx, &dir.join(manifest), Owner::Package(&package), source, out);
            }
            None => out.push_error(
                dir.join("package.json"),
                "package.json declares no kbLabs.manifest",
            ),
        },
        Ok(None) => out.push_error(dir, PluginError::NotFound(dir.join("package.json"))),
        Err(e) => out.push_error(dir.join("package.json"), e),
    }
}
