//! Plugin manifest documents and the parsed `Manifest` model.
//!
//! Two schema generations exist on disk. The current one carries `id` and
//! `version` and nests its commands under `cli.commands`; the legacy one has
//! no identity of its own and lists `commands` at the top level. Both are
//! normalized into [`Manifest`] once classification has picked a generation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{DisplayInfo, ManifestKind, PluginError, PluginResult};

/// One command contributed by a plugin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandDecl {
    /// Command id, either bare (`run`) or already qualified (`playbooks:run`).
    pub id: String,
    /// Help group; defaults to the plugin's short name.
    #[serde(default)]
    pub group: Option<String>,
    /// One-line description.
    #[serde(default)]
    pub describe: Option<String>,
    /// Runtime dependencies specific to this command.
    #[serde(default)]
    pub requires: Vec<String>,
    /// Name of a host-registered handler.
    #[serde(default)]
    pub handler: Option<String>,
    /// Shell line run from the manifest's directory.
    #[serde(default)]
    pub run: Option<String>,
}

/// One-time setup declaration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupDecl {
    #[serde(default)]
    pub handler: Option<String>,
    #[serde(default)]
    pub run: Option<String>,
    #[serde(default)]
    pub describe: Option<String>,
}

/// Display block as written in a manifest (every field optional).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayDoc {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// `cli` section of a current-schema manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CliSection {
    #[serde(default)]
    pub commands: Vec<CommandDecl>,
}

/// Current-schema manifest document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentManifestDoc {
    pub id: String,
    pub version: String,
    #[serde(default)]
    pub display: DisplayDoc,
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default)]
    pub setup: Option<SetupDecl>,
    #[serde(default)]
    pub cli: CliSection,
}

/// Legacy-schema manifest document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyManifestDoc {
    #[serde(default)]
    pub manifest_version: Option<Value>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default)]
    pub setup: Option<SetupDecl>,
    #[serde(default)]
    pub commands: Vec<CommandDecl>,
}

/// Identity fields borrowed from the package.json that owns a manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageMeta {
    pub name: Option<String>,
    pub version: Option<String>,
    pub description: Option<String>,
}

/// A parsed plugin manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    pub kind: ManifestKind,
    pub plugin_id: String,
    pub version: String,
    pub display: DisplayInfo,
    pub requires: Vec<String>,
    pub setup: Option<SetupDecl>,
    pub commands: Vec<CommandDecl>,
    /// File the manifest was read from.
    pub source_path: PathBuf,
    /// Carries both legacy and current schema markers.
    pub dual: bool,
    /// The document as loaded.
    pub raw: Value,
}

impl Manifest {
    /// Build from a current-schema document.
    ///
    /// Package metadata, when present, takes precedence for display fields.
    pub fn from_current(
        doc: CurrentManifestDoc,
        raw: Value,
        source_path: &Path,
        package: Option<&PackageMeta>,
    ) -> PluginResult<Self> {
        if doc.id.trim().is_empty() {
            return Err(PluginError::InvalidManifest(format!(
                "{}: plugin id must not be empty",
                source_path.display()
            )));
        }

        let name = package
            .and_then(|p| p.name.clone())
            .or(doc.display.name)
            .unwrap_or_else(|| doc.id.clone());
        let description = package.and_then(|p| p.description.clone()).or(doc.display.description);

        Ok(Self {
            kind: ManifestKind::Current,
            plugin_id: doc.id,
            version: doc.version,
            display: DisplayInfo { name, description },
            requires: doc.requires,
            setup: doc.setup,
            commands: doc.cli.commands,
            source_path: source_path.to_path_buf(),
            dual: false,
            raw,
        })
    }

    /// Build from a legacy-schema document.
    ///
    /// Legacy manifests carry no identity, so the id comes from the owning
    /// package, then the manifest `name`, then the containing directory.
    pub fn from_legacy(
        doc: LegacyManifestDoc,
        raw: Value,
        source_path: &Path,
        package: Option<&PackageMeta>,
    ) -> PluginResult<Self> {
        let dir_name = source_path
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned());

        let plugin_id = package
            .and_then(|p| p.name.clone())
            .or_else(|| doc.name.clone())
            .or(dir_name)
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| {
                PluginError::InvalidManifest(format!(
                    "{}: cannot determine plugin id",
                    source_path.display()
                ))
            })?;

        let version =
            package.and_then(|p| p.version.clone()).unwrap_or_else(|| "0.0.0".to_string());
        let name = doc.name.unwrap_or_else(|| plugin_id.clone());
        let description = doc.description.or_else(|| package.and_then(|p| p.description.clone()));

        Ok(Self {
            kind: ManifestKind::Legacy,
            plugin_id,
            version,
            display: DisplayInfo { name, description },
            requires: doc.requires,
            setup: doc.setup,
            commands: doc.commands,
            source_path: source_path.to_path_buf(),
            dual: false,
            raw,
        })
    }

    /// Directory shell commands of this plugin run from.
    pub fn base_dir(&self) -> &Path {
        self.source_path.parent().unwrap_or_else(|| Path::new("."))
    }

    /// Short name used to qualify command ids.
    pub fn short_name(&self) -> &str {
        short_name(&self.plugin_id)
    }
}

/// Final path segment of a plugin id with any `@` scope marker removed.
///
/// `@scope/playbooks` becomes `playbooks`.
pub fn short_name(plugin_id: &str) -> &str {
    let last = plugin_id.rsplit('/').next().unwrap_or(plugin_id);
    last.strip_prefix('@').unwrap_or(last)
}

/// Id of the command that performs a plugin's one-time setup.
pub fn setup_command_id(plugin_id: &str) -> String {
    format!("{}:setup", short_name(plugin_id))
}
