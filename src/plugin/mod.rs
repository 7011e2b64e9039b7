//! Plugin model for kb.
//!
//! This module holds everything that describes a plugin independently of how
//! it was found: the brief produced by discovery, the parsed manifest, the
//! schema compatibility layer and the per-run document loader.
//!
//! # Manifest Example (current schema)
//!
//! ```json
//! {
//!   "id": "@kb/playbooks",
//!   "version": "1.4.0",
//!   "display": { "name": "Playbooks", "description": "Team runbooks" },
//!   "requires": ["yaml"],
//!   "setup": { "run": "node scripts/setup.js" },
//!   "cli": {
//!     "commands": [
//!       { "id": "run", "describe": "Run a playbook", "run": "node bin/run.js" }
//!     ]
//!   }
//! }
//! ```

mod compat;
mod error;
mod loader;
pub(crate) mod manifest;
mod types;

pub use compat::{
    check_dual_manifest, classify, detect_version, migrate_legacy_to_current, ClassifiedManifest,
    ManifestVersion,
};
pub use error::{PluginError, PluginResult};
pub use loader::{resolve_export, ModuleLoader};
pub use manifest::{
    setup_command_id, short_name, CliSection, CommandDecl, CurrentManifestDoc, DisplayDoc,
    LegacyManifestDoc, Manifest, PackageMeta, SetupDecl,
};
pub use types::{
    DiscoveryError, DiscoveryResult, DiscoveryWarning, DisplayInfo, ManifestKind, PluginBrief,
    PluginSource, SourceKind, MANIFEST_FILE,
};
