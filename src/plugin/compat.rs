//! Manifest schema compatibility.
//!
//! Classification is done once, here, by sniffing structural fields. Everything
//! downstream matches on [`ClassifiedManifest`] and never looks at raw fields
//! again.
//!
//! The dual-manifest check uses overlapping predicates on purpose: a document
//! carrying both generations' markers is classified as current *and* flagged
//! as dual. It still loads under the current classification; the flag only
//! surfaces a warning.

use serde::Deserialize;
use serde_json::{json, Value};

use super::manifest::{CurrentManifestDoc, LegacyManifestDoc};

/// Schema generation of a raw manifest document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestVersion {
    Current,
    Legacy,
    Unknown,
}

/// A manifest document tagged with its schema generation.
#[derive(Debug, Clone, PartialEq)]
pub enum ClassifiedManifest {
    Current(CurrentManifestDoc),
    Legacy(LegacyManifestDoc),
    Unknown,
}

fn has_current_markers(raw: &Value) -> bool {
    raw.get("id").is_some() && raw.get("version").is_some()
}

fn has_legacy_markers(raw: &Value) -> bool {
    raw.get("manifestVersion").is_some() || raw.get("commands").is_some()
}

/// Detect the schema generation of a raw manifest.
///
/// `id` and `version` together mean current; `manifestVersion` or `commands`
/// mean legacy; anything else is unknown.
pub fn detect_version(raw: &Value) -> ManifestVersion {
    if has_current_markers(raw) {
        ManifestVersion::Current
    } else if has_legacy_markers(raw) {
        ManifestVersion::Legacy
    } else {
        ManifestVersion::Unknown
    }
}

/// Whether a manifest carries markers of both schema generations.
pub fn check_dual_manifest(raw: &Value) -> bool {
    has_current_markers(raw) && has_legacy_markers(raw)
}

/// Classify a raw manifest and deserialize it into the matching document.
pub fn classify(raw: &Value) -> Result<ClassifiedManifest, serde_json::Error> {
    match detect_version(raw) {
        ManifestVersion::Current => {
            CurrentManifestDoc::deserialize(raw).map(ClassifiedManifest::Current)
        }
        ManifestVersion::Legacy => {
            LegacyManifestDoc::deserialize(raw).map(ClassifiedManifest::Legacy)
        }
        ManifestVersion::Unknown => Ok(ClassifiedManifest::Unknown),
    }
}

/// Best-effort upgrade of a legacy manifest to the current schema.
///
/// The result never carries commands: legacy command declarations are not
/// translated. It exists for warnings and telemetry, not for running anything.
pub fn migrate_legacy_to_current(raw: &Value, plugin_id: &str) -> Value {
    let name = raw.get("name").and_then(Value::as_str).unwrap_or(plugin_id);
    let version = raw.get("version").and_then(Value::as_str).unwrap_or("0.0.0");
    let mut display = json!({ "name": name });
    if let Some(description) = raw.get("description").and_then(Value::as_str) {
        display["description"] = Value::String(description.to_string());
    }

    json!({
        "id": plugin_id,
        "version": version,
        "display": display,
        "cli": { "commands": [] },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_current() {
        let raw = json!({ "id": "p", "version": "1.0.0" });
        assert_eq!(detect_version(&raw), ManifestVersion::Current);
    }

    #[test]
    fn test_detect_legacy() {
        assert_eq!(detect_version(&json!({ "manifestVersion": "1" })), ManifestVersion::Legacy);
        assert_eq!(detect_version(&json!({ "commands": [] })), ManifestVersion::Legacy);
        // `id` alone is not enough for current.
        assert_eq!(detect_version(&json!({ "id": "p", "commands": [] })), ManifestVersion::Legacy);
    }

    #[test]
    fn test_detect_unknown() {
        assert_eq!(detect_version(&json!({ "name": "p" })), ManifestVersion::Unknown);
        assert_eq!(detect_version(&json!([1, 2, 3])), ManifestVersion::Unknown);
        assert_eq!(detect_version(&json!("manifest")), ManifestVersion::Unknown);
    }

    #[test]
    fn test_dual_manifest_classified_current_and_flagged() {
        let raw = json!({ "id": "p", "version": "1.0.0", "manifestVersion": "1.0" });
        assert!(check_dual_manifest(&raw));
        assert!(matches!(classify(&raw), Ok(ClassifiedManifest::Current(_))));
    }

    #[test]
    fn test_plain_manifests_are_not_dual() {
        assert!(!check_dual_manifest(&json!({ "id": "p", "version": "1.0.0" })));
        assert!(!check_dual_manifest(&json!({ "commands": [] })));
    }

    #[test]
    fn test_classify_rejects_malformed_fields() {
        let raw = json!({ "commands": "not-a-list" });
        assert!(classify(&raw).is_err());
    }

    #[test]
    fn test_migrate_has_no_commands() {
        let raw = json!({
            "manifestVersion": "1.0",
            "name": "Release",
            "description": "Ship it",
            "commands": [{ "id": "ship" }]
        });
        let migrated = migrate_legacy_to_current(&raw, "@kb/release");

        assert_eq!(migrated["id"], "@kb/release");
        assert_eq!(migrated["version"], "0.0.0");
        assert_eq!(migrated["display"]["name"], "Release");
        assert_eq!(migrated["display"]["description"], "Ship it");
        assert_eq!(migrated["cli"]["commands"], json!([]));
        assert_eq!(detect_version(&migrated), ManifestVersion::Current);
    }
}
