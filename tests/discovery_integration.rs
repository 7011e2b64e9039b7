//! Integration tests for plugin discovery and reconciliation.

use std::fs;
use std::path::Path;

use kb_plugins::core::DiscoveryConfig;
use kb_plugins::discovery::{DedupOptions, DedupRule, DiscoveryManager};
use kb_plugins::plugin::{ManifestKind, SourceKind};
use serial_test::serial;
use tempfile::TempDir;

fn write(dir: &Path, rel: &str, content: &str) {
    let path = dir.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

/// Monorepo with two workspace packages, a legacy plugin in a tools
/// directory and a manifest under node_modules.
fn monorepo() -> TempDir {
    let temp = TempDir::new().unwrap();
    let root = temp.path();

    write(root, "pnpm-workspace.yaml", "packages:\n  - 'packages/*'\n");
    write(
        root,
        "packages/mind/package.json",
        r#"{"name": "@kb/mind", "version": "2.0.0", "kbLabs": {"manifest": "kb.plugin.json"}}"#,
    );
    write(
        root,
        "packages/mind/kb.plugin.json",
        r#"{"id": "@kb/mind", "version": "2.0.0", "cli": {"commands": [{"id": "query", "run": "true"}]}}"#,
    );
    write(root, "packages/docs/package.json", r#"{"name": "@kb/docs", "version": "0.1.0"}"#);
    write(
        root,
        "tools/legacy/kb.plugin.json",
        r#"{"name": "legacy-tools", "commands": [{"id": "sync", "run": "true"}]}"#,
    );
    write(root, "node_modules/ignored/kb.plugin.json", r#"{"id": "ignored", "version": "1.0.0"}"#);
    temp
}

#[tokio::test]
async fn test_monorepo_discovery() {
    let temp = monorepo();
    let manager = DiscoveryManager::new(vec![temp.path().to_path_buf()]);

    let result = manager.discover().await;

    let ids: Vec<&str> = result.plugins.iter().map(|p| p.id.as_str()).collect();
    assert!(ids.contains(&"@kb/mind"));
    assert!(!ids.contains(&"ignored"));
    assert_eq!(result.plugins.len(), result.manifests.len());

    let mind = result.plugins.iter().find(|p| p.id == "@kb/mind").unwrap();
    assert_eq!(mind.source.kind, SourceKind::Workspace);

    let legacy = result.plugins.iter().find(|p| p.kind == ManifestKind::Legacy).unwrap();
    assert_eq!(legacy.source.kind, SourceKind::Dir);
    assert!(result.warnings.iter().any(|w| w.message.contains("legacy manifest schema")));
}

#[tokio::test]
async fn test_every_plugin_id_is_unique() {
    let temp = monorepo();
    // Point the file strategy at a manifest the other strategies also find.
    let roots = vec![
        temp.path().to_path_buf(),
        temp.path().join("packages/mind/kb.plugin.json"),
    ];

    let result = DiscoveryManager::new(roots).discover().await;

    let mut ids: Vec<&str> = result.plugins.iter().map(|p| p.id.as_str()).collect();
    let total = ids.len();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), total);

    let resolution = result.resolutions.iter().find(|r| r.id == "@kb/mind").unwrap();
    assert_eq!(resolution.candidates.len(), 3);
    assert_eq!(resolution.winner.source.kind, SourceKind::Workspace);
    assert!(resolution.decisions.iter().all(|d| d.rule == Some(DedupRule::SourcePriority)));
}

#[tokio::test]
async fn test_current_beats_higher_legacy() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    write(
        root,
        "package.json",
        r#"{"name": "@kb/p", "version": "2.0.0", "kbLabs": {"manifest": "legacy.json"}}"#,
    );
    write(root, "legacy.json", r#"{"commands": [{"id": "x", "run": "true"}]}"#);
    write(root, "plugins/p/kb.plugin.json", r#"{"id": "@kb/p", "version": "1.0.0"}"#);

    let result = DiscoveryManager::new(vec![root.to_path_buf()]).discover().await;

    let winner = result.plugins.iter().find(|p| p.id == "@kb/p").unwrap();
    assert_eq!(winner.kind, ManifestKind::Current);
    assert_eq!(winner.version, "1.0.0");
}

#[tokio::test]
async fn test_allow_downgrade_lets_version_win_across_sources() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    write(root, "package.json", r#"{"name": "root", "workspaces": ["packages/*"]}"#);
    write(
        root,
        "packages/p/package.json",
        r#"{"name": "p", "version": "1.1.0", "kbLabs": {"manifest": "kb.plugin.json"}}"#,
    );
    write(root, "packages/p/kb.plugin.json", r#"{"id": "p", "version": "1.1.0"}"#);
    write(root, "vendor/p/kb.plugin.json", r#"{"id": "p", "version": "1.2.0"}"#);

    let roots = vec![root.to_path_buf()];
    let strict = DiscoveryManager::new(roots.clone()).discover().await;
    assert_eq!(strict.plugins[0].version, "1.1.0");

    let options = DedupOptions { allow_downgrade: true, ..DedupOptions::default() };
    let relaxed = DiscoveryManager::new(roots).with_options(options).discover().await;
    assert_eq!(relaxed.plugins[0].version, "1.2.0");
}

#[tokio::test]
async fn test_broken_manifests_are_collected_not_raised() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    write(root, "good/kb.plugin.json", r#"{"id": "good", "version": "1.0.0"}"#);
    write(root, "bad/kb.plugin.json", "{ nope");
    write(root, "odd/kb.plugin.json", r#"{"hello": "world"}"#);

    let result = DiscoveryManager::new(vec![root.to_path_buf()]).discover().await;

    assert_eq!(result.plugins.len(), 1);
    assert_eq!(result.errors.len(), 2);
    assert!(result.errors.iter().any(|e| e.path.ends_with("bad/kb.plugin.json")));
    assert!(result.errors.iter().any(|e| e.path.ends_with("odd/kb.plugin.json")));
}

#[tokio::test]
async fn test_config_disables_strategies() {
    let temp = monorepo();
    let config =
        DiscoveryConfig { strategies: vec!["dir".to_string()], ..DiscoveryConfig::default() };
    let manager = DiscoveryManager::from_config(&config, vec![temp.path().to_path_buf()]);
    assert_eq!(manager.strategy_names(), vec!["directory"]);

    let result = manager.discover().await;
    assert!(result.plugins.iter().all(|p| p.source.kind == SourceKind::Dir));
}

#[tokio::test]
#[serial]
async fn test_defaults_to_current_directory() {
    let temp = TempDir::new().unwrap();
    write(temp.path(), "here/kb.plugin.json", r#"{"id": "here", "version": "0.1.0"}"#);

    let original = std::env::current_dir().unwrap();
    std::env::set_current_dir(temp.path()).unwrap();
    let result = DiscoveryManager::new(Vec::new()).discover().await;
    std::env::set_current_dir(original).unwrap();

    assert_eq!(result.plugins.len(), 1);
    assert_eq!(result.plugins[0].id, "here");
}
