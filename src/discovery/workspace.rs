//! Monorepo workspace strategy.
//!
//! Package globs come from the root package.json `workspaces` field or from
//! `pnpm-workspace.yaml`. Patterns starting with `!` exclude packages.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::{load_candidate, read_package_json, DiscoveryContext, DiscoveryStrategy, Owner};
use crate::plugin::{DiscoveryResult, PluginError, PluginResult, SourceKind};

/// Strategy scanning the packages of a monorepo workspace.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkspaceStrategy;

impl DiscoveryStrategy for WorkspaceStrategy {
    fn name(&self) -> &str {
        "workspace"
    }

    fn source_kind(&self) -> SourceKind {
        SourceKind::Workspace
    }

    fn discover(&self, roots: &[PathBuf], ctx: &DiscoveryContext) -> DiscoveryResult {
        let mut out = DiscoveryResult::new();

        for root in roots.iter().filter(|r| r.is_dir()) {
            let patterns = match workspace_patterns(root) {
                Ok(patterns) => patterns,
                Err(e) => {
                    tracing::warn!(
                        root = %root.display(),
                        error = %e,
                        "Invalid workspace declaration"
                    );
                    out.push_error(root, e);
                    continue;
                }
            };
            if patterns.is_empty() {
                continue;
            }

            for package_dir in expand_patterns(root, &patterns, &mut out) {
                match read_package_json(&package_dir) {
                    Ok(Some(package)) => {
                        if let Some(manifest) = package.manifest_path() {
                            let path = package_dir.join(manifest);
                            let owner = Owner::Package(&package);
                            load_candidate(ctx, &path, owner, self.source_kind(), &mut out);
                        }
                    }
                    Ok(None) => {}
                    Err(e) => out.push_error(package_dir.join("package.json"), e),
                }
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

/// Get workspace patterns from package.json or pnpm-workspace.yaml.
///
/// A root without either declaration yields no patterns.
pub fn workspace_patterns(root: &Path) -> PluginResult<Vec<String>> {
    if let Some(package) = read_package_json(root)? {
        if let Some(workspaces) = package.workspaces {
            return Ok(workspaces.patterns());
        }
    }

    let pnpm_workspace = root.join("pnpm-workspace.yaml");
    if pnpm_workspace.is_file() {
        #[derive(Deserialize)]
        struct PnpmWorkspace {
            #[serde(default)]
            packages: Vec<String>,
        }

        let content = std::fs::read_to_string(&pnpm_workspace)
            .map_err(|source| PluginError::Read { path: pnpm_workspace.clone(), source })?;
        let workspace: PnpmWorkspace = serde_yaml::from_str(&content).map_err(|e| {
            PluginError::Workspace { path: pnpm_workspace.clone(), message: e.to_string() }
        })?;
        return Ok(workspace.packages);
    }

    Ok(Vec::new())
}

/// Expand include globs into package directories, minus `!` exclusions.
///
/// The result is sorted so scanning order does not depend on the filesystem.
fn expand_patterns(
    root: &Path,
    patterns: &[String],
    out: &mut DiscoveryResult,
) -> BTreeSet<PathBuf> {
    let mut excludes = Vec::new();
    let mut includes = Vec::new();
    for pattern in patterns {
        match pattern.strip_prefix('!') {
            Some(rest) => match glob::Pattern::new(trim_relative(rest)) {
                Ok(p) => excludes.push(p),
                Err(e) => out.push_error(root, invalid_pattern(root, pattern, &e)),
            },
            None => includes.push(pattern.as_str()),
        }
    }

    // Glob metacharacters in the root itself must match literally.
    let escaped_root = PathBuf::from(glob::Pattern::escape(&root.to_string_lossy()));
    let mut dirs = BTreeSet::new();
    for pattern in includes {
        let full = escaped_root.join(trim_relative(pattern));
        let entries = match glob::glob(&full.to_string_lossy()) {
            Ok(entries) => entries,
            Err(e) => {
                out.push_error(root, invalid_pattern(root, pattern, &e));
                continue;
            }
        };

        for entry in entries {
            match entry {
                Ok(path) if path.is_dir() => {
                    let relative = path.strip_prefix(root).unwrap_or(&path);
                    if !excludes.iter().any(|p| p.matches_path(relative)) {
                        dirs.insert(path);
                    }
                }
                Ok(_) => {}
                Err(e) => out.push_error(e.path().to_path_buf(), e.error()),
            }
        }
    }
    dirs
}

fn trim_relative(pattern: &str) -> &str {
    pattern.strip_prefix("./").unwrap_or(pattern)
}

fn invalid_pattern(root: &Path, pattern: &str, error: &dyn std::fmt::Display) -> PluginError {
    PluginError::Workspace {
        path: root.to_path_buf(),
        message: format!("invalid workspace pattern '{pattern}': {error}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn plugin_package(dir: &Path, rel: &str, name: &str, id: &str) {
        write(
            dir,
            &format!("{rel}/package.json"),
            &format!(r#"{{"name": "{name}", "kbLabs": {{"manifest": "kb.plugin.json"}}}}"#),
        );
        write(dir, &format!("{rel}/kb.plugin.json"), &format!(r#"{{"id": "{id}", "version": "1.0.0"}}"#));
    }

    #[test]
    fn test_patterns_from_package_json() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "package.json", r#"{"workspaces": ["packages/*", "apps/*"]}"#);
        assert_eq!(workspace_patterns(dir.path()).unwrap(), vec!["packages/*", "apps/*"]);
    }

    #[test]
    fn test_patterns_from_pnpm_workspace() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "package.json", r#"{"name": "root"}"#);
        write(dir.path(), "pnpm-workspace.yaml", "packages:\n  - 'packages/*'\n  - '!packages/skip'\n");
        assert_eq!(workspace_patterns(dir.path()).unwrap(), vec!["packages/*", "!packages/skip"]);
    }

    #[test]
    fn test_no_workspace_declaration() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "package.json", r#"{"name": "single"}"#);
        assert!(workspace_patterns(dir.path()).unwrap().is_empty());

        let ctx = DiscoveryContext::default();
        let result = WorkspaceStrategy.discover(&[dir.path().to_path_buf()], &ctx);
        assert!(result.plugins.is_empty());
        assert!(result.errors.is_empty());
    }

    #[test]
    fn test_workspace_strategy_finds_packages() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(root, "package.json", r#"{"workspaces": ["packages/*", "!packages/skip"]}"#);
        plugin_package(root, "packages/b", "@kb/b", "@kb/b");
        plugin_package(root, "packages/a", "@kb/a", "@kb/a");
        plugin_package(root, "packages/skip", "@kb/skip", "@kb/skip");
        write(root, "packages/plain/package.json", r#"{"name": "plain"}"#);

        let ctx = DiscoveryContext::default();
        let result = WorkspaceStrategy.discover(&[root.to_path_buf()], &ctx);

        let ids: Vec<&str> = result.plugins.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["@kb/a", "@kb/b"]);
        assert!(result.plugins.iter().all(|p| p.source.kind == SourceKind::Workspace));
        assert!(result.errors.is_empty());
    }

    #[test]
    fn test_broken_member_does_not_hide_others() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(root, "package.json", r#"{"workspaces": ["packages/*"]}"#);
        plugin_package(root, "packages/good", "@kb/good", "@kb/good");
        write(root, "packages/bad/package.json", r#"{"name": "bad", "kbLabs": {"manifest": "kb.plugin.json"}}"#);
        write(root, "packages/bad/kb.plugin.json", "{ nope");

        let ctx = DiscoveryContext::default();
        let result = WorkspaceStrategy.discover(&[root.to_path_buf()], &ctx);

        assert_eq!(result.plugins.len(), 1);
        assert_eq!(result.errors.len(), 1);
    }

    #[test]
    fn test_root_with_glob_metacharacters() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("ws[1]");
        write(&root, "package.json", r#"{"workspaces": ["packages/*"]}"#);
        plugin_package(&root, "packages/a", "@kb/a", "@kb/a");

        let ctx = DiscoveryContext::default();
        let result = WorkspaceStrategy.discover(&[root.clone()], &ctx);

        assert_eq!(result.plugins.len(), 1);
        assert_eq!(result.plugins[0].id, "@kb/a");
        assert!(result.errors.is_empty());
    }

    #[test]
    fn test_invalid_pnpm_yaml_is_recorded() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "pnpm-workspace.yaml", "packages: [unterminated");

        let ctx = DiscoveryContext::default();
        let result = WorkspaceStrategy.discover(&[dir.path().to_path_buf()], &ctx);

        assert!(result.plugins.is_empty());
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].error.contains("Invalid workspace declaration"));
    }
}
