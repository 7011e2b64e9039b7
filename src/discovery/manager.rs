//! Discovery orchestration.

use std::path::PathBuf;
use std::sync::Arc;

use futures::future::join_all;

use super::{
    dedup, default_ignore_dirs, strategy_for, DedupOptions, DiscoveryContext, DiscoveryStrategy,
    DEFAULT_MAX_DEPTH,
};
use crate::core::DiscoveryConfig;
use crate::plugin::{DiscoveryResult, SourceKind};

/// Runs discovery strategies and reconciles their output.
pub struct DiscoveryManager {
    roots: Vec<PathBuf>,
    strategies: Vec<Arc<dyn DiscoveryStrategy>>,
    options: DedupOptions,
    max_depth: usize,
    ignore_dirs: Vec<String>,
}

impl DiscoveryManager {
    /// Create a manager with every strategy enabled.
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self {
            roots,
            strategies: SourceKind::ALL.into_iter().map(strategy_for).collect(),
            options: DedupOptions::default(),
            max_depth: DEFAULT_MAX_DEPTH,
            ignore_dirs: default_ignore_dirs(),
        }
    }

    /// Create a manager from the `[discovery]` config section.
    ///
    /// Unknown strategy names are skipped with a warning.
    pub fn from_config(config: &DiscoveryConfig, roots: Vec<PathBuf>) -> Self {
        let mut kinds: Vec<SourceKind> = config
            .strategies
            .iter()
            .filter_map(|name| {
                let kind = SourceKind::parse(name);
                if kind.is_none() {
                    tracing::warn!(strategy = %name, "Unknown discovery strategy in config");
                }
                kind
            })
            .collect();
        kinds.sort();
        kinds.dedup();

        Self {
            roots,
            strategies: kinds.into_iter().map(strategy_for).collect(),
            options: DedupOptions {
                prefer_current: config.prefer_current,
                allow_downgrade: config.allow_downgrade,
            },
            max_depth: config.max_depth,
            ignore_dirs: config.ignore_dirs.clone(),
        }
    }

    /// Replace the strategy set.
    #[must_use]
    pub fn with_strategies(mut self, strategies: Vec<Arc<dyn DiscoveryStrategy>>) -> Self {
        self.strategies = strategies;
        self
    }

    /// Set reconciliation options.
    #[must_use]
    pub fn with_options(mut self, options: DedupOptions) -> Self {
        self.options = options;
        self
    }

    /// Set the directory walk depth.
    #[must_use]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Names of the enabled strategies.
    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Reconciliation options in effect.
    pub fn options(&self) -> DedupOptions {
        self.options
    }

    /// Roots to scan: the configured ones, else the current directory.
    pub fn active_roots(&self) -> Vec<PathBuf> {
        if !self.roots.is_empty() {
            return self.roots.clone();
        }
        match std::env::current_dir() {
            Ok(cwd) => vec![cwd],
            Err(e) => {
                tracing::warn!(error = %e, "Cannot determine current directory");
                vec![PathBuf::from(".")]
            }
        }
    }

    /// Run every strategy concurrently, merge and deduplicate.
    ///
    /// Never fails: strategy panics and missing roots end up in `errors`.
    pub async fn discover(&self) -> DiscoveryResult {
        let roots = Arc::new(self.active_roots());
        let ctx = Arc::new(DiscoveryContext::new(self.max_depth, self.ignore_dirs.clone()));

        let mut root_errors = DiscoveryResult::new();
        for root in roots.iter().filter(|r| !r.exists()) {
            tracing::warn!(root = %root.display(), "Discovery root does not exist");
            root_errors.push_error(root, "root does not exist");
        }

        let tasks = self.strategies.iter().map(|strategy| {
            let strategy = Arc::clone(strategy);
            let roots = Arc::clone(&roots);
            let ctx = Arc::clone(&ctx);
            let name = strategy.name().to_string();
            async move {
                let handle = tokio::task::spawn_blocking(move || strategy.discover(&roots, &ctx));
                match handle.await {
                    Ok(result) => result,
                    Err(e) => {
                        tracing::warn!(strategy = %name, error = %e, "Discovery strategy crashed");
                        let mut result = DiscoveryResult::new();
                        result.push_error(format!("<strategy:{name}>"), e);
                        result
                    }
                }
            }
        });

        let mut results = vec![root_errors];
        results.extend(join_all(tasks).await);
        let merged = DiscoveryResult::merge(results);

        let (plugins, resolutions) = dedup(merged.plugins, &self.options);
        let manifests =
            plugins.iter().map(|p| (p.id.clone(), Arc::clone(&p.manifest))).collect();

        tracing::debug!(
            plugins = plugins.len(),
            errors = merged.errors.len(),
            warnings = merged.warnings.len(),
            documents = ctx.loader.len(),
            "Discovery finished"
        );

        DiscoveryResult {
            plugins,
            manifests,
            errors: merged.errors,
            warnings: merged.warnings,
            resolutions,
        }
    }
}

impl std::fmt::Debug for DiscoveryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryManager")
            .field("roots", &self.roots)
            .field("strategies", &self.strategy_names())
            .field("options", &self.options)
            .field("max_depth", &self.max_depth)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    struct PanickingStrategy;

    impl DiscoveryStrategy for PanickingStrategy {
        fn name(&self) -> &str {
            "panicky"
        }

        fn source_kind(&self) -> SourceKind {
            SourceKind::File
        }

        fn discover(&self, _roots: &[PathBuf], _ctx: &DiscoveryContext) -> DiscoveryResult {
            panic!("strategy exploded")
        }
    }

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn test_discover_dedups_across_strategies() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(
            root,
            "package.json",
            r#"{"name": "root", "workspaces": ["packages/*"], "kbLabs": {"manifest": "kb.plugin.json"}}"#,
        );
        write(root, "kb.plugin.json", r#"{"id": "root-plugin", "version": "0.1.0"}"#);
        write(
            root,
            "packages/mind/package.json",
            r#"{"name": "@kb/mind", "kbLabs": {"manifest": "kb.plugin.json"}}"#,
        );
        write(root, "packages/mind/kb.plugin.json", r#"{"id": "@kb/mind", "version": "1.1.0"}"#);

        let manager = DiscoveryManager::new(vec![root.to_path_buf()]);
        let result = manager.discover().await;

        let ids: Vec<&str> = result.plugins.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["@kb/mind", "root-plugin"]);
        // @kb/mind is seen by the workspace and directory strategies; workspace wins.
        assert_eq!(result.plugins[0].source.kind, SourceKind::Workspace);
        // root-plugin is seen by the package and directory strategies.
        assert_eq!(result.plugins[1].source.kind, SourceKind::Pkg);
        assert_eq!(result.manifests.len(), 2);
        assert!(Arc::ptr_eq(&result.manifests["@kb/mind"], &result.plugins[0].manifest));
        assert_eq!(result.resolutions.len(), 2);
        assert!(result.errors.is_empty());
    }

    #[tokio::test]
    async fn test_panicking_strategy_is_recorded() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a/kb.plugin.json", r#"{"id": "a", "version": "1.0.0"}"#);

        let manager = DiscoveryManager::new(vec![dir.path().to_path_buf()]).with_strategies(vec![
            Arc::new(PanickingStrategy),
            strategy_for(SourceKind::Dir),
        ]);
        let result = manager.discover().await;

        assert_eq!(result.plugins.len(), 1);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].path, PathBuf::from("<strategy:panicky>"));
    }

    #[tokio::test]
    async fn test_missing_root_is_recorded() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("gone");

        let result = DiscoveryManager::new(vec![missing.clone()]).discover().await;
        assert!(result.plugins.is_empty());
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].path, missing);
    }

    #[test]
    fn test_from_config_filters_strategies() {
        let config = DiscoveryConfig {
            strategies: vec!["file".into(), "bogus".into(), "workspace".into(), "file".into()],
            max_depth: 2,
            ..DiscoveryConfig::default()
        };
        let manager = DiscoveryManager::from_config(&config, Vec::new());

        assert_eq!(manager.strategy_names(), vec!["workspace", "file"]);
        assert_eq!(manager.max_depth, 2);
    }
}
