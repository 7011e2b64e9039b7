//! Explicit file strategy.

use std::path::PathBuf;

use super::{load_candidate, DiscoveryContext, DiscoveryStrategy, Owner};
use crate::plugin::{DiscoveryResult, SourceKind};

/// Strategy treating roots that are regular files as manifest entry points.
///
/// Directory roots are left to the other strategies. A current-schema
/// manifest borrows display metadata from a sibling package.json when one
/// exists; a legacy manifest never does.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExplicitFileStrategy;

impl DiscoveryStrategy for ExplicitFileStrategy {
    fn name(&self) -> &str {
        "file"
    }

    fn source_kind(&self) -> SourceKind {
        SourceKind::File
    }

    fn discover(&self, roots: &[PathBuf], ctx: &DiscoveryContext) -> DiscoveryResult {
        let mut out = DiscoveryResult::new();

        for root in roots.iter().filter(|r| r.is_file()) {
            load_candidate(ctx, root, Owner::SiblingWhenCurrent, self.source_kind(), &mut out);
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

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_strategy_loads_file_roots_only() {
        let dir = TempDir::new().unwrap();
        let manifest = dir.path().join("custom.json");
        std::fs::write(
            &manifest,
            r#"{"id": "@kb/explicit", "version": "0.3.0", "display": {"name": "Explicit"}}"#,
        )
        .unwrap();

        let ctx = DiscoveryContext::default();
        let roots = vec![dir.path().to_path_buf(), manifest.clone()];
        let result = ExplicitFileStrategy.discover(&roots, &ctx);

        assert_eq!(result.plugins.len(), 1);
        let brief = &result.plugins[0];
        assert_eq!(brief.id, "@kb/explicit");
        assert_eq!(brief.display.name, "Explicit");
        assert_eq!(brief.source.kind, SourceKind::File);
        assert_eq!(brief.source.path, manifest);
    }

    #[test]
    fn test_file_strategy_malformed_json_continues() {
        let dir = TempDir::new().unwrap();
        let broken = dir.path().join("broken.json");
        std::fs::write(&broken, "{").unwrap();
        let good = dir.path().join("good.json");
        std::fs::write(&good, r#"{"id": "good", "version": "1.0.0"}"#).unwrap();

        let ctx = DiscoveryContext::default();
        let result = ExplicitFileStrategy.discover(&[broken.clone(), good], &ctx);

        assert_eq!(result.plugins.len(), 1);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].path, broken);
    }
}
