//! Directory tree strategy.
//!
//! Finds manifest files named by convention anywhere under a root, down to the
//! configured depth.

use std::path::PathBuf;

use walkdir::WalkDir;

use super::{load_candidate, read_package_json, DiscoveryContext, DiscoveryStrategy, Owner};
use crate::plugin::{DiscoveryResult, SourceKind, MANIFEST_FILE};

/// Strategy walking directory trees for `kb.plugin.json` files.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectoryStrategy;

impl DiscoveryStrategy for DirectoryStrategy {
    fn name(&self) -> &str {
        "directory"
    }

    fn source_kind(&self) -> SourceKind {
        SourceKind::Dir
    }

    fn discover(&self, roots: &[PathBuf], ctx: &DiscoveryContext) -> DiscoveryResult {
        let mut out = DiscoveryResult::new();

        for root in roots.iter().filter(|r| r.is_dir()) {
            let walker = WalkDir::new(root)
                .max_depth(ctx.max_depth)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|e| {
                    // The root itself is never filtered, even if its name is ignored.
                    e.depth() == 0
                        || !e.file_type().is_dir()
                        || !ctx.is_ignored(&e.file_name().to_string_lossy())
                });

            for entry in walker {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        let path = e.path().map_or_else(|| root.clone(), |p| p.to_path_buf());
                        tracing::warn!(path = %path.display(), error = %e, "Directory walk failed");
                        out.push_error(path, e);
                        continue;
                    }
                };

                if !entry.file_type().is_file() || entry.file_name() != MANIFEST_FILE {
                    continue;
                }

                let manifest_path = entry.path();
                let dir = manifest_path.parent().unwrap_or(root);
                match read_package_json(dir) {
                    Ok(Some(package)) => {
                        let owner = Owner::Package(&package);
                        load_candidate(ctx, manifest_path, owner, self.source_kind(), &mut out);
                    }
                    Ok(None) => {
                        let owner = Owner::Detached;
                        load_candidate(ctx, manifest_path, owner, self.source_kind(), &mut out);
                    }
                    Err(e) => {
                        let message = format!("ignored package.json: {e}");
                        out.push_warning(dir.join("package.json"), message);
                        let owner = Owner::Detached;
                        load_candidate(ctx, manifest_path, owner, self.source_kind(), &mut out);
                    }
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
