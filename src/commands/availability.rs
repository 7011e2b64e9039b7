//! Per-command runtime dependency checks.
//!
//! A command is available when every module it `requires` can be resolved
//! from the current working directory. This is a presence probe only:
//! nothing is loaded or installed.

use std::path::{Path, PathBuf};

use serde::Serialize;

/// Remediation hint attached to every missing-dependency refusal.
pub const MISSING_DEPENDENCY_HINT: &str =
    "Install the plugin's dependencies in this workspace (e.g. `pnpm install`) and retry";

/// Runtime built-in modules that always resolve.
const BUILTIN_MODULES: &[&str] = &[
    "assert", "buffer", "child_process", "cluster", "crypto", "dgram", "dns", "events", "fs",
    "fs/promises", "http", "http2", "https", "module", "net", "os", "path", "perf_hooks",
    "process", "querystring", "readline", "stream", "string_decoder", "timers", "tls", "tty",
    "url", "util", "v8", "vm", "worker_threads", "zlib",
];

/// Answers whether a dependency specifier can be resolved.
pub trait DependencyResolver: Send + Sync {
    fn resolve(&self, specifier: &str) -> bool;
}

/// Resolves specifiers the way a Node-style package layout would.
///
/// Built-in module names (optionally `node:`-prefixed) always resolve.
/// Relative and absolute paths must exist. Anything else is a package name
/// looked up as `node_modules/<name>` in `cwd` and each of its ancestors.
#[derive(Debug, Clone)]
pub struct NodeModuleResolver {
    cwd: PathBuf,
}

impl NodeModuleResolver {
    /// Create a resolver rooted at `cwd`.
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self { cwd: cwd.into() }
    }
}

impl DependencyResolver for NodeModuleResolver {
    fn resolve(&self, specifier: &str) -> bool {
        let specifier = specifier.trim();
        if specifier.is_empty() {
            return false;
        }
        if specifier.starts_with("node:") || BUILTIN_MODULES.contains(&specifier) {
            return true;
        }
        if specifier.starts_with("./") || specifier.starts_with("../") {
            return self.cwd.join(specifier).exists();
        }
        if Path::new(specifier).is_absolute() {
            return Path::new(specifier).exists();
        }

        let package = package_name(specifier);
        self.cwd.ancestors().any(|dir| dir.join("node_modules").join(package).exists())
    }
}

/// Package part of a bare specifier: `@scope/pkg/sub` → `@scope/pkg`, `pkg/sub` → `pkg`.
fn package_name(specifier: &str) -> &str {
    let mut parts = specifier.splitn(3, '/');
    let first = parts.next().unwrap_or(specifier);
    if first.starts_with('@') {
        match parts.next() {
            Some(second) => &specifier[..first.len() + 1 + second.len()],
            None => specifier,
        }
    } else {
        first
    }
}

/// Availability of a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Availability {
    Available,
    Unavailable { reason: String, hint: String },
}

impl Availability {
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available)
    }
}

/// Check a list of requirements in order; the first miss decides.
pub fn check_requires<'a>(
    requires: impl IntoIterator<Item = &'a str>,
    resolver: &dyn DependencyResolver,
) -> Availability {
    for name in requires {
        if !resolver.resolve(name) {
            tracing::debug!(dependency = name, "Unresolvable dependency");
            return Availability::Unavailable {
                reason: format!("Missing dependency: {name}"),
                hint: MISSING_DEPENDENCY_HINT.to_string(),
            };
        }
    }
    Availability::Available
}
