//! Configuration management for kb.
//!
//! Handles loading configuration from TOML files and merging it with
//! command-line and environment overrides.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::discovery::{default_ignore_dirs, DEFAULT_MAX_DEPTH};
use crate::plugin::SourceKind;

/// Config file looked up in the current directory.
pub const LOCAL_CONFIG_FILE: &str = "kb.config.toml";

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Plugin discovery settings
    pub discovery: DiscoveryConfig,

    /// Persisted state settings
    pub state: StateConfig,

    /// Output settings
    pub output: OutputConfig,

    /// File the configuration was loaded from, if any
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

/// Plugin discovery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Roots to scan when none are given on the command line
    pub roots: Vec<String>,

    /// Enabled strategies: workspace, pkg, dir, file
    pub strategies: Vec<String>,

    /// Prefer current-schema manifests over legacy ones
    pub prefer_current: bool,

    /// Let a higher version from a less authoritative source win
    pub allow_downgrade: bool,

    /// Maximum depth for directory walks
    pub max_depth: usize,

    /// Directories never scanned
    pub ignore_dirs: Vec<String>,
}

/// Persisted state settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// State file path (`~` is expanded)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Output settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Emit JSON instead of text
    pub json: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            strategies: SourceKind::ALL.iter().map(|k| k.as_str().to_string()).collect(),
            prefer_current: true,
            allow_downgrade: false,
            max_depth: DEFAULT_MAX_DEPTH,
            ignore_dirs: default_ignore_dirs(),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// Looks for config in:
    /// 1. `kb.config.toml` in current directory
    /// 2. `~/.config/kb/config.toml`
    /// 3. Falls back to defaults
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from_dir(Path::new("."))
    }

    /// Same as [`Config::load`], with `dir` standing in for the current directory.
    pub fn load_from_dir(dir: &Path) -> anyhow::Result<Self> {
        let local_config = dir.join(LOCAL_CONFIG_FILE);
        if local_config.exists() {
            return Self::load_from_file(&local_config);
        }

        if let Some(config_dir) = Self::config_dir() {
            let global_config = config_dir.join("config.toml");
            if global_config.exists() {
                return Self::load_from_file(&global_config);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config {}: {e}", path.display()))?;
        let mut config: Self = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Invalid config {}: {e}", path.display()))?;
        config.source = Some(path.to_path_buf());
        tracing::debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Get the config directory path.
    pub fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("kb"))
    }

    /// Get the data directory path (for persisted plugin state).
    pub fn data_dir() -> Option<PathBuf> {
        dirs::data_dir().map(|d| d.join("kb"))
    }

    /// Roots to scan.
    ///
    /// Command-line roots (which already include `KB_PLUGIN_ROOTS`) win over
    /// configured ones. An empty result means "current directory".
    pub fn resolve_roots(&self, cli_roots: &[PathBuf]) -> Vec<PathBuf> {
        if !cli_roots.is_empty() {
            return cli_roots.iter().map(|p| expand_path(&p.to_string_lossy())).collect();
        }
        self.discovery.roots.iter().map(|r| expand_path(r)).collect()
    }

    /// State file location: command line, then config, then the data dir.
    pub fn resolve_state_path(&self, cli_path: Option<&Path>) -> Option<PathBuf> {
        cli_path
            .map(|p| expand_path(&p.to_string_lossy()))
            .or_else(|| self.state.path.as_deref().map(expand_path))
            .or_else(|| Self::data_dir().map(|d| d.join("state.json")))
    }
}

/// Expand a leading `~` in a path.
pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}
