//! Core functionality for kb.
//!
//! Configuration loading and shell execution shared by the rest of the crate.

mod config;
mod executor;

pub use config::{
    expand_path, Config, DiscoveryConfig, OutputConfig, StateConfig, LOCAL_CONFIG_FILE,
};
pub use executor::{ExecutionResult, Executor, ShellJob};
