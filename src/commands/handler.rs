//! Command implementations and their lazy resolution.
//!
//! A manifest refers to its implementation either by the name of a handler
//! the host registered, or by a shell `run` line. Neither is resolved until
//! the command is actually dispatched.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::{CommandContext, Flags};
use crate::core::{Executor, ShellJob};
use crate::plugin::{PluginError, PluginResult};

/// What a handler returned.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutput {
    /// Explicit exit code.
    Exit(i32),
    /// Structured result; printed as JSON, exits 0.
    Json(Value),
    /// Nothing to report; exits 0.
    Unit,
}

impl CommandOutput {
    /// Exit code for this output. Only `Exit` carries one.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Exit(code) => *code,
            Self::Json(_) | Self::Unit => 0,
        }
    }
}

/// A runnable command implementation.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Run with the raw argument list and the flags parsed from it.
    async fn run(
        &self,
        ctx: &CommandContext,
        argv: &[String],
        flags: &Flags,
    ) -> anyhow::Result<CommandOutput>;
}

/// Lazily resolves a command implementation.
pub type CommandLoader = Arc<dyn Fn() -> PluginResult<Arc<dyn CommandHandler>> + Send + Sync>;

/// Handlers registered by the host, looked up by name.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn CommandHandler>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under a name.
    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn CommandHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    /// Builder-style [`HandlerRegistry::register`].
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, handler: Arc<dyn CommandHandler>) -> Self {
        self.register(name, handler);
        self
    }

    /// Look up a handler.
    pub fn get(&self, name: &str) -> Option<Arc<dyn CommandHandler>> {
        self.handlers.get(name).cloned()
    }

    /// Registered handler names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry").field("handlers", &self.names()).finish()
    }
}

/// Build the loader for a command declaration.
///
/// A named handler takes precedence over a `run` line. A declaration with
/// neither still gets a loader; it fails when invoked.
pub fn loader_for(
    handlers: &Arc<HandlerRegistry>,
    handler: Option<&str>,
    run: Option<&str>,
    command_id: &str,
    base_dir: &Path,
) -> CommandLoader {
    if let Some(name) = handler {
        let handlers = Arc::clone(handlers);
        let name = name.to_string();
        return Arc::new(move || {
            handlers.get(&name).ok_or_else(|| PluginError::UnknownHandler(name.clone()))
        });
    }

    if let Some(line) = run {
        let shell: Arc<dyn CommandHandler> = Arc::new(ShellHandler::new(line, base_dir));
        return Arc::new(move || Ok(Arc::clone(&shell)));
    }

    let command_id = command_id.to_string();
    Arc::new(move || Err(PluginError::MissingHandler(command_id.clone())))
}

/// Runs a manifest `run` line through the shell.
///
/// The line runs from the plugin's directory with the command arguments
/// appended. `KB_JSON`, `KB_CWD` and `KB_PLUGIN_ROOT` describe the invocation.
#[derive(Debug, Clone)]
pub struct ShellHandler {
    command: String,
    base_dir: PathBuf,
}

impl ShellHandler {
    /// Create a handler for a shell line.
    pub fn new(command: impl Into<String>, base_dir: impl AsRef<Path>) -> Self {
        Self { command: command.into(), base_dir: base_dir.as_ref().to_path_buf() }
    }
}

#[async_trait]
impl CommandHandler for ShellHandler {
    async fn run(
        &self,
        ctx: &CommandContext,
        argv: &[String],
        _flags: &Flags,
    ) -> anyhow::Result<CommandOutput> {
        let job = ShellJob::new(self.command.clone())
            .with_args(argv)
            .with_working_dir(&self.base_dir)
            .with_env("KB_JSON", if ctx.json { "1" } else { "0" })
            .with_env("KB_CWD", ctx.cwd.to_string_lossy())
            .with_env("KB_PLUGIN_ROOT", self.base_dir.to_string_lossy());

        let executor = Executor::new().capture(ctx.capture_output);
        let result = tokio::task::spawn_blocking(move || executor.execute(&job)).await??;

        if let Some(stdout) = result.stdout.as_deref().filter(|s| !s.is_empty()) {
            ctx.stdout.write_str(stdout)?;
        }
        if let Some(stderr) = result.stderr.as_deref().filter(|s| !s.is_empty()) {
            ctx.stderr.write_str(stderr)?;
        }

        tracing::debug!(command = %self.command, code = result.code(), "Shell command finished");
        Ok(CommandOutput::Exit(result.code()))
    }
}
