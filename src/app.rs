//! Application state and lifecycle.
//!
//! The `App` ties discovery, the command registry, the setup gate and the
//! dispatcher together for one process. It is what the binary drives, and
//! what embedders use when they want the whole pipeline rather than its parts.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::commands::{
    CommandContext, CommandDispatcher, CommandRegistry, Flags, HandlerRegistry,
    JsonFileStateStore, LazySetupGate, NodeModuleResolver, StateError, StateStore, EXIT_FAILURE,
};
use crate::core::Config;
use crate::discovery::{DiscoveryManager, Resolution};
use crate::plugin::DiscoveryResult;

/// Main application state.
#[derive(Debug)]
pub struct App {
    /// Effective configuration
    pub config: Config,

    /// Directory commands resolve dependencies from
    pub cwd: PathBuf,

    /// Emit JSON instead of text
    pub json: bool,

    roots: Vec<PathBuf>,
    state_path: Option<PathBuf>,
    handlers: Arc<HandlerRegistry>,
    ctx: CommandContext,
    gate: LazySetupGate,
    dispatcher: CommandDispatcher,
    result: DiscoveryResult,
    registry: CommandRegistry,
}

impl App {
    /// Create an application for the current directory.
    ///
    /// `roots` and `state_path` come from the command line and take
    /// precedence over the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the current working directory cannot be determined.
    pub fn new(
        config: Config,
        roots: &[PathBuf],
        state_path: Option<&Path>,
        json: bool,
    ) -> anyhow::Result<Self> {
        let cwd = std::env::current_dir()?;
        let json = json || config.output.json;
        let roots = config.resolve_roots(roots);
        let state_path = config.resolve_state_path(state_path);
        let handlers = Arc::new(HandlerRegistry::new());

        Ok(Self {
            ctx: CommandContext::new(cwd.clone(), json),
            gate: Self::file_gate(state_path.clone()),
            dispatcher: CommandDispatcher::new(),
            result: DiscoveryResult::new(),
            registry: CommandRegistry::new(
                Arc::new(NodeModuleResolver::new(&cwd)),
                Arc::clone(&handlers),
            ),
            config,
            cwd,
            json,
            roots,
            state_path,
            handlers,
        })
    }

    fn file_gate(state_path: Option<PathBuf>) -> LazySetupGate {
        LazySetupGate::new(move || match &state_path {
            Some(path) => {
                let store = JsonFileStateStore::open(path)?;
                Ok(Arc::new(store) as Arc<dyn StateStore>)
            }
            None => Err(StateError::Unavailable("no data directory for state".to_string())),
        })
    }

    /// Use in-process handlers for manifests that name one.
    pub fn with_handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = Arc::new(handlers);
        self
    }

    /// Resolve dependencies and run commands from another directory.
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = cwd.into();
        self.ctx.cwd = self.cwd.clone();
        self
    }

    /// Write command output somewhere other than the process streams.
    pub fn with_context(mut self, ctx: CommandContext) -> Self {
        self.json = ctx.json;
        self.cwd = ctx.cwd.clone();
        self.ctx = ctx;
        self
    }

    /// Keep setup state in the given store instead of the state file.
    pub fn with_state_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.gate = LazySetupGate::with_store(store);
        self
    }

    /// Discover plugins and build the command registry.
    pub async fn initialize(&mut self) -> anyhow::Result<()> {
        let manager = DiscoveryManager::from_config(&self.config.discovery, self.roots.clone());
        tracing::debug!(
            roots = ?manager.active_roots(),
            strategies = ?manager.strategy_names(),
            "Starting discovery"
        );

        self.result = manager.discover().await;
        self.registry = CommandRegistry::from_discovery(
            &self.result,
            Arc::new(NodeModuleResolver::new(&self.cwd)),
            Arc::clone(&self.handlers),
        );

        tracing::debug!(
            plugins = self.result.plugins.len(),
            commands = self.registry.len(),
            errors = self.result.errors.len(),
            "Initialized"
        );
        Ok(())
    }

    /// Run a command by id and return the process exit code.
    ///
    /// The owning plugin's setup runs first unless the command is the setup
    /// command itself. A successful direct setup run is recorded like a gated one.
    pub async fn run_command(&self, id: &str, argv: &[String]) -> i32 {
        let (flags, positional) = Flags::parse(argv);
        let mut ctx = self.ctx.clone();
        ctx.json |= flags.json;

        let Some(command) = self.registry.get(id) else {
            self.dispatcher.report_failure(id, "unknown command", &ctx);
            return EXIT_FAILURE;
        };

        if command.available && !command.setup {
            if let Some(brief) = self.registry.plugin(&command.plugin_id) {
                let outcome = self.gate.ensure(brief, &self.registry, &self.dispatcher, &ctx).await;
                if !outcome.ok {
                    let error = outcome.error.as_deref().unwrap_or("setup failed");
                    self.dispatcher.report_failure(id, error, &ctx);
                    return EXIT_FAILURE;
                }
            }
        }

        let code = self.dispatcher.run(command, &ctx, &positional, &flags).await;
        if command.available && command.setup && code == 0 {
            if let Some(brief) = self.registry.plugin(&command.plugin_id) {
                self.gate.record_done(brief).await;
            }
        }
        code
    }

    /// Forget a plugin's completed setup.
    pub async fn reset_setup(&self, plugin_id: &str) -> Result<bool, StateError> {
        self.gate.reset(plugin_id).await
    }

    /// Reconciliation trace for a plugin id.
    pub fn resolution(&self, id: &str) -> Option<&Resolution> {
        self.result.resolutions.iter().find(|r| r.id == id)
    }

    /// The command registry.
    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    /// The reconciled discovery result.
    pub fn result(&self) -> &DiscoveryResult {
        &self.result
    }

    /// Roots discovery scans.
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Resolved state file location, if any.
    pub fn state_path(&self) -> Option<&Path> {
        self.state_path.as_deref()
    }

    /// Whether any discovery source failed.
    pub fn is_partial(&self) -> bool {
        self.registry.is_partial()
    }
}
