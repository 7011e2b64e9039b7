//! One-time plugin setup, run lazily before a plugin's first command.
//!
//! For each plugin the gate is evaluated at most once per process:
//!
//! ```text
//! no setup declared              -> Skipped
//! setup state already persisted  -> AlreadyDone
//! setup command exits 0          -> Done (state persisted)
//! setup command fails            -> Failed
//! state store or lookup broken   -> DegradedSkip (command still runs)
//! ```
//!
//! Only the setup command's own failure blocks execution. Anything wrong with
//! the surrounding infrastructure lets the command proceed.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde::Serialize;
use tokio::sync::Mutex;

use super::state::{setup_state_key, SetupState, StateError, StateStore, Ttl};
use super::{CommandContext, CommandDispatcher, CommandRegistry, Flags};
use crate::plugin::{setup_command_id, PluginBrief};

/// Where the gate ended up for a plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SetupPhase {
    Skipped,
    AlreadyDone,
    Done,
    Failed,
    DegradedSkip,
}

/// Result of evaluating the gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SetupOutcome {
    pub ok: bool,
    pub phase: SetupPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SetupOutcome {
    fn proceed(phase: SetupPhase) -> Self {
        Self { ok: true, phase, error: None }
    }

    fn degraded(reason: impl std::fmt::Display, plugin_id: &str) -> Self {
        tracing::warn!(plugin = plugin_id, reason = %reason, "Skipping setup check");
        Self::proceed(SetupPhase::DegradedSkip)
    }

    fn failed(error: String) -> Self {
        Self { ok: false, phase: SetupPhase::Failed, error: Some(error) }
    }
}

type StoreOpener = Box<dyn Fn() -> Result<Arc<dyn StateStore>, StateError> + Send + Sync>;

/// Per-process setup gate backed by a [`StateStore`].
pub struct LazySetupGate {
    opener: StoreOpener,
    store: OnceCell<Option<Arc<dyn StateStore>>>,
    outcomes: Mutex<HashMap<String, SetupOutcome>>,
}

impl LazySetupGate {
    /// Create a gate that opens its store on first use.
    pub fn new<F>(opener: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn StateStore>, StateError> + Send + Sync + 'static,
    {
        Self {
            opener: Box::new(opener),
            store: OnceCell::new(),
            outcomes: Mutex::new(HashMap::new()),
        }
    }

    /// Create a gate over an already open store.
    pub fn with_store(store: Arc<dyn StateStore>) -> Self {
        Self::new(move || Ok(Arc::clone(&store)))
    }

    fn store(&self) -> Option<&Arc<dyn StateStore>> {
        self.store
            .get_or_init(|| match (self.opener)() {
                Ok(store) => Some(store),
                Err(e) => {
                    tracing::warn!(error = %e, "State store unavailable");
                    None
                }
            })
            .as_ref()
    }

    /// Make sure the plugin's setup has run.
    ///
    /// The outcome is memoized per plugin id for the life of the gate.
    pub async fn ensure(
        &self,
        brief: &PluginBrief,
        registry: &CommandRegistry,
        dispatcher: &CommandDispatcher,
        ctx: &CommandContext,
    ) -> SetupOutcome {
        let mut outcomes = self.outcomes.lock().await;
        if let Some(outcome) = outcomes.get(&brief.id) {
            return outcome.clone();
        }

        let outcome = self.evaluate(brief, registry, dispatcher, ctx).await;
        tracing::debug!(plugin = %brief.id, phase = ?outcome.phase, "Setup gate evaluated");
        outcomes.insert(brief.id.clone(), outcome.clone());
        outcome
    }

    async fn evaluate(
        &self,
        brief: &PluginBrief,
        registry: &CommandRegistry,
        dispatcher: &CommandDispatcher,
        ctx: &CommandContext,
    ) -> SetupOutcome {
        if brief.manifest.setup.is_none() {
            return SetupOutcome::proceed(SetupPhase::Skipped);
        }

        let Some(store) = self.store() else {
            return SetupOutcome::degraded("state store unavailable", &brief.id);
        };

        let key = setup_state_key(&brief.id);
        match store.get(&key) {
            Ok(Some(_)) => return SetupOutcome::proceed(SetupPhase::AlreadyDone),
            Ok(None) => {}
            Err(e) => return SetupOutcome::degraded(e, &brief.id),
        }

        let setup_id = setup_command_id(&brief.id);
        let Some(command) = registry.get_for_plugin(&setup_id, &brief.id) else {
            let reason = format!("setup command '{setup_id}' not registered");
            return SetupOutcome::degraded(reason, &brief.id);
        };

        tracing::info!(plugin = %brief.id, command = %setup_id, "Running plugin setup");
        match dispatcher.invoke(command, ctx, &[], &Flags::default()).await {
            Ok(output) if output.exit_code() == 0 => {
                persist_done(store.as_ref(), brief);
                SetupOutcome::proceed(SetupPhase::Done)
            }
            Ok(output) => SetupOutcome::failed(format!(
                "Setup command '{setup_id}' exited with code {}",
                output.exit_code()
            )),
            Err(e) => SetupOutcome::failed(format!("Setup command '{setup_id}' failed: {e:#}")),
        }
    }

    /// Record a setup that completed outside the gate, such as a direct
    /// invocation of the setup command.
    pub async fn record_done(&self, brief: &PluginBrief) {
        let mut outcomes = self.outcomes.lock().await;
        if let Some(store) = self.store() {
            persist_done(store.as_ref(), brief);
        }
        outcomes.insert(brief.id.clone(), SetupOutcome::proceed(SetupPhase::Done));
    }

    /// Forget the persisted setup state of a plugin, and any memoized outcome.
    pub async fn reset(&self, plugin_id: &str) -> Result<bool, StateError> {
        self.outcomes.lock().await.remove(plugin_id);
        let store = self
            .store()
            .ok_or_else(|| StateError::Unavailable("state store could not be opened".to_string()))?;
        store.delete(&setup_state_key(plugin_id))
    }
}

/// Persist a completed setup. Failures are logged and swallowed.
fn persist_done(store: &dyn StateStore, brief: &PluginBrief) {
    let state = SetupState::now(brief.version.clone());
    let persisted = serde_json::to_value(&state).map_err(|e| e.to_string()).and_then(|value| {
        store.set(&setup_state_key(&brief.id), value, Ttl::Infinite).map_err(|e| e.to_string())
    });
    if let Err(e) = persisted {
        tracing::warn!(plugin = %brief.id, error = %e, "Failed to persist setup state");
    }
}

impl std::fmt::Debug for LazySetupGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazySetupGate")
            .field("store_opened", &self.store.get().is_some())
            .finish_non_exhaustive()
    }
}
