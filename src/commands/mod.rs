//! Command registration, availability and execution.
//!
//! Plugins contribute commands through their manifests. The
//! [`CommandRegistry`] indexes them and records whether each command's
//! runtime dependencies resolve. The [`CommandDispatcher`] runs a command and
//! maps its result to an exit code, and the [`LazySetupGate`] makes sure a
//! plugin's one-time setup has run before any of its commands do.

mod availability;
mod context;
mod dispatch;
mod handler;
mod registry;
mod setup;
mod state;

pub use availability::{
    check_requires, Availability, DependencyResolver, NodeModuleResolver, MISSING_DEPENDENCY_HINT,
};
pub use context::{CommandContext, Flags, Output, SharedBuffer};
pub use dispatch::{CommandDispatcher, Refusal, EXIT_FAILURE, EXIT_SUCCESS, EXIT_UNAVAILABLE};
pub use handler::{
    loader_for, CommandHandler, CommandLoader, CommandOutput, HandlerRegistry, ShellHandler,
};
pub use registry::{qualify_command_id, CommandManifest, CommandRegistry, RegisteredCommand};
pub use setup::{LazySetupGate, SetupOutcome, SetupPhase};
pub use state::{setup_state_key, JsonFileStateStore, SetupState, StateError, StateStore, Ttl};
