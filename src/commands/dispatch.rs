//! Command dispatch and exit-code mapping.

use serde::Serialize;
use serde_json::json;

use super::{CommandContext, CommandOutput, Flags, Output, RegisteredCommand};

/// Command succeeded.
pub const EXIT_SUCCESS: i32 = 0;
/// Command ran and failed, or could not run.
pub const EXIT_FAILURE: i32 = 1;
/// Command exists but its dependencies are missing.
pub const EXIT_UNAVAILABLE: i32 = 2;

/// Structured refusal for an unavailable command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Refusal<'a> {
    pub ok: bool,
    pub available: bool,
    pub command: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<&'a str>,
}

impl<'a> Refusal<'a> {
    pub fn for_command(command: &'a RegisteredCommand) -> Self {
        Self {
            ok: false,
            available: false,
            command: command.id(),
            reason: command.unavailable_reason.as_deref(),
            hint: command.hint.as_deref(),
        }
    }
}

/// Runs registered commands and maps their results to exit codes.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandDispatcher;

impl CommandDispatcher {
    pub fn new() -> Self {
        Self
    }

    /// Run a command and return the process exit code.
    ///
    /// An unavailable command is refused with exit code 2 and its loader is
    /// never called.
    pub async fn run(
        &self,
        command: &RegisteredCommand,
        ctx: &CommandContext,
        argv: &[String],
        flags: &Flags,
    ) -> i32 {
        if !command.available {
            tracing::debug!(command = %command.id(), "Refusing unavailable command");
            self.refuse(command, ctx);
            return EXIT_UNAVAILABLE;
        }

        match self.invoke(command, ctx, argv, flags).await {
            Ok(output) => {
                if let CommandOutput::Json(value) = &output {
                    emit(&ctx.stdout, |out| out.write_json(value));
                }
                output.exit_code()
            }
            Err(e) => {
                tracing::debug!(command = %command.id(), error = %e, "Command failed");
                self.report_failure(command.id(), &format!("{e:#}"), ctx);
                EXIT_FAILURE
            }
        }
    }

    /// Resolve the implementation and run it, without availability checks.
    pub async fn invoke(
        &self,
        command: &RegisteredCommand,
        ctx: &CommandContext,
        argv: &[String],
        flags: &Flags,
    ) -> anyhow::Result<CommandOutput> {
        let handler = (command.manifest.loader)()?;
        handler.run(ctx, argv, flags).await
    }

    /// Emit the refusal for an unavailable command.
    pub fn refuse(&self, command: &RegisteredCommand, ctx: &CommandContext) {
        let refusal = Refusal::for_command(command);
        if ctx.json {
            emit(&ctx.stdout, |out| out.write_json(&refusal));
        } else {
            let mut line = format!("Command '{}' is unavailable", refusal.command);
            if let Some(reason) = refusal.reason {
                line.push_str(&format!(": {reason}"));
            }
            emit(&ctx.stderr, |out| out.write_line(&line));
            if let Some(hint) = refusal.hint {
                emit(&ctx.stderr, |out| out.write_line(&format!("Hint: {hint}")));
            }
        }
    }

    /// Report a failure for `command` in the context's output mode.
    pub fn report_failure(&self, command: &str, error: &str, ctx: &CommandContext) {
        if ctx.json {
            let payload = json!({ "ok": false, "command": command, "error": error });
            emit(&ctx.stdout, |out| out.write_json(&payload));
        } else {
            emit(&ctx.stderr, |out| out.write_line(&format!("Error: {command}: {error}")));
        }
    }
}

fn emit(output: &Output, write: impl FnOnce(&Output) -> std::io::Result<()>) {
    if let Err(e) = write(output) {
        tracing::warn!(error = %e, "Failed to write command output");
    }
}
