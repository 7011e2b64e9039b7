//! Shell execution for plugin `run` lines.
//!
//! Handles spawning shell processes and capturing output.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{Command as ProcessCommand, ExitStatus, Stdio};
use std::time::Instant;

/// A shell line to run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShellJob {
    /// Shell line passed to `sh -c` (`cmd /C` on Windows)
    pub command: String,

    /// Working directory
    pub working_dir: Option<PathBuf>,

    /// Extra environment variables
    pub env: BTreeMap<String, String>,
}

impl ShellJob {
    /// Create a job for a shell line.
    pub fn new(command: impl Into<String>) -> Self {
        Self { command: command.into(), ..Self::default() }
    }

    /// Set the working directory.
    #[must_use]
    pub fn with_working_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.working_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Add an environment variable.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Append arguments, each single-quoted for the shell.
    #[must_use]
    pub fn with_args(mut self, args: &[String]) -> Self {
        for arg in args {
            self.command.push(' ');
            self.command.push_str(&shell_quote(arg));
        }
        self
    }
}

/// Result of executing a job.
#[derive(Debug)]
pub struct ExecutionResult {
    /// Exit status of the process
    pub status: ExitStatus,

    /// Standard output (if captured)
    pub stdout: Option<String>,

    /// Standard error (if captured)
    pub stderr: Option<String>,
}

impl ExecutionResult {
    /// Exit code; a process killed by a signal reports `1`.
    pub fn code(&self) -> i32 {
        self.status.code().unwrap_or(1)
    }
}

/// Shell executor.
#[derive(Debug, Default, Clone, Copy)]
pub struct Executor {
    /// Whether to capture output (vs pass through to terminal)
    pub capture_output: bool,
}

impl Executor {
    /// Create a new executor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether to capture output.
    #[must_use]
    pub fn capture(mut self, capture: bool) -> Self {
        self.capture_output = capture;
        self
    }

    /// Execute a job.
    ///
    /// By default, this passes stdin/stdout/stderr through to the terminal
    /// for interactive commands. Use `capture(true)` to capture output instead.
    pub fn execute(&self, job: &ShellJob) -> anyhow::Result<ExecutionResult> {
        let start = Instant::now();

        let (shell, shell_arg) = get_shell();

        let mut cmd = ProcessCommand::new(shell);
        cmd.arg(shell_arg);
        cmd.arg(&job.command);

        if let Some(ref dir) = job.working_dir {
            cmd.current_dir(dir);
        }

        for (key, value) in &job.env {
            cmd.env(key, value);
        }

        if self.capture_output {
            cmd.stdout(Stdio::piped());
            cmd.stderr(Stdio::piped());
        } else {
            cmd.stdout(Stdio::inherit());
            cmd.stderr(Stdio::inherit());
            cmd.stdin(Stdio::inherit());
        }

        tracing::debug!(command = %job.command, dir = ?job.working_dir, "Spawning shell");
        let output = cmd
            .output()
            .map_err(|e| anyhow::anyhow!("Failed to spawn '{}': {e}", job.command))?;

        tracing::debug!(
            command = %job.command,
            code = ?output.status.code(),
            elapsed_ms = start.elapsed().as_millis(),
            "Shell finished"
        );

        let (stdout, stderr) = if self.capture_output {
            (
                Some(String::from_utf8_lossy(&output.stdout).to_string()),
                Some(String::from_utf8_lossy(&output.stderr).to_string()),
            )
        } else {
            (None, None)
        };

        Ok(ExecutionResult { status: output.status, stdout, stderr })
    }
}

/// Get the shell and argument for the current platform.
fn get_shell() -> (&'static str, &'static str) {
    if cfg!(target_os = "windows") {
        ("cmd", "/C")
    } else {
        ("sh", "-c")
    }
}

/// Quote one argument for a POSIX shell.
fn shell_quote(arg: &str) -> String {
    if !arg.is_empty()
        && arg.chars().all(|c| c.is_ascii_alphanumeric() || "-_./=:@%+,".contains(c))
    {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("plain"), "plain");
        assert_eq!(shell_quote("--flag=1"), "--flag=1");
        assert_eq!(shell_quote("two words"), "'two words'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_job_builder() {
        let job = ShellJob::new("echo")
            .with_args(&["a b".to_string(), "c".to_string()])
            .with_working_dir("/tmp")
            .with_env("KB_JSON", "1");

        assert_eq!(job.command, "echo 'a b' c");
        assert_eq!(job.working_dir, Some(PathBuf::from("/tmp")));
        assert_eq!(job.env.get("KB_JSON").map(String::as_str), Some("1"));
    }

    #[cfg(unix)]
    #[test]
    fn test_execute_captures_output_and_code() {
        let dir = tempfile::TempDir::new().unwrap();
        let job = ShellJob::new("echo \"$KB_TEST_VAR\"; pwd; exit 3")
            .with_working_dir(dir.path())
            .with_env("KB_TEST_VAR", "hello");

        let result = Executor::new().capture(true).execute(&job).unwrap();

        assert_eq!(result.code(), 3);
        let stdout = result.stdout.unwrap();
        assert!(stdout.starts_with("hello\n"));
        let dir_name = dir.path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(stdout.contains(&dir_name));
    }
}
