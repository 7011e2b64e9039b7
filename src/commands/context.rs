//! Invocation context handed to command handlers.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

/// A shared, line-oriented output sink.
#[derive(Clone)]
pub struct Output {
    inner: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl Output {
    /// Process standard output.
    pub fn stdout() -> Self {
        Self::from_writer(std::io::stdout())
    }

    /// Process standard error.
    pub fn stderr() -> Self {
        Self::from_writer(std::io::stderr())
    }

    /// Wrap any writer.
    pub fn from_writer(writer: impl Write + Send + 'static) -> Self {
        Self { inner: Arc::new(Mutex::new(Box::new(writer))) }
    }

    /// Write one line.
    pub fn write_line(&self, line: &str) -> std::io::Result<()> {
        let mut writer = self.inner.lock();
        writeln!(writer, "{line}")?;
        writer.flush()
    }

    /// Write raw text without adding a newline.
    pub fn write_str(&self, text: &str) -> std::io::Result<()> {
        let mut writer = self.inner.lock();
        writer.write_all(text.as_bytes())?;
        writer.flush()
    }

    /// Write a value as a single JSON line.
    pub fn write_json<T: Serialize + ?Sized>(&self, value: &T) -> std::io::Result<()> {
        let line = serde_json::to_string(value)?;
        self.write_line(&line)
    }
}

impl std::fmt::Debug for Output {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Output").finish_non_exhaustive()
    }
}

/// In-memory writer whose contents can be read back.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far.
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }

    /// An [`Output`] writing into this buffer.
    pub fn output(&self) -> Output {
        Output::from_writer(self.clone())
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Everything a handler needs to know about the current invocation.
#[derive(Debug, Clone)]
pub struct CommandContext {
    /// Directory dependency probes and commands resolve from.
    pub cwd: PathBuf,
    /// JSON output mode.
    pub json: bool,
    /// Capture child process output into `stdout`/`stderr` instead of
    /// inheriting the terminal.
    pub capture_output: bool,
    pub stdout: Output,
    pub stderr: Output,
}

impl CommandContext {
    /// Context writing to the process streams.
    pub fn new(cwd: PathBuf, json: bool) -> Self {
        Self {
            cwd,
            json,
            capture_output: false,
            stdout: Output::stdout(),
            stderr: Output::stderr(),
        }
    }

    /// Context writing into in-memory buffers.
    pub fn buffered(
        cwd: PathBuf,
        json: bool,
        stdout: &SharedBuffer,
        stderr: &SharedBuffer,
    ) -> Self {
        Self { cwd, json, capture_output: true, stdout: stdout.output(), stderr: stderr.output() }
    }
}

/// Flags parsed from the argument list of a plugin command.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Flags {
    /// `--json` was passed.
    pub json: bool,
    /// `--name value`, `--name=value` and bare `--switch` flags.
    pub values: BTreeMap<String, Value>,
}

impl Flags {
    /// Split an argument list into flags and positional arguments.
    ///
    /// Everything after `--` is positional.
    pub fn parse(argv: &[String]) -> (Self, Vec<String>) {
        let mut flags = Self::default();
        let mut positional = Vec::new();
        let mut iter = argv.iter().peekable();

        while let Some(arg) = iter.next() {
            if arg == "--" {
                positional.extend(iter.by_ref().cloned());
                break;
            }

            let Some(name) = arg.strip_prefix("--").filter(|n| !n.is_empty()) else {
                positional.push(arg.clone());
                continue;
            };

            if name == "json" {
                flags.json = true;
                continue;
            }

            if let Some((key, value)) = name.split_once('=') {
                flags.values.insert(key.to_string(), Value::String(value.to_string()));
            } else if let Some(value) = iter.next_if(|next| !next.starts_with("--")) {
                flags.values.insert(name.to_string(), Value::String(value.clone()));
            } else {
                flags.values.insert(name.to_string(), Value::Bool(true));
            }
        }

        (flags, positional)
    }

    /// String value of a flag.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(Value::as_str)
    }
}
