//! kb - plugin-driven command line for kb workspaces.
//!
//! Discovers plugins from the workspace, reconciles duplicates and runs the
//! commands they contribute.

#![allow(clippy::single_match_else)]

use std::io;
use std::path::PathBuf;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use serde_json::json;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use kb_plugins::core::Config;
use kb_plugins::App;

/// Plugin-driven command line for kb workspaces
#[derive(Parser)]
#[command(name = "kb")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    /// Plugin root to scan (repeatable)
    #[arg(long = "root", global = true, env = "KB_PLUGIN_ROOTS", value_delimiter = ',')]
    roots: Vec<PathBuf>,

    /// Setup state file
    #[arg(long, global = true, env = "KB_STATE_FILE")]
    state_file: Option<PathBuf>,

    /// Configuration file (defaults to ./kb.config.toml, then the user config)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect discovered plugins
    Plugins {
        /// Plugins operation
        #[command(subcommand)]
        operation: PluginsOperation,
    },

    /// Run a plugin command
    Run {
        /// Command id, e.g. `playbooks:run`
        command: String,

        /// Arguments passed to the command
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Show configuration
    Config {
        /// Show config file path
        #[arg(long)]
        path: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum PluginsOperation {
    /// List reconciled plugins
    List,

    /// Show every candidate for a plugin and why the winner won
    Explain {
        /// Plugin id
        id: String,
    },

    /// List registered commands with their availability
    Commands,

    /// Forget that a plugin's setup has run
    ResetSetup {
        /// Plugin id
        id: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so JSON on stdout stays parseable
    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Commands::Plugins { ref operation } => cmd_plugins(&cli, operation)?,
        Commands::Run { ref command, ref args } => {
            let code = cmd_run(&cli, command, args)?;
            std::process::exit(code);
        }
        Commands::Config { path } => cmd_config(&cli, path)?,
        Commands::Completions { shell } => cmd_completions(shell),
    }

    Ok(())
}

/// Load configuration from `--config` or the default locations.
fn load_config(cli: &Cli) -> Result<Config> {
    match &cli.config {
        Some(path) => Config::load_from_file(path),
        None => Config::load(),
    }
}

/// Build the application and run discovery.
async fn init_app(cli: &Cli) -> Result<App> {
    let config = load_config(cli)?;
    let mut app = App::new(config, &cli.roots, cli.state_file.as_deref(), cli.json)?;
    app.initialize().await?;
    Ok(app)
}

/// Run a plugin command and return its exit code.
fn cmd_run(cli: &Cli, command: &str, args: &[String]) -> Result<i32> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let app = init_app(cli).await?;
        Ok(app.run_command(command, args).await)
    })
}

/// Handle plugin inspection commands.
fn cmd_plugins(cli: &Cli, operation: &PluginsOperation) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        if let PluginsOperation::ResetSetup { id } = operation {
            let config = load_config(cli)?;
            let app = App::new(config, &cli.roots, cli.state_file.as_deref(), cli.json)?;
            let removed = app.reset_setup(id).await?;
            if app.json {
                println!("{}", json!({ "ok": true, "plugin": id, "removed": removed }));
            } else if removed {
                println!("Cleared setup state for {id}");
            } else {
                println!("No setup state recorded for {id}");
            }
            return Ok(());
        }

        let app = init_app(cli).await?;
        match operation {
            PluginsOperation::List => list_plugins(&app),
            PluginsOperation::Explain { id } => explain_plugin(&app, id),
            PluginsOperation::Commands => list_commands(&app),
            PluginsOperation::ResetSetup { .. } => Ok(()),
        }
    })
}

/// List reconciled plugins.
fn list_plugins(app: &App) -> Result<()> {
    let result = app.result();

    if app.json {
        let output = json!({
            "ok": true,
            "partial": app.is_partial(),
            "plugins": result.plugins,
            "errors": result.errors,
            "warnings": result.warnings,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    if result.plugins.is_empty() {
        println!("No plugins found.");
    } else {
        println!("Discovered plugins:\n");
        for plugin in &result.plugins {
            println!(
                "  {} v{} [{}] ({}: {})",
                plugin.id,
                plugin.version,
                plugin.kind,
                plugin.source.kind,
                plugin.source.path.display()
            );
            if let Some(ref desc) = plugin.display.description {
                println!("      {desc}");
            }
        }
        println!("\nTotal: {} plugin(s)", result.plugins.len());
    }

    for warning in &result.warnings {
        eprintln!("warning: {}: {}", warning.path.display(), warning.message);
    }
    print_partial_notice(app);
    Ok(())
}

/// Show how a plugin id was reconciled.
fn explain_plugin(app: &App, id: &str) -> Result<()> {
    let Some(resolution) = app.resolution(id) else {
        anyhow::bail!("Plugin not found: {id}");
    };

    if app.json {
        let mut output = serde_json::to_value(resolution)?;
        output["partial"] = json!(app.is_partial());
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    let winner = &resolution.winner;
    println!("{id}");
    println!(
        "  winner: v{} [{}] ({}: {})",
        winner.version,
        winner.kind,
        winner.source.kind,
        winner.source.path.display()
    );

    if resolution.decisions.is_empty() {
        println!("  no competing candidates");
    }
    for decision in &resolution.decisions {
        let loser = &decision.loser;
        let why = decision.rule.map_or("indistinguishable, kept first", |r| r.describe());
        println!(
            "  lost:   v{} [{}] ({}: {}) - {why}",
            loser.version,
            loser.kind,
            loser.source.kind,
            loser.source.path.display()
        );
    }

    print_partial_notice(app);
    Ok(())
}

/// List registered commands.
fn list_commands(app: &App) -> Result<()> {
    let registry = app.registry();

    if app.json {
        let describe = |cmd: &kb_plugins::RegisteredCommand| {
            json!({
                "id": cmd.id(),
                "plugin": cmd.plugin_id,
                "group": cmd.manifest.group,
                "describe": cmd.manifest.describe,
                "available": cmd.available,
                "reason": cmd.unavailable_reason,
                "hint": cmd.hint,
                "setup": cmd.setup,
                "source": cmd.source,
            })
        };
        let output = json!({
            "ok": true,
            "partial": registry.is_partial(),
            "commands": registry.commands().map(describe).collect::<Vec<_>>(),
            "shadowed": registry.shadowed().iter().map(describe).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    if registry.is_empty() {
        println!("No commands registered.");
    } else {
        for cmd in registry.commands() {
            let marker = if cmd.available { "✓" } else { "✗" };
            println!(
                "  {marker} {} - {}",
                cmd.id(),
                cmd.manifest.describe.as_deref().unwrap_or("")
            );
            if let Some(ref reason) = cmd.unavailable_reason {
                println!("      {reason}");
            }
        }
        println!("\nTotal: {} command(s)", registry.len());
    }

    if !registry.shadowed().is_empty() {
        println!("\nShadowed:");
        for cmd in registry.shadowed() {
            println!("  {} from {} ({})", cmd.id(), cmd.plugin_id, cmd.source.path.display());
        }
    }

    print_partial_notice(app);
    Ok(())
}

/// Tell the user that some discovery sources failed.
fn print_partial_notice(app: &App) {
    if !app.is_partial() {
        return;
    }
    let errors = &app.result().errors;
    eprintln!("\nResults are partial: {} discovery error(s)", errors.len());
    for error in errors {
        eprintln!("  {}: {}", error.path.display(), error.error);
    }
}

/// Show configuration.
fn cmd_config(cli: &Cli, show_path: bool) -> Result<()> {
    let config = load_config(cli)?;

    if show_path {
        match config.source.or_else(|| Config::config_dir().map(|d| d.join("config.toml"))) {
            Some(path) => println!("{}", path.display()),
            None => anyhow::bail!("Could not determine config directory"),
        }
        return Ok(());
    }

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&config)?);
    } else {
        println!("{}", toml::to_string_pretty(&config)?);
    }
    Ok(())
}

/// Generate shell completions.
fn cmd_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "kb", &mut io::stdout());
}
