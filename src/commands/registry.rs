//! Registry of plugin commands.
//!
//! Commands are registered plugin by plugin in a deterministic order. When two
//! plugins contribute the same command id the first one registered keeps it;
//! later ones are retained as shadowed entries so they can be reported.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::availability::{check_requires, Availability, DependencyResolver};
use super::handler::{loader_for, CommandLoader, HandlerRegistry};
use crate::plugin::{setup_command_id, DiscoveryResult, PluginBrief, PluginSource};

/// The unit the registry indexes.
#[derive(Clone)]
pub struct CommandManifest {
    /// Fully qualified id (`short-name:command`).
    pub id: String,
    pub group: String,
    pub describe: Option<String>,
    /// Plugin-level requirements followed by command-level ones.
    pub requires: Vec<String>,
    /// Resolves the implementation on first use.
    pub loader: CommandLoader,
}

impl std::fmt::Debug for CommandManifest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandManifest")
            .field("id", &self.id)
            .field("group", &self.group)
            .field("describe", &self.describe)
            .field("requires", &self.requires)
            .finish_non_exhaustive()
    }
}

/// A command together with its availability and origin.
#[derive(Debug, Clone)]
pub struct RegisteredCommand {
    pub manifest: CommandManifest,
    pub plugin_id: String,
    pub available: bool,
    pub unavailable_reason: Option<String>,
    pub hint: Option<String>,
    pub source: PluginSource,
    /// Hidden behind an earlier command with the same id.
    pub shadowed: bool,
    /// This is a plugin's setup command.
    pub setup: bool,
}

impl RegisteredCommand {
    pub fn id(&self) -> &str {
        &self.manifest.id
    }
}

/// Qualify a declared command id with the plugin's short name.
///
/// Ids that already contain `:` are taken as qualified.
pub fn qualify_command_id(short_name: &str, id: &str) -> String {
    if id.contains(':') {
        id.to_string()
    } else {
        format!("{short_name}:{id}")
    }
}

/// Registry for plugin commands.
pub struct CommandRegistry {
    commands: BTreeMap<String, RegisteredCommand>,
    shadowed: Vec<RegisteredCommand>,
    plugins: BTreeMap<String, PluginBrief>,
    partial: bool,
    resolver: Arc<dyn DependencyResolver>,
    handlers: Arc<HandlerRegistry>,
}

impl std::fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("commands", &self.commands.len())
            .field("shadowed", &self.shadowed.len())
            .field("plugins", &self.plugins.len())
            .field("partial", &self.partial)
            .finish_non_exhaustive()
    }
}

impl CommandRegistry {
    /// Create an empty registry.
    pub fn new(resolver: Arc<dyn DependencyResolver>, handlers: Arc<HandlerRegistry>) -> Self {
        Self {
            commands: BTreeMap::new(),
            shadowed: Vec::new(),
            plugins: BTreeMap::new(),
            partial: false,
            resolver,
            handlers,
        }
    }

    /// Build a registry from a reconciled discovery result.
    ///
    /// Plugins register by source priority, then id. Any discovery error
    /// marks the registry partial.
    pub fn from_discovery(
        result: &DiscoveryResult,
        resolver: Arc<dyn DependencyResolver>,
        handlers: Arc<HandlerRegistry>,
    ) -> Self {
        let mut registry = Self::new(resolver, handlers);

        let mut plugins: Vec<&PluginBrief> = result.plugins.iter().collect();
        plugins.sort_by(|a, b| {
            a.source.kind.priority().cmp(&b.source.kind.priority()).then_with(|| a.id.cmp(&b.id))
        });
        for brief in plugins {
            registry.register_plugin(brief);
        }

        if result.has_errors() {
            registry.mark_partial();
        }

        tracing::debug!(
            commands = registry.commands.len(),
            shadowed = registry.shadowed.len(),
            partial = registry.partial,
            "Command registry built"
        );
        registry
    }

    /// Register every command a plugin contributes, plus its setup command.
    pub fn register_plugin(&mut self, brief: &PluginBrief) {
        let manifest = &brief.manifest;
        let short = manifest.short_name();
        let base_dir = manifest.base_dir();

        for decl in &manifest.commands {
            let id = qualify_command_id(short, &decl.id);
            let mut requires = manifest.requires.clone();
            requires.extend(decl.requires.iter().cloned());
            let (handler, run) = (decl.handler.as_deref(), decl.run.as_deref());
            let loader = loader_for(&self.handlers, handler, run, &id, base_dir);

            let command = CommandManifest {
                group: decl.group.clone().unwrap_or_else(|| short.to_string()),
                describe: decl.describe.clone(),
                requires,
                loader,
                id,
            };
            self.register(command, brief, false);
        }

        if let Some(setup) = &manifest.setup {
            let id = setup_command_id(&brief.id);
            let (handler, run) = (setup.handler.as_deref(), setup.run.as_deref());
            let loader = loader_for(&self.handlers, handler, run, &id, base_dir);
            let describe = setup
                .describe
                .clone()
                .or_else(|| Some(format!("Run one-time setup for {}", brief.id)));

            let command = CommandManifest {
                group: short.to_string(),
                describe,
                requires: manifest.requires.clone(),
                loader,
                id,
            };
            self.register(command, brief, true);
        }

        self.plugins.insert(brief.id.clone(), brief.clone());
    }

    /// Register one command on behalf of a plugin.
    pub fn register(&mut self, manifest: CommandManifest, brief: &PluginBrief, setup: bool) {
        let (available, unavailable_reason, hint) = match self.check_requires(&manifest) {
            Availability::Available => (true, None, None),
            Availability::Unavailable { reason, hint } => (false, Some(reason), Some(hint)),
        };

        let mut command = RegisteredCommand {
            manifest,
            plugin_id: brief.id.clone(),
            available,
            unavailable_reason,
            hint,
            source: brief.source.clone(),
            shadowed: false,
            setup,
        };

        if let Some(existing) = self.commands.get(command.id()) {
            tracing::debug!(
                command = %command.id(),
                kept = %existing.plugin_id,
                shadowed = %command.plugin_id,
                "Command shadowed"
            );
            command.shadowed = true;
            self.shadowed.push(command);
        } else {
            self.commands.insert(command.manifest.id.clone(), command);
        }
    }

    /// Check a command's requirements from the registry's resolver.
    pub fn check_requires(&self, manifest: &CommandManifest) -> Availability {
        check_requires(manifest.requires.iter().map(String::as_str), self.resolver.as_ref())
    }

    /// Look up a command by id.
    pub fn get(&self, id: &str) -> Option<&RegisteredCommand> {
        self.commands.get(id)
    }

    /// Look up a command contributed by a specific plugin, shadowed or not.
    pub fn get_for_plugin(&self, id: &str, plugin_id: &str) -> Option<&RegisteredCommand> {
        self.commands
            .get(id)
            .filter(|c| c.plugin_id == plugin_id)
            .or_else(|| self.shadowed.iter().find(|c| c.id() == id && c.plugin_id == plugin_id))
    }

    /// All visible commands, ordered by id.
    pub fn commands(&self) -> impl Iterator<Item = &RegisteredCommand> {
        self.commands.values()
    }

    /// Commands hidden behind an earlier registration.
    pub fn shadowed(&self) -> &[RegisteredCommand] {
        &self.shadowed
    }

    /// Registered plugin by id.
    pub fn plugin(&self, id: &str) -> Option<&PluginBrief> {
        self.plugins.get(id)
    }

    /// All registered plugins, ordered by id.
    pub fn plugins(&self) -> impl Iterator<Item = &PluginBrief> {
        self.plugins.values()
    }

    /// Number of visible commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether no command is registered.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Whether some discovery source failed.
    pub fn is_partial(&self) -> bool {
        self.partial
    }

    /// Mark the registry partial. There is no way back within a run.
    pub fn mark_partial(&mut self) {
        self.partial = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::availability::MISSING_DEPENDENCY_HINT;
    use crate::plugin::{CurrentManifestDoc, Manifest, SourceKind};
    use serde_json::json;
    use std::path::Path;

    struct Resolves(Vec<&'static str>);

    impl DependencyResolver for Resolves {
        fn resolve(&self, specifier: &str) -> bool {
            self.0.contains(&specifier)
        }
    }

    fn brief(raw: serde_json::Value, source: SourceKind, path: &str) -> PluginBrief {
        let doc: CurrentManifestDoc = serde_json::from_value(raw.clone()).unwrap();
        let manifest = Manifest::from_current(doc, raw, Path::new(path), None).unwrap();
        PluginBrief::new(manifest, source)
    }

    fn registry(resolvable: Vec<&'static str>) -> CommandRegistry {
        CommandRegistry::new(Arc::new(Resolves(resolvable)), Arc::new(HandlerRegistry::new()))
    }

    #[test]
    fn test_qualify_command_id() {
        assert_eq!(qualify_command_id("mind", "query"), "mind:query");
        assert_eq!(qualify_command_id("mind", "other:query"), "other:query");
    }

    #[test]
    fn test_register_plugin_commands_and_setup() {
        let mut reg = registry(vec!["yaml"]);
        reg.register_plugin(&brief(
            json!({
                "id": "@kb/playbooks",
                "version": "1.0.0",
                "requires": ["yaml"],
                "setup": { "run": "true" },
                "cli": { "commands": [
                    { "id": "run", "run": "true", "describe": "Run a playbook" },
                    { "id": "lint", "run": "true", "requires": ["eslint"], "group": "quality" }
                ]}
            }),
            SourceKind::Dir,
            "/p/kb.plugin.json",
        ));

        let run = reg.get("playbooks:run").unwrap();
        assert!(run.available);
        assert_eq!(run.manifest.group, "playbooks");
        assert_eq!(run.manifest.requires, vec!["yaml"]);

        let lint = reg.get("playbooks:lint").unwrap();
        assert!(!lint.available);
        assert_eq!(lint.manifest.group, "quality");
        assert_eq!(lint.manifest.requires, vec!["yaml", "eslint"]);
        assert_eq!(lint.unavailable_reason.as_deref(), Some("Missing dependency: eslint"));
        assert_eq!(lint.hint.as_deref(), Some(MISSING_DEPENDENCY_HINT));

        let setup = reg.get("playbooks:setup").unwrap();
        assert!(setup.setup);
        assert_eq!(reg.len(), 3);
        assert!(reg.plugin("@kb/playbooks").is_some());
    }

    #[test]
    fn test_duplicate_command_is_shadowed() {
        let first = brief(
            json!({"id": "a/tools", "version": "1.0.0", "cli": {"commands": [{"id": "x", "run": "true"}]}}),
            SourceKind::Workspace,
            "/a/kb.plugin.json",
        );
        let second = brief(
            json!({"id": "b/tools", "version": "1.0.0", "cli": {"commands": [{"id": "x", "run": "true"}]}}),
            SourceKind::Dir,
            "/b/kb.plugin.json",
        );

        let mut result = DiscoveryResult::new();
        result.push_plugin(second);
        result.push_plugin(first);
        let reg = CommandRegistry::from_discovery(
            &result,
            Arc::new(Resolves(vec![])),
            Arc::new(HandlerRegistry::new()),
        );

        assert_eq!(reg.get("tools:x").unwrap().plugin_id, "a/tools");
        assert_eq!(reg.shadowed().len(), 1);
        assert!(reg.shadowed()[0].shadowed);
        assert_eq!(reg.shadowed()[0].plugin_id, "b/tools");
        assert!(reg.get_for_plugin("tools:x", "b/tools").is_some());
        assert!(!reg.is_partial());
    }

    #[test]
    fn test_partial_is_monotonic() {
        let mut result = DiscoveryResult::new();
        result.push_error("/broken", "boom");

        let mut reg = CommandRegistry::from_discovery(
            &result,
            Arc::new(Resolves(vec![])),
            Arc::new(HandlerRegistry::new()),
        );
        assert!(reg.is_partial());

        let late = brief(json!({"id": "p", "version": "1.0.0"}), SourceKind::File, "/p.json");
        reg.register_plugin(&late);
        assert!(reg.is_partial());
        reg.mark_partial();
        assert!(reg.is_partial());
    }
}
