/*
 * Copyright (C) 2026 Mark Wells Dev
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use crate::content_type::ContentTypeRegistry;
use crate::lsp::{ClientOptions, ServerLaunchSpec, StderrMode};

/// Launcher configuration: content types and the servers that handle them.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// Content type definitions keyed by name (e.g., "sneklang")
    #[serde(default)]
    pub content_type: HashMap<String, ContentTypeConfig>,

    /// Server definitions keyed by content type
    #[serde(default)]
    pub server: HashMap<String, ServerConfig>,
}

/// A `[content_type.<name>]` table.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ContentTypeConfig {
    /// Base content type this one derives from
    #[serde(default)]
    pub base: Option<String>,

    /// File extensions bound to this content type
    #[serde(default)]
    pub extensions: Vec<String>,
}

/// A `[server.<content type>]` table.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// The command to execute (e.g., "snek-lsp")
    pub command: String,

    /// Arguments to pass to the command
    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory for the server process
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Environment overrides
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// What to do with the server's stderr
    #[serde(default)]
    pub stderr: StderrMode,

    /// Suppress the console window on Windows
    #[serde(default = "default_true")]
    pub hide_window: bool,

    /// Display name shown to the user
    #[serde(default)]
    pub name: Option<String>,

    /// Configuration sections the client subscribes to
    #[serde(default)]
    pub configuration_sections: Vec<String>,

    /// Initialization options to pass to the LSP server
    #[serde(default)]
    pub initialization_options: Option<serde_json::Value>,

    /// Files the client should watch
    #[serde(default)]
    pub files_to_watch: Vec<String>,

    /// Show a notification when the server fails to initialize
    #[serde(default = "default_true")]
    pub show_notification_on_initialize_failed: bool,
}

const fn default_true() -> bool {
    true
}

impl ServerConfig {
    /// Creates a server entry from a program and arguments, with defaults
    /// for everything else.
    #[must_use]
    pub fn from_command(command: String, args: Vec<String>) -> Self {
        Self {
            command,
            args,
            working_dir: None,
            env: BTreeMap::new(),
            stderr: StderrMode::default(),
            hide_window: true,
            name: None,
            configuration_sections: Vec::new(),
            initialization_options: None,
            files_to_watch: Vec::new(),
            show_notification_on_initialize_failed: true,
        }
    }

    /// Builds the immutable launch spec for this server.
    #[must_use]
    pub fn launch_spec(&self) -> ServerLaunchSpec {
        let mut spec = ServerLaunchSpec::new(&self.command)
            .args(self.args.iter().cloned())
            .stderr(self.stderr)
            .hide_window(self.hide_window);
        if let Some(dir) = &self.working_dir {
            spec = spec.working_dir(dir);
        }
        for (key, value) in &self.env {
            spec = spec.env(key, value);
        }
        spec
    }

    /// Client-facing options; the display name falls back to the content type.
    #[must_use]
    pub fn client_options(&self, content_type: &str) -> ClientOptions {
        ClientOptions {
            name: self
                .name
                .clone()
                .unwrap_or_else(|| format!("{content_type} language server")),
            configuration_sections: self.configuration_sections.clone(),
            initialization_options: self.initialization_options.clone(),
            files_to_watch: self.files_to_watch.clone(),
            show_notification_on_initialize_failed: self.show_notification_on_initialize_failed,
        }
    }
}

impl Config {
    /// Load configuration from standard paths or a specific file.
    pub fn load(explicit_file: Option<PathBuf>) -> Result<Self> {
        let mut builder = config::Config::builder();

        // 1. Start with defaults: the built-in sneklang content type
        builder = builder
            .set_default("content_type.sneklang.base", "code")?
            .set_default("content_type.sneklang.extensions", vec![".src"])?;

        // 2. Load from user config directory (~/.config/lsp-launcher/config.toml)
        if let Some(config_dir) = dirs::config_dir() {
            let config_path = config_dir.join("lsp-launcher").join("config.toml");
            if config_path.exists() {
                builder = builder.add_source(config::File::from(config_path));
            }
        }

        // 3. Load from explicit file if provided
        if let Some(path) = explicit_file {
            builder = builder.add_source(config::File::from(path));
        }

        // 4. Load from environment variables (LSP_LAUNCHER_SERVER__SNEKLANG__COMMAND, etc.)
        builder = builder.add_source(
            config::Environment::with_prefix("LSP_LAUNCHER")
                .prefix_separator("_")
                .separator("__"),
        );

        let config = builder
            .build()
            .context("Failed to build configuration")?;

        config.try_deserialize().context("Failed to deserialize configuration")
    }

    /// Adds or replaces a server from a "type:command args" override.
    pub fn apply_server_override(&mut self, spec: &str) -> Result<()> {
        let (content_type, command_str) = spec
            .split_once(':')
            .ok_or_else(|| anyhow!("Invalid server spec: {spec}. Expected 'type:command'"))?;

        let content_type = content_type.trim();
        if content_type.is_empty() {
            bail!("Invalid server spec: {spec}. Content type cannot be empty");
        }

        let mut parts = command_str.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| anyhow!("command cannot be empty"))?
            .to_string();
        let args: Vec<String> = parts.map(ToString::to_string).collect();

        self.server.insert(
            content_type.to_string(),
            ServerConfig::from_command(program, args),
        );
        Ok(())
    }

    /// Builds the content type registry from the configuration.
    #[must_use]
    pub fn registry(&self) -> ContentTypeRegistry {
        let mut registry = ContentTypeRegistry::new();
        for (name, ct) in &self.content_type {
            registry.define(name, ct.base.as_deref());
            for ext in &ct.extensions {
                registry.bind_extension(ext, name);
            }
        }
        registry
    }

    /// Picks the server to launch.
    ///
    /// An explicit content type wins, then the content type of `file`. With
    /// neither, the only configured server is used.
    pub fn select_server(
        &self,
        content_type: Option<&str>,
        file: Option<&Path>,
    ) -> Result<(String, &ServerConfig)> {
        let name = if let Some(name) = content_type {
            name.to_string()
        } else if let Some(file) = file {
            self.registry()
                .resolve(file)
                .map(|ct| ct.name.clone())
                .ok_or_else(|| anyhow!("No content type registered for {}", file.display()))?
        } else {
            let mut names = self.server.keys();
            match (names.next(), names.next()) {
                (Some(only), None) => only.clone(),
                (None, _) => bail!("No language servers configured"),
                (Some(_), Some(_)) => {
                    bail!("Several language servers configured; pass --content-type or --file")
                }
            }
        };

        let server = self
            .server
            .get(&name)
            .ok_or_else(|| anyhow!("No language server configured for content type '{name}'"))?;
        Ok((name, server))
    }
}
