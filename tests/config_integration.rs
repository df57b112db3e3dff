// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Integration tests for configuration loading.
//!
//! Verifies that an explicit config file layers on top of the built-in
//! defaults and turns into launch specs and client options.

use anyhow::{Context, Result};
use std::path::Path;

use lsp_launcher::config::Config;
use lsp_launcher::lsp::StderrMode;

#[test]
fn test_load_explicit_file() -> Result<()> {
    let config = Config::load(Some("tests/assets/config.toml".into()))?;

    let sneklang = config
        .content_type
        .get("sneklang")
        .context("sneklang content type missing")?;
    assert_eq!(sneklang.base.as_deref(), Some("code"));
    assert_eq!(sneklang.extensions, vec![".src", ".snek"]);

    let server = config.server.get("sneklang").context("sneklang server missing")?;
    let spec = server.launch_spec();
    assert_eq!(spec.program(), Path::new("snek-lsp-not-installed"));
    assert_eq!(spec.arguments(), ["--stdio"]);
    assert_eq!(spec.stderr_mode(), StderrMode::Discard);
    assert!(spec.hides_window());

    let options = server.client_options("sneklang");
    assert_eq!(options.name, "Bar Language Extension");
    assert!(options.show_notification_on_initialize_failed);
    assert!(options.initialization_options.is_none());
    Ok(())
}

#[test]
fn test_registry_routes_files() -> Result<()> {
    let config = Config::load(Some("tests/assets/config.toml".into()))?;
    let registry = config.registry();

    for file in ["tests/assets/sneklang/main.src", "lib.SNEK"] {
        let ct = registry
            .resolve(Path::new(file))
            .with_context(|| format!("{file} should resolve"))?;
        assert_eq!(ct.name, "sneklang");
    }
    assert!(registry.derives_from("sneklang", "code"));

    let (name, server) = config.select_server(None, Some(Path::new("demo.src")))?;
    assert_eq!(name, "sneklang");
    assert_eq!(server.command, "snek-lsp-not-installed");
    Ok(())
}

#[test]
fn test_full_server_table() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
[server.sneklang]
command = "snek-lsp"
args = ["--stdio"]
working_dir = "/srv/snek"
env = { snek_log = "debug" }
stderr = "log"
hide_window = false
name = "Snek Language Extension"
configuration_sections = ["snek"]
initialization_options = { lint = true }
files_to_watch = ["**/*.src"]
show_notification_on_initialize_failed = false
"#,
    )?;

    let config = Config::load(Some(path))?;
    let server = config.server.get("sneklang").context("server missing")?;

    let spec = server.launch_spec();
    assert_eq!(spec.cwd(), Some(Path::new("/srv/snek")));
    assert_eq!(
        spec.env_overrides().get("snek_log").map(String::as_str),
        Some("debug")
    );
    assert_eq!(spec.stderr_mode(), StderrMode::Log);
    assert!(!spec.hides_window());

    let options = server.client_options("sneklang");
    assert_eq!(options.configuration_sections, ["snek"]);
    assert_eq!(options.files_to_watch, ["**/*.src"]);
    assert_eq!(
        options.initialization_options,
        Some(serde_json::json!({ "lint": true }))
    );
    assert!(!options.show_notification_on_initialize_failed);
    Ok(())
}

#[test]
fn test_missing_explicit_file_fails() {
    assert!(Config::load(Some("tests/assets/no-such-config.toml".into())).is_err());
}
