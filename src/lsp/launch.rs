// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Launch configuration for an external language server.
//!
//! A [`ServerLaunchSpec`] is immutable once built. Builder methods consume
//! and return the spec, so a spec handed to the supervisor can never change
//! underneath a running activation.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use super::supervisor::LaunchError;

/// What to do with the server's standard error stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StderrMode {
    /// Share the launcher's stderr.
    #[default]
    Inherit,
    /// Send stderr to the null device.
    Discard,
    /// Capture stderr and forward each line to `tracing`.
    Log,
}

impl StderrMode {
    pub(crate) fn stdio(self) -> Stdio {
        match self {
            Self::Inherit => Stdio::inherit(),
            Self::Discard => Stdio::null(),
            Self::Log => Stdio::piped(),
        }
    }
}

/// Immutable description of how to start a language server process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerLaunchSpec {
    program: PathBuf,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    env: BTreeMap<String, String>,
    stderr: StderrMode,
    hide_window: bool,
}

impl ServerLaunchSpec {
    /// Creates a spec for `program` with no arguments.
    ///
    /// The window is hidden by default, matching how editors start servers.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: BTreeMap::new(),
            stderr: StderrMode::default(),
            hide_window: true,
        }
    }

    /// Appends arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets the working directory of the child.
    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Adds an environment override.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Sets the stderr handling mode.
    #[must_use]
    pub const fn stderr(mut self, mode: StderrMode) -> Self {
        self.stderr = mode;
        self
    }

    /// Controls whether a console window is created on Windows.
    #[must_use]
    pub const fn hide_window(mut self, hide: bool) -> Self {
        self.hide_window = hide;
        self
    }

    /// The program as configured (not yet resolved).
    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// The ordered argument list.
    #[must_use]
    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// The working directory, if any.
    #[must_use]
    pub fn cwd(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    /// Environment overrides applied on top of the inherited environment.
    #[must_use]
    pub const fn env_overrides(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// The stderr handling mode.
    #[must_use]
    pub const fn stderr_mode(&self) -> StderrMode {
        self.stderr
    }

    /// Whether the console window is suppressed on Windows.
    #[must_use]
    pub const fn hides_window(&self) -> bool {
        self.hide_window
    }

    /// Command line for log output.
    #[must_use]
    pub fn display_command(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    /// Resolves the program to an existing, executable file.
    ///
    /// A program containing a path separator is checked directly, relative
    /// to the working directory when one is set. A bare name is searched on
    /// `PATH`. The returned path is always absolute, so it stays valid once
    /// the child's working directory is changed.
    ///
    /// # Errors
    ///
    /// Returns [`LaunchError::ExecutableNotFound`] if nothing matches.
    pub async fn resolve_executable(&self) -> Result<PathBuf, LaunchError> {
        let not_found = || LaunchError::ExecutableNotFound {
            path: self.program.clone(),
        };

        if self.program.as_os_str().is_empty() {
            return Err(not_found());
        }

        if self.program.components().count() > 1 || self.program.is_absolute() {
            let candidate = match &self.working_dir {
                Some(dir) if self.program.is_relative() => dir.join(&self.program),
                _ => self.program.clone(),
            };
            let candidate = std::path::absolute(&candidate).map_err(|_| not_found())?;
            return if is_executable(&candidate).await {
                Ok(candidate)
            } else {
                Err(not_found())
            };
        }

        let path_var = std::env::var_os("PATH").unwrap_or_default();
        search_path(&self.program, &path_var)
            .await
            .ok_or_else(not_found)
    }
}

/// Finds the first executable named `program` in a `PATH`-style list.
async fn search_path(program: &Path, path_var: &OsStr) -> Option<PathBuf> {
    for dir in std::env::split_paths(path_var) {
        if dir.as_os_str().is_empty() {
            continue;
        }
        for candidate in path_candidates(&dir, program) {
            let Ok(candidate) = std::path::absolute(&candidate) else {
                continue;
            };
            if is_executable(&candidate).await {
                return Some(candidate);
            }
        }
    }
    None
}

async fn is_executable(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .is_ok_and(|meta| meta.is_file() && has_exec_permission(&meta))
}

#[cfg(unix)]
fn has_exec_permission(meta: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
const fn has_exec_permission(_meta: &std::fs::Metadata) -> bool {
    true
}

#[cfg(not(windows))]
fn path_candidates(dir: &Path, program: &Path) -> Vec<PathBuf> {
    vec![dir.join(program)]
}

#[cfg(windows)]
fn path_candidates(dir: &Path, program: &Path) -> Vec<PathBuf> {
    let plain = dir.join(program);
    if program.extension().is_some() {
        vec![plain]
    } else {
        vec![plain.with_extension("exe"), plain]
    }
}
