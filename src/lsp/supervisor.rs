// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Process supervision for external language servers.
//!
//! The supervisor spawns the server with piped stdio and hands the streams
//! out through a [`ProcessHandle`]. The OS child itself is owned by a
//! background task that waits for exit and publishes the status exactly
//! once, so waiting never competes with stream I/O.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{Notify, watch};
use tracing::{debug, error, info, trace, warn};

use super::launch::{ServerLaunchSpec, StderrMode};

/// Tracing target for lines the server writes to stderr.
const SERVER_STDERR_TARGET: &str = "lsp_launcher::server";

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Errors raised while starting a server process.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    /// The executable path did not resolve to a file.
    #[error("language server executable not found: {}", path.display())]
    ExecutableNotFound {
        /// The program as configured.
        path: PathBuf,
    },

    /// The OS refused to create the process.
    #[error("failed to spawn language server {}: {source}", path.display())]
    SpawnFailed {
        /// The resolved program.
        path: PathBuf,
        /// The underlying OS error.
        #[source]
        source: io::Error,
    },

    /// The supervisor already manages a live process.
    #[error("language server is still running (pid {pid:?})")]
    AlreadyRunning {
        /// Process ID of the running server, if known.
        pid: Option<u32>,
    },
}

impl LaunchError {
    fn from_spawn(path: PathBuf, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            Self::ExecutableNotFound { path }
        } else {
            Self::SpawnFailed { path, source }
        }
    }
}

/// How a server process ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ExitStatus {
    code: Option<i32>,
    signal: Option<i32>,
}

impl ExitStatus {
    /// Builds a status from an exit code.
    #[must_use]
    pub const fn from_code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    /// The exit code, absent when the process was killed by a signal.
    #[must_use]
    pub const fn code(&self) -> Option<i32> {
        self.code
    }

    /// The terminating signal (Unix only).
    #[must_use]
    pub const fn signal(&self) -> Option<i32> {
        self.signal
    }

    /// True if the process exited with code 0.
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self.code, Some(0))
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {code}"),
            (None, Some(signal)) => write!(f, "signal {signal}"),
            (None, None) => f.write_str("unknown"),
        }
    }
}

/// Read-only view of a process's exit status.
///
/// Clones observe the same process. Waiting does not touch the stdio
/// streams, so it can run alongside reads and writes.
#[derive(Debug, Clone)]
pub struct ExitWatch {
    pid: Option<u32>,
    rx: watch::Receiver<Option<ExitStatus>>,
}

impl ExitWatch {
    /// The exit status, or `None` while the process is running.
    #[must_use]
    pub fn status(&self) -> Option<ExitStatus> {
        *self.rx.borrow()
    }

    /// Process ID of the watched server.
    #[must_use]
    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Waits until the process has exited.
    ///
    /// If the watcher task vanished without reporting (runtime shutdown),
    /// an unknown status is returned.
    pub async fn wait(&self) -> ExitStatus {
        let mut rx = self.rx.clone();
        rx.wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|status| *status)
            .unwrap_or_default()
    }
}

/// Cloneable handle that can request termination of a server process.
#[derive(Debug, Clone)]
pub struct Terminator {
    kill: Arc<Notify>,
    exit: ExitWatch,
}

impl Terminator {
    /// Requests forceful termination. Does nothing if the process already
    /// exited, and may be called any number of times.
    pub fn terminate(&self) {
        if self.exit.status().is_none() {
            debug!(pid = ?self.exit.pid(), "Termination requested");
            self.kill.notify_one();
        }
    }

    /// The exit watch of the process this terminator controls.
    #[must_use]
    pub const fn exit_watch(&self) -> &ExitWatch {
        &self.exit
    }
}

/// A running (or exited) server process and its stdio.
///
/// Dropping the handle while the process is still running requests
/// termination.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: Option<u32>,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    terminator: Terminator,
}

impl ProcessHandle {
    /// The OS process identifier.
    #[must_use]
    pub const fn id(&self) -> Option<u32> {
        self.pid
    }

    /// The exit status, or `None` while running.
    #[must_use]
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.terminator.exit.status()
    }

    /// A watch that resolves when the process exits.
    #[must_use]
    pub fn exit_watch(&self) -> ExitWatch {
        self.terminator.exit.clone()
    }

    /// A cloneable terminator for this process.
    #[must_use]
    pub fn terminator(&self) -> Terminator {
        self.terminator.clone()
    }

    /// Requests forceful termination; idempotent.
    pub fn terminate(&self) {
        self.terminator.terminate();
    }

    pub(crate) const fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.stdin.take()
    }

    pub(crate) const fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        self.terminator.terminate();
    }
}

enum Slot {
    Vacant,
    Reserved,
    Occupied(ExitWatch),
}

/// Holds the supervisor's slot while a spawn is in progress.
struct Reservation<'a> {
    slot: &'a Mutex<Slot>,
    filled: bool,
}

impl Reservation<'_> {
    fn fill(mut self, watch: ExitWatch) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Slot::Occupied(watch);
        self.filled = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.filled {
            *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Slot::Vacant;
        }
    }
}

/// Spawns and monitors one language server process at a time.
pub struct ProcessSupervisor {
    slot: Mutex<Slot>,
    spawned: AtomicUsize,
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSupervisor {
    /// Creates an idle supervisor.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::Vacant),
            spawned: AtomicUsize::new(0),
        }
    }

    /// Spawns the server described by `spec`.
    ///
    /// The returned handle owns open stdin/stdout pipes and has no exit
    /// status yet. Dropping this future before the spawn leaves no process
    /// behind.
    ///
    /// # Errors
    ///
    /// - [`LaunchError::ExecutableNotFound`] if the program does not resolve.
    /// - [`LaunchError::SpawnFailed`] for other OS failures.
    /// - [`LaunchError::AlreadyRunning`] if a previous process is still alive.
    pub async fn start(&self, spec: &ServerLaunchSpec) -> Result<ProcessHandle, LaunchError> {
        let reservation = self.reserve()?;
        let program = spec.resolve_executable().await?;

        info!(
            program = %program.display(),
            args = ?spec.arguments(),
            "Spawning LSP server"
        );

        let mut command = Command::new(&program);
        command
            .args(spec.arguments())
            .envs(spec.env_overrides())
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(spec.stderr_mode().stdio())
            .kill_on_drop(true);
        if let Some(dir) = spec.cwd() {
            command.current_dir(dir);
        }
        #[cfg(windows)]
        if spec.hides_window() {
            command.creation_flags(CREATE_NO_WINDOW);
        }

        let mut child = command
            .spawn()
            .map_err(|e| LaunchError::from_spawn(program.clone(), e))?;
        self.spawned.fetch_add(1, Ordering::SeqCst);

        let pid = child.id();
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            // Child is killed on drop.
            return Err(LaunchError::SpawnFailed {
                path: program,
                source: io::Error::other("stdio was not captured"),
            });
        };

        if spec.stderr_mode() == StderrMode::Log
            && let Some(stderr) = child.stderr.take()
        {
            tokio::spawn(forward_stderr(stderr, pid));
        }

        let (exit_tx, exit_rx) = watch::channel(None);
        let kill = Arc::new(Notify::new());
        tokio::spawn(watch_exit(child, pid, kill.clone(), exit_tx));

        let exit = ExitWatch { pid, rx: exit_rx };
        reservation.fill(exit.clone());

        info!(pid = ?pid, "LSP server started");

        Ok(ProcessHandle {
            pid,
            stdin: Some(stdin),
            stdout: Some(stdout),
            terminator: Terminator { kill, exit },
        })
    }

    /// Waits for the handle's process to exit.
    pub async fn wait_for_exit(&self, handle: &ProcessHandle) -> ExitStatus {
        handle.exit_watch().wait().await
    }

    /// Requests forceful termination of the handle's process.
    ///
    /// Safe to call repeatedly and after the process has exited.
    pub fn terminate(&self, handle: &ProcessHandle) {
        handle.terminate();
    }

    /// Number of processes this supervisor has spawned.
    #[must_use]
    pub fn spawn_count(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }

    /// True while a spawned process has not yet exited.
    #[must_use]
    pub fn is_running(&self) -> bool {
        match &*self.slot.lock().unwrap_or_else(PoisonError::into_inner) {
            Slot::Occupied(watch) => watch.status().is_none(),
            Slot::Reserved => true,
            Slot::Vacant => false,
        }
    }

    fn reserve(&self) -> Result<Reservation<'_>, LaunchError> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        match &*slot {
            Slot::Occupied(watch) if watch.status().is_none() => {
                return Err(LaunchError::AlreadyRunning { pid: watch.pid() });
            }
            Slot::Reserved => return Err(LaunchError::AlreadyRunning { pid: None }),
            Slot::Occupied(_) | Slot::Vacant => {}
        }
        *slot = Slot::Reserved;
        drop(slot);

        Ok(Reservation {
            slot: &self.slot,
            filled: false,
        })
    }
}

/// Owns the child until it exits, then publishes the status once.
async fn watch_exit(
    mut child: Child,
    pid: Option<u32>,
    kill: Arc<Notify>,
    exit_tx: watch::Sender<Option<ExitStatus>>,
) {
    let result = tokio::select! {
        result = child.wait() => result,
        () = kill.notified() => {
            info!(pid = ?pid, "Killing LSP server");
            if let Err(e) = child.start_kill() {
                debug!(pid = ?pid, "Kill failed, process likely gone: {}", e);
            }
            child.wait().await
        }
    };

    let status = match result {
        Ok(status) => ExitStatus::from(status),
        Err(e) => {
            error!(pid = ?pid, "Failed to wait for LSP server: {}", e);
            ExitStatus::default()
        }
    };

    if status.success() {
        info!(pid = ?pid, %status, "LSP server exited");
    } else {
        warn!(pid = ?pid, %status, "LSP server exited");
    }

    exit_tx.send_replace(Some(status));
}

async fn forward_stderr(stderr: ChildStderr, pid: Option<u32>) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim_end();
                if !line.is_empty() {
                    info!(target: SERVER_STDERR_TARGET, pid = ?pid, "{}", line);
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(pid = ?pid, "Failed to read LSP server stderr: {}", e);
                break;
            }
        }
    }
    trace!(pid = ?pid, "stderr forwarding finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, Result, bail};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    const WAIT: Duration = Duration::from_secs(10);

    #[test]
    fn test_exit_status_display() {
        assert_eq!(ExitStatus::from_code(0).to_string(), "exit code 0");
        assert_eq!(ExitStatus::from_code(3).to_string(), "exit code 3");
        assert_eq!(ExitStatus::default().to_string(), "unknown");
        assert!(ExitStatus::from_code(0).success());
        assert!(!ExitStatus::from_code(1).success());
        assert!(!ExitStatus::default().success());
    }

    #[test]
    fn test_spawn_not_found_maps_to_executable_not_found() {
        let err = LaunchError::from_spawn(
            PathBuf::from("/gone"),
            io::Error::from(io::ErrorKind::NotFound),
        );
        assert!(matches!(err, LaunchError::ExecutableNotFound { .. }));

        let err = LaunchError::from_spawn(
            PathBuf::from("/locked"),
            io::Error::from(io::ErrorKind::PermissionDenied),
        );
        assert!(matches!(err, LaunchError::SpawnFailed { .. }));
    }

    #[tokio::test]
    async fn test_missing_executable_spawns_nothing() {
        let supervisor = ProcessSupervisor::new();
        let result = supervisor
            .start(&ServerLaunchSpec::new("/no/such/server"))
            .await;

        assert!(matches!(result, Err(LaunchError::ExecutableNotFound { .. })));
        assert_eq!(supervisor.spawn_count(), 0);
        assert!(!supervisor.is_running());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cat_round_trip_and_exit() -> Result<()> {
        let supervisor = ProcessSupervisor::new();
        let mut handle = supervisor.start(&ServerLaunchSpec::new("cat")).await?;
        assert!(handle.id().is_some());
        assert!(handle.exit_status().is_none());
        assert!(supervisor.is_running());

        let mut stdin = handle.take_stdin().context("stdin missing")?;
        let mut stdout = handle.take_stdout().context("stdout missing")?;

        stdin.write_all(b"ping").await?;
        stdin.flush().await?;
        drop(stdin);

        let mut echoed = Vec::new();
        tokio::time::timeout(WAIT, stdout.read_to_end(&mut echoed)).await??;
        assert_eq!(echoed, b"ping");

        let status = tokio::time::timeout(WAIT, supervisor.wait_for_exit(&handle)).await?;
        assert_eq!(status.code(), Some(0));
        assert_eq!(handle.exit_status(), Some(status));
        assert!(!supervisor.is_running());
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_second_start_rejected_while_running() -> Result<()> {
        let supervisor = ProcessSupervisor::new();
        let handle = supervisor.start(&ServerLaunchSpec::new("cat")).await?;

        match supervisor.start(&ServerLaunchSpec::new("cat")).await {
            Err(LaunchError::AlreadyRunning { pid }) => assert_eq!(pid, handle.id()),
            Err(e) => bail!("unexpected error: {e}"),
            Ok(_) => bail!("second start should fail"),
        }
        assert_eq!(supervisor.spawn_count(), 1);

        supervisor.terminate(&handle);
        tokio::time::timeout(WAIT, supervisor.wait_for_exit(&handle)).await?;

        let again = supervisor.start(&ServerLaunchSpec::new("cat")).await?;
        assert_eq!(supervisor.spawn_count(), 2);
        again.terminate();
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_is_idempotent() -> Result<()> {
        let supervisor = ProcessSupervisor::new();
        let handle = supervisor.start(&ServerLaunchSpec::new("cat")).await?;

        supervisor.terminate(&handle);
        let status = tokio::time::timeout(WAIT, supervisor.wait_for_exit(&handle)).await?;
        assert!(!status.success());

        supervisor.terminate(&handle);
        supervisor.terminate(&handle);
        assert_eq!(handle.exit_status(), Some(status));
        assert_eq!(supervisor.wait_for_exit(&handle).await, status);
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dropping_handle_kills_process() -> Result<()> {
        let supervisor = ProcessSupervisor::new();
        let handle = supervisor.start(&ServerLaunchSpec::new("cat")).await?;
        let watch = handle.exit_watch();

        drop(handle);

        let status = tokio::time::timeout(WAIT, watch.wait()).await?;
        assert_eq!(watch.status(), Some(status));
        assert!(!supervisor.is_running());
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_env_and_working_dir_applied() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let spec = ServerLaunchSpec::new("sh")
            .args(["-c", "printf '%s:%s' \"$SNEK_MODE\" \"$(pwd)\""])
            .env("SNEK_MODE", "strict")
            .working_dir(dir.path());

        let supervisor = ProcessSupervisor::new();
        let mut handle = supervisor.start(&spec).await?;
        let mut stdout = handle.take_stdout().context("stdout missing")?;

        let mut output = String::new();
        tokio::time::timeout(WAIT, stdout.read_to_string(&mut output)).await??;

        let (mode, cwd) = output.split_once(':').context("unexpected output")?;
        assert_eq!(mode, "strict");
        assert_eq!(
            std::fs::canonicalize(cwd)?,
            std::fs::canonicalize(dir.path())?
        );
        Ok(())
    }
}
