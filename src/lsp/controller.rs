// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Activation of a language server for an LSP client layer.
//!
//! The controller runs one activation at a time:
//!
//! ```text
//! Idle -> Activating -> Active -> Stopped
//!              \
//!               -> FailedToStart
//! ```
//!
//! A new activation may begin from `Idle`, `Stopped` or `FailedToStart`.
//! Nothing is retried automatically; the client layer decides whether to
//! activate again.

use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::channel::Channel;
use super::launch::ServerLaunchSpec;
use super::state::{ActivationState, LifecycleEvent};
use super::supervisor::{ExitStatus, LaunchError, ProcessHandle, ProcessSupervisor, Terminator};

/// Capacity of the lifecycle event broadcast.
const EVENT_CAPACITY: usize = 64;

/// Errors returned by [`ActivationController::activate`].
#[derive(Debug, thiserror::Error)]
pub enum ActivationError {
    /// The cancellation token fired before the server was spawned.
    #[error("activation cancelled")]
    Cancelled,

    /// The supervisor could not start the server.
    #[error("failed to start language server: {0}")]
    LaunchFailed(#[from] LaunchError),

    /// An activation is already in flight or active.
    #[error("cannot activate while {state}")]
    InvalidState {
        /// The state the controller was in.
        state: ActivationState,
    },
}

/// Settings the host exposes to the LSP client layer.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientOptions {
    /// Display name of the server.
    pub name: String,
    /// Configuration sections the client subscribes to.
    pub configuration_sections: Vec<String>,
    /// Opaque `initializationOptions` payload.
    pub initialization_options: Option<serde_json::Value>,
    /// Glob patterns of files to watch.
    pub files_to_watch: Vec<String>,
    /// Whether an initialize failure should be shown to the user.
    pub show_notification_on_initialize_failed: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            name: "Language Server".to_string(),
            configuration_sections: Vec::new(),
            initialization_options: None,
            files_to_watch: Vec::new(),
            show_notification_on_initialize_failed: true,
        }
    }
}

/// What the host should do after an initialize failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureDisposition {
    /// Surface a user-visible notification.
    pub show_notification: bool,
    /// Message for the notification or log.
    pub message: String,
}

struct Shared {
    state: AtomicU8,
    generation: AtomicU64,
    events: broadcast::Sender<LifecycleEvent>,
    terminator: Mutex<Option<Terminator>>,
}

impl Shared {
    fn state(&self) -> ActivationState {
        ActivationState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn transition(&self, from: ActivationState, to: ActivationState) -> bool {
        let changed = self
            .state
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if changed {
            debug!("Activation state: {} -> {}", from, to);
        }
        changed
    }

    fn emit(&self, event: LifecycleEvent) {
        debug!(?event, "Lifecycle event");
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn process_exited(&self, generation: u64, status: ExitStatus) {
        if generation != self.generation.load(Ordering::SeqCst) {
            return;
        }
        if self.transition(ActivationState::Active, ActivationState::Stopped) {
            self.emit(LifecycleEvent::Stopped { status });
        }
    }
}

/// Restores the pre-activation state unless the activation completed.
struct ActivationGuard<'a> {
    shared: &'a Shared,
    previous: ActivationState,
    armed: bool,
}

impl ActivationGuard<'_> {
    fn finish(mut self, to: ActivationState) {
        self.armed = false;
        self.shared.transition(ActivationState::Activating, to);
    }
}

impl Drop for ActivationGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.shared
                .transition(ActivationState::Activating, self.previous);
        }
    }
}

/// Starts a language server and hands its channel to the client layer.
pub struct ActivationController {
    spec: ServerLaunchSpec,
    options: ClientOptions,
    supervisor: ProcessSupervisor,
    shared: Arc<Shared>,
}

impl ActivationController {
    /// Creates an idle controller.
    #[must_use]
    pub fn new(spec: ServerLaunchSpec, options: ClientOptions) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            spec,
            options,
            supervisor: ProcessSupervisor::new(),
            shared: Arc::new(Shared {
                state: AtomicU8::new(ActivationState::Idle.as_u8()),
                generation: AtomicU64::new(0),
                events,
                terminator: Mutex::new(None),
            }),
        }
    }

    /// Spawns the server and returns its channel.
    ///
    /// The call yields once before doing any process work, then checks
    /// `cancel`. Cancellation is honoured until the process is spawned;
    /// after that it has no effect and the server must be stopped with
    /// [`stop`](Self::stop) or [`Channel::terminate`].
    ///
    /// # Errors
    ///
    /// - [`ActivationError::Cancelled`] if `cancel` fired before the spawn.
    /// - [`ActivationError::LaunchFailed`] if the supervisor failed.
    /// - [`ActivationError::InvalidState`] if already activating or active.
    pub async fn activate(&self, cancel: &CancellationToken) -> Result<Channel, ActivationError> {
        let guard = self.begin()?;

        tokio::task::yield_now().await;
        if cancel.is_cancelled() {
            info!(server = %self.options.name, "Activation cancelled before spawn");
            return Err(ActivationError::Cancelled);
        }

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                info!(server = %self.options.name, "Activation cancelled during spawn");
                return Err(ActivationError::Cancelled);
            }
            result = self.supervisor.start(&self.spec) => result,
        };

        match result {
            Ok(handle) => Ok(self.activated(guard, handle)),
            Err(e) => {
                warn!(server = %self.options.name, "Activation failed: {}", e);
                guard.finish(ActivationState::FailedToStart);
                self.shared.emit(LifecycleEvent::InitializeFailed {
                    reason: e.to_string(),
                });
                Err(e.into())
            }
        }
    }

    fn begin(&self) -> Result<ActivationGuard<'_>, ActivationError> {
        let previous = self
            .shared
            .state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |value| {
                ActivationState::from_u8(value)
                    .can_activate()
                    .then_some(ActivationState::Activating.as_u8())
            })
            .map_err(|value| ActivationError::InvalidState {
                state: ActivationState::from_u8(value),
            })?;

        let previous = ActivationState::from_u8(previous);
        debug!("Activation state: {} -> {}", previous, ActivationState::Activating);

        Ok(ActivationGuard {
            shared: &self.shared,
            previous,
            armed: true,
        })
    }

    fn activated(&self, guard: ActivationGuard<'_>, handle: ProcessHandle) -> Channel {
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self
            .shared
            .terminator
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle.terminator());

        guard.finish(ActivationState::Active);
        self.shared.emit(LifecycleEvent::Started { pid: handle.id() });

        let shared = Arc::clone(&self.shared);
        let exit = handle.exit_watch();
        tokio::spawn(async move {
            let status = exit.wait().await;
            shared.process_exited(generation, status);
        });

        info!(server = %self.options.name, pid = ?handle.id(), "Activated");
        Channel::new(handle)
    }

    /// Records that the server process exited: `Active -> Stopped`.
    ///
    /// Called automatically by the exit watch; a no-op unless active.
    pub fn on_process_exited(&self, status: ExitStatus) {
        let generation = self.shared.generation.load(Ordering::SeqCst);
        self.shared.process_exited(generation, status);
    }

    /// The host finished loading; asks the client layer to start the server.
    pub fn on_loaded(&self) {
        self.shared.emit(LifecycleEvent::StartRequested);
    }

    /// The client layer completed its initialize handshake.
    pub fn on_server_initialized(&self) {
        info!(server = %self.options.name, "Server initialized");
        self.shared.emit(LifecycleEvent::Initialized);
    }

    /// The client layer's initialize handshake failed.
    pub fn on_server_initialize_failed(&self, reason: &str) -> FailureDisposition {
        warn!(server = %self.options.name, "Server initialize failed: {}", reason);
        self.shared.emit(LifecycleEvent::InitializeFailed {
            reason: reason.to_string(),
        });
        FailureDisposition {
            show_notification: self.options.show_notification_on_initialize_failed,
            message: format!("{} failed to initialize: {reason}", self.options.name),
        }
    }

    /// Requests termination of the active server, if any.
    pub fn stop(&self) {
        let terminator = self
            .shared
            .terminator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(terminator) = terminator {
            terminator.terminate();
        }
    }

    /// Subscribes to lifecycle events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.shared.events.subscribe()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ActivationState {
        self.shared.state()
    }

    /// The client options.
    #[must_use]
    pub const fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// The launch spec used for every activation.
    #[must_use]
    pub const fn spec(&self) -> &ServerLaunchSpec {
        &self.spec
    }

    /// The underlying supervisor.
    #[must_use]
    pub const fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }
}
