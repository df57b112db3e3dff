// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

/// Duplex byte channel over a server's stdio.
pub mod channel;
/// Activation state machine and client-layer hooks.
pub mod controller;
/// Immutable launch configuration and executable resolution.
pub mod launch;
/// Activation state and lifecycle event types.
pub mod state;
/// Spawning, exit monitoring and termination of server processes.
pub mod supervisor;

pub use channel::{Channel, ChannelError, ChannelReader, ChannelWriter};
pub use controller::{ActivationController, ActivationError, ClientOptions, FailureDisposition};
pub use launch::{ServerLaunchSpec, StderrMode};
pub use state::{ActivationState, LifecycleEvent};
pub use supervisor::{
    ExitStatus, ExitWatch, LaunchError, ProcessHandle, ProcessSupervisor, Terminator,
};
