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

//! Activation state and lifecycle event types.

use serde::Serialize;
use std::fmt;

use super::supervisor::ExitStatus;

/// Where an activation controller is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationState {
    /// Nothing has been activated yet.
    Idle,
    /// An activation is in flight.
    Activating,
    /// The server is running and its channel was handed out.
    Active,
    /// The server process exited.
    Stopped,
    /// The last activation could not start the server.
    FailedToStart,
}

impl ActivationState {
    /// Create from atomic u8 value.
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Activating,
            2 => Self::Active,
            3 => Self::Stopped,
            _ => Self::FailedToStart,
        }
    }

    /// Convert to atomic u8 value.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Activating => 1,
            Self::Active => 2,
            Self::Stopped => 3,
            Self::FailedToStart => 4,
        }
    }

    /// True if a new activation may begin from this state.
    #[must_use]
    pub const fn can_activate(self) -> bool {
        matches!(self, Self::Idle | Self::Stopped | Self::FailedToStart)
    }
}

impl fmt::Display for ActivationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Activating => "activating",
            Self::Active => "active",
            Self::Stopped => "stopped",
            Self::FailedToStart => "failed_to_start",
        };
        f.write_str(name)
    }
}

/// Lifecycle notifications for the LSP client layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// The host finished loading and wants the server started.
    StartRequested,
    /// The server process is running. Emitted once per activation.
    Started {
        /// Process ID of the server.
        pid: Option<u32>,
    },
    /// The client layer completed its handshake over the channel.
    Initialized,
    /// The server could not be started or failed its handshake.
    InitializeFailed {
        /// Human-readable cause.
        reason: String,
    },
    /// The server process exited.
    Stopped {
        /// How it exited.
        status: ExitStatus,
    },
}
