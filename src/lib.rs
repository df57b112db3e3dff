// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! lsp-launcher supervises an external language server process and exposes
//! its stdio as a duplex byte channel for an LSP client layer.
//!
//! The client layer never sees the process itself: it asks an
//! [`ActivationController`](lsp::ActivationController) for a
//! [`Channel`](lsp::Channel), speaks LSP over it, and reports back through
//! the controller's lifecycle hooks.

/// Command-line interface utilities.
pub mod cli;
/// Configuration of content types and language servers.
pub mod config;
/// Content types and file-extension bindings.
pub mod content_type;
/// JSON-lines log of lifecycle events.
pub mod event_log;
/// Process supervision, the stdio channel and activation.
pub mod lsp;
