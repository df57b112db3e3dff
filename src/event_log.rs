// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Append-only JSON-lines log of lifecycle events.
//!
//! Each line is one [`EventRecord`]. The file can be followed from another
//! terminal with `tail -f` while a server is being supervised.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::lsp::LifecycleEvent;

/// One line of the event log.
#[derive(Debug, Clone, Serialize)]
pub struct EventRecord<'a> {
    /// When the event was recorded.
    pub timestamp: DateTime<Utc>,
    /// Content type whose server emitted the event.
    pub content_type: &'a str,
    /// The event itself.
    #[serde(flatten)]
    pub event: &'a LifecycleEvent,
}

/// Cloneable handle to an event log file.
#[derive(Clone)]
pub struct EventLog {
    path: PathBuf,
    file: Arc<Mutex<File>>,
}

impl EventLog {
    /// Opens `path` for appending, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open event log: {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Arc::new(Mutex::new(file)),
        })
    }

    /// Appends one event.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be written.
    pub fn record(&self, content_type: &str, event: &LifecycleEvent) -> Result<()> {
        let record = EventRecord {
            timestamp: Utc::now(),
            content_type,
            event,
        };
        let json = serde_json::to_string(&record)?;

        let mut file = self
            .file
            .lock()
            .map_err(|_| anyhow::anyhow!("event log lock poisoned"))?;
        writeln!(file, "{json}")?;
        file.flush()?;
        Ok(())
    }

    /// Copies events from `rx` into the log until the sender side is gone.
    pub fn spawn_recorder(
        self,
        content_type: String,
        mut rx: broadcast::Receiver<LifecycleEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if let Err(e) = self.record(&content_type, &event) {
                            warn!(path = %self.path.display(), "Failed to record event: {e:#}");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Event log fell behind, {n} events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!(path = %self.path.display(), "Event recorder finished");
        })
    }
}
