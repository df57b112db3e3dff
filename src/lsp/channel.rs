// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Duplex byte channel over a server's stdio.
//!
//! No framing happens here. Whatever the client writes reaches the server's
//! stdin unchanged, and whatever the server prints comes back as raw chunks.

use bytes::{Bytes, BytesMut};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::process::{ChildStdin, ChildStdout};
use tracing::{debug, trace};

use super::supervisor::{ExitWatch, ProcessHandle, Terminator};

/// Read buffer capacity for stdout chunks.
const CHUNK_CAPACITY: usize = 8192;

/// Errors raised by channel I/O.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Writing to the server's stdin failed.
    #[error("failed to write to language server: {0}")]
    WriteFailed(#[source] io::Error),

    /// Reading from the server's stdout failed.
    #[error("failed to read from language server: {0}")]
    ReadFailed(#[source] io::Error),

    /// The channel was closed.
    #[error("channel is closed")]
    AlreadyClosed,
}

/// Client→server half: writes go to the server's stdin.
#[derive(Debug)]
pub struct ChannelWriter {
    stdin: Option<ChildStdin>,
}

impl ChannelWriter {
    /// Writes all of `bytes` and flushes.
    ///
    /// Blocks while the pipe buffer is full.
    ///
    /// # Errors
    ///
    /// [`ChannelError::AlreadyClosed`] after close, otherwise
    /// [`ChannelError::WriteFailed`].
    pub async fn send(&mut self, bytes: &[u8]) -> Result<(), ChannelError> {
        let stdin = self.stdin.as_mut().ok_or(ChannelError::AlreadyClosed)?;
        stdin
            .write_all(bytes)
            .await
            .map_err(ChannelError::WriteFailed)?;
        stdin.flush().await.map_err(ChannelError::WriteFailed)?;
        trace!("Sent {} bytes to LSP server", bytes.len());
        Ok(())
    }

    /// Closes stdin so the server sees end of input.
    ///
    /// The pipe is released even if the shutdown write fails.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::WriteFailed`] if the final flush failed.
    pub async fn close(&mut self) -> Result<(), ChannelError> {
        let Some(mut stdin) = self.stdin.take() else {
            return Ok(());
        };
        stdin.shutdown().await.map_err(ChannelError::WriteFailed)
    }

    /// True once the writer has been closed.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.stdin.is_none()
    }
}

impl AsyncWrite for ChannelWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut().stdin.as_mut() {
            Some(stdin) => Pin::new(stdin).poll_write(cx, buf),
            None => Poll::Ready(Err(io::ErrorKind::BrokenPipe.into())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().stdin.as_mut() {
            Some(stdin) => Pin::new(stdin).poll_flush(cx),
            None => Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().stdin.as_mut() {
            Some(stdin) => Pin::new(stdin).poll_shutdown(cx),
            None => Poll::Ready(Ok(())),
        }
    }
}

/// Server→client half: reads come from the server's stdout.
#[derive(Debug)]
pub struct ChannelReader {
    stdout: Option<ChildStdout>,
    buffer: BytesMut,
    finished: bool,
}

impl ChannelReader {
    /// Returns the next chunk of output, or `None` once the server closed
    /// its stdout. After `None` every further call returns `None`.
    ///
    /// # Errors
    ///
    /// [`ChannelError::AlreadyClosed`] after close, otherwise
    /// [`ChannelError::ReadFailed`].
    pub async fn receive(&mut self) -> Result<Option<Bytes>, ChannelError> {
        let stdout = self.stdout.as_mut().ok_or(ChannelError::AlreadyClosed)?;
        if self.finished {
            return Ok(None);
        }

        self.buffer.reserve(CHUNK_CAPACITY);
        let n = stdout
            .read_buf(&mut self.buffer)
            .await
            .map_err(ChannelError::ReadFailed)?;

        if n == 0 {
            debug!("LSP stdout closed");
            self.finished = true;
            return Ok(None);
        }

        trace!("Received {} bytes from LSP server", n);
        Ok(Some(self.buffer.split().freeze()))
    }

    /// Drops stdout.
    pub fn close(&mut self) {
        self.stdout = None;
        self.buffer.clear();
    }

    /// True once the reader has been closed.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.stdout.is_none()
    }
}

impl AsyncRead for ChannelReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut().stdout.as_mut() {
            Some(stdout) => Pin::new(stdout).poll_read(cx, buf),
            None => Poll::Ready(Ok(())),
        }
    }
}

/// A duplex byte stream to a language server.
///
/// The channel owns the [`ProcessHandle`]; nothing else can touch the
/// server's stdio. Dropping the channel closes both directions and, if the
/// server is still running, requests its termination.
#[derive(Debug)]
pub struct Channel {
    writer: ChannelWriter,
    reader: ChannelReader,
    process: ProcessHandle,
}

impl Channel {
    /// Wraps the stdio of `process`.
    #[must_use]
    pub fn new(mut process: ProcessHandle) -> Self {
        let writer = ChannelWriter {
            stdin: process.take_stdin(),
        };
        let reader = ChannelReader {
            stdout: process.take_stdout(),
            buffer: BytesMut::with_capacity(CHUNK_CAPACITY),
            finished: false,
        };
        Self {
            writer,
            reader,
            process,
        }
    }

    /// Writes bytes to the server. See [`ChannelWriter::send`].
    ///
    /// # Errors
    ///
    /// Propagates the writer's error.
    pub async fn send(&mut self, bytes: &[u8]) -> Result<(), ChannelError> {
        self.writer.send(bytes).await
    }

    /// Reads the next chunk. See [`ChannelReader::receive`].
    ///
    /// # Errors
    ///
    /// Propagates the reader's error.
    pub async fn receive(&mut self) -> Result<Option<Bytes>, ChannelError> {
        self.reader.receive().await
    }

    /// Borrows both directions so they can be driven concurrently.
    pub const fn split(&mut self) -> (&mut ChannelWriter, &mut ChannelReader) {
        (&mut self.writer, &mut self.reader)
    }

    /// Closes both directions. Idempotent.
    ///
    /// Stdout is released even when closing stdin fails.
    ///
    /// # Errors
    ///
    /// Returns the stdin shutdown error, if any.
    pub async fn close(&mut self) -> Result<(), ChannelError> {
        let result = self.writer.close().await;
        self.reader.close();
        debug!(pid = ?self.process.id(), "Channel closed");
        result
    }

    /// True once both directions are closed.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.writer.is_closed() && self.reader.is_closed()
    }

    /// The server's process ID.
    #[must_use]
    pub const fn process_id(&self) -> Option<u32> {
        self.process.id()
    }

    /// A watch on the server's exit status.
    #[must_use]
    pub fn exit_watch(&self) -> ExitWatch {
        self.process.exit_watch()
    }

    /// The owned process handle.
    #[must_use]
    pub const fn process(&self) -> &ProcessHandle {
        &self.process
    }

    /// A cloneable terminator for the server.
    #[must_use]
    pub fn terminator(&self) -> Terminator {
        self.process.terminator()
    }

    /// Requests forceful termination of the server.
    pub fn terminate(&self) {
        self.process.terminate();
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::lsp::{ProcessSupervisor, ServerLaunchSpec};
    use anyhow::{Context as _, Result};
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(10);

    async fn cat_channel(supervisor: &ProcessSupervisor) -> Result<Channel> {
        let handle = supervisor.start(&ServerLaunchSpec::new("cat")).await?;
        Ok(Channel::new(handle))
    }

    async fn read_exactly(channel: &mut Channel, len: usize) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        while out.len() < len {
            let chunk = tokio::time::timeout(WAIT, channel.receive())
                .await??
                .context("server closed output early")?;
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }

    #[tokio::test]
    async fn test_send_receive_in_order() -> Result<()> {
        let supervisor = ProcessSupervisor::new();
        let mut channel = cat_channel(&supervisor).await?;

        channel.send(b"Content-Length: 2\r\n\r\n").await?;
        channel.send(b"{}").await?;

        let echoed = read_exactly(&mut channel, 23).await?;
        assert_eq!(echoed, b"Content-Length: 2\r\n\r\n{}");
        Ok(())
    }

    #[tokio::test]
    async fn test_receive_is_finite() -> Result<()> {
        let supervisor = ProcessSupervisor::new();
        let mut channel = cat_channel(&supervisor).await?;

        channel.send(b"bye").await?;
        let (writer, _) = channel.split();
        writer.close().await?;

        assert_eq!(read_exactly(&mut channel, 3).await?, b"bye");
        assert!(channel.receive().await?.is_none());
        assert!(channel.receive().await?.is_none());

        let status = tokio::time::timeout(WAIT, channel.exit_watch().wait()).await?;
        assert!(status.success());
        Ok(())
    }

    #[tokio::test]
    async fn test_closed_channel_rejects_io() -> Result<()> {
        let supervisor = ProcessSupervisor::new();
        let mut channel = cat_channel(&supervisor).await?;

        channel.close().await?;
        assert!(channel.is_closed());
        channel.close().await?;

        assert!(matches!(
            channel.send(b"late").await,
            Err(ChannelError::AlreadyClosed)
        ));
        assert!(matches!(
            channel.receive().await,
            Err(ChannelError::AlreadyClosed)
        ));

        // cat exits once stdin is closed
        let status = tokio::time::timeout(WAIT, channel.exit_watch().wait()).await?;
        assert!(status.success());
        Ok(())
    }

    #[tokio::test]
    async fn test_split_halves_run_concurrently() -> Result<()> {
        let supervisor = ProcessSupervisor::new();
        let mut channel = cat_channel(&supervisor).await?;
        let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();

        let (writer, reader) = channel.split();
        let write = async {
            writer.send(&payload).await?;
            writer.close().await
        };
        let read = async {
            let mut out = Vec::new();
            tokio::io::copy(reader, &mut out)
                .await
                .map_err(ChannelError::ReadFailed)?;
            Ok::<_, ChannelError>(out)
        };

        let (written, echoed) = tokio::time::timeout(WAIT, async { tokio::join!(write, read) }).await?;
        written?;
        assert_eq!(echoed?, payload);
        Ok(())
    }

    #[tokio::test]
    async fn test_write_after_server_exit_fails() -> Result<()> {
        let supervisor = ProcessSupervisor::new();
        let mut channel = cat_channel(&supervisor).await?;

        channel.terminate();
        tokio::time::timeout(WAIT, channel.exit_watch().wait()).await?;

        // The pipe may accept one small write before reporting EPIPE.
        let mut failed = false;
        for _ in 0..64 {
            if let Err(e) = channel.send(&[0u8; 4096]).await {
                assert!(matches!(e, ChannelError::WriteFailed(_)));
                failed = true;
                break;
            }
        }
        assert!(failed);
        Ok(())
    }
}
