// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Integration tests for the activation controller.
//!
//! Plays the part of an LSP client layer: activates `mockls`, performs the
//! initialize handshake over the returned channel and reports the outcome
//! through the controller's hooks.

use anyhow::{Context, Result, bail};
use serde_json::{Value, json};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use lsp_launcher::lsp::{
    ActivationController, ActivationError, ActivationState, Channel, ClientOptions, LaunchError,
    LifecycleEvent, ServerLaunchSpec,
};

const WAIT: Duration = Duration::from_secs(10);

fn mockls(args: &[&str]) -> ServerLaunchSpec {
    ServerLaunchSpec::new(env!("CARGO_BIN_EXE_mockls")).args(args.iter().copied())
}

fn frame(value: &Value) -> Vec<u8> {
    let body = value.to_string();
    format!("Content-Length: {}\r\n\r\n{body}", body.len()).into_bytes()
}

/// Reads one Content-Length framed message from the channel.
async fn read_message(channel: &mut Channel, buffer: &mut Vec<u8>) -> Result<Value> {
    loop {
        if let Some(header_end) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
            let headers = std::str::from_utf8(&buffer[..header_end])?;
            let length: usize = headers
                .lines()
                .find_map(|line| line.strip_prefix("Content-Length:"))
                .context("missing Content-Length")?
                .trim()
                .parse()?;
            let total = header_end + 4 + length;
            if buffer.len() >= total {
                let value = serde_json::from_slice(&buffer[header_end + 4..total])?;
                buffer.drain(..total);
                return Ok(value);
            }
        }

        let chunk = tokio::time::timeout(WAIT, channel.receive())
            .await??
            .context("server closed its output")?;
        buffer.extend_from_slice(&chunk);
    }
}

async fn next_event(rx: &mut broadcast::Receiver<LifecycleEvent>) -> Result<LifecycleEvent> {
    Ok(tokio::time::timeout(WAIT, rx.recv()).await??)
}

#[tokio::test]
async fn test_missing_server_reports_launch_failure() -> Result<()> {
    let controller = ActivationController::new(
        ServerLaunchSpec::new("/no/such/server"),
        ClientOptions::default(),
    );

    match controller.activate(&CancellationToken::new()).await {
        Err(ActivationError::LaunchFailed(LaunchError::ExecutableNotFound { path })) => {
            assert_eq!(path, std::path::Path::new("/no/such/server"));
        }
        Err(e) => bail!("unexpected error: {e}"),
        Ok(_) => bail!("activation should fail"),
    }
    assert_eq!(controller.state(), ActivationState::FailedToStart);
    assert_eq!(controller.supervisor().spawn_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_precancelled_activation_spawns_nothing() -> Result<()> {
    let controller = ActivationController::new(mockls(&[]), ClientOptions::default());
    let cancel = CancellationToken::new();
    cancel.cancel();

    assert!(matches!(
        controller.activate(&cancel).await,
        Err(ActivationError::Cancelled)
    ));
    assert_eq!(controller.supervisor().spawn_count(), 0);
    assert_eq!(controller.state(), ActivationState::Idle);

    // A fresh token activates normally afterwards
    let channel = controller.activate(&CancellationToken::new()).await?;
    assert_eq!(controller.state(), ActivationState::Active);
    channel.terminate();
    Ok(())
}

#[tokio::test]
async fn test_echo_lifecycle() -> Result<()> {
    let controller = ActivationController::new(mockls(&[]), ClientOptions::default());
    let mut events = controller.subscribe();
    assert_eq!(controller.state(), ActivationState::Idle);

    controller.on_loaded();
    assert_eq!(next_event(&mut events).await?, LifecycleEvent::StartRequested);

    let mut channel = controller.activate(&CancellationToken::new()).await?;
    assert_eq!(controller.state(), ActivationState::Active);
    assert_eq!(
        next_event(&mut events).await?,
        LifecycleEvent::Started {
            pid: channel.process_id()
        }
    );

    channel.send(b"hello").await?;
    let chunk = tokio::time::timeout(WAIT, channel.receive())
        .await??
        .context("no echo")?;
    assert!(b"hello".starts_with(&chunk));

    channel.close().await?;

    match next_event(&mut events).await? {
        LifecycleEvent::Stopped { status } => assert_eq!(status.code(), Some(0)),
        other => bail!("unexpected event: {other:?}"),
    }
    assert_eq!(controller.state(), ActivationState::Stopped);
    Ok(())
}

#[tokio::test]
async fn test_lsp_handshake_over_channel() -> Result<()> {
    let options = ClientOptions {
        name: "Bar Language Extension".to_string(),
        ..ClientOptions::default()
    };
    let controller = ActivationController::new(mockls(&["--lsp"]), options);
    let mut events = controller.subscribe();

    let mut channel = controller.activate(&CancellationToken::new()).await?;
    let mut buffer = Vec::new();

    channel
        .send(&frame(&json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": { "processId": null, "capabilities": {} }
        })))
        .await?;
    let response = read_message(&mut channel, &mut buffer).await?;
    assert_eq!(response["id"], 1);
    assert_eq!(response["result"]["serverInfo"]["name"], "mockls");
    controller.on_server_initialized();

    channel
        .send(&frame(&json!({"jsonrpc": "2.0", "id": 2, "method": "shutdown"})))
        .await?;
    let response = read_message(&mut channel, &mut buffer).await?;
    assert_eq!(response["id"], 2);
    channel
        .send(&frame(&json!({"jsonrpc": "2.0", "method": "exit"})))
        .await?;

    let status = tokio::time::timeout(WAIT, channel.exit_watch().wait()).await?;
    assert!(status.success());

    let mut seen = Vec::new();
    while seen.len() < 3 {
        seen.push(next_event(&mut events).await?);
    }
    assert!(matches!(seen[0], LifecycleEvent::Started { .. }));
    assert_eq!(seen[1], LifecycleEvent::Initialized);
    assert!(matches!(seen[2], LifecycleEvent::Stopped { status } if status.success()));
    Ok(())
}

#[tokio::test]
async fn test_initialize_failure_disposition() -> Result<()> {
    let controller =
        ActivationController::new(mockls(&["--lsp", "--fail-initialize"]), ClientOptions::default());

    let mut channel = controller.activate(&CancellationToken::new()).await?;
    let mut buffer = Vec::new();
    channel
        .send(&frame(&json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}})))
        .await?;
    let response = read_message(&mut channel, &mut buffer).await?;
    let reason = response["error"]["message"]
        .as_str()
        .context("expected an error response")?;

    let disposition = controller.on_server_initialize_failed(reason);
    assert!(disposition.show_notification);
    assert!(disposition.message.contains("initialize refused"));

    controller.stop();
    let status = tokio::time::timeout(WAIT, channel.exit_watch().wait()).await?;
    assert!(!status.success());
    Ok(())
}

#[tokio::test]
async fn test_reactivate_after_server_exit() -> Result<()> {
    let controller = ActivationController::new(mockls(&["--exit-code", "4"]), ClientOptions::default());
    let mut events = controller.subscribe();

    let mut first = controller.activate(&CancellationToken::new()).await?;
    first.close().await?;
    loop {
        if let LifecycleEvent::Stopped { status } = next_event(&mut events).await? {
            assert_eq!(status.code(), Some(4));
            break;
        }
    }
    assert_eq!(controller.state(), ActivationState::Stopped);

    let second = controller.activate(&CancellationToken::new()).await?;
    assert_eq!(controller.state(), ActivationState::Active);
    assert_ne!(first.process_id(), second.process_id());
    assert_eq!(controller.supervisor().spawn_count(), 2);
    second.terminate();
    Ok(())
}
