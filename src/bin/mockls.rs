// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! A configurable stand-in language server for testing.
//!
//! By default it echoes stdin to stdout byte for byte. With `--lsp` it
//! speaks just enough Content-Length framed JSON-RPC to complete an
//! initialize/shutdown/exit handshake. CLI flags control exit codes,
//! stderr chatter and failure modes. No tokio.

use std::io::{Read, Write};
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Mock language server for integration testing.
#[derive(Parser, Debug)]
#[command(name = "mockls")]
struct Args {
    /// Speak LSP framing instead of echoing raw bytes.
    #[arg(long)]
    lsp: bool,

    /// Exit code to use when input ends (or after shutdown/exit with --lsp).
    #[arg(long, default_value_t = 0)]
    exit_code: u8,

    /// Stop after echoing this many bytes (simulate crash).
    #[arg(long)]
    exit_after: Option<u64>,

    /// Write this line to stderr at startup (repeatable).
    #[arg(long)]
    stderr: Vec<String>,

    /// Keep running after stdin closes, until killed.
    #[arg(long)]
    linger: bool,

    /// Answer `initialize` with an error.
    #[arg(long)]
    fail_initialize: bool,
}

/// A JSON-RPC request or notification.
#[derive(Debug, Deserialize)]
struct Request {
    id: Option<Value>,
    method: Option<String>,
}

/// A JSON-RPC response.
#[derive(Debug, Serialize)]
struct Response {
    jsonrpc: &'static str,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

/// JSON-RPC error object.
#[derive(Debug, Serialize)]
struct RpcError {
    code: i64,
    message: String,
}

const METHOD_NOT_FOUND: i64 = -32601;
const INTERNAL_ERROR: i64 = -32603;
/// JSON-RPC: request before `initialize`.
const SERVER_NOT_INITIALIZED: i64 = -32002;

/// Copies `reader` to `writer` until EOF or `limit` bytes. Returns the
/// number of bytes echoed.
fn echo(reader: &mut dyn Read, writer: &mut dyn Write, limit: Option<u64>) -> u64 {
    let mut temp = [0u8; 4096];
    let mut total = 0u64;

    loop {
        let want = limit.map_or(temp.len(), |limit| {
            usize::try_from(limit.saturating_sub(total))
                .unwrap_or(usize::MAX)
                .min(temp.len())
        });
        if want == 0 {
            break;
        }

        let n = match reader.read(&mut temp[..want]) {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        if writer.write_all(&temp[..n]).and_then(|()| writer.flush()).is_err() {
            break;
        }
        total += n as u64;
    }

    total
}

/// Minimal LSP server state.
struct MockServer<'a> {
    args: &'a Args,
    writer: &'a mut dyn Write,
    initialized: bool,
    shutdown_requested: bool,
    exit_code: Option<u8>,
}

impl<'a> MockServer<'a> {
    fn new(args: &'a Args, writer: &'a mut dyn Write) -> Self {
        Self {
            args,
            writer,
            initialized: false,
            shutdown_requested: false,
            exit_code: None,
        }
    }

    /// Serves until `exit` or EOF. Returns the process exit code.
    fn run(&mut self, reader: &mut dyn Read) -> u8 {
        let mut buffer = Vec::new();
        let mut temp = [0u8; 4096];

        loop {
            match reader.read(&mut temp) {
                Ok(0) | Err(_) => break,
                Ok(n) => buffer.extend_from_slice(&temp[..n]),
            }

            while let Some((body, consumed)) = next_frame(&buffer) {
                let parsed = serde_json::from_slice::<Request>(body);
                buffer.drain(..consumed);

                let Ok(request) = parsed else {
                    continue;
                };
                self.handle_message(request);

                if let Some(code) = self.exit_code {
                    return code;
                }
            }
        }

        self.args.exit_code
    }

    fn handle_message(&mut self, request: Request) {
        let Some(method) = request.method else {
            return;
        };

        match (request.id, method.as_str()) {
            (Some(id), "initialize") => {
                if self.args.fail_initialize {
                    self.respond_error(id, INTERNAL_ERROR, "mockls: initialize refused");
                } else {
                    self.initialized = true;
                    self.respond(
                        id,
                        serde_json::json!({
                            "capabilities": {},
                            "serverInfo": { "name": "mockls" }
                        }),
                    );
                }
            }
            (Some(id), _) if !self.initialized => {
                self.respond_error(id, SERVER_NOT_INITIALIZED, "mockls: not initialized");
            }
            (Some(id), "shutdown") => {
                self.shutdown_requested = true;
                self.respond(id, Value::Null);
            }
            (Some(id), other) => {
                self.respond_error(id, METHOD_NOT_FOUND, &format!("mockls: unknown method {other}"));
            }
            (None, "exit") => {
                // LSP: exit without a prior shutdown is an error exit.
                self.exit_code = Some(if self.shutdown_requested {
                    self.args.exit_code
                } else {
                    1
                });
            }
            (None, _) => {}
        }
    }

    fn respond(&mut self, id: Value, result: Value) {
        self.send(&Response {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        });
    }

    fn respond_error(&mut self, id: Value, code: i64, message: &str) {
        self.send(&Response {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.to_string(),
            }),
        });
    }

    fn send(&mut self, response: &Response) {
        let Ok(json) = serde_json::to_string(response) else {
            return;
        };
        write_framed(self.writer, &json);
    }
}

/// Write a Content-Length framed JSON string.
fn write_framed(writer: &mut dyn Write, json: &str) {
    let header = format!("Content-Length: {}\r\n\r\n", json.len());
    let _ = writer.write_all(header.as_bytes());
    let _ = writer.write_all(json.as_bytes());
    let _ = writer.flush();
}

/// Splits the first complete frame off the front of `buffer`.
///
/// Yields the body and the length of the whole frame, or `None` while the
/// headers or body are still incomplete.
fn next_frame(buffer: &[u8]) -> Option<(&[u8], usize)> {
    const SEPARATOR: &[u8] = b"\r\n\r\n";

    let split = buffer
        .windows(SEPARATOR.len())
        .position(|w| w == SEPARATOR)?;
    let length: usize = std::str::from_utf8(&buffer[..split])
        .ok()?
        .split("\r\n")
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse().ok())?;

    let start = split + SEPARATOR.len();
    let end = start.checked_add(length)?;
    buffer.get(start..end).map(|body| (body, end))
}

fn main() -> ExitCode {
    let args = Args::parse();

    {
        let mut stderr = std::io::stderr().lock();
        for line in &args.stderr {
            let _ = writeln!(stderr, "{line}");
        }
    }

    let mut stdin = std::io::stdin().lock();
    let mut stdout = std::io::stdout().lock();

    let code = if args.lsp {
        MockServer::new(&args, &mut stdout).run(&mut stdin)
    } else {
        echo(&mut stdin, &mut stdout, args.exit_after);
        args.exit_code
    };

    if args.linger {
        loop {
            std::thread::sleep(Duration::from_secs(60));
        }
    }

    ExitCode::from(code)
}

#[cfg(test)]
#[allow(
    clippy::expect_used,
    clippy::unwrap_used,
    reason = "Tests use expect/unwrap for clear failure messages"
)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn default_args() -> Args {
        Args {
            lsp: true,
            exit_code: 0,
            exit_after: None,
            stderr: vec![],
            linger: false,
            fail_initialize: false,
        }
    }

    fn frame(body: &str) -> Vec<u8> {
        format!("Content-Length: {}\r\n\r\n{}", body.len(), body).into_bytes()
    }

    fn extract_messages(data: &[u8]) -> Vec<Value> {
        let mut messages = Vec::new();
        let mut rest = data;
        while let Some((body, consumed)) = next_frame(rest) {
            if let Ok(v) = serde_json::from_slice::<Value>(body) {
                messages.push(v);
            }
            rest = &rest[consumed..];
        }
        messages
    }

    fn run_server_with(args: &Args, input: &[u8]) -> (u8, Vec<Value>) {
        let mut out = Vec::new();
        let code = MockServer::new(args, &mut out).run(&mut Cursor::new(input.to_vec()));
        (code, extract_messages(&out))
    }

    fn request(id: u64, method: &str) -> Vec<u8> {
        frame(&format!(
            r#"{{"jsonrpc":"2.0","id":{id},"method":"{method}","params":{{}}}}"#
        ))
    }

    fn notification(method: &str) -> Vec<u8> {
        frame(&format!(r#"{{"jsonrpc":"2.0","method":"{method}"}}"#))
    }

    fn handshake() -> Vec<u8> {
        [
            request(1, "initialize"),
            notification("initialized"),
            request(2, "shutdown"),
            notification("exit"),
        ]
        .concat()
    }

    #[test]
    fn test_echo_copies_everything() {
        let input = b"Content-Length: 2\r\n\r\n{}".to_vec();
        let mut out = Vec::new();
        let n = echo(&mut Cursor::new(input.clone()), &mut out, None);
        assert_eq!(n, input.len() as u64);
        assert_eq!(out, input);
    }

    #[test]
    fn test_echo_stops_at_limit() {
        let mut out = Vec::new();
        let n = echo(&mut Cursor::new(b"abcdefgh".to_vec()), &mut out, Some(3));
        assert_eq!(n, 3);
        assert_eq!(out, b"abc");
    }

    #[test]
    fn test_handshake() {
        let (code, messages) = run_server_with(&default_args(), &handshake());
        assert_eq!(code, 0);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["id"], 1);
        assert_eq!(messages[0]["result"]["serverInfo"]["name"], "mockls");
        assert_eq!(messages[1]["id"], 2);
        assert!(messages[1]["result"].is_null());
    }

    #[test]
    fn test_handshake_uses_configured_exit_code() {
        let args = Args {
            exit_code: 7,
            ..default_args()
        };
        let (code, _) = run_server_with(&args, &handshake());
        assert_eq!(code, 7);
    }

    #[test]
    fn test_exit_without_shutdown_is_error() {
        let input = [request(1, "initialize"), notification("exit")].concat();
        let (code, _) = run_server_with(&default_args(), &input);
        assert_eq!(code, 1);
    }

    #[test]
    fn test_fail_initialize() {
        let args = Args {
            fail_initialize: true,
            ..default_args()
        };
        let (_, messages) = run_server_with(&args, &request(1, "initialize"));
        assert_eq!(messages[0]["error"]["code"], INTERNAL_ERROR);

        let input = [request(1, "initialize"), request(2, "shutdown")].concat();
        let (_, messages) = run_server_with(&args, &input);
        assert_eq!(messages[1]["error"]["code"], SERVER_NOT_INITIALIZED);
    }

    #[test]
    fn test_unknown_method() {
        let input = [request(1, "initialize"), request(2, "textDocument/hover")].concat();
        let (_, messages) = run_server_with(&default_args(), &input);
        assert_eq!(messages[1]["error"]["code"], METHOD_NOT_FOUND);
    }

    #[test]
    fn test_split_frames_are_reassembled() {
        let mut input = request(1, "initialize");
        let tail = input.split_off(10);
        struct Chunked(Vec<Vec<u8>>);
        impl Read for Chunked {
            fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
                if self.0.is_empty() {
                    return Ok(0);
                }
                let chunk = self.0.remove(0);
                buf[..chunk.len()].copy_from_slice(&chunk);
                Ok(chunk.len())
            }
        }

        let args = default_args();
        let mut out = Vec::new();
        MockServer::new(&args, &mut out).run(&mut Chunked(vec![input, tail]));
        let messages = extract_messages(&out);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["id"], 1);
    }

    #[test]
    fn test_next_frame_waits_for_whole_frame() {
        assert!(next_frame(b"Content-Length: 10\r\n\r\n{}").is_none());
        assert!(next_frame(b"Content-Length: 2\r\n").is_none());
        assert!(next_frame(b"Content-Type: x\r\n\r\n{}").is_none());
    }

    #[test]
    fn test_next_frame_reads_any_header_order() {
        let data = b"Content-Type: application/vscode-jsonrpc\r\ncontent-length: 2\r\n\r\n{}tail";
        let (body, consumed) = next_frame(data).unwrap();
        assert_eq!(body, b"{}");
        assert_eq!(&data[consumed..], b"tail");
    }
}
