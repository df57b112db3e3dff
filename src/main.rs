// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! lsp-launcher CLI.
//!
//! `serve` proxies an editor's stdio to a supervised language server,
//! `doctor` checks every configured server, and `resolve` shows which
//! server a file would be routed to.

#![allow(clippy::print_stdout, reason = "CLI tool needs to output to stdout")]
#![allow(clippy::print_stderr, reason = "CLI tool needs to output to stderr")]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::pin::pin;
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use lsp_launcher::cli::ColorConfig;
use lsp_launcher::config::{Config, ServerConfig};
use lsp_launcher::event_log::EventLog;
use lsp_launcher::lsp::{ActivationController, ExitStatus};

/// How long to wait for a server to exit on its own after its stdin closes.
const EXIT_GRACE: Duration = Duration::from_secs(2);

/// How long to let the event recorder drain after the server stopped.
const RECORDER_DRAIN: Duration = Duration::from_secs(1);

/// Command-line arguments for lsp-launcher.
#[derive(Parser, Debug)]
#[command(name = "lsp-launcher")]
#[command(about = "Supervise a language server process and proxy its stdio")]
#[command(version = env!("LSP_LAUNCHER_VERSION"))]
struct Args {
    /// The subcommand to run.
    #[command(subcommand)]
    command: Option<Command>,

    /// Language servers in "type:command args" format (e.g., "sneklang:snek-lsp --stdio").
    /// Can be specified multiple times. These override/append to the config file.
    #[arg(short, long = "server", global = true)]
    servers: Vec<String>,

    /// Path to configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Append lifecycle events to this JSON-lines file.
    #[arg(long, global = true)]
    events: Option<PathBuf>,
}

/// Subcommands supported by lsp-launcher.
#[derive(Subcommand, Debug)]
enum Command {
    /// Proxy stdio to a language server (default if no subcommand given).
    Serve {
        /// Content type whose server to launch.
        #[arg(long, conflicts_with = "file")]
        content_type: Option<String>,

        /// Pick the server from this file's content type.
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Check that every configured language server can be started.
    Doctor {
        /// Disable colored output.
        #[arg(long)]
        nocolor: bool,
    },

    /// Show which content type and server handle a file.
    Resolve {
        /// The file to resolve.
        file: PathBuf,
    },
}

/// Entry point for the lsp-launcher binary.
fn main() -> ExitCode {
    let args = Args::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(run(args));

    // A blocked stdin read must not keep the process alive once the
    // server is gone.
    runtime.shutdown_background();

    result.unwrap_or_else(|e| {
        eprintln!("Error: {e:#}");
        ExitCode::FAILURE
    })
}

async fn run(args: Args) -> Result<ExitCode> {
    let command = args.command.unwrap_or(Command::Serve {
        content_type: None,
        file: None,
    });

    let directive = if matches!(command, Command::Serve { .. }) {
        "lsp_launcher=info"
    } else {
        "lsp_launcher=warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(directive.parse()?))
        .with_writer(std::io::stderr)
        .init();

    let mut config = Config::load(args.config.clone())?;
    for spec in &args.servers {
        config.apply_server_override(spec)?;
    }

    match command {
        Command::Serve { content_type, file } => {
            run_serve(
                &config,
                args.events.as_deref(),
                content_type.as_deref(),
                file.as_deref(),
            )
            .await
        }
        Command::Doctor { nocolor } => run_doctor(&config, args.config.as_deref(), nocolor).await,
        Command::Resolve { file } => run_resolve(&config, &file),
    }
}

/// Maps a server exit status onto the launcher's own exit code.
fn exit_code(status: ExitStatus) -> ExitCode {
    status
        .code()
        .and_then(|code| u8::try_from(code).ok())
        .map_or(ExitCode::FAILURE, ExitCode::from)
}

/// Runs the stdio proxy.
///
/// # Errors
///
/// Returns an error if no server matches or the server cannot be activated.
async fn run_serve(
    config: &Config,
    events: Option<&Path>,
    content_type: Option<&str>,
    file: Option<&Path>,
) -> Result<ExitCode> {
    let (name, server) = config.select_server(content_type, file)?;
    let controller = ActivationController::new(server.launch_spec(), server.client_options(&name));
    info!(
        content_type = %name,
        command = %controller.spec().display_command(),
        "Serving language server"
    );

    let recorder = match events {
        Some(path) => Some(EventLog::open(path)?.spawn_recorder(name.clone(), controller.subscribe())),
        None => None,
    };

    controller.on_loaded();
    let mut channel = controller
        .activate(&CancellationToken::new())
        .await
        .with_context(|| format!("Failed to activate '{name}' server"))?;

    let terminator = channel.terminator();
    let exit = terminator.exit_watch().clone();

    {
        let (writer, reader) = channel.split();

        let upstream = async {
            let mut stdin = tokio::io::stdin();
            let copied = tokio::io::copy(&mut stdin, writer).await;
            // Editor closed its end; let the server see EOF too.
            let closed = writer.close().await;
            (copied, closed)
        };
        let downstream = async {
            let mut stdout = tokio::io::stdout();
            let copied = tokio::io::copy(reader, &mut stdout).await;
            tokio::io::AsyncWriteExt::flush(&mut stdout).await?;
            copied
        };

        let mut upstream = pin!(upstream);
        let mut downstream = pin!(downstream);
        let mut ctrl_c = pin!(tokio::signal::ctrl_c());
        let mut upstream_done = false;
        let mut ctrl_c_armed = true;

        loop {
            tokio::select! {
                (copied, closed) = &mut upstream, if !upstream_done => {
                    upstream_done = true;
                    match copied {
                        Ok(n) => debug!("Client input finished after {} bytes", n),
                        Err(e) => debug!("Client input stopped: {}", e),
                    }
                    if let Err(e) = closed {
                        debug!("Closing server stdin failed: {}", e);
                    }
                }
                copied = &mut downstream => {
                    match copied {
                        Ok(n) => debug!("Server output finished after {} bytes", n),
                        Err(e) => warn!("Forwarding server output failed: {}", e),
                    }
                    break;
                }
                result = &mut ctrl_c, if ctrl_c_armed => {
                    ctrl_c_armed = false;
                    match result {
                        Ok(()) => {
                            info!("Received shutdown signal");
                            terminator.terminate();
                            break;
                        }
                        Err(e) => warn!("Cannot listen for Ctrl-C: {}", e),
                    }
                }
            }
        }
    }

    let status = match tokio::time::timeout(EXIT_GRACE, exit.wait()).await {
        Ok(status) => status,
        Err(_) => {
            warn!("Server still running after its output closed; terminating");
            terminator.terminate();
            exit.wait().await
        }
    };
    info!(%status, "Language server exited");

    drop(channel);
    drop(controller);
    if let Some(recorder) = recorder
        && tokio::time::timeout(RECORDER_DRAIN, recorder).await.is_err()
    {
        warn!("Event recorder did not finish");
    }

    Ok(exit_code(status))
}

/// Prints the content type and server for a file.
///
/// # Errors
///
/// Returns an error if no content type is bound to the file's extension.
fn run_resolve(config: &Config, file: &Path) -> Result<ExitCode> {
    let registry = config.registry();
    let content_type = registry
        .resolve(file)
        .with_context(|| format!("No content type registered for {}", file.display()))?;

    match &content_type.base {
        Some(base) => println!("content type: {} (base: {base})", content_type.name),
        None => println!("content type: {}", content_type.name),
    }

    match config.server.get(&content_type.name) {
        Some(server) => {
            println!("server:       {}", server.launch_spec().display_command());
            Ok(ExitCode::SUCCESS)
        }
        None => {
            println!("server:       none configured");
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Outcome of checking one server.
enum Health {
    Healthy { program: PathBuf, pid: Option<u32> },
    Unhealthy(String),
}

async fn check_server(name: &str, server: &ServerConfig) -> Health {
    let spec = server.launch_spec();
    let program = match spec.resolve_executable().await {
        Ok(program) => program,
        Err(e) => return Health::Unhealthy(e.to_string()),
    };

    let controller = ActivationController::new(spec, server.client_options(name));
    let mut channel = match controller.activate(&CancellationToken::new()).await {
        Ok(channel) => channel,
        Err(e) => return Health::Unhealthy(e.to_string()),
    };
    let pid = channel.process_id();

    if let Err(e) = channel.close().await {
        debug!("Closing {} channel failed: {}", name, e);
    }
    let exit = channel.exit_watch();
    if tokio::time::timeout(EXIT_GRACE, exit.wait()).await.is_err() {
        channel.terminate();
        exit.wait().await;
    }

    Health::Healthy { program, pid }
}

/// Runs the doctor command: start and stop every configured server.
///
/// # Errors
///
/// Never fails on an unhealthy server; that is reported in the exit code.
async fn run_doctor(config: &Config, config_file: Option<&Path>, nocolor: bool) -> Result<ExitCode> {
    let colors = ColorConfig::new(nocolor);

    println!("lsp-launcher {}", env!("LSP_LAUNCHER_VERSION"));
    println!();

    let config_source =
        config_file.map_or_else(|| "default paths".to_string(), |p| p.display().to_string());
    println!("{} {}", colors.bold("Config:"), config_source);

    let registry = config.registry();
    for name in registry.names() {
        let base = registry
            .get(name)
            .and_then(|ct| ct.base.as_deref())
            .map_or_else(String::new, |b| format!(" (base: {b})"));
        let extensions = config
            .content_type
            .get(name)
            .map(|ct| ct.extensions.join(" "))
            .unwrap_or_default();
        println!(
            "{} {}{}  {}",
            colors.bold("Type:  "),
            colors.cyan(name),
            base,
            colors.dim(&extensions)
        );
    }
    println!();

    if config.server.is_empty() {
        println!("No language servers configured.");
        return Ok(ExitCode::SUCCESS);
    }

    let mut servers: Vec<(&String, &ServerConfig)> = config.server.iter().collect();
    servers.sort_by_key(|(name, _)| *name);
    let width = servers.iter().map(|(n, _)| n.len()).max().unwrap_or(10);

    let mut failures = 0usize;
    for (name, server) in servers {
        let label = format!("{name:<width$}");
        match check_server(name, server).await {
            Health::Healthy { program, pid } => {
                let pid = pid.map_or_else(|| "?".to_string(), |p| p.to_string());
                println!(
                    "{}  {}  {}",
                    colors.cyan(&label),
                    colors.green(&format!("✓ {}", program.display())),
                    colors.dim(&format!("(pid {pid})")),
                );
            }
            Health::Unhealthy(reason) => {
                failures += 1;
                println!(
                    "{}  {}",
                    colors.cyan(&label),
                    colors.red(&format!("✗ {reason}")),
                );
            }
        }
    }

    if failures == 0 {
        Ok(ExitCode::SUCCESS)
    } else {
        println!();
        println!("{}", colors.yellow(&format!("{failures} server(s) failed")));
        Ok(ExitCode::FAILURE)
    }
}
