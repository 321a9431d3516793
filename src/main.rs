//! # peer-auth binary
//!
//! Runs one mutual authentication attempt over the UDP loopback carrier:
//!
//! 1. **Initialize logging**: layered tracing with a detailed file (or
//!    stderr) layer and a colorized stdout layer
//! 2. **Parse arguments**: role, addresses, optional key override
//! 3. **Spawn the carrier**: bind the local socket, start the receiver
//! 4. **Run the session**: start the worker, wait for a terminal status
//! 5. **Report**: one JSON line on stdout, exit code 0 only on success

use anyhow::Result;
use clap::Parser;
use peer_auth::cli::Args;
use peer_auth::session::Session;
use peer_auth::transport::UdpCarrier;
use peer_auth::SessionStatus;
use tracing::info;
use tracing_subscriber::{filter::LevelFilter, prelude::*, Layer};

mod logging;
use logging::StatusLineFormatter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Verbosity: default INFO, -v DEBUG, -vv TRACE. Applies to both layers.
    let log_level = match args.verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };

    // Detailed layer goes to stderr or a rolling file; the guard must stay
    // alive for the lifetime of the process or file logging stops.
    let guard;
    let detailed_layer;
    if let Some("stderr") = args.log_file.as_deref() {
        detailed_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_filter(log_level)
            .boxed();
        guard = None;
    } else {
        let file_appender = match args.log_file.as_deref() {
            Some(path_str) => {
                let log_path = std::path::Path::new(path_str);
                let log_dir = log_path
                    .parent()
                    .unwrap_or_else(|| std::path::Path::new("."));
                let log_name = log_path
                    .file_name()
                    .unwrap_or_else(|| std::ffi::OsStr::new("peer_auth.log"));
                tracing_appender::rolling::daily(log_dir, log_name)
            }
            None => tracing_appender::rolling::daily(".", "peer_auth.log"),
        };
        let (non_blocking_writer, file_guard) = tracing_appender::non_blocking(file_appender);
        detailed_layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_writer)
            .with_ansi(false)
            .with_filter(log_level)
            .boxed();
        guard = Some(file_guard);
    }

    // Clean user-facing layer on stdout unless --quiet.
    let stdout_layer = if !args.quiet {
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .event_format(StatusLineFormatter)
                .with_filter(log_level),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(detailed_layer)
        .with(stdout_layer)
        .init();
    let _log_guard = guard;

    let status = run(&args).await?;

    // Machine-readable result line, then a conventional exit code.
    println!(
        "{}",
        serde_json::json!({
            "role": format!("{:?}", args.role).to_lowercase(),
            "status": status.as_str(),
        })
    );

    if status == SessionStatus::Successful {
        Ok(())
    } else {
        std::process::exit(1);
    }
}

/// Spawn the carrier, run one session to its terminal status.
async fn run(args: &Args) -> Result<SessionStatus> {
    info!(
        "Starting peer authentication as {:?} ({} -> {}:{})",
        args.role, args.bind_port, args.peer_ip, args.peer_port
    );

    let (carrier, transport) = UdpCarrier::spawn(&args.carrier_config()).await?;
    let config = args.session_config()?;

    let mut session = Session::init(config, transport, |instance, status| {
        info!("session {instance}: {status}");
    })?;
    session.start()?;

    let status = session.shutdown().await;
    carrier.close().await;

    info!("Authentication finished: {status}");
    Ok(status)
}
