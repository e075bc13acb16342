// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! rpw: the Runplane task-runtime worker daemon.
//!
//! Binds the RPC listener, consumes the job queue, and supervises
//! harness runs until shutdown.

use rp_core::{RuntimeConfig, SequenceCounter, SystemClock};
use rp_runtime::artifact::ArtifactStreamer;
use rp_runtime::command::{CommandLimits, CommandService};
use rp_runtime::server::RpcServer;
use rp_runtime::supervisor::{DefaultHarnessFactory, Supervisor};
use rp_runtime::{EventBus, EventPublisher, JobQueue, WorkspaceGuard};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Resolve state directory: RPW_STATE_DIR > XDG_STATE_HOME/runplane >
/// ~/.local/state/runplane.
fn state_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("RPW_STATE_DIR") {
        return PathBuf::from(dir);
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return PathBuf::from(xdg).join("runplane");
    }
    dirs::home_dir()
        .map(|h| h.join(".local/state/runplane"))
        .unwrap_or_else(|| PathBuf::from("/var/lib/runplane"))
}

fn init_tracing(state_dir: &std::path::Path) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_env("RPW_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let log_dir = state_dir.join("logs");
    match std::fs::create_dir_all(&log_dir) {
        Ok(()) => {
            let appender = tracing_appender::rolling::daily(log_dir, "rpw.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        Err(_) => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}

/// Hold an exclusive advisory lock so only one worker runs per state dir.
fn acquire_pid_lock(state_dir: &std::path::Path) -> std::io::Result<std::fs::File> {
    use fs2::FileExt;
    std::fs::create_dir_all(state_dir)?;
    let lock_path = state_dir.join("rpw.pid");
    let file = std::fs::OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(&lock_path)?;
    file.try_lock_exclusive().map_err(|_| {
        std::io::Error::new(
            std::io::ErrorKind::AddrInUse,
            format!("another rpw holds {}", lock_path.display()),
        )
    })?;
    use std::io::Write;
    let mut file = file;
    let _ = writeln!(file, "{}", std::process::id());
    Ok(file)
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let state_dir = state_dir();
    let _log_guard = init_tracing(&state_dir);

    let _pid_lock = match acquire_pid_lock(&state_dir) {
        Ok(lock) => lock,
        Err(e) => {
            eprintln!("rpw: {e}");
            return std::process::ExitCode::FAILURE;
        }
    };

    let config_path = std::env::var("RPW_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| state_dir.join("runtime.toml"));
    let config: RuntimeConfig = match rp_core::config::load_toml(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("rpw: {e}");
            return std::process::ExitCode::FAILURE;
        }
    };

    tracing::info!(
        listen = config.listen_addr.as_str(),
        max_slots = config.max_slots,
        workspaces = %config.workspaces_root.display(),
        "starting task runtime"
    );

    let bus = EventBus::new(config.subscriber_buffer_events);
    let publisher = EventPublisher::new(bus.clone(), Arc::new(SequenceCounter::new()), SystemClock);
    let queue = JobQueue::new(config.max_slots);
    let guard = WorkspaceGuard::new(config.workspaces_root.clone());
    let commands = CommandService::new(publisher.clone(), CommandLimits::from_config(&config));
    let artifacts = ArtifactStreamer::new(publisher.clone(), config.artifact_chunk_bytes);

    let supervisor = Arc::new(Supervisor::new(
        queue.clone(),
        publisher,
        commands.clone(),
        artifacts,
        guard.clone(),
        Arc::new(DefaultHarnessFactory { stderr_capacity: config.stderr_capture_bytes }),
        Duration::from_secs(config.container_stop_timeout_seconds),
    ));
    tokio::spawn(supervisor.run_loop());

    let listener = match tokio::net::TcpListener::bind(&config.listen_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = config.listen_addr.as_str(), error = %e, "bind failed");
            return std::process::ExitCode::FAILURE;
        }
    };

    let server = Arc::new(RpcServer::new(queue, commands, guard, bus, SystemClock, &config));
    tokio::select! {
        _ = server.serve(listener) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }
    std::process::ExitCode::SUCCESS
}
