// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! rpd: the Runplane control-plane daemon.
//!
//! Wires the dispatcher, runtime lifecycle manager, and event fan-out
//! together and runs the heartbeat and dispatch loops.

use rp_control::client::{EventSubscription, TcpConnector};
use rp_control::dispatch::Dispatcher;
use rp_control::lifecycle::{poll_heartbeats, LifecycleManager};
use rp_control::store::{MemoryStore, RecordingPublisher, RunStore};
use rp_control::EventDispatcher;
use rp_core::{ControlConfig, EnvMap, LifecycleState, RuntimeId, RuntimeInstance, SystemClock};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

fn state_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("RPD_STATE_DIR") {
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

    let filter = EnvFilter::try_from_env("RPD_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let log_dir = state_dir.join("logs");
    match std::fs::create_dir_all(&log_dir) {
        Ok(()) => {
            let appender = tracing_appender::rolling::daily(log_dir, "rpd.log");
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

fn acquire_pid_lock(state_dir: &std::path::Path) -> std::io::Result<std::fs::File> {
    use fs2::FileExt;
    use std::io::Write;
    std::fs::create_dir_all(state_dir)?;
    let lock_path = state_dir.join("rpd.pid");
    let file = std::fs::OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(&lock_path)?;
    file.try_lock_exclusive().map_err(|_| {
        std::io::Error::new(
            std::io::ErrorKind::AddrInUse,
            format!("another rpd holds {}", lock_path.display()),
        )
    })?;
    let mut file = file;
    let _ = writeln!(file, "{}", std::process::id());
    Ok(file)
}

/// Host credentials captured once so the dispatcher stays pure.
fn capture_host_env() -> EnvMap {
    let mut env = EnvMap::new();
    for name in ["CODEX_API_KEY", "OPENAI_API_KEY", "OPENCODE_API_KEY"] {
        if let Ok(value) = std::env::var(name) {
            if !value.is_empty() {
                env.insert(name, value);
            }
        }
    }
    env
}

/// Static worker endpoints from `RPD_WORKERS` ("host:port,host:port").
fn seed_workers(manager: &LifecycleManager<SystemClock>) {
    let Ok(raw) = std::env::var("RPD_WORKERS") else {
        return;
    };
    for endpoint in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let runtime_id = RuntimeId::generate();
        manager.register(RuntimeInstance {
            runtime_id,
            container_id: None,
            state: LifecycleState::Ready,
            endpoint: endpoint.to_string(),
            active_slots: 0,
            max_slots: 4,
            image_ref: String::new(),
            image_digest: String::new(),
            last_heartbeat_at: 0,
            last_dispatch_at: 0,
        });
    }
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let state_dir = state_dir();
    let _log_guard = init_tracing(&state_dir);

    let _pid_lock = match acquire_pid_lock(&state_dir) {
        Ok(lock) => lock,
        Err(e) => {
            eprintln!("rpd: {e}");
            return std::process::ExitCode::FAILURE;
        }
    };

    let config_path = std::env::var("RPD_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| state_dir.join("control.toml"));
    let config: ControlConfig = match rp_core::config::load_toml(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("rpd: {e}");
            return std::process::ExitCode::FAILURE;
        }
    };

    tracing::info!(
        max_global = config.max_global_concurrent_runs,
        per_repo = config.per_repo_concurrency_limit,
        "starting control plane"
    );

    let clock = SystemClock;
    let store = Arc::new(MemoryStore::new());
    let publisher = Arc::new(RecordingPublisher::default());
    let lifecycle = Arc::new(LifecycleManager::new(
        clock.clone(),
        config.runtime_heartbeat_stale_seconds,
    ));
    seed_workers(&lifecycle);
    let connector = Arc::new(TcpConnector);
    let events = EventDispatcher::new(1024);

    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&store),
        Arc::clone(&publisher),
        Arc::clone(&lifecycle),
        Arc::clone(&connector),
        config.clone(),
        clock.clone(),
        capture_host_env(),
    ));

    // Dispatch loop: walk queued runs oldest-first and try each one; the
    // gates inside `dispatch` decide defer vs reject.
    {
        let dispatcher = Arc::clone(&dispatcher);
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            loop {
                for run in store.queued_runs() {
                    let (Some(task), Some(repository)) =
                        (store.task(&run.task_id), store.repository(&run.repository_id))
                    else {
                        tracing::warn!(run_id = %run.run_id, "queued run with missing task/repo");
                        continue;
                    };
                    dispatcher.dispatch(&repository, &task, &run).await;
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        });
    }

    // Heartbeat loop: CheckHealth doubles as slot telemetry.
    {
        let lifecycle = Arc::clone(&lifecycle);
        let connector = Arc::clone(&connector);
        let interval = Duration::from_secs(config.heartbeat_interval_seconds.max(1));
        tokio::spawn(async move {
            loop {
                let faulted = poll_heartbeats(lifecycle.as_ref(), connector.as_ref()).await;
                for runtime_id in faulted {
                    tracing::warn!(runtime_id = %runtime_id, "runtime faulted");
                }
                tokio::time::sleep(interval).await;
            }
        });
    }

    // Event pump: follow every registered worker's hub and fan frames out
    // to control-plane subscribers. No replay on reconnect; consumers
    // correlate by sequence.
    {
        let lifecycle = Arc::clone(&lifecycle);
        let events = events.clone();
        tokio::spawn(async move {
            let mut followed: std::collections::HashSet<String> = Default::default();
            loop {
                for instance in lifecycle.instances() {
                    if instance.state != LifecycleState::Ready
                        || !followed.insert(instance.endpoint.clone())
                    {
                        continue;
                    }
                    let endpoint = instance.endpoint.clone();
                    let events = events.clone();
                    tokio::spawn(async move {
                        loop {
                            match EventSubscription::open(&endpoint, Vec::new()).await {
                                Ok(mut subscription) => {
                                    while let Ok(Some(event)) = subscription.next_event().await {
                                        events.dispatch(&event);
                                    }
                                }
                                Err(e) => {
                                    tracing::debug!(
                                        endpoint = endpoint.as_str(),
                                        error = %e,
                                        "hub connect failed"
                                    );
                                }
                            }
                            tokio::time::sleep(Duration::from_secs(2)).await;
                        }
                    });
                }
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        });
    }

    tracing::info!("control plane ready");
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
    std::process::ExitCode::SUCCESS
}
