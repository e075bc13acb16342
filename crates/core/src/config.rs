// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon configuration, loaded once at startup from TOML with env
//! overrides applied by the binaries.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Worker (task-runtime) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Address the RPC listener binds to.
    pub listen_addr: String,
    /// Maximum concurrent runs accepted by the job queue.
    pub max_slots: u32,
    /// Root directory for per-(repo, task) workspaces.
    pub workspaces_root: PathBuf,
    /// Default command timeout when the request leaves it unset.
    pub command_timeout_seconds: u64,
    /// Upper clamp for requested command timeouts.
    pub max_command_timeout_seconds: u64,
    /// Upper clamp for requested command output capture.
    pub max_command_output_bytes: u64,
    /// Artifact chunk size; clamped into [4 KiB, 1 MiB] at use.
    pub artifact_chunk_bytes: u64,
    /// Hard cap for `ReadRuntimeFile` regardless of the per-call limit.
    pub max_file_read_bytes: u64,
    /// Per-subscriber event buffer before the hub disconnects a laggard.
    pub subscriber_buffer_events: usize,
    /// Deadline for cooperative cancellation before a run is faulted.
    pub container_stop_timeout_seconds: u64,
    /// Stderr ring-buffer capacity per harness process.
    pub stderr_capture_bytes: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:7700".to_string(),
            max_slots: 4,
            workspaces_root: PathBuf::from("/var/lib/runplane/workspaces"),
            command_timeout_seconds: 120,
            max_command_timeout_seconds: 3600,
            max_command_output_bytes: 4 * 1024 * 1024,
            artifact_chunk_bytes: 1024 * 1024,
            max_file_read_bytes: 8 * 1024 * 1024,
            subscriber_buffer_events: 1024,
            container_stop_timeout_seconds: 30,
            stderr_capture_bytes: 64 * 1024,
        }
    }
}

/// Control-plane configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Reject (AdmissionControl) once this many runs are queued per task.
    pub max_queue_depth: u32,
    /// Defer dispatch once this many runs are active globally.
    pub max_global_concurrent_runs: u32,
    /// Defer dispatch once this many runs are active per repository.
    pub per_repo_concurrency_limit: u32,
    /// Slots requested per lease when the task sets no concurrency limit.
    pub default_task_parallel_runs: u32,
    /// Heartbeats older than this fault the runtime.
    pub runtime_heartbeat_stale_seconds: u64,
    /// Faulted runs become redispatchable after this long.
    pub run_hard_timeout_seconds: u64,
    /// Cadence of the CheckHealth heartbeat loop.
    pub heartbeat_interval_seconds: u64,
    /// Cadence of the stray-container reconciliation loop.
    pub reconcile_interval_seconds: u64,
    /// Branch assumed when a repository declares none.
    pub default_branch: String,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            max_queue_depth: 32,
            max_global_concurrent_runs: 16,
            per_repo_concurrency_limit: 4,
            default_task_parallel_runs: 1,
            runtime_heartbeat_stale_seconds: 60,
            run_hard_timeout_seconds: 7200,
            heartbeat_interval_seconds: 15,
            reconcile_interval_seconds: 300,
            default_branch: "main".to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Load a TOML config file, falling back to defaults when absent.
pub fn load_toml<T>(path: &std::path::Path) -> Result<T, ConfigError>
where
    T: serde::de::DeserializeOwned + Default,
{
    if !path.exists() {
        return Ok(T::default());
    }
    let raw = std::fs::read_to_string(path)
        .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
    toml::from_str(&raw).map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
