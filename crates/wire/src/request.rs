// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use rp_core::{CommandId, RunId, RunRequest};
use serde::{Deserialize, Serialize};

/// Parameters for `StartCommand`.
///
/// `run_id`, `task_id`, `execution_token`, and `command` are required and
/// validated by the worker before anything is spawned.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StartCommandRequest {
    pub run_id: String,
    pub task_id: String,
    pub execution_token: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory; defaults to the worker CWD. Must exist.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
    /// Layered over the worker environment; keys are trimmed.
    #[serde(default, skip_serializing_if = "std::collections::HashMap::is_empty")]
    pub env: std::collections::HashMap<String, String>,
    /// Clamped into [1, configured max]; 0 means "use the default".
    #[serde(default)]
    pub timeout_seconds: u64,
    /// Clamped into [4096, configured max]; 0 means "use the default".
    #[serde(default)]
    pub max_output_bytes: u64,
}

/// Request from the control plane to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    /// Admit a run into the worker's job queue.
    DispatchJob { run: Box<RunRequest> },

    /// Cooperatively cancel a run.
    StopJob { run_id: RunId },

    /// Liveness probe; the reply carries slot telemetry and server time.
    CheckHealth,

    /// Start an ad-hoc command bound to a run.
    StartCommand { command: StartCommandRequest },

    /// Request cancellation of a running command.
    CancelCommand { command_id: CommandId },

    /// Snapshot of a command's state.
    GetCommandStatus { command_id: CommandId },

    /// List directory entries inside a run workspace.
    ListRuntimeFiles {
        repository_id: String,
        task_id: String,
        #[serde(default)]
        relative_path: String,
        #[serde(default)]
        include_hidden: bool,
    },

    /// Create (or overwrite) a file inside a run workspace.
    CreateRuntimeFile {
        repository_id: String,
        task_id: String,
        relative_path: String,
        content: Vec<u8>,
        #[serde(default)]
        overwrite: bool,
    },

    /// Read a file inside a run workspace, capped at `max_bytes`.
    ReadRuntimeFile {
        repository_id: String,
        task_id: String,
        relative_path: String,
        /// 0 means "no per-call cap"; the configured hard cap still applies.
        #[serde(default)]
        max_bytes: u64,
    },

    /// Delete a file or directory inside a run workspace.
    DeleteRuntimeFile {
        repository_id: String,
        task_id: String,
        relative_path: String,
        #[serde(default)]
        recursive: bool,
    },

    /// Switch this connection into streaming mode. An empty `run_ids`
    /// list subscribes to all runs.
    Subscribe {
        #[serde(default)]
        run_ids: Vec<RunId>,
    },

    /// Detach this connection from all run filters.
    Unsubscribe,
}

#[cfg(test)]
#[path = "request_tests.rs"]
mod tests;
