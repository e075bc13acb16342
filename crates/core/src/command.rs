// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command execution state (worker-only).
//!
//! Once a terminal status is recorded it is immutable; `cancel_requested`
//! may be set only while the command is still running.

use crate::id::{CommandId, ExecutionToken, RunId, TaskId};
use serde::{Deserialize, Serialize};

/// Status of an ad-hoc command on a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Running,
    Completed,
    Failed,
    Canceled,
    TimedOut,
}

impl CommandStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CommandStatus::Running)
    }
}

impl std::fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CommandStatus::Running => "running",
            CommandStatus::Completed => "completed",
            CommandStatus::Failed => "failed",
            CommandStatus::Canceled => "canceled",
            CommandStatus::TimedOut => "timed_out",
        };
        write!(f, "{}", s)
    }
}

/// Snapshot of a command execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandState {
    pub command_id: CommandId,
    pub run_id: RunId,
    pub task_id: TaskId,
    pub execution_token: ExecutionToken,
    pub status: CommandStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub started_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<u64>,
    #[serde(default)]
    pub stdout_bytes: u64,
    #[serde(default)]
    pub stderr_bytes: u64,
    #[serde(default)]
    pub output_truncated: bool,
    #[serde(default)]
    pub cancel_requested: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl CommandState {
    pub fn started(
        command_id: CommandId,
        run_id: RunId,
        task_id: TaskId,
        execution_token: ExecutionToken,
        started_at: u64,
    ) -> Self {
        Self {
            command_id,
            run_id,
            task_id,
            execution_token,
            status: CommandStatus::Running,
            exit_code: None,
            started_at,
            completed_at: None,
            stdout_bytes: 0,
            stderr_bytes: 0,
            output_truncated: false,
            cancel_requested: false,
            error_message: None,
        }
    }

    /// Request cancellation. Returns false once the command is terminal.
    pub fn request_cancel(&mut self) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.cancel_requested = true;
        true
    }

    /// Record the terminal outcome. Returns false (and leaves the record
    /// untouched) if a terminal status was already set.
    pub fn finish(
        &mut self,
        status: CommandStatus,
        exit_code: Option<i32>,
        completed_at: u64,
        error_message: Option<String>,
    ) -> bool {
        debug_assert!(status.is_terminal());
        if self.status.is_terminal() {
            return false;
        }
        self.status = status;
        self.exit_code = exit_code;
        self.completed_at = Some(completed_at);
        self.error_message = error_message;
        true
    }
}

#[cfg(test)]
#[path = "command_tests.rs"]
mod tests;
