// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use rp_core::{CommandState, JobEvent};
use serde::{Deserialize, Serialize};

/// One directory entry from `ListRuntimeFiles`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    pub is_directory: bool,
    pub size_bytes: u64,
    /// Epoch ms of last modification, 0 when unavailable.
    #[serde(default)]
    pub modified_at: u64,
}

/// Wire snapshot of a command execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSnapshot {
    pub state: CommandState,
}

/// Reply from a worker to the control plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Reply {
    /// Outcome of `DispatchJob`.
    Dispatch {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
        /// Epoch ms at which the worker accepted the run; 0 on rejection.
        #[serde(default)]
        dispatched_at: u64,
    },

    /// Outcome of `StopJob`; false when the run was not tracked.
    Stop { success: bool },

    /// Health probe result. `checked_at` is server time at evaluation.
    Health {
        healthy: bool,
        active_slots: u32,
        max_slots: u32,
        checked_at: u64,
    },

    /// Command accepted; `command.started` has already been published.
    CommandStarted {
        command_id: rp_core::CommandId,
        started_at: u64,
    },

    /// Outcome of `CancelCommand`; false once the command is terminal.
    CommandCancel { success: bool },

    /// Snapshot for `GetCommandStatus`.
    CommandStatus {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        snapshot: Option<Box<CommandSnapshot>>,
    },

    /// Directory listing, directories first, then files, both sorted
    /// case-insensitively ascending.
    FileList { entries: Vec<FileEntry> },

    /// Outcome of `CreateRuntimeFile`.
    FileCreated {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// Contents from `ReadRuntimeFile`. When `truncated`, `content` holds
    /// the prefix and `content_length` the real size.
    FileContent {
        success: bool,
        #[serde(default)]
        content: Vec<u8>,
        #[serde(default)]
        truncated: bool,
        #[serde(default)]
        content_length: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// Outcome of `DeleteRuntimeFile`.
    FileDeleted {
        success: bool,
        deleted: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// Subscription acknowledged; job events follow as [`Frame::Event`].
    Subscribed,

    /// Connection detached from all run filters.
    Unsubscribed,

    /// Request-level failure (validation, protocol misuse).
    Error { message: String },
}

/// One frame pushed to a subscribed connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    Reply { reply: Reply },
    Event { event: Box<JobEvent> },
}

#[cfg(test)]
#[path = "response_tests.rs"]
mod tests;
