// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The wire-level job event record.
//!
//! Events are append-only: the worker is the sole producer, the hub a
//! broadcast fanout. Sequence numbers are assigned by the producer before
//! publish and are strictly increasing per `(run_id, execution_token)`
//! starting at 1, with no gaps. Retransmits of the same sequence must be
//! byte-identical.

use crate::id::{ArtifactId, CommandId, ExecutionToken, RunId, TaskId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Reserved event categories. Consumers must tolerate unknown categories.
pub mod categories {
    pub const REASONING_DELTA: &str = "reasoning.delta";
    pub const ASSISTANT_DELTA: &str = "assistant.delta";
    pub const COMMAND_DELTA: &str = "command.delta";
    pub const DIFF_UPDATE: &str = "diff.update";
    pub const COMMAND_STARTED: &str = "command.started";
    pub const COMMAND_COMPLETED: &str = "command.completed";
    pub const ARTIFACT_MANIFEST: &str = "artifact.manifest";
    pub const ARTIFACT_CHUNK: &str = "artifact.chunk";
    pub const ARTIFACT_COMMIT: &str = "artifact.commit";
    pub const SESSION_STATUS: &str = "session.status";
    pub const RUN_STATUS: &str = "run.status";
    pub const STREAM_TRUNCATED: &str = "stream.truncated";
}

/// Current event schema version tag. Opaque to consumers.
pub const SCHEMA_VERSION: &str = "1";

/// A single streamed progress event for a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    pub run_id: RunId,
    pub task_id: TaskId,
    pub execution_token: ExecutionToken,
    /// Free-form event type string from the harness protocol.
    pub event_type: String,
    pub category: String,
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    /// Strictly increasing per `(run_id, execution_token)`, starting at 1.
    pub sequence: u64,
    /// Milliseconds since epoch.
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_json: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary_payload: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_id: Option<ArtifactId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_last_chunk: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_id: Option<CommandId>,
}

fn default_schema_version() -> String {
    SCHEMA_VERSION.to_string()
}

impl JobEvent {
    /// Minimal event with required fields; sequence and timestamp are
    /// filled in by the publishing side.
    pub fn new(
        run_id: RunId,
        task_id: TaskId,
        execution_token: ExecutionToken,
        event_type: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            run_id,
            task_id,
            execution_token,
            event_type: event_type.into(),
            category: category.into(),
            schema_version: default_schema_version(),
            sequence: 0,
            timestamp: 0,
            summary: None,
            error: None,
            payload_json: None,
            binary_payload: None,
            artifact_id: None,
            chunk_index: None,
            is_last_chunk: None,
            content_type: None,
            command_id: None,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload_json = Some(payload.to_string());
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_command_id(mut self, id: CommandId) -> Self {
        self.command_id = Some(id);
        self
    }

    /// Stream key for ordering guarantees.
    pub fn stream_key(&self) -> (RunId, ExecutionToken) {
        (self.run_id.clone(), self.execution_token.clone())
    }
}

/// Producer-side sequence assignment, one counter per stream key.
///
/// The bus never renumbers; every event passes through here exactly once
/// before publish. Counters for a run are dropped on [`Self::forget`] when
/// the run reaches a terminal state.
#[derive(Default)]
pub struct SequenceCounter {
    counters: Mutex<HashMap<(RunId, ExecutionToken), u64>>,
}

impl SequenceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign the next sequence number for the event's stream, starting at 1.
    pub fn assign(&self, event: &mut JobEvent) {
        let mut counters = self.counters.lock();
        let next = counters.entry(event.stream_key()).or_insert(0);
        *next += 1;
        event.sequence = *next;
    }

    /// Last assigned sequence for a stream, 0 if none.
    pub fn current(&self, run_id: &RunId, token: &ExecutionToken) -> u64 {
        self.counters
            .lock()
            .get(&(run_id.clone(), token.clone()))
            .copied()
            .unwrap_or(0)
    }

    /// Drop counters for a finished run.
    pub fn forget(&self, run_id: &RunId) {
        self.counters.lock().retain(|(r, _), _| r != run_id);
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
