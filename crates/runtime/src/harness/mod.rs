// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Harness runtime adapters.
//!
//! Two sibling adapters drive external agent harnesses and translate
//! their native event streams into the uniform [`JobEvent`] schema:
//! [`codex::CodexStdioRuntime`] (child process speaking line-delimited
//! JSON-RPC over stdio) and [`opencode::OpencodeSseRuntime`] (HTTP API
//! plus an SSE event stream). Adapter selection is a pure function of
//! `(harness, requested mode, env)` — see [`resolve_runtime_kind`].

pub mod codex;
pub mod http;
pub mod opencode;

use async_trait::async_trait;
use rp_core::{EnvMap, ExecutionMode, HarnessType, JobEvent, RunRequest};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::RuntimeError;

/// Which adapter executes a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeKind {
    /// Codex child process over stdio JSON-RPC.
    Stdio,
    /// OpenCode server over HTTP + SSE.
    Sse,
    /// Pass-through mode string for other harnesses.
    Other(String),
}

impl RuntimeKind {
    pub fn as_str(&self) -> &str {
        match self {
            RuntimeKind::Stdio => "stdio",
            RuntimeKind::Sse => "sse",
            RuntimeKind::Other(s) => s,
        }
    }
}

/// Decide which adapter a run uses.
///
/// Codex always runs over stdio and opencode always over SSE. Any other
/// harness takes `HARNESS_RUNTIME_MODE` verbatim, defaulting to the
/// requested execution mode string. There is no command-runtime fallback
/// and no cross-harness routing.
pub fn resolve_runtime_kind(
    harness: &HarnessType,
    requested_mode: ExecutionMode,
    env: &EnvMap,
) -> RuntimeKind {
    match harness {
        HarnessType::Codex => RuntimeKind::Stdio,
        HarnessType::Opencode => RuntimeKind::Sse,
        HarnessType::Other(_) => match env.get("HARNESS_RUNTIME_MODE") {
            Some(mode) if !mode.trim().is_empty() => RuntimeKind::Other(mode.trim().to_string()),
            _ => RuntimeKind::Other(requested_mode.name().to_string()),
        },
    }
}

/// Resolve the codex approval policy from env and mode.
///
/// `CODEX_APPROVAL_POLICY` wins when present; otherwise read-only modes
/// force `never` and default mode gets `on-failure`.
pub fn resolve_approval_policy(env: &EnvMap, mode: ExecutionMode) -> String {
    if let Some(policy) = env.get("CODEX_APPROVAL_POLICY") {
        if !policy.trim().is_empty() {
            return policy.trim().to_string();
        }
    }
    if mode.is_read_only() {
        "never".to_string()
    } else {
        "on-failure".to_string()
    }
}

/// Model precedence: harness-specific over generic, else none.
pub fn resolve_model(env: &EnvMap, harness_var: &str) -> Option<String> {
    for var in [harness_var, "HARNESS_MODEL"] {
        if let Some(model) = env.get(var) {
            if !model.trim().is_empty() {
                return Some(model.trim().to_string());
            }
        }
    }
    None
}

/// Slice a string to at most `limit` bytes, backing up to a char
/// boundary so multibyte harness output never splits mid-character.
pub fn truncate_utf8(s: &str, limit: usize) -> &str {
    let mut end = s.len().min(limit);
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Prefix the instruction with the read-only directive for plan/review.
pub fn mode_instruction(instruction: &str, mode: ExecutionMode) -> String {
    match mode {
        ExecutionMode::Default => instruction.to_string(),
        ExecutionMode::Plan => {
            format!("Execution mode: plan. Do not modify files.\n\n{instruction}")
        }
        ExecutionMode::Review => {
            format!("Execution mode: review. Do not modify files.\n\n{instruction}")
        }
    }
}

/// Terminal status reported in a harness envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarnessStatus {
    Succeeded,
    Failed,
    Cancelled,
}

/// Summary record returned to the control plane for every run.
#[derive(Debug)]
pub struct HarnessEnvelope {
    /// `codex-stdio` or `opencode-sse`.
    pub runtime: String,
    pub runtime_mode: String,
    pub status: HarnessStatus,
    pub error: Option<RuntimeError>,
    /// Adapter identifiers, last observed status, truncated stderr.
    pub metadata: BTreeMap<String, String>,
}

impl HarnessEnvelope {
    pub fn new(runtime: &str, runtime_mode: &str, status: HarnessStatus) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert("runtime".to_string(), runtime.to_string());
        metadata.insert("runtimeMode".to_string(), runtime_mode.to_string());
        Self {
            runtime: runtime.to_string(),
            runtime_mode: runtime_mode.to_string(),
            status,
            error: None,
            metadata,
        }
    }

    pub fn with_error(mut self, error: RuntimeError) -> Self {
        self.error = Some(error);
        self
    }

    pub fn meta(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// Common contract both adapters implement.
#[async_trait]
pub trait HarnessRuntime: Send + Sync {
    async fn run(
        &self,
        request: &RunRequest,
        env: &EnvMap,
        workspace: &Path,
        events: mpsc::Sender<JobEvent>,
        cancel: CancellationToken,
    ) -> HarnessEnvelope;
}

/// Bounded ring capture of a child's stderr, kept for envelopes.
///
/// Holds the last `capacity` bytes; earlier output is discarded.
#[derive(Debug)]
pub struct StderrRing {
    buf: std::collections::VecDeque<u8>,
    capacity: usize,
}

impl StderrRing {
    pub fn new(capacity: usize) -> Self {
        Self { buf: std::collections::VecDeque::with_capacity(capacity.min(4096)), capacity }
    }

    pub fn push_line(&mut self, line: &str) {
        for b in line.as_bytes() {
            if self.buf.len() == self.capacity {
                self.buf.pop_front();
            }
            self.buf.push_back(*b);
        }
        if self.buf.len() == self.capacity {
            self.buf.pop_front();
        }
        self.buf.push_back(b'\n');
    }

    /// UTF-8-lossy rendering of the captured tail.
    pub fn contents(&self) -> String {
        let bytes: Vec<u8> = self.buf.iter().copied().collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
