// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker-side error type.

use rp_core::FailureClass;

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("{field} is required")]
    MissingField { field: &'static str },

    #[error("worker at capacity")]
    AtCapacity,

    #[error("run {0} is not tracked")]
    RunNotFound(String),

    #[error("command {0} is not tracked")]
    CommandNotFound(String),

    #[error("workspace violation: {0}")]
    Workspace(#[from] crate::workspace::WorkspaceError),

    #[error("harness startup failed: {0}")]
    HarnessStartup(String),

    #[error("harness transport failed: {0}")]
    HarnessTransport(String),

    #[error("harness protocol error: {0}")]
    HarnessProtocol(String),

    #[error("harness timed out: {0}")]
    HarnessTimeout(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("spawn failed: {0}")]
    Spawn(String),
}

impl RuntimeError {
    /// Machine-readable class for replies and terminal summaries.
    pub fn failure_class(&self) -> FailureClass {
        match self {
            RuntimeError::MissingField { .. } => FailureClass::InvalidArgument,
            RuntimeError::AtCapacity => FailureClass::AtCapacity,
            RuntimeError::RunNotFound(_) | RuntimeError::CommandNotFound(_) => {
                FailureClass::InvalidArgument
            }
            RuntimeError::Workspace(_) => FailureClass::WorkspaceViolation,
            RuntimeError::HarnessStartup(_) | RuntimeError::Spawn(_) => {
                FailureClass::HarnessStartup
            }
            RuntimeError::HarnessTransport(_) | RuntimeError::Io(_) => {
                FailureClass::HarnessTransport
            }
            RuntimeError::HarnessProtocol(_) => FailureClass::HarnessProtocol,
            RuntimeError::HarnessTimeout(_) => FailureClass::HarnessTimeout,
        }
    }
}
