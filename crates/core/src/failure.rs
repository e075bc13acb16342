// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Machine-readable failure classes surfaced to callers.

use serde::{Deserialize, Serialize};

/// Why a run, command, or dispatch attempt failed.
///
/// Failures before admission surface as a failed reply carrying one of
/// these; admitted runs carry the class on their terminal transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Missing or blank required fields.
    InvalidArgument,
    /// Worker queue full or no runtime lease available.
    AtCapacity,
    /// Queue depth cap exceeded.
    AdmissionControl,
    /// Clone URL failed normalization.
    InvalidRepositoryUrl,
    /// Adapter could not spawn or reach the harness server.
    HarnessStartup,
    /// Stdio closed prematurely, SSE disconnected, or non-2xx response.
    HarnessTransport,
    /// JSON-RPC error reply, or turn completed with non-success status.
    HarnessProtocol,
    /// No idle/completion within the configured timeout.
    HarnessTimeout,
    CommandTimeout,
    CommandCanceled,
    CommandFailed,
    /// Path resolved outside the workspace root.
    WorkspaceViolation,
    LeaseUnavailable,
    LeaseLost,
    /// Run reaped by reconciliation without a terminal envelope.
    Abandoned,
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureClass::InvalidArgument => "invalid_argument",
            FailureClass::AtCapacity => "at_capacity",
            FailureClass::AdmissionControl => "admission_control",
            FailureClass::InvalidRepositoryUrl => "invalid_repository_url",
            FailureClass::HarnessStartup => "harness_startup",
            FailureClass::HarnessTransport => "harness_transport",
            FailureClass::HarnessProtocol => "harness_protocol",
            FailureClass::HarnessTimeout => "harness_timeout",
            FailureClass::CommandTimeout => "command_timeout",
            FailureClass::CommandCanceled => "command_canceled",
            FailureClass::CommandFailed => "command_failed",
            FailureClass::WorkspaceViolation => "workspace_violation",
            FailureClass::LeaseUnavailable => "lease_unavailable",
            FailureClass::LeaseLost => "lease_lost",
            FailureClass::Abandoned => "abandoned",
        };
        write!(f, "{}", s)
    }
}
