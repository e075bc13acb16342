// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control-plane error type.

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("transport failed: {0}")]
    Transport(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] rp_wire::ProtocolError),

    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),

    #[error("run {0} not found")]
    RunNotFound(String),

    #[error("task {0} not found")]
    TaskNotFound(String),

    #[error("repository {0} not found")]
    RepositoryNotFound(String),
}
