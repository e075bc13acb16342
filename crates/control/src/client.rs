// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Framed TCP client for worker RPC endpoints.
//!
//! Unary calls open a connection per request; the subscription client
//! keeps its connection and yields pushed events. There is no replay on
//! reconnect — consumers resubscribe and correlate by sequence.

use crate::error::ControlError;
use async_trait::async_trait;
use rp_core::{JobEvent, RunId, RunRequest};
use rp_wire::{read_frame, write_frame, Frame, Reply, Request};
use tokio::net::TcpStream;

/// Outcome of a `DispatchJob` call that reached the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReply {
    pub success: bool,
    pub error_message: Option<String>,
    pub dispatched_at: u64,
}

/// Worker RPC operations the dispatcher and lifecycle loops need.
/// Abstracted so tests can substitute a scripted connector.
#[async_trait]
pub trait WorkerConnector: Send + Sync {
    async fn dispatch_job(
        &self,
        endpoint: &str,
        run: RunRequest,
    ) -> Result<DispatchReply, ControlError>;

    async fn stop_job(&self, endpoint: &str, run_id: &RunId) -> Result<bool, ControlError>;

    /// Health probe returning `(active_slots, max_slots, checked_at)`.
    async fn check_health(&self, endpoint: &str) -> Result<(u32, u32, u64), ControlError>;
}

/// Production connector speaking the framed wire protocol over TCP.
#[derive(Default, Clone)]
pub struct TcpConnector;

impl TcpConnector {
    async fn call(&self, endpoint: &str, request: &Request) -> Result<Reply, ControlError> {
        let mut stream = TcpStream::connect(endpoint)
            .await
            .map_err(|e| ControlError::Transport(format!("connect {endpoint}: {e}")))?;
        write_frame(&mut stream, request).await?;
        match read_frame::<_, Frame>(&mut stream).await? {
            Frame::Reply { reply } => Ok(reply),
            Frame::Event { .. } => {
                Err(ControlError::UnexpectedReply("event on unary call".to_string()))
            }
        }
    }
}

#[async_trait]
impl WorkerConnector for TcpConnector {
    async fn dispatch_job(
        &self,
        endpoint: &str,
        run: RunRequest,
    ) -> Result<DispatchReply, ControlError> {
        match self.call(endpoint, &Request::DispatchJob { run: Box::new(run) }).await? {
            Reply::Dispatch { success, error_message, dispatched_at } => {
                Ok(DispatchReply { success, error_message, dispatched_at })
            }
            other => Err(ControlError::UnexpectedReply(format!("{other:?}"))),
        }
    }

    async fn stop_job(&self, endpoint: &str, run_id: &RunId) -> Result<bool, ControlError> {
        match self.call(endpoint, &Request::StopJob { run_id: run_id.clone() }).await? {
            Reply::Stop { success } => Ok(success),
            other => Err(ControlError::UnexpectedReply(format!("{other:?}"))),
        }
    }

    async fn check_health(&self, endpoint: &str) -> Result<(u32, u32, u64), ControlError> {
        match self.call(endpoint, &Request::CheckHealth).await? {
            Reply::Health { active_slots, max_slots, checked_at, .. } => {
                Ok((active_slots, max_slots, checked_at))
            }
            other => Err(ControlError::UnexpectedReply(format!("{other:?}"))),
        }
    }
}

/// A live subscription to a worker's event hub.
pub struct EventSubscription {
    stream: TcpStream,
}

impl EventSubscription {
    /// Connect and subscribe; an empty `run_ids` list subscribes to all.
    pub async fn open(endpoint: &str, run_ids: Vec<RunId>) -> Result<Self, ControlError> {
        let mut stream = TcpStream::connect(endpoint)
            .await
            .map_err(|e| ControlError::Transport(format!("connect {endpoint}: {e}")))?;
        write_frame(&mut stream, &Request::Subscribe { run_ids }).await?;
        match read_frame::<_, Frame>(&mut stream).await? {
            Frame::Reply { reply: Reply::Subscribed } => Ok(Self { stream }),
            other => Err(ControlError::UnexpectedReply(format!("{other:?}"))),
        }
    }

    /// Next pushed event; `None` when the hub closes the connection.
    pub async fn next_event(&mut self) -> Result<Option<JobEvent>, ControlError> {
        loop {
            match read_frame::<_, Frame>(&mut self.stream).await {
                Ok(Frame::Event { event }) => return Ok(Some(*event)),
                Ok(Frame::Reply { .. }) => continue,
                Err(rp_wire::ProtocolError::Closed) => return Ok(None),
                Err(e) => return Err(e.into()),
            }
        }
    }
}
