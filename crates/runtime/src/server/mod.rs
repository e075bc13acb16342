// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker RPC service and event hub.
//!
//! One TCP listener serves both surfaces: framed unary requests answered
//! with [`Frame::Reply`], and a `Subscribe` request that turns the
//! connection into a push stream of [`Frame::Event`]s. The hub never
//! replays history; a reconnecting client resubscribes and correlates by
//! sequence.

pub mod files;

use crate::bus::{EventBus, SubscriptionFilter};
use crate::command::CommandService;
use crate::error::RuntimeError;
use crate::queue::{EnqueueOutcome, JobQueue};
use crate::workspace::WorkspaceGuard;
use rp_core::{Clock, RunRequest, RuntimeConfig};
use rp_wire::{read_frame, write_frame, Frame, Reply, Request};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// Worker-side RPC service.
pub struct RpcServer<C: Clock> {
    queue: JobQueue,
    commands: CommandService<C>,
    guard: WorkspaceGuard,
    bus: EventBus,
    clock: C,
    max_file_read_bytes: u64,
    next_connection: AtomicU64,
}

impl<C: Clock> RpcServer<C> {
    pub fn new(
        queue: JobQueue,
        commands: CommandService<C>,
        guard: WorkspaceGuard,
        bus: EventBus,
        clock: C,
        config: &RuntimeConfig,
    ) -> Self {
        Self {
            queue,
            commands,
            guard,
            bus,
            clock,
            max_file_read_bytes: config.max_file_read_bytes,
            next_connection: AtomicU64::new(1),
        }
    }

    /// Accept loop; one task per connection.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let server = Arc::clone(&self);
                    let connection_id = self.next_connection.fetch_add(1, Ordering::Relaxed);
                    tokio::spawn(async move {
                        tracing::debug!(connection_id, %peer, "connection opened");
                        if let Err(e) = server.handle_connection(stream, connection_id).await {
                            tracing::debug!(connection_id, error = %e, "connection closed");
                        }
                    });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                }
            }
        }
    }

    async fn handle_connection(
        &self,
        stream: TcpStream,
        connection_id: u64,
    ) -> Result<(), rp_wire::ProtocolError> {
        let (mut read_half, mut write_half) = stream.into_split();

        // All outbound frames funnel through one writer task so replies
        // and pushed events never interleave mid-frame.
        let (out_tx, mut out_rx) = mpsc::channel::<Frame>(256);
        let writer = tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if write_frame(&mut write_half, &frame).await.is_err() {
                    break;
                }
            }
        });

        // At most one bus subscription per connection.
        let mut subscription: Option<crate::bus::SubscriberId> = None;
        let mut forwarder: Option<tokio::task::JoinHandle<()>> = None;

        let result = loop {
            let request: Request = match read_frame(&mut read_half).await {
                Ok(request) => request,
                Err(e) => break Err(e),
            };

            match request {
                Request::Subscribe { run_ids } => {
                    if let Some(old) = subscription.take() {
                        self.bus.unsubscribe(old);
                    }
                    if let Some(task) = forwarder.take() {
                        task.abort();
                    }

                    let filter = if run_ids.is_empty() {
                        SubscriptionFilter::All
                    } else {
                        SubscriptionFilter::Runs(run_ids.into_iter().collect::<HashSet<_>>())
                    };
                    let (id, mut events) = self.bus.subscribe(filter);
                    subscription = Some(id);

                    // Acknowledge before forwarding so the subscriber
                    // never sees an event ahead of its ack; events that
                    // arrive in between wait in the bus channel.
                    if out_tx.send(Frame::Reply { reply: Reply::Subscribed }).await.is_err() {
                        break Ok(());
                    }

                    let event_tx = out_tx.clone();
                    forwarder = Some(tokio::spawn(async move {
                        while let Some(event) = events.recv().await {
                            if event_tx
                                .send(Frame::Event { event: Box::new(event) })
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                    }));
                }
                Request::Unsubscribe => {
                    if let Some(id) = subscription.take() {
                        self.bus.unsubscribe(id);
                    }
                    if let Some(task) = forwarder.take() {
                        task.abort();
                    }
                    if out_tx
                        .send(Frame::Reply { reply: Reply::Unsubscribed })
                        .await
                        .is_err()
                    {
                        break Ok(());
                    }
                }
                other => {
                    let reply = self.handle_request(other);
                    if out_tx.send(Frame::Reply { reply }).await.is_err() {
                        break Ok(());
                    }
                }
            }
        };

        // Disconnect releases all filter state.
        if let Some(id) = subscription {
            self.bus.unsubscribe(id);
        }
        if let Some(task) = forwarder {
            task.abort();
        }
        drop(out_tx);
        let _ = writer.await;
        tracing::debug!(connection_id, "filters released");

        match result {
            Err(rp_wire::ProtocolError::Closed) => Ok(()),
            other => other,
        }
    }

    /// Dispatch one unary request.
    fn handle_request(&self, request: Request) -> Reply {
        match request {
            Request::DispatchJob { run } => self.dispatch(*run),
            Request::StopJob { run_id } => Reply::Stop { success: self.queue.cancel(&run_id) },
            Request::CheckHealth => Reply::Health {
                healthy: true,
                active_slots: self.queue.active_count(),
                max_slots: self.queue.max_slots(),
                checked_at: self.clock.epoch_ms(),
            },
            Request::StartCommand { command } => match self.commands.start(command) {
                Ok(command_id) => {
                    let started_at = self
                        .commands
                        .status(&command_id)
                        .map(|s| s.started_at)
                        .unwrap_or_default();
                    Reply::CommandStarted { command_id, started_at }
                }
                Err(e) => Reply::Error { message: e.to_string() },
            },
            Request::CancelCommand { command_id } => {
                Reply::CommandCancel { success: self.commands.cancel(&command_id) }
            }
            Request::GetCommandStatus { command_id } => Reply::CommandStatus {
                snapshot: self
                    .commands
                    .status(&command_id)
                    .map(|state| Box::new(rp_wire::CommandSnapshot { state })),
            },
            Request::ListRuntimeFiles {
                repository_id,
                task_id,
                relative_path,
                include_hidden,
            } => files::list(&self.guard, &repository_id, &task_id, &relative_path, include_hidden),
            Request::CreateRuntimeFile {
                repository_id,
                task_id,
                relative_path,
                content,
                overwrite,
            } => files::create(
                &self.guard,
                &repository_id,
                &task_id,
                &relative_path,
                &content,
                overwrite,
            ),
            Request::ReadRuntimeFile { repository_id, task_id, relative_path, max_bytes } => {
                files::read(
                    &self.guard,
                    &repository_id,
                    &task_id,
                    &relative_path,
                    max_bytes,
                    self.max_file_read_bytes,
                )
            }
            Request::DeleteRuntimeFile { repository_id, task_id, relative_path, recursive } => {
                files::delete(&self.guard, &repository_id, &task_id, &relative_path, recursive)
            }
            Request::Subscribe { .. } | Request::Unsubscribe => {
                Reply::Error { message: "subscription handled at connection level".to_string() }
            }
        }
    }

    /// Validate and admit a dispatch request.
    fn dispatch(&self, run: RunRequest) -> Reply {
        let rejected = |message: &str| Reply::Dispatch {
            success: false,
            error_message: Some(message.to_string()),
            dispatched_at: 0,
        };

        if run.run_id.as_str().trim().is_empty() {
            return rejected("run_id is required");
        }
        if run.repository_id.as_str().trim().is_empty() {
            return rejected("repository_id is required");
        }
        if run.task_id.as_str().trim().is_empty() {
            return rejected("task_id is required");
        }
        if run.clone_url.trim().is_empty() {
            return rejected("clone_url is required");
        }
        if run.instruction.trim().is_empty() {
            return rejected("instruction is required");
        }
        if self.queue.is_tracked(&run.run_id) {
            return rejected("run is already active");
        }

        match self.queue.enqueue(run) {
            EnqueueOutcome::Ok => Reply::Dispatch {
                success: true,
                error_message: None,
                dispatched_at: self.clock.epoch_ms(),
            },
            EnqueueOutcome::AtCapacity => {
                rejected(&RuntimeError::AtCapacity.to_string())
            }
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
