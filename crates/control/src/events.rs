// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control-plane event fan-out.
//!
//! Routes hub frames arriving from workers to per-run subscribers (UI
//! sessions, persistence writers). Each connection gets a bounded
//! buffer; an overflowing connection is unsubscribed and disconnected,
//! and is expected to reconnect. Fan-out failures are never promoted to
//! run failures.

use parking_lot::Mutex;
use rp_core::{JobEvent, RunId};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// What one connection wants to see.
#[derive(Debug, Clone)]
pub enum SubscriptionFilter {
    All,
    RunIds(HashSet<RunId>),
}

impl SubscriptionFilter {
    fn matches(&self, event: &JobEvent) -> bool {
        match self {
            SubscriptionFilter::All => true,
            SubscriptionFilter::RunIds(runs) => runs.contains(&event.run_id),
        }
    }
}

/// Opaque id for a registered connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

struct Connection {
    filter: SubscriptionFilter,
    tx: mpsc::Sender<JobEvent>,
}

/// Subscription multiplexer: `connection -> filter` with bounded fan-out.
#[derive(Clone)]
pub struct EventDispatcher {
    connections: Arc<Mutex<HashMap<ConnectionId, Connection>>>,
    next_id: Arc<AtomicU64>,
    buffer: usize,
}

impl EventDispatcher {
    pub fn new(buffer: usize) -> Self {
        Self {
            connections: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            buffer: buffer.max(1),
        }
    }

    /// Register a connection; matching events arrive on the receiver.
    pub fn subscribe(
        &self,
        filter: SubscriptionFilter,
    ) -> (ConnectionId, mpsc::Receiver<JobEvent>) {
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.connections.lock().insert(id, Connection { filter, tx });
        (id, rx)
    }

    /// Replace a connection's filter in place.
    pub fn resubscribe(&self, id: ConnectionId, filter: SubscriptionFilter) -> bool {
        match self.connections.lock().get_mut(&id) {
            Some(connection) => {
                connection.filter = filter;
                true
            }
            None => false,
        }
    }

    /// Detach a connection from all run filters.
    pub fn unsubscribe(&self, id: ConnectionId) {
        self.connections.lock().remove(&id);
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    /// Fan one event out to every matching connection. Overflowing or
    /// closed connections are dropped.
    pub fn dispatch(&self, event: &JobEvent) {
        let mut dropped: Vec<ConnectionId> = Vec::new();
        {
            let connections = self.connections.lock();
            for (id, connection) in connections.iter() {
                if !connection.filter.matches(event) {
                    continue;
                }
                match connection.tx.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::warn!(
                            connection = id.0,
                            run_id = %event.run_id,
                            "subscriber buffer overflow, disconnecting"
                        );
                        dropped.push(*id);
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        dropped.push(*id);
                    }
                }
            }
        }
        if !dropped.is_empty() {
            let mut connections = self.connections.lock();
            for id in dropped {
                connections.remove(&id);
            }
        }
    }
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
