// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process event broadcast.
//!
//! Multi-producer fanout of [`JobEvent`]s to subscriber channels. Publish
//! never blocks the producer: a subscriber that falls behind its bounded
//! buffer receives one synthetic `stream.truncated` event (through a
//! permit reserved at subscribe time) and is disconnected. The bus never
//! reorders or renumbers; sequence numbers are assigned upstream by the
//! producer's [`rp_core::SequenceCounter`].

use parking_lot::Mutex;
use rp_core::{categories, JobEvent, RunId};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Which events a subscriber wants.
#[derive(Debug, Clone)]
pub enum SubscriptionFilter {
    All,
    Runs(HashSet<RunId>),
}

impl SubscriptionFilter {
    pub fn matches(&self, event: &JobEvent) -> bool {
        match self {
            SubscriptionFilter::All => true,
            SubscriptionFilter::Runs(runs) => runs.contains(&event.run_id),
        }
    }
}

/// Opaque handle identifying one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

struct Subscriber {
    id: SubscriberId,
    filter: SubscriptionFilter,
    tx: mpsc::Sender<JobEvent>,
    /// Reserved at subscribe time so the truncation notice can always be
    /// delivered even when the regular buffer is full.
    truncation_permit: Option<mpsc::OwnedPermit<JobEvent>>,
}

/// Multi-producer, per-subscriber-buffered event broadcaster.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Mutex<Vec<Subscriber>>>,
    next_id: Arc<AtomicU64>,
    buffer: usize,
}

impl EventBus {
    /// `buffer` is the per-subscriber capacity before disconnect.
    pub fn new(buffer: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            buffer: buffer.max(1),
        }
    }

    /// Register a subscriber; events matching `filter` arrive on the
    /// returned channel in publish order (per stream key).
    pub fn subscribe(
        &self,
        filter: SubscriptionFilter,
    ) -> (SubscriberId, mpsc::Receiver<JobEvent>) {
        // One extra slot backs the reserved truncation permit.
        let (tx, rx) = mpsc::channel(self.buffer + 1);
        let permit = tx.clone().try_reserve_owned().ok();
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner.lock().push(Subscriber {
            id,
            filter,
            tx,
            truncation_permit: permit,
        });
        (id, rx)
    }

    /// Remove a subscriber; its channel closes once drained.
    pub fn unsubscribe(&self, id: SubscriberId) {
        self.inner.lock().retain(|s| s.id != id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().len()
    }

    /// Fan out one event. Never blocks; laggards are truncated and
    /// dropped, closed receivers are pruned.
    pub fn publish(&self, event: &JobEvent) {
        let mut dropped: Vec<SubscriberId> = Vec::new();
        let mut subscribers = self.inner.lock();

        for sub in subscribers.iter_mut() {
            if !sub.filter.matches(event) {
                continue;
            }
            match sub.tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    if let Some(permit) = sub.truncation_permit.take() {
                        permit.send(truncation_notice(event));
                    }
                    tracing::warn!(
                        run_id = %event.run_id,
                        subscriber = sub.id.0,
                        "subscriber lagged past its buffer, disconnecting"
                    );
                    dropped.push(sub.id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    dropped.push(sub.id);
                }
            }
        }

        if !dropped.is_empty() {
            subscribers.retain(|s| !dropped.contains(&s.id));
        }
    }
}

/// Producer-side stamping front of the bus: assigns the per-stream
/// sequence and the wall timestamp, then publishes. Everything a worker
/// emits goes through one of these so per-run numbering stays gap-free
/// across supervisors, the command service, and artifact streaming.
#[derive(Clone)]
pub struct EventPublisher<C: rp_core::Clock> {
    bus: EventBus,
    sequences: Arc<rp_core::SequenceCounter>,
    clock: C,
    // Couples sequence assignment to bus hand-off so concurrent emitters
    // (supervisor pump, command service) cannot interleave out of order.
    order: Arc<Mutex<()>>,
}

impl<C: rp_core::Clock> EventPublisher<C> {
    pub fn new(bus: EventBus, sequences: Arc<rp_core::SequenceCounter>, clock: C) -> Self {
        Self { bus, sequences, clock, order: Arc::new(Mutex::new(())) }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Stamp and publish; returns the stamped event for callers that keep
    /// a copy.
    pub fn publish(&self, mut event: JobEvent) -> JobEvent {
        let _ordered = self.order.lock();
        self.sequences.assign(&mut event);
        event.timestamp = self.clock.epoch_ms();
        self.bus.publish(&event);
        event
    }

    /// Drop sequence state for a finished run.
    pub fn forget_run(&self, run_id: &RunId) {
        self.sequences.forget(run_id);
    }
}

/// Out-of-band notice delivered to a disconnected laggard. Sequence 0
/// marks it as synthetic, outside the per-stream numbering.
fn truncation_notice(last: &JobEvent) -> JobEvent {
    let mut notice = JobEvent::new(
        last.run_id.clone(),
        last.task_id.clone(),
        last.execution_token.clone(),
        "stream/truncated",
        categories::STREAM_TRUNCATED,
    );
    notice.sequence = 0;
    notice.timestamp = last.timestamp;
    notice.summary = Some("subscriber buffer overflow; stream truncated".to_string());
    notice
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;
