// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bounded job queue.
//!
//! Admission is synchronous: the active count is incremented at enqueue,
//! not at consume, so `DispatchJob` can reject at-capacity callers before
//! anything is spawned. Each tracked run owns a cancellation token that
//! the supervisor and all child work observe.

use parking_lot::Mutex;
use rp_core::{RunId, RunRequest};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Outcome of an enqueue attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Ok,
    AtCapacity,
}

/// One queued or running job as seen by the queue consumer.
pub struct QueuedJob {
    pub request: RunRequest,
    pub cancel: CancellationToken,
}

struct ActiveRun {
    cancel: CancellationToken,
}

struct QueueState {
    // Keyed by ASCII-lowercased run id.
    active: HashMap<String, ActiveRun>,
}

/// Bounded, cancellable queue of dispatched runs.
#[derive(Clone)]
pub struct JobQueue {
    max_slots: u32,
    state: Arc<Mutex<QueueState>>,
    tx: mpsc::UnboundedSender<QueuedJob>,
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<QueuedJob>>>,
}

fn key(run_id: &RunId) -> String {
    run_id.as_str().to_ascii_lowercase()
}

impl JobQueue {
    pub fn new(max_slots: u32) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            max_slots,
            state: Arc::new(Mutex::new(QueueState { active: HashMap::new() })),
            tx,
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
        }
    }

    pub fn max_slots(&self) -> u32 {
        self.max_slots
    }

    pub fn active_count(&self) -> u32 {
        self.state.lock().active.len() as u32
    }

    /// Whether an enqueue right now would be admitted.
    pub fn can_accept(&self) -> bool {
        self.active_count() < self.max_slots
    }

    /// Currently tracked run ids (queued or running).
    pub fn active_runs(&self) -> Vec<String> {
        self.state.lock().active.keys().cloned().collect()
    }

    pub fn is_tracked(&self, run_id: &RunId) -> bool {
        self.state.lock().active.contains_key(&key(run_id))
    }

    /// Admit a run. Rejected iff the active count has reached `max_slots`;
    /// the slot is reserved before this returns.
    pub fn enqueue(&self, request: RunRequest) -> EnqueueOutcome {
        let cancel = CancellationToken::new();
        {
            let mut state = self.state.lock();
            if state.active.len() as u32 >= self.max_slots {
                return EnqueueOutcome::AtCapacity;
            }
            state
                .active
                .insert(key(&request.run_id), ActiveRun { cancel: cancel.clone() });
        }

        // The receiver half lives as long as the queue; an unexpected send
        // failure means shutdown, where dropping the job is correct.
        let _ = self.tx.send(QueuedJob { request, cancel });
        EnqueueOutcome::Ok
    }

    /// Receive the next job. Intended for the single consumer loop; jobs
    /// remain in the active set until [`Self::mark_completed`].
    pub async fn read_next(&self) -> Option<QueuedJob> {
        let mut rx = self.rx.lock().await;
        rx.recv().await
    }

    /// Signal cancellation for a tracked run. Idempotent: repeated calls
    /// return true while the run stays tracked, and the underlying token
    /// only ever fires once.
    pub fn cancel(&self, run_id: &RunId) -> bool {
        let state = self.state.lock();
        match state.active.get(&key(run_id)) {
            Some(run) => {
                run.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Release a run's slot.
    pub fn mark_completed(&self, run_id: &RunId) {
        self.state.lock().active.remove(&key(run_id));
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
