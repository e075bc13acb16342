// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runtime lifecycle management.
//!
//! Tracks the task-runtime inventory, hands out slot leases atomically,
//! faults runtimes whose heartbeats go stale, drains them for shutdown,
//! and reconciles stray containers against the authoritative active run
//! set.

use parking_lot::Mutex;
use rp_core::{labels, Clock, LifecycleState, RuntimeId, RuntimeInstance};
use std::collections::HashMap;

/// A reserved slot allocation on one runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeLease {
    pub runtime_id: RuntimeId,
    pub endpoint: String,
    pub slots: u32,
}

/// One container reported by a worker during reconciliation.
#[derive(Debug, Clone)]
pub struct ContainerInfo {
    pub container_id: String,
    pub labels: HashMap<String, String>,
}

/// Inventory and lease ledger for task runtimes.
pub struct LifecycleManager<C: Clock> {
    clock: C,
    stale_after_ms: u64,
    inventory: Mutex<HashMap<RuntimeId, Entry>>,
}

struct Entry {
    instance: RuntimeInstance,
    drain_requested: bool,
}

impl<C: Clock> LifecycleManager<C> {
    pub fn new(clock: C, stale_after_seconds: u64) -> Self {
        Self {
            clock,
            stale_after_ms: stale_after_seconds.saturating_mul(1000),
            inventory: Mutex::new(HashMap::new()),
        }
    }

    /// Add or replace a runtime in the inventory.
    pub fn register(&self, mut instance: RuntimeInstance) {
        instance.last_heartbeat_at = self.clock.epoch_ms();
        tracing::info!(
            runtime_id = %instance.runtime_id,
            endpoint = instance.endpoint.as_str(),
            max_slots = instance.max_slots,
            "runtime registered"
        );
        self.inventory
            .lock()
            .insert(instance.runtime_id.clone(), Entry { instance, drain_requested: false });
    }

    pub fn instance(&self, runtime_id: &RuntimeId) -> Option<RuntimeInstance> {
        self.inventory.lock().get(runtime_id).map(|e| e.instance.clone())
    }

    pub fn instances(&self) -> Vec<RuntimeInstance> {
        self.inventory.lock().values().map(|e| e.instance.clone()).collect()
    }

    /// Acquire a slot lease on an eligible runtime.
    ///
    /// Selection prefers the least-loaded runtime, breaking ties on the
    /// earliest last dispatch; the slot reservation happens inside the
    /// same critical section, so concurrent acquirers cannot
    /// oversubscribe.
    pub fn acquire_lease(&self, slots: u32) -> Option<RuntimeLease> {
        let now = self.clock.epoch_ms();
        let slots = slots.max(1);
        let mut inventory = self.inventory.lock();

        let chosen = inventory
            .values_mut()
            .filter(|e| {
                !e.drain_requested
                    && e.instance.is_eligible(now, self.stale_after_ms)
                    && e.instance.free_slots() >= slots
            })
            .min_by(|a, b| {
                a.instance
                    .active_slots
                    .cmp(&b.instance.active_slots)
                    .then_with(|| a.instance.last_dispatch_at.cmp(&b.instance.last_dispatch_at))
                    .then_with(|| {
                        a.instance.runtime_id.as_str().cmp(b.instance.runtime_id.as_str())
                    })
            })?;

        chosen.instance.active_slots += slots;
        Some(RuntimeLease {
            runtime_id: chosen.instance.runtime_id.clone(),
            endpoint: chosen.instance.endpoint.clone(),
            slots,
        })
    }

    /// Return a lease's slots. Completes a drain when the last slot
    /// leaves a draining runtime.
    pub fn release(&self, lease: &RuntimeLease) {
        let mut inventory = self.inventory.lock();
        let Some(entry) = inventory.get_mut(&lease.runtime_id) else {
            return;
        };
        entry.instance.active_slots = entry.instance.active_slots.saturating_sub(lease.slots);
        if entry.drain_requested && entry.instance.active_slots == 0 {
            entry.instance.state = LifecycleState::Terminated;
            tracing::info!(runtime_id = %lease.runtime_id, "drained runtime terminated");
        }
    }

    /// Record dispatch activity for tie-breaking.
    pub fn record_dispatch(&self, runtime_id: &RuntimeId) {
        let now = self.clock.epoch_ms();
        if let Some(entry) = self.inventory.lock().get_mut(runtime_id) {
            entry.instance.last_dispatch_at = now;
        }
    }

    /// Record a heartbeat observation for a runtime.
    ///
    /// `reported_max` refreshes capacity; the lease ledger keeps its own
    /// active count so in-flight reservations are never clobbered by a
    /// stale report. A faulted runtime that heartbeats again recovers to
    /// Ready.
    pub fn record_heartbeat(&self, runtime_id: &RuntimeId, reported_max: u32) {
        let now = self.clock.epoch_ms();
        if let Some(entry) = self.inventory.lock().get_mut(runtime_id) {
            entry.instance.last_heartbeat_at = now;
            if reported_max > 0 {
                entry.instance.max_slots = reported_max;
            }
            if entry.instance.state == LifecycleState::Faulted && !entry.drain_requested {
                entry.instance.state = LifecycleState::Ready;
                tracing::info!(runtime_id = %runtime_id, "runtime recovered from fault");
            }
        }
    }

    /// Mark a freshly provisioned runtime as ready to take leases.
    pub fn mark_ready(&self, runtime_id: &RuntimeId) {
        if let Some(entry) = self.inventory.lock().get_mut(runtime_id) {
            entry.instance.state = LifecycleState::Ready;
        }
    }

    /// Fault every runtime whose heartbeat is older than the staleness
    /// threshold; returns the faulted ids.
    pub fn sweep_stale(&self) -> Vec<RuntimeId> {
        let now = self.clock.epoch_ms();
        let mut faulted = Vec::new();
        let mut inventory = self.inventory.lock();
        for entry in inventory.values_mut() {
            if entry.instance.state == LifecycleState::Ready
                && now.saturating_sub(entry.instance.last_heartbeat_at) > self.stale_after_ms
            {
                entry.instance.state = LifecycleState::Faulted;
                tracing::warn!(
                    runtime_id = %entry.instance.runtime_id,
                    last_heartbeat_at = entry.instance.last_heartbeat_at,
                    "runtime heartbeat stale, faulted"
                );
                faulted.push(entry.instance.runtime_id.clone());
            }
        }
        faulted
    }

    /// Forbid new leases; existing runs complete naturally. A runtime
    /// with no active slots terminates immediately.
    pub fn drain(&self, runtime_id: &RuntimeId) {
        let mut inventory = self.inventory.lock();
        if let Some(entry) = inventory.get_mut(runtime_id) {
            entry.drain_requested = true;
            if entry.instance.active_slots == 0 {
                entry.instance.state = LifecycleState::Terminated;
            } else {
                entry.instance.state = LifecycleState::Draining;
            }
        }
    }

    /// Compare worker-reported containers against the authoritative
    /// active run set; containers labelled with a run id that is not
    /// active are strays to be force-stopped. Returns their container
    /// ids; the caller performs the stops and counts them.
    pub fn reconcile<F>(&self, containers: &[ContainerInfo], is_active_run: F) -> Vec<String>
    where
        F: Fn(&str) -> bool,
    {
        let mut strays = Vec::new();
        for container in containers {
            let Some(run_id) = container.labels.get(labels::RUN_ID) else {
                continue;
            };
            if !is_active_run(run_id) {
                tracing::warn!(
                    container_id = container.container_id.as_str(),
                    run_id = run_id.as_str(),
                    "stray container found during reconciliation"
                );
                strays.push(container.container_id.clone());
            }
        }
        strays
    }
}

/// One heartbeat round: probe every live runtime's health endpoint,
/// record observations, then fault whatever went stale.
pub async fn poll_heartbeats<C, W>(manager: &LifecycleManager<C>, connector: &W) -> Vec<RuntimeId>
where
    C: Clock,
    W: crate::client::WorkerConnector,
{
    for instance in manager.instances() {
        if instance.state == LifecycleState::Terminated {
            continue;
        }
        match connector.check_health(&instance.endpoint).await {
            Ok((active_slots, max_slots, checked_at)) => {
                tracing::debug!(
                    runtime_id = %instance.runtime_id,
                    active_slots,
                    max_slots,
                    checked_at,
                    "heartbeat"
                );
                manager.record_heartbeat(&instance.runtime_id, max_slots);
            }
            Err(e) => {
                tracing::debug!(
                    runtime_id = %instance.runtime_id,
                    error = %e,
                    "heartbeat probe failed"
                );
            }
        }
    }
    manager.sweep_stale()
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
