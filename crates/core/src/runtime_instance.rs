// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control-plane view of a task-runtime worker instance.

use crate::id::RuntimeId;
use serde::{Deserialize, Serialize};

/// Lifecycle of a task runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Provisioning,
    Ready,
    Draining,
    Terminated,
    Faulted,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LifecycleState::Provisioning => "provisioning",
            LifecycleState::Ready => "ready",
            LifecycleState::Draining => "draining",
            LifecycleState::Terminated => "terminated",
            LifecycleState::Faulted => "faulted",
        };
        write!(f, "{}", s)
    }
}

/// Inventory record for one task-runtime worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeInstance {
    pub runtime_id: RuntimeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    pub state: LifecycleState,
    /// Address of the worker's RPC endpoint (host:port).
    pub endpoint: String,
    pub active_slots: u32,
    pub max_slots: u32,
    pub image_ref: String,
    #[serde(default)]
    pub image_digest: String,
    /// Epoch ms of the last heartbeat observed by the control plane.
    pub last_heartbeat_at: u64,
    /// Epoch ms of the last dispatch onto this runtime, 0 if never.
    #[serde(default)]
    pub last_dispatch_at: u64,
}

impl RuntimeInstance {
    /// A runtime is eligible for new leases when Ready (not draining),
    /// with free slots and a heartbeat within the stale threshold.
    pub fn is_eligible(&self, now_ms: u64, stale_after_ms: u64) -> bool {
        self.state == LifecycleState::Ready
            && self.active_slots < self.max_slots
            && now_ms.saturating_sub(self.last_heartbeat_at) <= stale_after_ms
    }

    pub fn free_slots(&self) -> u32 {
        self.max_slots.saturating_sub(self.active_slots)
    }
}

#[cfg(test)]
#[path = "runtime_instance_tests.rs"]
mod tests;
