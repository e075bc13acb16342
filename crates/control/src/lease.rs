// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Named TTL advisory leases.
//!
//! Coarse coordination for exclusive maintenance operations (e.g.
//! `maintenance-task-cleanup`). A lease that expires mid-operation is
//! reported as lost; the holder must abort with reason `lease-lost`.

use parking_lot::Mutex;
use rp_core::Clock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LeaseError {
    #[error("lease-unavailable")]
    Unavailable,

    #[error("lease-lost")]
    Lost,
}

struct Entry {
    token: u64,
    expires_at: u64,
}

/// In-process registry of named leases.
pub struct LeaseRegistry<C: Clock> {
    clock: C,
    leases: Arc<Mutex<HashMap<String, Entry>>>,
    next_token: std::sync::atomic::AtomicU64,
}

impl<C: Clock> LeaseRegistry<C> {
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            leases: Arc::new(Mutex::new(HashMap::new())),
            next_token: std::sync::atomic::AtomicU64::new(1),
        }
    }

    /// Acquire a named lease for `ttl`. Fails while a live holder exists;
    /// an expired holder is evicted silently.
    pub fn acquire(&self, name: &str, ttl: Duration) -> Result<LeaseGuard<C>, LeaseError> {
        let now = self.clock.epoch_ms();
        let token = self
            .next_token
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let mut leases = self.leases.lock();

        if let Some(existing) = leases.get(name) {
            if existing.expires_at > now {
                return Err(LeaseError::Unavailable);
            }
        }
        leases.insert(
            name.to_string(),
            Entry { token, expires_at: now + ttl.as_millis() as u64 },
        );
        Ok(LeaseGuard {
            name: name.to_string(),
            token,
            clock: self.clock.clone(),
            leases: Arc::clone(&self.leases),
        })
    }
}

/// Holder of a named lease. Dropping releases it if still held.
pub struct LeaseGuard<C: Clock> {
    name: String,
    token: u64,
    clock: C,
    leases: Arc<Mutex<HashMap<String, Entry>>>,
}

impl<C: Clock> LeaseGuard<C> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Confirm the lease is still ours and unexpired; call at every
    /// checkpoint of a long operation.
    pub fn check(&self) -> Result<(), LeaseError> {
        let leases = self.leases.lock();
        match leases.get(&self.name) {
            Some(entry) if entry.token == self.token => {
                if entry.expires_at > self.clock.epoch_ms() {
                    Ok(())
                } else {
                    Err(LeaseError::Lost)
                }
            }
            _ => Err(LeaseError::Lost),
        }
    }

    /// Extend the lease by `ttl` from now; fails once it was lost.
    pub fn renew(&self, ttl: Duration) -> Result<(), LeaseError> {
        let now = self.clock.epoch_ms();
        let mut leases = self.leases.lock();
        match leases.get_mut(&self.name) {
            Some(entry) if entry.token == self.token && entry.expires_at > now => {
                entry.expires_at = now + ttl.as_millis() as u64;
                Ok(())
            }
            _ => Err(LeaseError::Lost),
        }
    }
}

impl<C: Clock> Drop for LeaseGuard<C> {
    fn drop(&mut self) {
        let mut leases = self.leases.lock();
        if let Some(entry) = leases.get(&self.name) {
            if entry.token == self.token {
                leases.remove(&self.name);
            }
        }
    }
}

#[cfg(test)]
#[path = "lease_tests.rs"]
mod tests;
