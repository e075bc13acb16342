// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! rp-control: the Runplane control plane.
//!
//! Owns the run lifecycle up to worker hand-off: admission and
//! concurrency gates, runtime selection, instruction layering, secret
//! materialization, the dispatch RPC, and the subscription multiplexer
//! that fans worker events out to UI and persistence consumers.

pub mod client;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod lease;
pub mod lifecycle;
pub mod store;

pub use dispatch::Dispatcher;
pub use error::ControlError;
pub use events::EventDispatcher;
pub use lease::{LeaseError, LeaseGuard, LeaseRegistry};
pub use lifecycle::{LifecycleManager, RuntimeLease};
pub use store::{MemoryStore, RunRecord, RunStore, StatusPublisher};
