// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Unit tests for the Patroni Operator
//!
//! This module contains unit tests for:
//! - Desired-state synthesis (permissions, member StatefulSets)
//! - The reconcile state machine against an in-memory platform
//! - The worker pool retry policy and controller lifecycle
//! - Work queue ordering and concurrency

#[path = "../common/mod.rs"]
mod common;

mod worker;
