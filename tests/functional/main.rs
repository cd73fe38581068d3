// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Functional tests for the Installation reconcile cycle.
//!
//! These tests drive full cycles against an in-memory cluster behind the
//! `ClusterStore` seam, WITHOUT requiring a live Kubernetes cluster. The
//! upgrade agent and the chart agent are simulated by editing the fake
//! cluster between cycles.
//!
//! ```bash
//! # Run all functional tests
//! cargo test --test functional
//!
//! # Run specific test
//! cargo test --test functional test_fresh_install_converges
//!
//! # Run with verbose output
//! cargo test --test functional -- --nocapture
//! ```
//!
//! ## Test Categories
//!
//! - **Lifecycle tests**: first install, no-op cycles, missing data
//! - **Upgrade tests**: plan creation and progress, downgrade guard,
//!   plans owned by other records
//! - **Coalescing tests**: several live records, demotion, status conflicts
//! - **Chart tests**: drift, pending charts, chart errors, protected values
//! - **Airgap tests**: metadata copy and per-node artifact jobs
//! - **Registry tests**: HA registry data migration
//! - **Command tests**: one-shot `migrate` and `upgrade` commands

#[path = "../common/mod.rs"]
mod common;

mod chart_tests;
mod upgrade_tests;
