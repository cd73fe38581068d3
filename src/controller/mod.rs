//! Controller module for the lifecycle operator.
//!
//! Contains the reconcile cycle, the installation state machine, record
//! coalescing, node status tracking, error handling and status helpers.

pub mod coalesce;
pub mod context;
pub mod error;
pub mod installation_reconciler;
pub mod installation_state_machine;
pub mod node_status;
pub mod status;
