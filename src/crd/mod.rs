//! Custom Resource Definitions used by the operator.
//!
//! - `Installation`: desired cluster state, owned by this operator
//! - `ClusterConfig` and `Chart`: add-on declaration and materialised charts (k0s)
//! - `Plan`: upgrade plan executed by autopilot

mod autopilot;
mod installation;
mod k0s;

pub use autopilot::*;
pub use installation::*;
pub use k0s::*;
