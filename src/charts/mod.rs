//! Add-on (helm chart) management.
//!
//! - `values`: value document helpers
//! - `merge`: desired add-on set construction
//! - `infra`: installation-derived values for infrastructure charts
//! - `drift`: comparison of desired and live charts
//! - `reconciler`: the chart stage of the reconcile cycle

pub mod drift;
pub mod infra;
pub mod merge;
pub mod reconciler;
pub mod values;

pub use drift::{ChartDrift, detect_chart_drift, detect_pending_charts};
pub use merge::{MergeFlags, desired_addons};
pub use reconciler::{ChartStageOutcome, reconcile_helm_charts};
