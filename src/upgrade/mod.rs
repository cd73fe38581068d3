//! Cluster version upgrades through the external upgrade agent.

pub mod orchestrator;
pub mod plan;
pub mod version;

pub use orchestrator::{PlanAction, UpgradeOrchestrator};
pub use plan::{PLAN_NAME, PlanState};
pub use version::KubeVersion;
