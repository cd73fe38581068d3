//! Upgrade plan executed by the external autopilot agent.
//!
//! The controller creates at most one plan, named `autopilot`, and only
//! reads back its `status.state`.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Plan is a cluster-scoped description of a version change.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "autopilot.k0sproject.io",
    version = "v1beta2",
    kind = "Plan",
    plural = "plans",
    status = "PlanStatus"
)]
pub struct PlanSpec {
    /// Identifier of this plan.
    pub id: String,

    /// When the plan should start ("now").
    pub timestamp: String,

    /// Commands executed in order.
    pub commands: Vec<PlanCommand>,
}

/// A single plan command. Exactly one field is set.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct PlanCommand {
    #[serde(default, rename = "k0supdate", skip_serializing_if = "Option::is_none")]
    pub k0s_update: Option<PlanCommandK0sUpdate>,

    #[serde(default, rename = "airgapupdate", skip_serializing_if = "Option::is_none")]
    pub airgap_update: Option<PlanCommandAirgapUpdate>,
}

/// Replace the k0s binary on the targeted nodes.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct PlanCommandK0sUpdate {
    pub version: String,
    pub platforms: BTreeMap<String, PlanResourceUrl>,
    pub targets: PlanCommandTargets,
}

/// Deliver an image bundle to worker nodes.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct PlanCommandAirgapUpdate {
    pub version: String,
    pub platforms: BTreeMap<String, PlanResourceUrl>,
    pub workers: PlanCommandTarget,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct PlanResourceUrl {
    pub url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sha256: String,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct PlanCommandTargets {
    pub controllers: PlanCommandTarget,
    pub workers: PlanCommandTarget,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct PlanCommandTarget {
    pub discovery: PlanCommandTargetDiscovery,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct PlanCommandTargetDiscovery {
    #[serde(default, rename = "static", skip_serializing_if = "Option::is_none")]
    pub static_nodes: Option<StaticNodes>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct StaticNodes {
    pub nodes: Vec<String>,
}

impl PlanCommandTarget {
    /// Target an explicit list of nodes.
    pub fn nodes(nodes: Vec<String>) -> Self {
        Self {
            discovery: PlanCommandTargetDiscovery {
                static_nodes: Some(StaticNodes { nodes }),
            },
        }
    }
}

/// Status written by the agent.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
pub struct PlanStatus {
    #[serde(default)]
    pub state: String,
}

impl Plan {
    /// Raw state string, empty until the agent has looked at the plan.
    pub fn state(&self) -> &str {
        self.status.as_ref().map(|s| s.state.as_str()).unwrap_or("")
    }
}
