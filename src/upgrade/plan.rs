//! Upgrade plan construction and plan state translation.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;
use kube::api::ObjectMeta;

use crate::controller::installation_state_machine::InstallationEvent;
use crate::crd::{
    Installation, Plan, PlanCommand, PlanCommandAirgapUpdate, PlanCommandK0sUpdate,
    PlanCommandTarget, PlanCommandTargets, PlanResourceUrl, PlanSpec,
};
use crate::release::ReleaseMetadata;
use crate::reporting::CONTROL_PLANE_LABEL;

/// The only plan name the agent executes.
pub const PLAN_NAME: &str = "autopilot";

/// Annotation linking a plan to the installation that created it.
pub const INSTALLATION_NAME_ANNOTATION: &str = "embedded-cluster.replicated.com/installation-name";

pub const PLATFORM: &str = "linux-amd64";

/// Local artifact mirror served on every node of an airgapped cluster.
pub const LOCAL_ARTIFACT_MIRROR_URL: &str = "http://127.0.0.1:50000";

/// State reported by the agent in `status.state`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanState {
    /// Not yet picked up.
    Pending,
    Schedulable,
    SchedulableWait,
    Completed,
    IncompleteTargets,
    InconsistentTargets,
    Restricted,
    Warning,
    MissingSignalNode,
    ApplyFailed,
    Unknown(String),
}

impl PlanState {
    pub fn parse(state: &str) -> Self {
        match state {
            "" => PlanState::Pending,
            "Schedulable" => PlanState::Schedulable,
            "SchedulableWait" => PlanState::SchedulableWait,
            "Completed" => PlanState::Completed,
            "IncompleteTargets" => PlanState::IncompleteTargets,
            "InconsistentTargets" => PlanState::InconsistentTargets,
            "Restricted" => PlanState::Restricted,
            "Warning" => PlanState::Warning,
            "MissingSignalNode" => PlanState::MissingSignalNode,
            "ApplyFailed" => PlanState::ApplyFailed,
            other => PlanState::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            PlanState::Pending => "",
            PlanState::Schedulable => "Schedulable",
            PlanState::SchedulableWait => "SchedulableWait",
            PlanState::Completed => "Completed",
            PlanState::IncompleteTargets => "IncompleteTargets",
            PlanState::InconsistentTargets => "InconsistentTargets",
            PlanState::Restricted => "Restricted",
            PlanState::Warning => "Warning",
            PlanState::MissingSignalNode => "MissingSignalNode",
            PlanState::ApplyFailed => "ApplyFailed",
            PlanState::Unknown(s) => s,
        }
    }

    /// Whether the agent is done with the plan, successfully or not.
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            PlanState::Pending | PlanState::Schedulable | PlanState::SchedulableWait
        )
    }

    /// Installation event for a plan owned by the installation.
    pub fn event(&self) -> InstallationEvent {
        match self {
            PlanState::Pending => InstallationEvent::PlanQueued,
            PlanState::Schedulable | PlanState::SchedulableWait => InstallationEvent::PlanRunning,
            PlanState::Completed => InstallationEvent::KubernetesReady,
            _ => InstallationEvent::PolicyFailed,
        }
    }
}

impl std::fmt::Display for PlanState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Whether `plan` was created for the installation named `installation_name`.
///
/// Older plans carried the installation name as their id.
pub fn is_attributed_to(plan: &Plan, installation_name: &str) -> bool {
    plan.annotations()
        .get(INSTALLATION_NAME_ANNOTATION)
        .is_some_and(|name| name == installation_name)
        || plan.spec.id == installation_name
}

/// Split nodes into controller and worker targets.
pub fn upgrade_targets(nodes: &[Node]) -> PlanCommandTargets {
    let (controllers, workers): (Vec<&Node>, Vec<&Node>) = nodes
        .iter()
        .partition(|n| n.labels().contains_key(CONTROL_PLANE_LABEL));
    PlanCommandTargets {
        controllers: PlanCommandTarget::nodes(controllers.iter().map(|n| n.name_any()).collect()),
        workers: PlanCommandTarget::nodes(workers.iter().map(|n| n.name_any()).collect()),
    }
}

/// Replace the k0s binary on every node.
pub fn k0s_update_command(
    installation: &Installation,
    meta: &ReleaseMetadata,
    targets: PlanCommandTargets,
) -> PlanCommand {
    let url = if installation.spec.air_gap {
        format!("{}/bin/k0s-upgrade", LOCAL_ARTIFACT_MIRROR_URL)
    } else {
        format!(
            "{}/embedded-cluster-public-files/k0s-binaries/{}",
            installation.spec.metrics_base_url.trim_end_matches('/'),
            meta.k0s_version()
        )
    };
    PlanCommand {
        k0s_update: Some(PlanCommandK0sUpdate {
            version: meta.k0s_version().to_string(),
            platforms: BTreeMap::from([(
                PLATFORM.to_string(),
                PlanResourceUrl {
                    url,
                    sha256: meta.k0s_sha.clone(),
                },
            )]),
            targets,
        }),
        airgap_update: None,
    }
}

/// Deliver the image bundle to the worker nodes from the local mirror.
pub fn airgap_update_command(installation: &Installation, workers: PlanCommandTarget) -> PlanCommand {
    let version = installation.spec.desired_version().unwrap_or_default();
    PlanCommand {
        k0s_update: None,
        airgap_update: Some(PlanCommandAirgapUpdate {
            version: version.to_string(),
            platforms: BTreeMap::from([(
                PLATFORM.to_string(),
                PlanResourceUrl {
                    url: format!("{}/images/images-amd64.tar", LOCAL_ARTIFACT_MIRROR_URL),
                    sha256: String::new(),
                },
            )]),
            workers,
        }),
    }
}

/// A plan attributed to `installation_name` with a fresh id.
pub fn new_plan(installation_name: &str, commands: Vec<PlanCommand>) -> Plan {
    Plan {
        metadata: ObjectMeta {
            name: Some(PLAN_NAME.to_string()),
            annotations: Some(BTreeMap::from([(
                INSTALLATION_NAME_ANNOTATION.to_string(),
                installation_name.to_string(),
            )])),
            ..Default::default()
        },
        spec: PlanSpec {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: "now".to_string(),
            commands,
        },
        status: None,
    }
}
