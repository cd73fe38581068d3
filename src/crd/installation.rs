//! Installation Custom Resource Definition.
//!
//! An Installation is one lifecycle attempt for the cluster: the desired
//! release version, the add-on overrides supplied by the vendor, and where
//! airgap artifacts live. Several records may coexist; the controller picks
//! the newest one as authoritative and retires the rest.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::k0s::HelmExtensions;

/// Installation is a cluster-scoped record of a desired cluster state.
///
/// Example:
/// ```yaml
/// apiVersion: embeddedcluster.replicated.com/v1beta1
/// kind: Installation
/// metadata:
///   name: "20240501120000"
/// spec:
///   clusterID: 6f1c3b1e-2f44-4d2a-9a0b-8f3f1b1f0c11
///   metricsBaseURL: https://replicated.app
///   airGap: false
///   highAvailability: false
///   config:
///     version: 1.30.0+k8s-1.29
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "embeddedcluster.replicated.com",
    version = "v1beta1",
    kind = "Installation",
    plural = "installations",
    status = "InstallationStatus",
    printcolumn = r#"{"name":"State", "type":"string", "jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"InstallerVersion", "type":"string", "jsonPath":".spec.config.version"}"#,
    printcolumn = r#"{"name":"CreatedAt", "type":"string", "jsonPath":".metadata.creationTimestamp"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct InstallationSpec {
    /// Unique identifier of the cluster, used when reporting to the metrics endpoint.
    #[serde(default, rename = "clusterID")]
    pub cluster_id: String,

    /// Base URL for the metrics and release metadata endpoints.
    #[serde(default, rename = "metricsBaseURL")]
    pub metrics_base_url: String,

    /// Whether the cluster was installed without outbound network access.
    #[serde(default)]
    pub air_gap: bool,

    /// Whether the cluster runs in high-availability mode.
    #[serde(default)]
    pub high_availability: bool,

    /// Name of the installer binary on the nodes.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub binary_name: String,

    /// Desired release configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ConfigSpec>,

    /// Locations of the airgap artifacts inside the in-cluster registry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<ArtifactsLocation>,

    /// Proxy settings propagated to infrastructure add-ons.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxySpec>,

    /// License entitlements that gate built-in add-ons.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_info: Option<LicenseInfo>,
}

impl InstallationSpec {
    /// Desired release version, if one is set.
    pub fn desired_version(&self) -> Option<&str> {
        self.config
            .as_ref()
            .map(|c| c.version.as_str())
            .filter(|v| !v.is_empty())
    }

    /// Whether the license entitles the disaster recovery add-on.
    pub fn disaster_recovery_supported(&self) -> bool {
        self.license_info
            .as_ref()
            .is_some_and(|l| l.is_disaster_recovery_supported)
    }
}

/// Release configuration requested by the vendor.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSpec {
    /// Release version (e.g. "1.30.0+k8s-1.29").
    #[serde(default)]
    pub version: String,

    /// Vendor-supplied add-ons.
    #[serde(default)]
    pub extensions: Extensions,

    /// Overrides applied on top of built-in add-on values.
    #[serde(default)]
    pub unsupported_overrides: UnsupportedOverrides,
}

/// Vendor add-on declarations.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Extensions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helm: Option<HelmExtensions>,
}

/// Value overrides for built-in add-ons.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UnsupportedOverrides {
    #[serde(default)]
    pub built_in_extensions: Vec<BuiltInExtension>,
}

/// A values document layered over the named chart.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct BuiltInExtension {
    pub name: String,
    #[serde(default)]
    pub values: String,
}

/// Artifact repositories inside the in-cluster registry.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactsLocation {
    pub images: String,
    pub helm_charts: String,
    pub embedded_cluster_binary: String,
    pub embedded_cluster_metadata: String,
}

/// Proxy environment for add-ons.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProxySpec {
    #[serde(default)]
    pub http_proxy: String,
    #[serde(default)]
    pub https_proxy: String,
    #[serde(default)]
    pub no_proxy: String,
}

/// License entitlements.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LicenseInfo {
    #[serde(default)]
    pub is_disaster_recovery_supported: bool,
}

/// Observed state of an Installation.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InstallationStatus {
    /// Current lifecycle state.
    #[serde(default)]
    pub state: InstallationState,

    /// Human-readable explanation of the state.
    #[serde(default)]
    pub reason: String,

    /// Per-node configuration hashes, sorted by node name.
    #[serde(default)]
    pub nodes_status: Vec<NodeStatus>,

    /// Named conditions (registry migration, secrets).
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Hash of one node's observed configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct NodeStatus {
    pub name: String,
    pub hash: String,
}

/// Lifecycle state of an Installation.
///
/// The empty string is the state of a record nobody has reconciled yet.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum InstallationState {
    /// Never reconciled.
    #[default]
    #[serde(rename = "")]
    Unset,
    /// Upgrade plan created, waiting for the agent to pick it up.
    Enqueued,
    /// Upgrade plan is executing.
    Installing,
    /// Cluster version matches the desired version.
    KubernetesInstalled,
    /// Desired add-ons written to the cluster declaration.
    AddonsInstalling,
    /// Declared charts not yet created by the agent.
    PendingChartCreation,
    /// Everything converged.
    Installed,
    /// Charts reported errors with no corrective drift.
    HelmChartUpdateFailure,
    /// Airgap artifacts still being copied to nodes.
    CopyingArtifacts,
    /// Another record's upgrade plan is still running.
    Waiting,
    /// Terminal policy failure.
    Failed,
    /// Superseded by a newer record.
    Obsolete,
}

impl InstallationState {
    /// All states, in declaration order.
    pub const ALL: [InstallationState; 12] = [
        InstallationState::Unset,
        InstallationState::Enqueued,
        InstallationState::Installing,
        InstallationState::KubernetesInstalled,
        InstallationState::AddonsInstalling,
        InstallationState::PendingChartCreation,
        InstallationState::Installed,
        InstallationState::HelmChartUpdateFailure,
        InstallationState::CopyingArtifacts,
        InstallationState::Waiting,
        InstallationState::Failed,
        InstallationState::Obsolete,
    ];

    /// Whether the cluster version is known to be at the desired version.
    pub fn is_kubernetes_installed(&self) -> bool {
        matches!(
            self,
            InstallationState::KubernetesInstalled
                | InstallationState::AddonsInstalling
                | InstallationState::HelmChartUpdateFailure
                | InstallationState::PendingChartCreation
                | InstallationState::Installed
        )
    }

    pub fn is_unset(&self) -> bool {
        *self == InstallationState::Unset
    }

    /// Whether the state needs an operator to act before progress resumes.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            InstallationState::Failed | InstallationState::HelmChartUpdateFailure
        )
    }
}

impl std::fmt::Display for InstallationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstallationState::Unset => write!(f, ""),
            InstallationState::Enqueued => write!(f, "Enqueued"),
            InstallationState::Installing => write!(f, "Installing"),
            InstallationState::KubernetesInstalled => write!(f, "KubernetesInstalled"),
            InstallationState::AddonsInstalling => write!(f, "AddonsInstalling"),
            InstallationState::PendingChartCreation => write!(f, "PendingChartCreation"),
            InstallationState::Installed => write!(f, "Installed"),
            InstallationState::HelmChartUpdateFailure => write!(f, "HelmChartUpdateFailure"),
            InstallationState::CopyingArtifacts => write!(f, "CopyingArtifacts"),
            InstallationState::Waiting => write!(f, "Waiting"),
            InstallationState::Failed => write!(f, "Failed"),
            InstallationState::Obsolete => write!(f, "Obsolete"),
        }
    }
}

/// Condition describes one named aspect of an Installation.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition.
    pub r#type: String,
    /// Status of the condition ("True", "False", "Unknown").
    pub status: String,
    /// Machine-readable reason for the condition's last transition.
    pub reason: String,
    /// Human-readable message indicating details about last transition.
    #[serde(default)]
    pub message: String,
    /// Last time the condition transitioned from one status to another.
    pub last_transition_time: String,
    /// The generation of the resource this condition was observed for.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Condition {
    /// Create a new condition.
    pub fn new(
        condition_type: &str,
        status: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> Self {
        Self {
            r#type: condition_type.to_string(),
            status: if status {
                "True".to_string()
            } else {
                "False".to_string()
            },
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: jiff::Timestamp::now().to_string(),
            observed_generation: generation,
        }
    }
}
