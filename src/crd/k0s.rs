//! Typed views of the k0s objects the controller reads and writes.
//!
//! These resources are owned by the cluster-management agent. Only the
//! fields the controller inspects are modelled; everything else is ignored
//! on read and never written back (updates go through merge patches).

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Cluster-wide declaration consumed by the agent. The add-on set lives
/// under `spec.extensions.helm`.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "k0s.k0sproject.io",
    version = "v1beta1",
    kind = "ClusterConfig",
    plural = "clusterconfigs",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfigSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<ClusterExtensions>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<Network>,
}

impl ClusterConfig {
    /// The currently declared add-on set, empty when none was declared.
    pub fn helm_extensions(&self) -> HelmExtensions {
        self.spec
            .extensions
            .as_ref()
            .and_then(|e| e.helm.clone())
            .unwrap_or_default()
    }

    /// Service CIDR, falling back to the agent's default.
    pub fn service_cidr(&self) -> &str {
        self.spec
            .network
            .as_ref()
            .map(|n| n.service_cidr.as_str())
            .filter(|cidr| !cidr.is_empty())
            .unwrap_or(DEFAULT_SERVICE_CIDR)
    }
}

/// Default service CIDR used by the agent.
pub const DEFAULT_SERVICE_CIDR: &str = "10.96.0.0/12";

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
pub struct ClusterExtensions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helm: Option<HelmExtensions>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Network {
    #[serde(default, rename = "serviceCIDR")]
    pub service_cidr: String,
}

/// A set of helm charts plus their repositories.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HelmExtensions {
    /// How many charts the agent installs in parallel.
    #[serde(default)]
    pub concurrency_level: i32,

    #[serde(default)]
    pub repositories: Vec<Repository>,

    #[serde(default)]
    pub charts: Vec<HelmChart>,
}

impl HelmExtensions {
    pub fn chart(&self, name: &str) -> Option<&HelmChart> {
        self.charts.iter().find(|c| c.name == name)
    }
}

/// One chart entry in a declaration.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct HelmChart {
    /// Release name.
    pub name: String,

    /// Chart reference (e.g. "repo/chart" or an OCI URL).
    #[serde(default, rename = "chartname")]
    pub chart_name: String,

    #[serde(default)]
    pub version: String,

    /// YAML values document.
    #[serde(default)]
    pub values: String,

    /// Target namespace.
    #[serde(default, rename = "namespace")]
    pub target_ns: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,

    /// Installation order, lower first.
    #[serde(default)]
    pub order: i32,
}

/// Helm repository declaration.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_file: Option<String>,
    #[serde(default, rename = "keyfile", skip_serializing_if = "Option::is_none")]
    pub key_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insecure: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// A chart the agent has materialised from the declaration.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "helm.k0sproject.io",
    version = "v1beta1",
    kind = "Chart",
    plural = "charts",
    status = "ChartStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ChartSpec {
    #[serde(default)]
    pub chart_name: String,
    #[serde(default)]
    pub release_name: String,
    #[serde(default)]
    pub values: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    #[serde(default)]
    pub order: i32,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChartStatus {
    #[serde(default)]
    pub release_name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub app_version: String,
    #[serde(default)]
    pub revision: i64,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub updated: String,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub values_hash: String,
}

impl Chart {
    /// Release name as reported by the agent, falling back to the spec.
    pub fn release_name(&self) -> &str {
        match self.status.as_ref() {
            Some(status) if !status.release_name.is_empty() => &status.release_name,
            _ => &self.spec.release_name,
        }
    }

    /// Error reported by the agent for the last apply, if any.
    pub fn error(&self) -> Option<&str> {
        self.status
            .as_ref()
            .map(|s| s.error.as_str())
            .filter(|e| !e.is_empty())
    }
}

/// Name the agent gives to the Chart object for a declared chart.
pub fn chart_object_name(release_name: &str) -> String {
    format!("k0s-addon-chart-{}", release_name)
}
