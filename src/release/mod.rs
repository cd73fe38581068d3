//! Release metadata.
//!
//! Every release version publishes a metadata document describing the
//! component versions, the default add-on set, the conditional built-in
//! add-ons and the value paths that must survive upgrades. The document is
//! fetched from the metrics endpoint, or, for airgapped clusters, read from a
//! config map previously copied into the cluster.

mod cache;

pub use cache::{MetadataCache, metadata_url};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::crd::HelmExtensions;

/// Namespace holding operator-owned objects (metadata config maps, artifact jobs).
pub const OPERATOR_NAMESPACE: &str = "embedded-cluster";

/// Key of the metadata document inside the local config map.
pub const METADATA_CONFIG_MAP_KEY: &str = "metadata.json";

/// Component versions and add-on configuration of one release.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct ReleaseMetadata {
    /// Component versions; `Kubernetes` carries the k0s version (e.g. "v1.29.1+k0s.1").
    #[serde(rename = "Versions", default)]
    pub versions: BTreeMap<String, String>,

    /// Digest of the k0s binary for the upgrade plan.
    #[serde(rename = "K0sSHA", default)]
    pub k0s_sha: String,

    /// Default add-on set.
    #[serde(rename = "Configs", default, skip_serializing_if = "Option::is_none")]
    pub configs: Option<HelmExtensions>,

    /// Conditional add-ons keyed by name (velero, registry, registry-ha, seaweedfs).
    #[serde(rename = "BuiltinConfigs", default)]
    pub builtin_configs: BTreeMap<String, HelmExtensions>,

    /// Protected value paths keyed by chart name.
    #[serde(rename = "Protected", default)]
    pub protected: BTreeMap<String, Vec<String>>,
}

impl ReleaseMetadata {
    /// The k0s version of the release, empty when unknown.
    pub fn k0s_version(&self) -> &str {
        self.versions
            .get("Kubernetes")
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Whether the release declares any default chart.
    pub fn has_charts(&self) -> bool {
        self.configs.as_ref().is_some_and(|c| !c.charts.is_empty())
    }
}

/// Version with any leading "v" removed.
pub fn trim_version(version: &str) -> &str {
    version.strip_prefix('v').unwrap_or(version)
}

/// Name of the config map holding the metadata of `version` in airgapped clusters.
///
/// Characters not allowed in object names (such as `+`) become `-`.
pub fn local_metadata_config_map(version: &str) -> String {
    let slug: String = trim_version(version)
        .chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '.' | '-' => c,
            'A'..='Z' => c.to_ascii_lowercase(),
            _ => '-',
        })
        .collect();
    format!("version-metadata-{}", slug)
}
