//! Best-effort notifications to the metrics endpoint.
//!
//! Notifications never block the control loop: each one is posted from its
//! own task and failures are only logged. Nothing is retried.

use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::api::core::v1::Node;
use serde::Serialize;
use tracing::{debug, warn};

/// Label marking control-plane nodes.
pub const CONTROL_PLANE_LABEL: &str = "node-role.kubernetes.io/control-plane";

/// Observed configuration of one node.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeEvent {
    #[serde(rename = "clusterID")]
    pub cluster_id: String,
    pub node_name: String,
    pub role: String,
    pub labels: BTreeMap<String, String>,
    pub kubelet_version: String,
    pub os_image: String,
    pub cpu: String,
    pub memory: String,
}

impl NodeEvent {
    /// Build the event for `node` in cluster `cluster_id`.
    pub fn from_node(cluster_id: &str, node: &Node) -> Self {
        let labels: BTreeMap<String, String> = node.metadata.labels.clone().unwrap_or_default();
        let role = if labels.contains_key(CONTROL_PLANE_LABEL) {
            "controller"
        } else {
            "worker"
        };
        let status = node.status.as_ref();
        let info = status.and_then(|s| s.node_info.as_ref());
        let capacity = |key: &str| {
            status
                .and_then(|s| s.capacity.as_ref())
                .and_then(|c| c.get(key))
                .map(|q| q.0.clone())
                .unwrap_or_default()
        };

        Self {
            cluster_id: cluster_id.to_string(),
            node_name: node.metadata.name.clone().unwrap_or_default(),
            role: role.to_string(),
            labels,
            kubelet_version: info.map(|i| i.kubelet_version.clone()).unwrap_or_default(),
            os_image: info.map(|i| i.os_image.clone()).unwrap_or_default(),
            cpu: capacity("cpu"),
            memory: capacity("memory"),
        }
    }
}

/// A node that disappeared from the cluster.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRemovedEvent {
    #[serde(rename = "clusterID")]
    pub cluster_id: String,
    pub node_name: String,
}

/// Events accepted by the metrics endpoint.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetricsEvent {
    NodeAdded(NodeEvent),
    NodeUpdated(NodeEvent),
    NodeRemoved(NodeRemovedEvent),
    UpgradeStarted {
        #[serde(rename = "clusterID")]
        cluster_id: String,
        version: String,
    },
    UpgradeSucceeded {
        #[serde(rename = "clusterID")]
        cluster_id: String,
    },
    UpgradeFailed {
        #[serde(rename = "clusterID")]
        cluster_id: String,
        reason: String,
    },
}

impl MetricsEvent {
    /// Event name, used as the last path segment of the endpoint.
    pub fn kind(&self) -> &'static str {
        match self {
            MetricsEvent::NodeAdded(_) => "NodeAdded",
            MetricsEvent::NodeUpdated(_) => "NodeUpdated",
            MetricsEvent::NodeRemoved(_) => "NodeRemoved",
            MetricsEvent::UpgradeStarted { .. } => "UpgradeStarted",
            MetricsEvent::UpgradeSucceeded { .. } => "UpgradeSucceeded",
            MetricsEvent::UpgradeFailed { .. } => "UpgradeFailed",
        }
    }

    /// Full URL the event is posted to.
    pub fn url(&self, base_url: &str) -> String {
        format!(
            "{}/embedded_cluster_metrics/{}",
            base_url.trim_end_matches('/'),
            self.kind()
        )
    }
}

/// Sink for metrics events.
pub trait Notifier: Send + Sync {
    /// Send `event` to `base_url`. Must not block.
    fn notify(&self, base_url: &str, event: MetricsEvent);
}

/// Posts events over HTTP from detached tasks.
#[derive(Clone)]
pub struct HttpNotifier {
    client: reqwest::Client,
}

impl HttpNotifier {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

impl Notifier for HttpNotifier {
    fn notify(&self, base_url: &str, event: MetricsEvent) {
        if base_url.is_empty() {
            debug!(event = event.kind(), "No metrics endpoint, dropping event");
            return;
        }
        let url = event.url(base_url);
        let client = self.client.clone();
        tokio::spawn(async move {
            let body = serde_json::json!({ "event": event });
            let result = client
                .post(&url)
                .json(&body)
                .send()
                .await
                .and_then(|r| r.error_for_status());
            match result {
                Ok(_) => debug!(event = event.kind(), "Reported event"),
                Err(e) => warn!(event = event.kind(), url = %url, error = %e, "Failed to report event"),
            }
        });
    }
}
