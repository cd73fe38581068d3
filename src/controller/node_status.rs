//! Node status tracking.
//!
//! The authoritative record keeps one `{name, hash}` entry per node. Each
//! cycle the live node list is diffed against those entries; the changes are
//! returned as a batch of metrics events. The diff never affects control flow.

use std::collections::BTreeSet;

use k8s_openapi::api::core::v1::Node;
use sha2::{Digest, Sha256};

use crate::controller::error::Result;
use crate::crd::{InstallationStatus, NodeStatus};
use crate::reporting::{MetricsEvent, NodeEvent, NodeRemovedEvent};

/// Node changes observed in one cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeEventsBatch {
    pub added: Vec<NodeEvent>,
    pub updated: Vec<NodeEvent>,
    pub removed: Vec<NodeRemovedEvent>,
}

impl NodeEventsBatch {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }

    /// Flatten into metrics events: added, then updated, then removed.
    pub fn into_events(self) -> Vec<MetricsEvent> {
        self.added
            .into_iter()
            .map(MetricsEvent::NodeAdded)
            .chain(self.updated.into_iter().map(MetricsEvent::NodeUpdated))
            .chain(self.removed.into_iter().map(MetricsEvent::NodeRemoved))
            .collect()
    }
}

/// Hex SHA-256 of the JSON encoding of `event`.
pub fn node_event_hash(event: &NodeEvent) -> Result<String> {
    let data = serde_json::to_vec(event)?;
    Ok(hex::encode(Sha256::digest(&data)))
}

/// Refresh `status.nodes_status` from `nodes` and report what changed.
///
/// Entries for vanished nodes are dropped; the remaining list is sorted by
/// node name.
pub fn reconcile_node_statuses(
    status: &mut InstallationStatus,
    cluster_id: &str,
    nodes: &[Node],
) -> Result<NodeEventsBatch> {
    let mut batch = NodeEventsBatch::default();
    let mut seen = BTreeSet::new();

    for node in nodes {
        let event = NodeEvent::from_node(cluster_id, node);
        let hash = node_event_hash(&event)?;
        seen.insert(event.node_name.clone());

        match status
            .nodes_status
            .iter_mut()
            .find(|s| s.name == event.node_name)
        {
            Some(existing) if existing.hash == hash => {}
            Some(existing) => {
                existing.hash = hash;
                batch.updated.push(event);
            }
            None => {
                status.nodes_status.push(NodeStatus {
                    name: event.node_name.clone(),
                    hash,
                });
                batch.added.push(event);
            }
        }
    }

    let (mut kept, gone): (Vec<NodeStatus>, Vec<NodeStatus>) = std::mem::take(&mut status.nodes_status)
        .into_iter()
        .partition(|s| seen.contains(&s.name));
    batch.removed = gone
        .into_iter()
        .map(|s| NodeRemovedEvent {
            cluster_id: cluster_id.to_string(),
            node_name: s.name,
        })
        .collect();

    kept.sort_by(|a, b| a.name.cmp(&b.name));
    status.nodes_status = kept;

    Ok(batch)
}
