//! Airgap artifact distribution.
//!
//! Every node gets a `copy-artifacts-<node>` job that pulls the binaries,
//! charts and images from the in-cluster registry onto the node. Jobs carry
//! the installation name and a hash of the artifact locations; a job that
//! belongs to another installation or to older locations is deleted and
//! recreated on a later cycle.

use std::collections::BTreeMap;

use futures::future::try_join_all;
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, HostPathVolumeSource, Node, PodSpec, PodTemplateSpec, Toleration, Volume,
    VolumeMount,
};
use kube::ResourceExt;
use kube::api::ObjectMeta;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::controller::error::Result;
use crate::controller::status::{MAX_REASON_LEN, truncate_reason};
use crate::crd::{ArtifactsLocation, Installation};
use crate::release::OPERATOR_NAMESPACE;
use crate::store::ClusterStore;

pub const JOB_NAME_PREFIX: &str = "copy-artifacts-";
pub const INSTALLATION_LABEL: &str = "embedded-cluster/installation";
pub const CONFIG_HASH_LABEL: &str = "embedded-cluster/artifacts-config-hash";

pub const MISSING_ARTIFACTS_REASON: &str =
    "Artifacts locations not specified for an airgap installation";

/// Data directory of the installer on every node.
const DATA_DIR: &str = "/var/lib/embedded-cluster";

/// First 10 hex characters of the SHA-256 of the JSON encoded locations.
pub fn artifacts_config_hash(artifacts: &ArtifactsLocation) -> Result<String> {
    let data = serde_json::to_vec(artifacts)?;
    let mut hash = hex::encode(Sha256::digest(&data));
    hash.truncate(10);
    Ok(hash)
}

pub fn job_name(node_name: &str) -> String {
    format!("{}{}", JOB_NAME_PREFIX, node_name)
}

/// Copy job for one node, pinned to that node.
pub fn artifact_job(installation: &Installation, node_name: &str, hash: &str, image: &str) -> Job {
    let name = installation.name_any();
    let labels = BTreeMap::from([
        (INSTALLATION_LABEL.to_string(), name.clone()),
        (CONFIG_HASH_LABEL.to_string(), hash.to_string()),
    ]);

    Job {
        metadata: ObjectMeta {
            name: Some(job_name(node_name)),
            namespace: Some(OPERATOR_NAMESPACE.to_string()),
            labels: Some(labels.clone()),
            annotations: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(2),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    node_name: Some(node_name.to_string()),
                    restart_policy: Some("Never".to_string()),
                    service_account_name: Some("embedded-cluster-operator".to_string()),
                    tolerations: Some(vec![Toleration {
                        operator: Some("Exists".to_string()),
                        ..Default::default()
                    }]),
                    containers: vec![Container {
                        name: "embedded-cluster-updater".to_string(),
                        image: Some(image.to_string()),
                        command: Some(vec![
                            "/usr/local/bin/local-artifact-mirror".to_string(),
                            "pull".to_string(),
                            "binaries".to_string(),
                        ]),
                        env: Some(vec![EnvVar {
                            name: "INSTALLATION".to_string(),
                            value: Some(name),
                            ..Default::default()
                        }]),
                        volume_mounts: Some(vec![VolumeMount {
                            name: "host".to_string(),
                            mount_path: DATA_DIR.to_string(),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }],
                    volumes: Some(vec![Volume {
                        name: "host".to_string(),
                        host_path: Some(HostPathVolumeSource {
                            path: DATA_DIR.to_string(),
                            type_: Some("DirectoryOrCreate".to_string()),
                        }),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

/// Outcome of evaluating one node's copy job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeOutcome {
    Succeeded,
    /// No job existed; one must be created.
    Created,
    /// A job for another installation or older locations must go first.
    WaitingDeletion,
    Running,
    Failed(String),
}

impl NodeOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, NodeOutcome::Succeeded)
    }
}

impl std::fmt::Display for NodeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeOutcome::Succeeded => write!(f, "JobSucceeded"),
            NodeOutcome::Created => write!(f, "JobCreated"),
            NodeOutcome::WaitingDeletion => write!(f, "WaitingPreviousJobDeletion"),
            NodeOutcome::Running => write!(f, "JobRunning"),
            NodeOutcome::Failed(message) => write!(f, "JobFailed: {}", message),
        }
    }
}

/// Classify an existing (or absent) job for the current installation and hash.
pub fn classify_job(job: Option<&Job>, installation_name: &str, hash: &str) -> NodeOutcome {
    let Some(job) = job else {
        return NodeOutcome::Created;
    };

    let labels = job.labels();
    let stale_owner = labels.get(INSTALLATION_LABEL).map(String::as_str) != Some(installation_name);
    let stale_config = labels.get(CONFIG_HASH_LABEL).map(String::as_str) != Some(hash);
    if stale_owner || stale_config {
        return NodeOutcome::WaitingDeletion;
    }

    let status = job.status.as_ref();
    if status.and_then(|s| s.succeeded).unwrap_or(0) > 0 {
        return NodeOutcome::Succeeded;
    }

    status
        .and_then(|s| s.conditions.as_ref())
        .and_then(|conditions| {
            conditions
                .iter()
                .find(|c| c.type_ == "Failed" && c.status == "True")
        })
        .map(|c| NodeOutcome::Failed(c.message.clone().unwrap_or_default()))
        .unwrap_or(NodeOutcome::Running)
}

/// Aggregate result over every node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Distribution {
    /// Every node's job succeeded.
    Ready,
    InProgress { reason: String },
    Failed { reason: String },
}

impl Distribution {
    pub fn is_ready(&self) -> bool {
        matches!(self, Distribution::Ready)
    }
}

/// Fold per-node outcomes into one result. The reason lists nodes by name
/// and is cut at [`MAX_REASON_LEN`] characters.
pub fn aggregate(outcomes: &BTreeMap<String, NodeOutcome>) -> Distribution {
    if outcomes.values().all(NodeOutcome::is_done) {
        return Distribution::Ready;
    }

    let summary: Vec<String> = outcomes
        .iter()
        .map(|(node, outcome)| format!("{}({})", node, outcome))
        .collect();
    let reason = truncate_reason(
        format!("Copying artifacts to nodes: {}", summary.join(", ")),
        MAX_REASON_LEN,
    );

    if outcomes
        .values()
        .any(|o| matches!(o, NodeOutcome::Failed(_)))
    {
        Distribution::Failed { reason }
    } else {
        Distribution::InProgress { reason }
    }
}

/// Drives the per-node copy jobs of an airgapped installation.
pub struct ArtifactDistributor<'a> {
    store: &'a dyn ClusterStore,
    image: &'a str,
}

impl<'a> ArtifactDistributor<'a> {
    pub fn new(store: &'a dyn ClusterStore, image: &'a str) -> Self {
        Self { store, image }
    }

    /// Evaluate every node's job, creating or deleting jobs as needed.
    pub async fn copy_artifacts_to_nodes(&self, installation: &Installation) -> Result<Distribution> {
        let Some(artifacts) = installation.spec.artifacts.as_ref() else {
            return Ok(Distribution::Failed {
                reason: MISSING_ARTIFACTS_REASON.to_string(),
            });
        };
        let hash = artifacts_config_hash(artifacts)?;
        let nodes = self.store.list_nodes().await?;
        info!(nodes = nodes.len(), hash = %hash, "Evaluating artifact jobs");

        let outcomes: BTreeMap<String, NodeOutcome> = try_join_all(
            nodes
                .iter()
                .map(|node| self.evaluate_node(installation, node, &hash)),
        )
        .await?
        .into_iter()
        .collect();

        Ok(aggregate(&outcomes))
    }

    async fn evaluate_node(
        &self,
        installation: &Installation,
        node: &Node,
        hash: &str,
    ) -> Result<(String, NodeOutcome)> {
        let node_name = node.name_any();
        let name = job_name(&node_name);
        let job = self.store.get_job(OPERATOR_NAMESPACE, &name).await?;
        let outcome = classify_job(job.as_ref(), &installation.name_any(), hash);

        match &outcome {
            NodeOutcome::Created => {
                info!(node = %node_name, job = %name, "Creating artifact job");
                let job = artifact_job(installation, &node_name, hash, self.image);
                self.store.create_job(&job).await?;
            }
            NodeOutcome::WaitingDeletion => {
                info!(node = %node_name, job = %name, "Deleting previous artifact job");
                self.store.delete_job(OPERATOR_NAMESPACE, &name).await?;
            }
            other => debug!(node = %node_name, outcome = %other, "Artifact job evaluated"),
        }

        Ok((node_name, outcome))
    }
}
