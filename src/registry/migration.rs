//! Registry data migration to the HA object store.

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvFromSource, PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec,
    SecretEnvSource, Volume, VolumeMount,
};
use kube::api::ObjectMeta;
use tracing::{info, warn};

use super::{REGISTRY_DEPLOYMENT, REGISTRY_NAMESPACE};
use crate::controller::error::{Error, Result};
use crate::controller::status::{REGISTRY_MIGRATION_CONDITION, set_condition};
use crate::crd::{Condition, Installation};
use crate::store::ClusterStore;

/// Secret created by the migration job once all data is copied.
pub const MIGRATION_COMPLETE_SECRET: &str = "registry-data-migration-complete";
pub const MIGRATION_JOB: &str = "registry-data-migration";

const KUBECTL_IMAGE: &str = "bitnami/kubectl:1.29.5";
const AWS_CLI_IMAGE: &str = "amazon/aws-cli:latest";
const SEAWEEDFS_S3_URL: &str = "http://seaweedfs-s3.seaweedfs:8333";
const REGISTRY_DATA_DIR: &str = "/var/lib/embedded-cluster/registry";

/// Progress of the registry data migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationStatus {
    Completed,
    /// The migration job was created this cycle.
    Started,
    InProgress,
    Failed,
}

impl MigrationStatus {
    pub fn reason(&self) -> &'static str {
        match self {
            MigrationStatus::Completed => "MigrationJobCompleted",
            MigrationStatus::Started | MigrationStatus::InProgress => "MigrationJobInProgress",
            MigrationStatus::Failed => "MigrationJobFailed",
        }
    }
}

fn script_container(name: &str, image: &str, script: String, s3_secret: Option<&str>) -> Container {
    Container {
        name: name.to_string(),
        image: Some(image.to_string()),
        command: Some(vec!["sh".to_string(), "-c".to_string()]),
        args: Some(vec![script]),
        env_from: s3_secret.map(|secret| {
            vec![EnvFromSource {
                secret_ref: Some(SecretEnvSource {
                    name: secret.to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }]
        }),
        ..Default::default()
    }
}

/// Job that stops the single-node registry, copies its data into the
/// object store and records completion in a secret.
pub fn migration_job(s3_secret: &str) -> Job {
    let scale_down = format!(
        "kubectl scale deployment {} -n {} --replicas=0 || sleep 10000",
        REGISTRY_DEPLOYMENT, REGISTRY_NAMESPACE
    );
    let wait_for_store = format!(
        "until aws s3 ls s3:// --endpoint-url={url}; do echo waiting for seaweedfs-s3; sleep 5; done",
        url = SEAWEEDFS_S3_URL
    );
    let copy = format!(
        "aws s3 ls s3://registry --endpoint-url={url} || aws s3api create-bucket --bucket registry --endpoint-url={url}\n\
         aws s3 sync {dir}/ s3://registry/ --endpoint-url={url}",
        url = SEAWEEDFS_S3_URL,
        dir = REGISTRY_DATA_DIR
    );
    let mark_done = format!(
        "kubectl create secret generic -n {} {} --from-literal=registry=migrated || sleep 10000",
        REGISTRY_NAMESPACE, MIGRATION_COMPLETE_SECRET
    );

    let mut copy_container = script_container("migrate-registry-data", AWS_CLI_IMAGE, copy, Some(s3_secret));
    copy_container.volume_mounts = Some(vec![VolumeMount {
        name: "registry-data".to_string(),
        mount_path: REGISTRY_DATA_DIR.to_string(),
        ..Default::default()
    }]);

    Job {
        metadata: ObjectMeta {
            name: Some(MIGRATION_JOB.to_string()),
            namespace: Some(REGISTRY_NAMESPACE.to_string()),
            ..Default::default()
        },
        spec: Some(JobSpec {
            template: PodTemplateSpec {
                metadata: None,
                spec: Some(PodSpec {
                    restart_policy: Some("OnFailure".to_string()),
                    volumes: Some(vec![Volume {
                        name: "registry-data".to_string(),
                        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                            claim_name: "registry".to_string(),
                            read_only: None,
                        }),
                        ..Default::default()
                    }]),
                    init_containers: Some(vec![
                        script_container("scale-down-registry", KUBECTL_IMAGE, scale_down, None),
                        script_container("wait-for-seaweed", AWS_CLI_IMAGE, wait_for_store, Some(s3_secret)),
                        copy_container,
                    ]),
                    containers: vec![script_container(
                        "create-success-secret",
                        KUBECTL_IMAGE,
                        mark_done,
                        None,
                    )],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

fn record(installation: &mut Installation, healthy: bool, reason: &str) {
    let generation = installation.metadata.generation;
    let status = installation.status.get_or_insert_with(Default::default);
    set_condition(
        status,
        Condition::new(REGISTRY_MIGRATION_CONDITION, healthy, reason, "", generation),
    );
}

/// Drive the registry data migration one step and record its condition.
///
/// A failed migration job is reported as [`MigrationStatus::Failed`]; a
/// job that cannot be created is an error.
pub async fn migrate_registry_data(
    store: &dyn ClusterStore,
    installation: &mut Installation,
    s3_secret: &str,
) -> Result<MigrationStatus> {
    if store
        .get_secret(REGISTRY_NAMESPACE, MIGRATION_COMPLETE_SECRET)
        .await?
        .is_some()
    {
        record(installation, true, MigrationStatus::Completed.reason());
        return Ok(MigrationStatus::Completed);
    }

    if let Some(job) = store.get_job(REGISTRY_NAMESPACE, MIGRATION_JOB).await? {
        let status = job.status.unwrap_or_default();
        if status.active.unwrap_or(0) > 0 {
            return Ok(MigrationStatus::InProgress);
        }
        if status.failed.unwrap_or(0) > 0 {
            warn!("Registry migration job failed");
            record(installation, false, MigrationStatus::Failed.reason());
            return Ok(MigrationStatus::Failed);
        }
        return Ok(MigrationStatus::InProgress);
    }

    if let Err(e) = store.create_job(&migration_job(s3_secret)).await {
        record(installation, false, "MigrationJobFailedCreation");
        return Err(Error::Transient(format!("create migration job: {}", e)));
    }
    info!("Started registry data migration");
    record(installation, false, MigrationStatus::Started.reason());
    Ok(MigrationStatus::Started)
}

/// Scale the registry deployment.
pub async fn scale_registry(store: &dyn ClusterStore, replicas: i32) -> Result<()> {
    store
        .scale_deployment(REGISTRY_NAMESPACE, REGISTRY_DEPLOYMENT, replicas)
        .await
}
