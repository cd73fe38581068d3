//! Command line surface.
//!
//! - `run`: the controller (default)
//! - `migrate --migration <name>`: one-shot data migrations
//! - `upgrade --installation <file|->`: move the operator chart to the
//!   release of a persisted installation record

use std::str::FromStr;

use clap::{Parser, Subcommand};
use kube::ResourceExt;
use serde_json::json;
use tokio::io::AsyncReadExt;
use tracing::info;

use crate::charts::infra::OPERATOR_CHART;
use crate::config::OperatorConfig;
use crate::controller::coalesce::current_installation;
use crate::controller::error::{Error, Result};
use crate::crd::{HelmChart, Installation, chart_object_name};
use crate::registry::{MigrationStatus, migrate_registry_data, registry_s3_secret_name, scale_registry};
use crate::release::MetadataCache;
use crate::store::{CLUSTER_CONFIG_NAMESPACE, ClusterStore};

/// Embedded cluster lifecycle operator
#[derive(Parser, Debug)]
#[command(name = "cluster-lifecycle-operator", version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub config: OperatorConfig,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run as controller (default mode)
    Run,

    /// Run the specified migration
    Migrate {
        /// One of: registry-data, registry-scale
        #[arg(long)]
        migration: String,
    },

    /// Upgrade the operator chart to the release of an installation
    Upgrade {
        /// Path to the installation document, "-" for stdin
        #[arg(long, conflicts_with = "installation_secret")]
        installation: Option<String>,

        /// Secret holding the installation document, as NAMESPACE/NAME:KEY
        #[arg(long)]
        installation_secret: Option<String>,
    },
}

/// Named one-shot migrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Migration {
    /// Move registry data into the HA object store.
    RegistryData,
    /// Scale the single-node registry down.
    RegistryScale,
}

impl FromStr for Migration {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "registry-data" => Ok(Migration::RegistryData),
            "registry-scale" => Ok(Migration::RegistryScale),
            other => Err(Error::Validation(format!("unknown migration: {}", other))),
        }
    }
}

/// Run `migration` against the cluster.
pub async fn run_migration(
    store: &dyn ClusterStore,
    metadata: &MetadataCache,
    migration: Migration,
) -> Result<()> {
    match migration {
        Migration::RegistryScale => scale_registry(store, 0).await,
        Migration::RegistryData => {
            let records = store.list_installations().await?;
            let mut installation = current_installation(&records)
                .cloned()
                .ok_or_else(|| Error::MissingField("no active installations found".to_string()))?;
            let meta = metadata.metadata_for(store, &installation).await?;
            let secret = registry_s3_secret_name(&meta)?;
            let status = migrate_registry_data(store, &mut installation, &secret).await?;
            store.update_installation_status(&installation).await?;
            info!(installation = %installation.name_any(), status = ?status, "Registry migration step done");
            if status == MigrationStatus::Failed {
                return Err(Error::Permanent("registry data migration job failed".to_string()));
            }
            Ok(())
        }
    }
}

/// Where the installation document of `upgrade` comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallationSource {
    Stdin,
    File(String),
    Secret {
        namespace: String,
        name: String,
        key: String,
    },
}

impl InstallationSource {
    pub fn from_args(installation: Option<&str>, secret: Option<&str>) -> Result<Self> {
        match (installation, secret) {
            (Some("-"), None) => Ok(InstallationSource::Stdin),
            (Some(path), None) => Ok(InstallationSource::File(path.to_string())),
            (None, Some(reference)) => parse_secret_ref(reference),
            _ => Err(Error::Validation(
                "exactly one of --installation or --installation-secret is required".to_string(),
            )),
        }
    }
}

fn parse_secret_ref(reference: &str) -> Result<InstallationSource> {
    let invalid = || {
        Error::Validation(format!(
            "invalid secret reference {:?}, expected NAMESPACE/NAME:KEY",
            reference
        ))
    };
    let (object, key) = reference.split_once(':').ok_or_else(invalid)?;
    let (namespace, name) = object.split_once('/').ok_or_else(invalid)?;
    if namespace.is_empty() || name.is_empty() || key.is_empty() {
        return Err(invalid());
    }
    Ok(InstallationSource::Secret {
        namespace: namespace.to_string(),
        name: name.to_string(),
        key: key.to_string(),
    })
}

/// Raw installation document from `source`.
pub async fn read_installation(store: &dyn ClusterStore, source: &InstallationSource) -> Result<String> {
    match source {
        InstallationSource::Stdin => {
            let mut data = String::new();
            tokio::io::stdin()
                .read_to_string(&mut data)
                .await
                .map_err(|e| Error::Permanent(format!("read stdin: {}", e)))?;
            Ok(data)
        }
        InstallationSource::File(path) => tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::Permanent(format!("read file {}: {}", path, e))),
        InstallationSource::Secret {
            namespace,
            name,
            key,
        } => {
            let secret = store
                .get_secret(namespace, name)
                .await?
                .ok_or_else(|| Error::MissingField(format!("secret {}/{} not found", namespace, name)))?;
            let bytes = secret
                .data
                .as_ref()
                .and_then(|d| d.get(key))
                .map(|b| b.0.clone())
                .or_else(|| {
                    secret
                        .string_data
                        .as_ref()
                        .and_then(|d| d.get(key))
                        .map(|s| s.clone().into_bytes())
                })
                .ok_or_else(|| {
                    Error::MissingField(format!("secret {}/{} has no key {}", namespace, name, key))
                })?;
            String::from_utf8(bytes)
                .map_err(|e| Error::Validation(format!("secret {}/{} key {}: {}", namespace, name, key, e)))
        }
    }
}

/// Decode an Installation from YAML or JSON.
pub fn decode_installation(data: &str) -> Result<Installation> {
    let doc: serde_yaml::Value = serde_yaml::from_str(data)?;
    match doc.get("kind").and_then(|k| k.as_str()) {
        Some("Installation") => {}
        Some(other) => {
            return Err(Error::Validation(format!("unexpected object kind {}", other)));
        }
        None => return Err(Error::Validation("document has no kind".to_string())),
    }
    Ok(serde_yaml::from_value(doc)?)
}

/// Merge patch moving the operator chart object to `chart`.
pub fn operator_chart_patch(chart: &HelmChart) -> serde_json::Value {
    let mut spec = json!({
        "chartName": chart.chart_name,
        "version": chart.version,
        "values": chart.values,
        "namespace": chart.target_ns,
        "order": chart.order,
    });
    if let (Some(timeout), Some(map)) = (&chart.timeout, spec.as_object_mut()) {
        map.insert("timeout".to_string(), json!(timeout));
    }
    json!({ "spec": spec })
}

/// Point the operator chart at the release `installation` asks for.
pub async fn upgrade_operator_chart(
    store: &dyn ClusterStore,
    metadata: &MetadataCache,
    installation: &Installation,
) -> Result<()> {
    let meta = metadata.metadata_for(store, installation).await?;
    let chart = meta
        .configs
        .as_ref()
        .and_then(|c| c.chart(OPERATOR_CHART))
        .ok_or_else(|| {
            Error::Metadata(format!("chart {} not found in release metadata", OPERATOR_CHART))
        })?;

    let name = chart_object_name(OPERATOR_CHART);
    if store
        .get_chart(CLUSTER_CONFIG_NAMESPACE, &name)
        .await?
        .is_none()
    {
        return Err(Error::MissingField(format!(
            "chart {}/{} not found",
            CLUSTER_CONFIG_NAMESPACE, name
        )));
    }

    store
        .patch_chart(CLUSTER_CONFIG_NAMESPACE, &name, &operator_chart_patch(chart))
        .await?;
    info!(chart = %name, version = %chart.version, "Patched operator chart");
    Ok(())
}
