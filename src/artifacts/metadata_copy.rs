//! Copy of the release metadata into airgapped clusters.
//!
//! Airgapped clusters cannot reach the metadata endpoint. The metadata
//! document is instead pulled from the in-cluster registry and stored in a
//! config map that the metadata cache reads.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::ObjectMeta;
use tracing::{debug, info};

use crate::controller::error::{Error, Result};
use crate::crd::Installation;
use crate::release::{METADATA_CONFIG_MAP_KEY, OPERATOR_NAMESPACE, local_metadata_config_map};
use crate::store::ClusterStore;

/// File holding the metadata document inside the metadata artifact.
pub const VERSION_METADATA_FILE: &str = "version-metadata.json";

/// Where artifacts stored in the in-cluster registry are read from.
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    /// Raw metadata document published at `location`.
    async fn fetch_version_metadata(&self, location: &str) -> Result<String>;
}

/// [`ArtifactSource`] reading the registry over plain HTTP.
pub struct HttpArtifactSource {
    http: reqwest::Client,
}

impl HttpArtifactSource {
    pub fn new(timeout: Duration) -> std::result::Result<Self, reqwest::Error> {
        Ok(Self {
            http: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }
}

/// URL of the metadata file for an artifact location.
///
/// Locations without a scheme are served by the in-cluster registry over HTTP.
pub fn metadata_artifact_url(location: &str) -> String {
    let location = location.trim_end_matches('/');
    if location.starts_with("http://") || location.starts_with("https://") {
        format!("{}/{}", location, VERSION_METADATA_FILE)
    } else {
        format!("http://{}/{}", location, VERSION_METADATA_FILE)
    }
}

#[async_trait]
impl ArtifactSource for HttpArtifactSource {
    async fn fetch_version_metadata(&self, location: &str) -> Result<String> {
        let url = metadata_artifact_url(location);
        debug!(url = %url, "Pulling version metadata");
        let response = self.http.get(&url).send().await?.error_for_status()?;
        Ok(response.text().await?)
    }
}

/// Make sure the metadata config map of the desired version exists.
///
/// Returns whether a config map was created. Installations without a
/// version or artifact locations are skipped.
pub async fn copy_version_metadata(
    store: &dyn ClusterStore,
    source: &dyn ArtifactSource,
    installation: &Installation,
) -> Result<bool> {
    let (Some(version), Some(artifacts)) = (
        installation.spec.desired_version(),
        installation.spec.artifacts.as_ref(),
    ) else {
        info!("Skipping version metadata copy");
        return Ok(false);
    };

    let name = local_metadata_config_map(version);
    if store
        .get_config_map(OPERATOR_NAMESPACE, &name)
        .await?
        .is_some()
    {
        return Ok(false);
    }

    let data = source
        .fetch_version_metadata(&artifacts.embedded_cluster_metadata)
        .await
        .map_err(|e| Error::Transient(format!("failed to pull version metadata: {}", e)))?;

    let config_map = ConfigMap {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(OPERATOR_NAMESPACE.to_string()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(METADATA_CONFIG_MAP_KEY.to_string(), data)])),
        ..Default::default()
    };
    store.create_config_map(&config_map).await?;
    info!(config_map = %name, "Copied version metadata into the cluster");
    Ok(true)
}
