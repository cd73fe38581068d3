//! Process-wide cache of release metadata, keyed by version.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tracing::{debug, info};

use super::{
    METADATA_CONFIG_MAP_KEY, OPERATOR_NAMESPACE, ReleaseMetadata, local_metadata_config_map,
    trim_version,
};
use crate::controller::error::{Error, Result};
use crate::crd::Installation;
use crate::store::ClusterStore;

/// Metadata resolver with a version-keyed cache.
///
/// Callers always receive an owned copy; mutating it never affects the
/// cached entry.
pub struct MetadataCache {
    entries: Mutex<HashMap<String, ReleaseMetadata>>,
    http: reqwest::Client,
}

impl MetadataCache {
    pub fn new(timeout: Duration) -> std::result::Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            entries: Mutex::new(HashMap::new()),
            http,
        })
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, ReleaseMetadata>> {
        // A panic while holding the lock cannot leave a half-written entry
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Cached metadata for `version`, if any.
    pub fn get(&self, version: &str) -> Option<ReleaseMetadata> {
        self.entries().get(trim_version(version)).cloned()
    }

    /// Store metadata for `version`, replacing any previous entry.
    pub fn put(&self, version: &str, metadata: ReleaseMetadata) {
        self.entries()
            .insert(trim_version(version).to_string(), metadata);
    }

    /// Resolve the metadata for the version an installation asks for.
    ///
    /// Airgapped installations read the local config map; the others fetch
    /// `<metricsBaseURL>/embedded-cluster-public-files/metadata/v<version>.json`.
    pub async fn metadata_for(
        &self,
        store: &dyn ClusterStore,
        installation: &Installation,
    ) -> Result<ReleaseMetadata> {
        let version = installation.spec.desired_version().ok_or_else(|| {
            Error::Metadata("no version found in the installation".to_string())
        })?;
        if let Some(cached) = self.get(version) {
            return Ok(cached);
        }

        let metadata = if installation.spec.air_gap {
            if installation.spec.artifacts.is_none() {
                return Err(Error::Metadata(
                    "no version or artifacts found in the installation".to_string(),
                ));
            }
            self.local_metadata(store, version).await?
        } else {
            self.remote_metadata(&installation.spec.metrics_base_url, version)
                .await?
        };

        self.put(version, metadata.clone());
        Ok(metadata)
    }

    async fn local_metadata(
        &self,
        store: &dyn ClusterStore,
        version: &str,
    ) -> Result<ReleaseMetadata> {
        let name = local_metadata_config_map(version);
        let config_map = store
            .get_config_map(OPERATOR_NAMESPACE, &name)
            .await?
            .ok_or_else(|| {
                Error::Metadata(format!("version metadata config map {} not found", name))
            })?;
        let data = config_map
            .data
            .as_ref()
            .and_then(|d| d.get(METADATA_CONFIG_MAP_KEY))
            .ok_or_else(|| {
                Error::Metadata(format!(
                    "config map {} has no {} key",
                    name, METADATA_CONFIG_MAP_KEY
                ))
            })?;
        debug!(config_map = %name, "Read local release metadata");
        serde_json::from_str(data)
            .map_err(|e| Error::Metadata(format!("failed to decode bundle: {}", e)))
    }

    async fn remote_metadata(&self, base_url: &str, version: &str) -> Result<ReleaseMetadata> {
        let url = metadata_url(base_url, version);
        info!(url = %url, "Fetching release metadata");
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Metadata(format!("failed to get bundle from {:?}: {}", url, e)))?;
        if !response.status().is_success() {
            return Err(Error::Metadata(format!(
                "failed to get bundle from {:?}: {}",
                url,
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| Error::Metadata(format!("failed to decode bundle: {}", e)))
    }
}

/// Remote location of the metadata document for `version`.
pub fn metadata_url(base_url: &str, version: &str) -> String {
    format!(
        "{}/embedded-cluster-public-files/metadata/v{}.json",
        base_url.trim_end_matches('/'),
        trim_version(version)
    )
}
