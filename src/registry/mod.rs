//! In-cluster registry of airgapped installations.
//!
//! In high-availability mode the registry stores its data in the seaweedfs
//! object store. Data written by the single-node registry is moved there by
//! a migration job; progress is tracked in the `RegistryMigrationStatus`
//! condition of the installation.

pub mod health;
pub mod migration;

pub use health::{is_registry_ready, is_rqlite_ready};
pub use migration::{MigrationStatus, migrate_registry_data, scale_registry};

use crate::charts::{merge::REGISTRY_HA_CONFIG, values};
use crate::controller::error::{Error, Result};
use crate::release::ReleaseMetadata;

/// Namespace of the registry deployment.
pub const REGISTRY_NAMESPACE: &str = "registry";

/// Name of the registry deployment.
pub const REGISTRY_DEPLOYMENT: &str = "registry";

/// S3 credentials secret used when the release does not name one.
pub const DEFAULT_REGISTRY_S3_SECRET: &str = "seaweedfs-s3-rw";

/// Name of the S3 credentials secret referenced by the HA registry chart.
pub fn registry_s3_secret_name(meta: &ReleaseMetadata) -> Result<String> {
    let Some(chart) = meta
        .builtin_configs
        .get(REGISTRY_HA_CONFIG)
        .and_then(|c| c.charts.first())
    else {
        return Ok(DEFAULT_REGISTRY_S3_SECRET.to_string());
    };
    let doc = values::parse(&chart.values)?;
    match values::get_path(&doc, "secrets.s3.secretRef") {
        Some(serde_json::Value::String(name)) if !name.is_empty() => Ok(name.clone()),
        Some(_) => Err(Error::Validation(
            "registry chart secrets.s3.secretRef is not a name".to_string(),
        )),
        None => Ok(DEFAULT_REGISTRY_S3_SECRET.to_string()),
    }
}
