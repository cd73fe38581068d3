//! Readiness of the HA components.

use super::{REGISTRY_DEPLOYMENT, REGISTRY_NAMESPACE};
use crate::controller::error::{Error, Result};
use crate::store::ClusterStore;

/// Replicas the HA registry runs with.
pub const REGISTRY_HA_REPLICAS: i32 = 2;

/// Replicas of the admin console database in HA mode.
pub const RQLITE_HA_REPLICAS: i32 = 3;

pub const RQLITE_NAMESPACE: &str = "kotsadm";
pub const RQLITE_STATEFUL_SET: &str = "kotsadm-rqlite";

/// Whether the registry deployment runs all of its HA replicas.
pub async fn is_registry_ready(store: &dyn ClusterStore) -> Result<bool> {
    let deployment = store
        .get_deployment(REGISTRY_NAMESPACE, REGISTRY_DEPLOYMENT)
        .await?
        .ok_or_else(|| Error::MissingField("registry deployment not found".to_string()))?;
    let ready = deployment
        .status
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0);
    Ok(ready == REGISTRY_HA_REPLICAS)
}

/// Whether the admin console database runs all of its HA replicas.
pub async fn is_rqlite_ready(store: &dyn ClusterStore) -> Result<bool> {
    let stateful_set = store
        .get_stateful_set(RQLITE_NAMESPACE, RQLITE_STATEFUL_SET)
        .await?
        .ok_or_else(|| Error::MissingField("rqlite stateful set not found".to_string()))?;
    let ready = stateful_set
        .status
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0);
    Ok(ready == RQLITE_HA_REPLICAS)
}
