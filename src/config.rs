//! Operator configuration.
//!
//! Every setting is a flag with an environment fallback so the same binary
//! runs from a pod spec or a shell.

use std::time::Duration;

use clap::Args;

/// Default lease name for leader election.
pub const DEFAULT_LEASE_NAME: &str = "embedded-cluster-operator-leader";

/// Settings shared by all subcommands.
#[derive(Args, Debug, Clone)]
pub struct OperatorConfig {
    /// Version of this operator build (e.g. "1.2.0+k8s-1.29")
    #[arg(long, env = "EMBEDDEDCLUSTER_VERSION", default_value = "")]
    pub operator_version: String,

    /// Image used by the artifact copy jobs
    #[arg(long, env = "LOCAL_ARTIFACT_MIRROR_IMAGE", default_value = "")]
    pub mirror_image: String,

    /// Seconds between unconditional reconciliations
    #[arg(long, env = "REQUEUE_AFTER_SECS", default_value_t = 3600)]
    pub requeue_after_secs: u64,

    /// Port of the health and metrics server
    #[arg(long, env = "HEALTH_PORT", default_value_t = 8080)]
    pub health_port: u16,

    /// Timeout for release metadata and artifact requests, in seconds
    #[arg(long, env = "METADATA_TIMEOUT_SECS", default_value_t = 30)]
    pub metadata_timeout_secs: u64,

    #[arg(long, env = "POD_NAME")]
    pub pod_name: Option<String>,

    #[arg(long, env = "POD_NAMESPACE", default_value = "embedded-cluster")]
    pub pod_namespace: String,

    #[arg(long, env = "LEASE_NAME", default_value = DEFAULT_LEASE_NAME)]
    pub lease_name: String,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            operator_version: String::new(),
            mirror_image: String::new(),
            requeue_after_secs: 3600,
            health_port: 8080,
            metadata_timeout_secs: 30,
            pod_name: None,
            pod_namespace: "embedded-cluster".to_string(),
            lease_name: DEFAULT_LEASE_NAME.to_string(),
        }
    }
}

impl OperatorConfig {
    pub fn requeue_after(&self) -> Duration {
        Duration::from_secs(self.requeue_after_secs)
    }

    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_secs(self.metadata_timeout_secs)
    }

    /// Leader election identity: the pod name, else the hostname.
    pub fn holder_id(&self) -> String {
        match &self.pod_name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "unknown".to_string()),
        }
    }
}
