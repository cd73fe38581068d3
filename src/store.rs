//! Object store seam.
//!
//! Every read and write the lifecycle stages perform goes through
//! [`ClusterStore`]. Lookups of objects that may legitimately not exist yet
//! return `Option`; optimistic-concurrency failures surface as
//! [`Error::Conflict`]. [`KubeStore`] is the API-server backed implementation.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Node, Secret};
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, ResourceExt};
use serde_json::json;
use tracing::debug;

use crate::controller::context::FIELD_MANAGER;
use crate::controller::error::{Error, Result};
use crate::crd::{Chart, ClusterConfig, HelmExtensions, Installation, Plan};

/// Name and namespace of the cluster-wide add-on declaration.
pub const CLUSTER_CONFIG_NAME: &str = "k0s";
pub const CLUSTER_CONFIG_NAMESPACE: &str = "kube-system";

/// Typed access to the objects the controller observes and mutates.
#[async_trait]
pub trait ClusterStore: Send + Sync {
    async fn list_installations(&self) -> Result<Vec<Installation>>;

    /// Persist `installation.status`. Stale resource versions yield [`Error::Conflict`].
    async fn update_installation_status(&self, installation: &Installation) -> Result<()>;

    async fn list_nodes(&self) -> Result<Vec<Node>>;

    /// Git version reported by the API server (e.g. "v1.29.1+k0s").
    async fn server_version(&self) -> Result<String>;

    async fn get_plan(&self, name: &str) -> Result<Option<Plan>>;
    async fn create_plan(&self, plan: &Plan) -> Result<()>;
    async fn delete_plan(&self, name: &str) -> Result<()>;

    async fn get_cluster_config(&self) -> Result<Option<ClusterConfig>>;

    /// Replace `spec.extensions.helm` of the cluster declaration.
    async fn apply_helm_extensions(&self, helm: &HelmExtensions) -> Result<()>;

    async fn list_charts(&self) -> Result<Vec<Chart>>;
    async fn get_chart(&self, namespace: &str, name: &str) -> Result<Option<Chart>>;
    async fn patch_chart(&self, namespace: &str, name: &str, patch: &serde_json::Value)
    -> Result<()>;

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<Job>>;
    async fn create_job(&self, job: &Job) -> Result<()>;

    /// Delete a job and its pods (foreground propagation).
    async fn delete_job(&self, namespace: &str, name: &str) -> Result<()>;

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>>;
    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<()>;

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>>;

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>>;
    async fn scale_deployment(&self, namespace: &str, name: &str, replicas: i32) -> Result<()>;

    async fn get_stateful_set(&self, namespace: &str, name: &str) -> Result<Option<StatefulSet>>;
}

/// [`ClusterStore`] backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn namespaced<K>(&self, namespace: &str) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Map a 409 on update into the conflict variant so callers can tell it apart.
fn conflict_aware(err: kube::Error, what: &str) -> Error {
    match err {
        kube::Error::Api(ref e) if e.code == 409 => Error::Conflict(format!("{}: {}", what, e.message)),
        other => Error::Kube(other),
    }
}

/// Treat not-found on delete as success.
fn ignore_not_found(result: std::result::Result<(), kube::Error>) -> Result<()> {
    match result {
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
        other => other.map_err(Error::from),
    }
}

#[async_trait]
impl ClusterStore for KubeStore {
    async fn list_installations(&self) -> Result<Vec<Installation>> {
        let api: Api<Installation> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn update_installation_status(&self, installation: &Installation) -> Result<()> {
        let api: Api<Installation> = Api::all(self.client.clone());
        let name = installation.name_any();
        api.replace_status(&name, &PostParams::default(), installation)
            .await
            .map_err(|e| conflict_aware(e, &format!("installation {} status", name)))?;
        debug!(installation = %name, "Persisted installation status");
        Ok(())
    }

    async fn list_nodes(&self) -> Result<Vec<Node>> {
        let api: Api<Node> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn server_version(&self) -> Result<String> {
        Ok(self.client.apiserver_version().await?.git_version)
    }

    async fn get_plan(&self, name: &str) -> Result<Option<Plan>> {
        let api: Api<Plan> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn create_plan(&self, plan: &Plan) -> Result<()> {
        let api: Api<Plan> = Api::all(self.client.clone());
        api.create(&PostParams::default(), plan).await?;
        Ok(())
    }

    async fn delete_plan(&self, name: &str) -> Result<()> {
        let api: Api<Plan> = Api::all(self.client.clone());
        ignore_not_found(api.delete(name, &DeleteParams::default()).await.map(|_| ()))
    }

    async fn get_cluster_config(&self) -> Result<Option<ClusterConfig>> {
        let api: Api<ClusterConfig> = self.namespaced(CLUSTER_CONFIG_NAMESPACE);
        Ok(api.get_opt(CLUSTER_CONFIG_NAME).await?)
    }

    async fn apply_helm_extensions(&self, helm: &HelmExtensions) -> Result<()> {
        let api: Api<ClusterConfig> = self.namespaced(CLUSTER_CONFIG_NAMESPACE);
        let patch = json!({ "spec": { "extensions": { "helm": helm } } });
        api.patch(
            CLUSTER_CONFIG_NAME,
            &PatchParams::default(),
            &Patch::Merge(&patch),
        )
        .await
        .map_err(|e| conflict_aware(e, "cluster config"))?;
        Ok(())
    }

    async fn list_charts(&self) -> Result<Vec<Chart>> {
        let api: Api<Chart> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn get_chart(&self, namespace: &str, name: &str) -> Result<Option<Chart>> {
        let api: Api<Chart> = self.namespaced(namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn patch_chart(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<()> {
        let api: Api<Chart> = self.namespaced(namespace);
        api.patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await?;
        Ok(())
    }

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<Job>> {
        let api: Api<Job> = self.namespaced(namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn create_job(&self, job: &Job) -> Result<()> {
        let namespace = job
            .namespace()
            .ok_or_else(|| Error::MissingField("job.metadata.namespace".to_string()))?;
        let api: Api<Job> = self.namespaced(&namespace);
        api.create(&PostParams::default(), job).await?;
        Ok(())
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<Job> = self.namespaced(namespace);
        ignore_not_found(api.delete(name, &DeleteParams::foreground()).await.map(|_| ()))
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>> {
        let api: Api<ConfigMap> = self.namespaced(namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<()> {
        let namespace = config_map
            .namespace()
            .ok_or_else(|| Error::MissingField("configmap.metadata.namespace".to_string()))?;
        let api: Api<ConfigMap> = self.namespaced(&namespace);
        api.create(&PostParams::default(), config_map).await?;
        Ok(())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        let api: Api<Secret> = self.namespaced(namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>> {
        let api: Api<Deployment> = self.namespaced(namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn scale_deployment(&self, namespace: &str, name: &str, replicas: i32) -> Result<()> {
        let api: Api<Deployment> = self.namespaced(namespace);
        let patch = json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "spec": { "replicas": replicas },
        });
        api.patch(
            name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&patch),
        )
        .await?;
        Ok(())
    }

    async fn get_stateful_set(&self, namespace: &str, name: &str) -> Result<Option<StatefulSet>> {
        let api: Api<StatefulSet> = self.namespaced(namespace);
        Ok(api.get_opt(name).await?)
    }
}
