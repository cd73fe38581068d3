//! In-memory [`ClusterStore`] for tests.
//!
//! Holds every object the lifecycle stages touch in plain maps behind a
//! mutex. Writes are recorded so tests can assert on what a cycle did, and
//! a few switches inject the failures the API server can produce.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Node, Secret};
use kube::ResourceExt;

use lifecycle_operator::controller::error::{Error, Result};
use lifecycle_operator::crd::{
    Chart, ChartSpec, ChartStatus, ClusterConfig, ClusterConfigSpec, ClusterExtensions,
    HelmExtensions, Installation, Plan, PlanStatus, chart_object_name,
};
use lifecycle_operator::store::ClusterStore;

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

/// Everything the fake cluster holds.
#[derive(Default)]
pub struct FakeState {
    pub installations: BTreeMap<String, Installation>,
    pub nodes: Vec<Node>,
    pub server_version: String,
    pub plans: BTreeMap<String, Plan>,
    pub cluster_config: Option<ClusterConfig>,
    pub charts: BTreeMap<Key, Chart>,
    pub jobs: BTreeMap<Key, Job>,
    pub config_maps: BTreeMap<Key, ConfigMap>,
    pub secrets: BTreeMap<Key, Secret>,
    pub deployments: BTreeMap<Key, Deployment>,
    pub stateful_sets: BTreeMap<Key, StatefulSet>,

    /// Every add-on set written to the cluster declaration.
    pub helm_applies: Vec<HelmExtensions>,
    pub chart_patches: Vec<(Key, serde_json::Value)>,
    pub created_plans: Vec<String>,
    pub deleted_plans: Vec<String>,
    pub created_jobs: Vec<Key>,
    pub deleted_jobs: Vec<Key>,
    pub status_updates: Vec<String>,

    /// Next status update of this record fails with a conflict.
    pub conflict_on: Option<String>,
    pub fail_job_creation: bool,
}

/// [`ClusterStore`] backed by [`FakeState`].
#[derive(Default)]
pub struct FakeStore {
    state: Mutex<FakeState>,
}

impl FakeStore {
    pub fn new() -> Self {
        let store = Self::default();
        store.state().server_version = "v1.29.1+k0s".to_string();
        store.state().cluster_config = Some(ClusterConfig::new("k0s", ClusterConfigSpec::default()));
        store
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn add_installation(&self, installation: Installation) {
        self.state()
            .installations
            .insert(installation.name_any(), installation);
    }

    pub fn installation(&self, name: &str) -> Installation {
        self.state().installations.get(name).cloned().unwrap()
    }

    pub fn add_node(&self, node: Node) {
        self.state().nodes.push(node);
    }

    pub fn set_server_version(&self, version: &str) {
        self.state().server_version = version.to_string();
    }

    pub fn plan(&self, name: &str) -> Option<Plan> {
        self.state().plans.get(name).cloned()
    }

    /// Simulate the upgrade agent reporting a plan state.
    pub fn set_plan_state(&self, name: &str, state: &str) {
        if let Some(plan) = self.state().plans.get_mut(name) {
            plan.status = Some(PlanStatus {
                state: state.to_string(),
            });
        }
    }

    pub fn insert_plan(&self, plan: Plan) {
        self.state().plans.insert(plan.name_any(), plan);
    }

    pub fn declared_helm(&self) -> HelmExtensions {
        self.state()
            .cluster_config
            .as_ref()
            .map(ClusterConfig::helm_extensions)
            .unwrap_or_default()
    }

    pub fn set_declared_helm(&self, helm: HelmExtensions) {
        let mut state = self.state();
        let config = state
            .cluster_config
            .get_or_insert_with(|| ClusterConfig::new("k0s", ClusterConfigSpec::default()));
        config.spec.extensions = Some(ClusterExtensions { helm: Some(helm) });
    }

    /// Simulate the agent creating a chart object.
    pub fn add_live_chart(&self, release: &str, version: &str, error: &str) {
        let name = chart_object_name(release);
        let mut chart = Chart::new(
            &name,
            ChartSpec {
                release_name: release.to_string(),
                version: version.to_string(),
                ..Default::default()
            },
        );
        chart.metadata.namespace = Some("kube-system".to_string());
        chart.status = Some(ChartStatus {
            release_name: release.to_string(),
            version: version.to_string(),
            error: error.to_string(),
            ..Default::default()
        });
        self.state().charts.insert(key("kube-system", &name), chart);
    }

    /// Simulate the agent materialising every declared chart.
    pub fn materialize_declared_charts(&self) {
        for chart in self.declared_helm().charts {
            self.add_live_chart(&chart.name, &chart.version, "");
        }
    }

    pub fn add_job(&self, job: Job) {
        let k = key(
            job.metadata.namespace.as_deref().unwrap_or_default(),
            &job.name_any(),
        );
        self.state().jobs.insert(k, job);
    }

    pub fn job(&self, namespace: &str, name: &str) -> Option<Job> {
        self.state().jobs.get(&key(namespace, name)).cloned()
    }

    pub fn add_secret(&self, secret: Secret) {
        let k = key(
            secret.metadata.namespace.as_deref().unwrap_or_default(),
            &secret.name_any(),
        );
        self.state().secrets.insert(k, secret);
    }

    pub fn add_config_map(&self, config_map: ConfigMap) {
        let k = key(
            config_map.metadata.namespace.as_deref().unwrap_or_default(),
            &config_map.name_any(),
        );
        self.state().config_maps.insert(k, config_map);
    }

    pub fn config_map(&self, namespace: &str, name: &str) -> Option<ConfigMap> {
        self.state().config_maps.get(&key(namespace, name)).cloned()
    }

    pub fn add_deployment(&self, deployment: Deployment) {
        let k = key(
            deployment.metadata.namespace.as_deref().unwrap_or_default(),
            &deployment.name_any(),
        );
        self.state().deployments.insert(k, deployment);
    }

    pub fn deployment(&self, namespace: &str, name: &str) -> Option<Deployment> {
        self.state().deployments.get(&key(namespace, name)).cloned()
    }

    pub fn add_stateful_set(&self, stateful_set: StatefulSet) {
        let k = key(
            stateful_set.metadata.namespace.as_deref().unwrap_or_default(),
            &stateful_set.name_any(),
        );
        self.state().stateful_sets.insert(k, stateful_set);
    }
}

fn not_found(kind: &str, namespace: &str, name: &str) -> Error {
    Error::MissingField(format!("{} {}/{} not found", kind, namespace, name))
}

#[async_trait]
impl ClusterStore for FakeStore {
    async fn list_installations(&self) -> Result<Vec<Installation>> {
        Ok(self.state().installations.values().cloned().collect())
    }

    async fn update_installation_status(&self, installation: &Installation) -> Result<()> {
        let name = installation.name_any();
        let mut state = self.state();
        if state.conflict_on.as_deref() == Some(name.as_str()) {
            state.conflict_on = None;
            return Err(Error::Conflict(format!("installation {}", name)));
        }
        let stored = state
            .installations
            .get_mut(&name)
            .ok_or_else(|| not_found("installation", "", &name))?;
        stored.status = installation.status.clone();
        state.status_updates.push(name);
        Ok(())
    }

    async fn list_nodes(&self) -> Result<Vec<Node>> {
        Ok(self.state().nodes.clone())
    }

    async fn server_version(&self) -> Result<String> {
        Ok(self.state().server_version.clone())
    }

    async fn get_plan(&self, name: &str) -> Result<Option<Plan>> {
        Ok(self.state().plans.get(name).cloned())
    }

    async fn create_plan(&self, plan: &Plan) -> Result<()> {
        let mut state = self.state();
        let name = plan.name_any();
        if state.plans.contains_key(&name) {
            return Err(Error::Conflict(format!("plan {} already exists", name)));
        }
        state.created_plans.push(name.clone());
        state.plans.insert(name, plan.clone());
        Ok(())
    }

    async fn delete_plan(&self, name: &str) -> Result<()> {
        let mut state = self.state();
        state.plans.remove(name);
        state.deleted_plans.push(name.to_string());
        Ok(())
    }

    async fn get_cluster_config(&self) -> Result<Option<ClusterConfig>> {
        Ok(self.state().cluster_config.clone())
    }

    async fn apply_helm_extensions(&self, helm: &HelmExtensions) -> Result<()> {
        self.set_declared_helm(helm.clone());
        self.state().helm_applies.push(helm.clone());
        Ok(())
    }

    async fn list_charts(&self) -> Result<Vec<Chart>> {
        Ok(self.state().charts.values().cloned().collect())
    }

    async fn get_chart(&self, namespace: &str, name: &str) -> Result<Option<Chart>> {
        Ok(self.state().charts.get(&key(namespace, name)).cloned())
    }

    async fn patch_chart(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<()> {
        let mut state = self.state();
        if !state.charts.contains_key(&key(namespace, name)) {
            return Err(not_found("chart", namespace, name));
        }
        state.chart_patches.push((key(namespace, name), patch.clone()));
        Ok(())
    }

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<Job>> {
        Ok(self.job(namespace, name))
    }

    async fn create_job(&self, job: &Job) -> Result<()> {
        let mut state = self.state();
        if state.fail_job_creation {
            return Err(Error::Transient("job creation refused".to_string()));
        }
        let k = key(
            job.metadata.namespace.as_deref().unwrap_or_default(),
            &job.name_any(),
        );
        if state.jobs.contains_key(&k) {
            return Err(Error::Conflict(format!("job {}/{} already exists", k.0, k.1)));
        }
        state.created_jobs.push(k.clone());
        state.jobs.insert(k, job.clone());
        Ok(())
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.state();
        state.jobs.remove(&key(namespace, name));
        state.deleted_jobs.push(key(namespace, name));
        Ok(())
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>> {
        Ok(self.config_map(namespace, name))
    }

    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<()> {
        self.add_config_map(config_map.clone());
        Ok(())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        Ok(self.state().secrets.get(&key(namespace, name)).cloned())
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>> {
        Ok(self.deployment(namespace, name))
    }

    async fn scale_deployment(&self, namespace: &str, name: &str, replicas: i32) -> Result<()> {
        let mut state = self.state();
        let deployment = state
            .deployments
            .get_mut(&key(namespace, name))
            .ok_or_else(|| not_found("deployment", namespace, name))?;
        deployment
            .spec
            .get_or_insert_with(DeploymentSpec::default)
            .replicas = Some(replicas);
        Ok(())
    }

    async fn get_stateful_set(&self, namespace: &str, name: &str) -> Result<Option<StatefulSet>> {
        Ok(self.state().stateful_sets.get(&key(namespace, name)).cloned())
    }
}
