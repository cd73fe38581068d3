//! Shared context for the controller.
//!
//! [`LifecycleEngine`] bundles the collaborators one reconcile cycle needs
//! and nothing tied to a live API server, so cycles can run against any
//! [`ClusterStore`]. [`Context`] adds the client, the event recorder and the
//! health state used by the running controller.

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};

use crate::artifacts::ArtifactSource;
use crate::config::OperatorConfig;
use crate::controller::installation_state_machine::InstallationStateMachine;
use crate::crd::Installation;
use crate::health::HealthState;
use crate::release::MetadataCache;
use crate::reporting::Notifier;
use crate::store::ClusterStore;

/// Field manager name for the operator
pub const FIELD_MANAGER: &str = "embedded-cluster-operator";

/// Tunables of the reconcile cycle.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Version of the running operator, empty when unknown.
    pub operator_version: String,
    /// Image of the artifact copy jobs.
    pub mirror_image: String,
    pub requeue_after: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            operator_version: String::new(),
            mirror_image: String::new(),
            requeue_after: Duration::from_secs(3600),
        }
    }
}

impl From<&OperatorConfig> for EngineSettings {
    fn from(config: &OperatorConfig) -> Self {
        Self {
            operator_version: config.operator_version.clone(),
            mirror_image: config.mirror_image.clone(),
            requeue_after: config.requeue_after(),
        }
    }
}

/// Everything a reconcile cycle reads from or writes to.
pub struct LifecycleEngine {
    pub store: Arc<dyn ClusterStore>,
    pub metadata: Arc<MetadataCache>,
    pub artifact_source: Arc<dyn ArtifactSource>,
    pub notifier: Arc<dyn Notifier>,
    pub fsm: InstallationStateMachine,
    pub settings: EngineSettings,
}

impl LifecycleEngine {
    pub fn new(
        store: Arc<dyn ClusterStore>,
        metadata: Arc<MetadataCache>,
        artifact_source: Arc<dyn ArtifactSource>,
        notifier: Arc<dyn Notifier>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            metadata,
            artifact_source,
            notifier,
            fsm: InstallationStateMachine::new(),
            settings,
        }
    }
}

/// Shared context for the controller
#[derive(Clone)]
pub struct Context {
    pub client: Client,
    reporter: Reporter,
    pub engine: Arc<LifecycleEngine>,
    /// Optional health state for metrics and readiness
    pub health_state: Option<Arc<HealthState>>,
}

impl Context {
    pub fn new(
        client: Client,
        engine: Arc<LifecycleEngine>,
        health_state: Option<Arc<HealthState>>,
        instance: Option<String>,
    ) -> Self {
        Self {
            client,
            reporter: Reporter {
                controller: FIELD_MANAGER.into(),
                instance,
            },
            engine,
            health_state,
        }
    }

    fn recorder(&self) -> Recorder {
        Recorder::new(self.client.clone(), self.reporter.clone())
    }

    async fn publish(
        &self,
        installation: &Installation,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let object_ref = installation.object_ref(&());
        if let Err(e) = self
            .recorder()
            .publish(
                &Event {
                    type_,
                    reason: reason.into(),
                    note,
                    action: action.into(),
                    secondary: None,
                },
                &object_ref,
            )
            .await
        {
            tracing::warn!(reason = %reason, error = %e, "Failed to publish event");
        }
    }

    /// Publish a normal event for an installation
    pub async fn publish_normal_event(
        &self,
        installation: &Installation,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        self.publish(installation, EventType::Normal, reason, action, note)
            .await
    }

    /// Publish a warning event for an installation
    pub async fn publish_warning_event(
        &self,
        installation: &Installation,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        self.publish(installation, EventType::Warning, reason, action, note)
            .await
    }
}
