//! Upgrade orchestrator.
//!
//! Moves the cluster to the Kubernetes version of the desired release by
//! creating an upgrade plan for the external agent, then follows that plan
//! until it terminates. Plans created for other installations are waited
//! for and removed once finished. Downgrades are refused.

use kube::ResourceExt;
use tracing::{info, warn};

use super::plan::{
    PLAN_NAME, PlanState, airgap_update_command, is_attributed_to, k0s_update_command, new_plan,
    upgrade_targets,
};
use super::version::{KubeVersion, should_upgrade_k0s};
use crate::artifacts::{ArtifactDistributor, ArtifactSource, Distribution, copy_version_metadata};
use crate::controller::error::Result;
use crate::controller::installation_state_machine::{
    InstallationEvent, InstallationStateMachine, InstallationTransitionContext,
};
use crate::crd::Installation;
use crate::release::{MetadataCache, ReleaseMetadata, trim_version};
use crate::store::ClusterStore;

/// What the orchestrator did with the upgrade plan this cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PlanAction {
    #[default]
    None,
    Created,
    /// A finished plan of another installation was removed.
    Deleted,
}

/// Collaborators of the upgrade stage.
pub struct UpgradeOrchestrator<'a> {
    pub store: &'a dyn ClusterStore,
    pub metadata: &'a MetadataCache,
    pub artifact_source: &'a dyn ArtifactSource,
    pub fsm: &'a InstallationStateMachine,
    /// Version of the running operator, may be empty.
    pub operator_version: &'a str,
    /// Image of the artifact copy jobs.
    pub mirror_image: &'a str,
}

impl UpgradeOrchestrator<'_> {
    fn apply(&self, installation: &mut Installation, event: InstallationEvent, reason: impl Into<String>) {
        let status = installation.status.get_or_insert_with(Default::default);
        self.fsm.apply(
            status,
            event,
            reason,
            &InstallationTransitionContext::default(),
        );
    }

    /// Record that Kubernetes is at the desired version.
    ///
    /// Records already past that point keep their add-on state.
    fn mark_kubernetes_installed(&self, installation: &mut Installation, reason: &str) {
        let already = installation
            .status
            .as_ref()
            .is_some_and(|s| s.state.is_kubernetes_installed());
        if !already {
            self.apply(installation, InstallationEvent::KubernetesReady, reason);
        }
    }

    fn fail(&self, installation: &mut Installation, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(reason = %reason, "Upgrade refused");
        self.apply(installation, InstallationEvent::PolicyFailed, reason);
    }

    /// Reconcile the cluster version for the authoritative installation.
    ///
    /// `all` is every Installation record in the cluster, obsolete ones included.
    pub async fn reconcile_k0s_version(
        &self,
        installation: &mut Installation,
        all: &[Installation],
    ) -> Result<PlanAction> {
        let Some(desired_version) = installation.spec.desired_version().map(str::to_string) else {
            self.mark_kubernetes_installed(installation, "");
            return Ok(PlanAction::None);
        };

        // The first installation record is the initial install, nothing to upgrade
        if all.len() == 1 {
            self.mark_kubernetes_installed(installation, "");
            return Ok(PlanAction::None);
        }

        if !self.operator_version.is_empty()
            && trim_version(self.operator_version) == trim_version(&desired_version)
        {
            self.mark_kubernetes_installed(installation, "");
            return Ok(PlanAction::None);
        }

        if installation.spec.air_gap {
            copy_version_metadata(self.store, self.artifact_source, installation).await?;
        }

        let meta = match self.metadata.metadata_for(self.store, installation).await {
            Ok(meta) => meta,
            Err(e) => {
                self.fail(installation, e.to_string());
                return Ok(PlanAction::None);
            }
        };

        let running_version = self.store.server_version().await?;
        let Some(running) = KubeVersion::parse(&running_version) else {
            self.fail(installation, format!("Invalid running version {}", running_version));
            return Ok(PlanAction::None);
        };

        let desired_k0s = meta.k0s_version().to_string();
        let Some(desired) = KubeVersion::from_k0s_version(&desired_k0s) else {
            self.fail(installation, format!("Invalid desired version {}", desired_k0s));
            return Ok(PlanAction::None);
        };

        if running > desired {
            self.fail(installation, "Downgrades not supported");
            return Ok(PlanAction::None);
        }

        if installation.spec.air_gap {
            let distributor = ArtifactDistributor::new(self.store, self.mirror_image);
            match distributor.copy_artifacts_to_nodes(installation).await? {
                Distribution::Ready => {}
                Distribution::InProgress { reason } => {
                    self.apply(installation, InstallationEvent::ArtifactsCopying, reason);
                    return Ok(PlanAction::None);
                }
                Distribution::Failed { reason } => {
                    self.fail(installation, reason);
                    return Ok(PlanAction::None);
                }
            }
        }

        let Some(plan) = self.store.get_plan(PLAN_NAME).await? else {
            let previous = self.previous_k0s_version(installation, all).await?;
            let upgrade = should_upgrade_k0s(&running, &desired, &desired_k0s, &previous);
            return self.start_upgrade(installation, &meta, upgrade).await;
        };

        let name = installation.name_any();
        let state = PlanState::parse(plan.state());
        if is_attributed_to(&plan, &name) {
            match state.event() {
                InstallationEvent::KubernetesReady => {
                    self.mark_kubernetes_installed(installation, state.as_str())
                }
                event => self.apply(installation, event, state.as_str()),
            }
            return Ok(PlanAction::None);
        }

        if !state.is_terminal() {
            self.apply(
                installation,
                InstallationEvent::WaitingForPlan,
                format!("Another upgrade is in progress ({})", plan.spec.id),
            );
            return Ok(PlanAction::None);
        }

        info!(plan_id = %plan.spec.id, state = %state, "Deleting finished upgrade plan");
        self.store.delete_plan(PLAN_NAME).await?;
        Ok(PlanAction::Deleted)
    }

    async fn start_upgrade(
        &self,
        installation: &mut Installation,
        meta: &ReleaseMetadata,
        upgrade_k0s: bool,
    ) -> Result<PlanAction> {
        let nodes = self.store.list_nodes().await?;
        let targets = upgrade_targets(&nodes);

        let mut commands = Vec::new();
        if installation.spec.air_gap {
            commands.push(airgap_update_command(installation, targets.workers.clone()));
        }
        if upgrade_k0s {
            commands.push(k0s_update_command(installation, meta, targets));
        }

        if commands.is_empty() {
            self.mark_kubernetes_installed(installation, "");
            return Ok(PlanAction::None);
        }

        let plan = new_plan(&installation.name_any(), commands);
        self.store.create_plan(&plan).await?;
        info!(
            plan_id = %plan.spec.id,
            commands = plan.spec.commands.len(),
            "Created upgrade plan"
        );
        self.apply(installation, InstallationEvent::PlanQueued, "");
        Ok(PlanAction::Created)
    }

    /// k0s version of the most recent other installation, empty when unknown.
    async fn previous_k0s_version(
        &self,
        installation: &Installation,
        all: &[Installation],
    ) -> Result<String> {
        let name = installation.name_any();
        let mut others: Vec<&Installation> = all.iter().filter(|i| i.name_any() != name).collect();
        others.sort_by_key(|i| std::cmp::Reverse(i.name_any()));
        let Some(previous) = others
            .first()
            .filter(|p| p.spec.desired_version().is_some())
        else {
            return Ok(String::new());
        };
        let meta = self.metadata.metadata_for(self.store, previous).await?;
        Ok(meta.k0s_version().to_string())
    }
}
