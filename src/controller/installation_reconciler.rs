//! Reconciliation loop for Installation records.
//!
//! Every trigger, whatever record or watched object caused it, runs one
//! full cycle over all records: pick the authoritative record, refresh its
//! node statuses, drive the cluster version, run the registry migration,
//! converge the add-ons, persist once and demote the older records.

use std::sync::Arc;
use std::time::Instant;

use kube::{ResourceExt, runtime::controller::Action};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::charts::{ChartStageOutcome, reconcile_helm_charts};
use crate::controller::coalesce::select_authoritative;
use crate::controller::context::{Context, LifecycleEngine};
use crate::controller::error::{Error, Result};
use crate::controller::installation_state_machine::{
    InstallationEvent, InstallationTransitionContext,
};
use crate::controller::node_status::{NodeEventsBatch, reconcile_node_statuses};
use crate::controller::status::{REGISTRY_MIGRATION_CONDITION, condition_status};
use crate::crd::{Installation, InstallationState};
use crate::registry::{MigrationStatus, migrate_registry_data, registry_s3_secret_name};
use crate::reporting::MetricsEvent;
use crate::upgrade::{PlanAction, UpgradeOrchestrator};

pub const REGISTRY_MIGRATED_REASON: &str = "Registry data migrated";

/// What one cycle observed and changed.
#[derive(Debug, Clone, Default)]
pub struct CycleOutcome {
    /// The reconciled record as persisted, `None` when the cycle had nothing to do.
    pub authoritative: Option<Installation>,
    pub previous_state: InstallationState,
    /// Names of the records demoted to Obsolete this cycle.
    pub demoted: Vec<String>,
    pub plan_action: PlanAction,
    pub charts: ChartStageOutcome,
    pub migration: Option<MigrationStatus>,
    /// State of every record at the end of the cycle.
    pub states: Vec<InstallationState>,
}

impl CycleOutcome {
    pub fn state(&self) -> Option<InstallationState> {
        self.authoritative
            .as_ref()
            .map(|i| i.status.as_ref().map(|s| s.state).unwrap_or_default())
    }

    pub fn state_changed(&self) -> bool {
        self.state().is_some_and(|s| s != self.previous_state)
    }
}

/// Notification for a state change of the authoritative record.
///
/// Records that were never reconciled before report nothing.
pub fn upgrade_event(before: &Installation, after: &Installation) -> Option<MetricsEvent> {
    let previous = before.status.as_ref().map(|s| s.state).unwrap_or_default();
    let status = after.status.as_ref()?;
    if previous.is_unset() || previous == status.state {
        return None;
    }
    let cluster_id = after.spec.cluster_id.clone();
    match status.state {
        InstallationState::Installing => Some(MetricsEvent::UpgradeStarted {
            cluster_id,
            version: after.spec.desired_version().unwrap_or_default().to_string(),
        }),
        InstallationState::Installed => Some(MetricsEvent::UpgradeSucceeded { cluster_id }),
        InstallationState::Failed => Some(MetricsEvent::UpgradeFailed {
            cluster_id,
            reason: status.reason.clone(),
        }),
        _ => None,
    }
}

fn needs_registry_migration(installation: &Installation) -> bool {
    let status = installation.status.as_ref();
    installation.spec.air_gap
        && installation.spec.high_availability
        && status.is_some_and(|s| s.state.is_kubernetes_installed())
        && condition_status(status, REGISTRY_MIGRATION_CONDITION) != "True"
}

async fn run_registry_migration(
    engine: &LifecycleEngine,
    installation: &mut Installation,
) -> Option<MigrationStatus> {
    let store = engine.store.as_ref();
    let secret = match engine.metadata.metadata_for(store, installation).await {
        Ok(meta) => match registry_s3_secret_name(&meta) {
            Ok(secret) => secret,
            Err(e) => {
                warn!(error = %e, "Cannot resolve registry storage secret");
                return None;
            }
        },
        Err(e) => {
            warn!(error = %e, "Skipping registry migration without release metadata");
            return None;
        }
    };
    match migrate_registry_data(store, installation, &secret).await {
        Ok(status) => Some(status),
        Err(e) => {
            warn!(error = %e, "Registry data migration failed");
            None
        }
    }
}

/// Run one reconcile cycle over all Installation records.
pub async fn run_cycle(engine: &LifecycleEngine) -> Result<CycleOutcome> {
    let store = engine.store.as_ref();
    let all = store.list_installations().await?;

    let Some(coalesced) = select_authoritative(all.clone()) else {
        debug!("No active installations found");
        return Ok(CycleOutcome {
            states: all.iter().map(state_of).collect(),
            ..Default::default()
        });
    };
    let mut installation = coalesced.authoritative;
    if installation.spec.cluster_id.is_empty() {
        info!(name = %installation.name_any(), "No cluster ID found, skipping");
        return Ok(CycleOutcome {
            states: all.iter().map(state_of).collect(),
            ..Default::default()
        });
    }

    let name = installation.name_any();
    let before = installation.clone();
    let mut outcome = CycleOutcome {
        previous_state: state_of(&before),
        ..Default::default()
    };

    let nodes = store.list_nodes().await?;
    let node_events = reconcile_node_statuses(
        installation.status.get_or_insert_with(Default::default),
        &installation.spec.cluster_id,
        &nodes,
    )?;

    let orchestrator = UpgradeOrchestrator {
        store,
        metadata: engine.metadata.as_ref(),
        artifact_source: engine.artifact_source.as_ref(),
        fsm: &engine.fsm,
        operator_version: &engine.settings.operator_version,
        mirror_image: &engine.settings.mirror_image,
    };
    outcome.plan_action = orchestrator
        .reconcile_k0s_version(&mut installation, &all)
        .await?;

    if needs_registry_migration(&installation) {
        outcome.migration = run_registry_migration(engine, &mut installation).await;
        if outcome.migration == Some(MigrationStatus::Completed) {
            // Add-ons are declared again, now with the HA registry
            engine.fsm.apply(
                installation.status.get_or_insert_with(Default::default),
                InstallationEvent::KubernetesReady,
                REGISTRY_MIGRATED_REASON,
                &InstallationTransitionContext::default(),
            );
        }
    }

    outcome.charts =
        reconcile_helm_charts(store, &engine.metadata, &engine.fsm, &mut installation).await?;

    store
        .update_installation_status(&installation)
        .await
        .map_err(|e| {
            if e.is_conflict() {
                Error::Conflict(format!("installation {} status", name))
            } else {
                e
            }
        })?;

    for record in &coalesced.demoted {
        match store.update_installation_status(record).await {
            Ok(()) => outcome.demoted.push(record.name_any()),
            Err(e) => warn!(name = %record.name_any(), error = %e, "Failed to demote installation"),
        }
    }

    if !installation.spec.air_gap {
        report(engine, &before, &installation, node_events);
    }

    let after_state = state_of(&installation);
    outcome.states = all
        .iter()
        .map(|record| {
            if record.name_any() == name {
                after_state
            } else if outcome.demoted.contains(&record.name_any()) {
                InstallationState::Obsolete
            } else {
                state_of(record)
            }
        })
        .collect();
    outcome.authoritative = Some(installation);
    Ok(outcome)
}

fn state_of(installation: &Installation) -> InstallationState {
    installation
        .status
        .as_ref()
        .map(|s| s.state)
        .unwrap_or_default()
}

fn report(
    engine: &LifecycleEngine,
    before: &Installation,
    after: &Installation,
    node_events: NodeEventsBatch,
) {
    let base_url = &after.spec.metrics_base_url;
    if let Some(event) = upgrade_event(before, after) {
        engine.notifier.notify(base_url, event);
    }
    for event in node_events.into_events() {
        engine.notifier.notify(base_url, event);
    }
}

/// Reconcile entry point for the controller.
///
/// `trigger` only names what woke the controller up; the cycle always looks
/// at every record.
pub async fn reconcile(trigger: Arc<Installation>, ctx: Arc<Context>) -> Result<Action> {
    let start_time = Instant::now();
    let trigger_name = trigger.name_any();
    let span = info_span!("reconcile", trigger = %trigger_name);

    let outcome = run_cycle(&ctx.engine).instrument(span).await?;

    let Some(installation) = outcome.authoritative.as_ref() else {
        return Ok(Action::await_change());
    };
    let name = installation.name_any();
    let state = outcome.state().unwrap_or_default();

    if let Some(ref health_state) = ctx.health_state {
        let metrics = &health_state.metrics;
        metrics.record_reconcile(&name, start_time.elapsed().as_secs_f64());
        metrics.set_installations_by_state(&outcome.states);
        metrics.record_plan_action(outcome.plan_action);
        if outcome.charts.drift {
            metrics.record_chart_drift();
        }
        health_state.last_reconcile.store(
            jiff::Timestamp::now().as_second().max(0) as u64,
            std::sync::atomic::Ordering::Relaxed,
        );
    }

    if outcome.state_changed() {
        let reason = installation
            .status
            .as_ref()
            .map(|s| s.reason.clone())
            .filter(|r| !r.is_empty());
        info!(name = %name, from = %outcome.previous_state, to = %state, "Installation state changed");
        if state.is_failure() {
            ctx.publish_warning_event(installation, &state.to_string(), "Reconcile", reason)
                .await;
        } else {
            ctx.publish_normal_event(installation, &state.to_string(), "Reconcile", reason)
                .await;
        }
    }

    for demoted in &outcome.demoted {
        debug!(name = %demoted, "Demoted installation");
    }

    Ok(Action::requeue(ctx.engine.settings.requeue_after))
}

/// Error policy for the controller
pub fn error_policy(obj: Arc<Installation>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = obj.name_any();

    if let Some(ref health_state) = ctx.health_state {
        health_state.metrics.record_error(&name);
    }

    if error.is_not_found() {
        debug!(name = %name, "Resource not found (likely deleted)");
        return Action::await_change();
    }

    if error.is_retryable() {
        warn!(name = %name, error = %error, "Retryable error, will retry");
    } else {
        error!(name = %name, error = %error, "Non-retryable error");
    }
    Action::requeue(error.requeue_after())
}
