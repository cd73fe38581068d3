//! Chart stage of the reconcile cycle.
//!
//! Computes the desired add-on set, compares it with what is declared and
//! live, and either records the outcome on the installation or writes the
//! desired set back into the cluster declaration.

use tracing::{debug, info, warn};

use super::drift::{detect_chart_drift, detect_pending_charts};
use super::merge::desired_addons;
use crate::controller::error::{Error, Result};
use crate::controller::installation_state_machine::{
    InstallationEvent, InstallationStateMachine, InstallationTransitionContext,
    determine_chart_event,
};
use crate::controller::status::{MAX_REASON_LEN, truncate_reason};
use crate::crd::{Installation, InstallationState};
use crate::release::MetadataCache;
use crate::store::ClusterStore;

pub const CHART_FAILURE_PREFIX: &str = "failed to update helm charts: ";

/// What the chart stage observed and did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChartStageOutcome {
    /// Desired and applied add-on sets differ.
    pub drift: bool,
    /// The desired set was written to the cluster declaration.
    pub applied: bool,
    pub pending: Vec<String>,
    pub errors: Vec<String>,
}

/// Failure reason for the collected chart errors.
pub fn chart_failure_reason(errors: &[String]) -> String {
    truncate_reason(
        format!("{}{}", CHART_FAILURE_PREFIX, errors.join(",")),
        MAX_REASON_LEN,
    )
}

fn pending_reason(pending: &[String]) -> String {
    format!("Pending charts: [{}]", pending.join(", "))
}

fn has_user_charts(installation: &Installation) -> bool {
    installation
        .spec
        .config
        .as_ref()
        .and_then(|c| c.extensions.helm.as_ref())
        .is_some_and(|h| !h.charts.is_empty())
}

/// Run the chart stage for the authoritative installation.
///
/// State changes are made on `installation.status`; persisting them is the
/// caller's job.
pub async fn reconcile_helm_charts(
    store: &dyn ClusterStore,
    metadata: &MetadataCache,
    fsm: &InstallationStateMachine,
    installation: &mut Installation,
) -> Result<ChartStageOutcome> {
    let mut outcome = ChartStageOutcome::default();
    let no_charts = InstallationTransitionContext::default();
    let state = installation
        .status
        .as_ref()
        .map(|s| s.state)
        .unwrap_or_default();

    if installation.spec.desired_version().is_none() {
        if state == InstallationState::KubernetesInstalled {
            let status = installation.status.get_or_insert_with(Default::default);
            fsm.apply(status, InstallationEvent::AddonsConverged, "Installed", &no_charts);
        }
        return Ok(outcome);
    }

    if matches!(state, InstallationState::Failed | InstallationState::Installed)
        || !state.is_kubernetes_installed()
    {
        debug!(state = %state, "Chart stage skipped");
        return Ok(outcome);
    }

    let meta = match metadata.metadata_for(store, installation).await {
        Ok(meta) => meta,
        Err(e) => {
            warn!(error = %e, "Failed to resolve release metadata for charts");
            let status = installation.status.get_or_insert_with(Default::default);
            fsm.apply(status, InstallationEvent::ChartsFailed, e.to_string(), &no_charts);
            return Ok(outcome);
        }
    };

    if !meta.has_charts() && !has_user_charts(installation) {
        if state == InstallationState::KubernetesInstalled {
            let status = installation.status.get_or_insert_with(Default::default);
            fsm.apply(status, InstallationEvent::AddonsConverged, "Installed", &no_charts);
        }
        return Ok(outcome);
    }

    let cluster_config = store.get_cluster_config().await?.ok_or_else(|| {
        Error::MissingField("cluster configuration kube-system/k0s not found".to_string())
    })?;
    let current = cluster_config.helm_extensions();
    let desired = desired_addons(&meta, installation, &current, cluster_config.service_cidr())?;

    let live = store.list_charts().await?;
    let drift = detect_chart_drift(&desired, &live);
    outcome.drift = drift.drift || desired != current;
    outcome.errors = drift.errors;
    outcome.pending = detect_pending_charts(&current, &live);

    let ctx = InstallationTransitionContext {
        chart_drift: outcome.drift,
        pending_charts: outcome.pending.len(),
        chart_errors: outcome.errors.len(),
    };
    debug!(
        drift = ctx.chart_drift,
        pending = ctx.pending_charts,
        errors = ctx.chart_errors,
        "Chart state observed"
    );

    let Some(event) = determine_chart_event(state, &ctx) else {
        return Ok(outcome);
    };

    let reason = match event {
        InstallationEvent::ChartsFailed => chart_failure_reason(&outcome.errors),
        InstallationEvent::AddonsConverged => "Addons upgraded".to_string(),
        InstallationEvent::ChartsPending => pending_reason(&outcome.pending),
        InstallationEvent::AddonsApplied => {
            if !outcome.errors.is_empty() {
                info!(errors = ?outcome.errors, "Retrying charts with errors");
            }
            store.apply_helm_extensions(&desired).await?;
            outcome.applied = true;
            info!(charts = desired.charts.len(), "Applied desired add-on set");
            "Installing addons".to_string()
        }
        _ => return Ok(outcome),
    };

    let status = installation.status.get_or_insert_with(Default::default);
    fsm.apply(status, event, reason, &ctx);
    Ok(outcome)
}
