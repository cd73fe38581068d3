//! Selection of the authoritative Installation record.
//!
//! Several records may be live at once (e.g. when upgrades are requested
//! back to back). The newest one wins; the rest are demoted to Obsolete.
//! Nothing here talks to the API server: the caller persists demotions.

use std::cmp::Ordering;

use kube::ResourceExt;

use crate::controller::installation_state_machine::{
    InstallationEvent, InstallationStateMachine, InstallationTransitionContext,
};
use crate::crd::{Installation, InstallationState, InstallationStatus};

/// Reason recorded on demoted records.
pub const OBSOLETE_REASON: &str = "This is not the most recent installation object";

/// Outcome of coalescing the live records.
#[derive(Debug, Clone)]
pub struct Coalesced {
    /// The record the cycle reconciles.
    pub authoritative: Installation,
    /// Older records, already marked Obsolete with node data cleared.
    pub demoted: Vec<Installation>,
}

fn has_node_status(installation: &Installation) -> bool {
    installation
        .status
        .as_ref()
        .is_some_and(|s| !s.nodes_status.is_empty())
}

/// Newest first; on equal creation time, records carrying node status first.
fn newest_first(a: &Installation, b: &Installation) -> Ordering {
    let created = |i: &Installation| i.metadata.creation_timestamp.as_ref().map(|t| t.0);
    created(b)
        .cmp(&created(a))
        .then_with(|| has_node_status(b).cmp(&has_node_status(a)))
}

/// Pick the authoritative record among `records` and demote the others.
///
/// Obsolete records are ignored. If the winner carries no node statuses,
/// those of the newest older record that has some are copied in.
/// Returns `None` when no live record exists.
pub fn select_authoritative(records: Vec<Installation>) -> Option<Coalesced> {
    let mut live: Vec<Installation> = records
        .into_iter()
        .filter(|i| {
            i.status
                .as_ref()
                .is_none_or(|s| s.state != InstallationState::Obsolete)
        })
        .collect();
    live.sort_by(newest_first);

    let mut iter = live.into_iter();
    let mut authoritative = iter.next()?;
    let older: Vec<Installation> = iter.collect();

    if !has_node_status(&authoritative) {
        if let Some(donor) = older
            .iter()
            .find(|i| has_node_status(i))
            .and_then(|i| i.status.as_ref())
        {
            authoritative
                .status
                .get_or_insert_with(InstallationStatus::default)
                .nodes_status = donor.nodes_status.clone();
        }
    }

    let state_machine = InstallationStateMachine::new();
    let ctx = InstallationTransitionContext::default();
    let demoted = older
        .into_iter()
        .map(|mut installation| {
            let status = installation
                .status
                .get_or_insert_with(InstallationStatus::default);
            status.nodes_status.clear();
            state_machine.apply(status, InstallationEvent::Superseded, OBSOLETE_REASON, &ctx);
            installation
        })
        .collect();

    Some(Coalesced {
        authoritative,
        demoted,
    })
}

/// Most recent non-obsolete record, by name descending.
///
/// Record names are timestamps, so the lexical order matches creation order.
pub fn current_installation(records: &[Installation]) -> Option<&Installation> {
    let mut sorted: Vec<&Installation> = records.iter().collect();
    sorted.sort_by_key(|i| std::cmp::Reverse(i.name_any()));
    sorted.into_iter().find(|i| {
        i.status
            .as_ref()
            .is_none_or(|s| s.state != InstallationState::Obsolete)
    })
}
