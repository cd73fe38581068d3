//! Cluster version upgrades through the upgrade plan.

use kube::ResourceExt;

use lifecycle_operator::controller::context::EngineSettings;
use lifecycle_operator::crd::InstallationState;
use lifecycle_operator::reporting::MetricsEvent;
use lifecycle_operator::upgrade::plan::{INSTALLATION_NAME_ANNOTATION, new_plan};
use lifecycle_operator::upgrade::{PLAN_NAME, PlanAction};

use crate::common::*;

const OLD: &str = "20240101000000";
const NEW: &str = "20240102000000";
const OLD_VERSION: &str = "1.29.0+k8s-1.29";
const NEW_VERSION: &str = "1.30.0+k8s-1.30";

fn harness_with(new_k0s: &str) -> Harness {
    let h = Harness::new()
        .with_release(OLD_VERSION, release("v1.29.1+k0s.0", vec![chart("admin-console", "1.108.0")]))
        .with_release(NEW_VERSION, release(new_k0s, vec![chart("admin-console", "1.109.0")]));
    h.add(
        InstallationBuilder::new(OLD)
            .version(OLD_VERSION)
            .created_at(0)
            .state(InstallationState::Installed)
            .build(),
    );
    h.store.add_node(node("node1", true, "v1.29.1+k0s"));
    h.store.add_node(node("node2", false, "v1.29.1+k0s"));
    h
}

fn harness() -> Harness {
    harness_with("v1.30.0+k0s.0")
}

fn new_record() -> lifecycle_operator::crd::Installation {
    InstallationBuilder::new(NEW)
        .version(NEW_VERSION)
        .created_at(86_400)
        .build()
}

#[tokio::test]
async fn test_upgrade_runs_plan_to_completion() {
    let h = harness();
    h.add(new_record());

    let outcome = h.cycle().await;
    assert_eq!(outcome.plan_action, PlanAction::Created);
    assert_eq!(outcome.demoted, vec![OLD.to_string()]);
    assert_eq!(h.state(NEW), InstallationState::Enqueued);
    assert_eq!(h.state(OLD), InstallationState::Obsolete);

    let plan = h.store.plan(PLAN_NAME).unwrap();
    assert_eq!(plan.annotations()[INSTALLATION_NAME_ANNOTATION], NEW);
    assert_eq!(plan.spec.commands.len(), 1);
    let update = plan.spec.commands[0].k0s_update.as_ref().unwrap();
    assert_eq!(update.version, "v1.30.0+k0s.0");
    assert_eq!(
        update.platforms["linux-amd64"].url,
        "https://replicated.app/embedded-cluster-public-files/k0s-binaries/v1.30.0+k0s.0"
    );
    let controllers = update.targets.controllers.discovery.static_nodes.as_ref().unwrap();
    let workers = update.targets.workers.discovery.static_nodes.as_ref().unwrap();
    assert_eq!(controllers.nodes, vec!["node1"]);
    assert_eq!(workers.nodes, vec!["node2"]);

    // Chart stage waits for the cluster version
    assert!(h.store.state().helm_applies.is_empty());

    h.notifier.clear();
    h.store.set_plan_state(PLAN_NAME, "Schedulable");
    h.cycle().await;
    assert_eq!(h.state(NEW), InstallationState::Installing);
    assert_eq!(h.reason(NEW), "Schedulable");
    let started = h
        .notifier
        .events()
        .into_iter()
        .find(|(_, e)| e.kind() == "UpgradeStarted")
        .map(|(_, e)| e);
    assert_eq!(
        started,
        Some(MetricsEvent::UpgradeStarted {
            cluster_id: CLUSTER_ID.to_string(),
            version: NEW_VERSION.to_string(),
        })
    );

    h.store.set_plan_state(PLAN_NAME, "Completed");
    h.store.set_server_version("v1.30.0+k0s");
    h.cycle().await;
    assert_eq!(h.state(NEW), InstallationState::AddonsInstalling);
    assert_eq!(h.store.declared_helm().charts[0].version, "1.109.0");

    h.cycle().await;
    assert_eq!(h.state(NEW), InstallationState::PendingChartCreation);

    h.notifier.clear();
    h.store.materialize_declared_charts();
    h.cycle().await;
    assert_eq!(h.state(NEW), InstallationState::Installed);
    assert!(h.notifier.kinds().contains(&"UpgradeSucceeded"));

    // The finished plan belongs to this record and is left in place
    assert!(h.store.plan(PLAN_NAME).is_some());
    assert!(h.store.state().deleted_plans.is_empty());
}

#[tokio::test]
async fn test_failed_plan_fails_installation() {
    let h = harness();
    h.add(new_record());

    h.cycle().await;
    h.store.set_plan_state(PLAN_NAME, "ApplyFailed");
    h.notifier.clear();
    h.cycle().await;

    assert_eq!(h.state(NEW), InstallationState::Failed);
    assert_eq!(h.reason(NEW), "ApplyFailed");
    assert!(h.notifier.kinds().contains(&"UpgradeFailed"));
}

#[tokio::test]
async fn test_downgrade_is_refused() {
    let h = harness_with("v1.28.5+k0s.0");
    h.add(new_record());

    h.cycle().await;
    assert_eq!(h.state(NEW), InstallationState::Failed);
    assert_eq!(h.reason(NEW), "Downgrades not supported");
    assert!(h.store.plan(PLAN_NAME).is_none());

    // Terminal: later cycles never create a plan either
    h.cycle().await;
    assert_eq!(h.state(NEW), InstallationState::Failed);
    assert!(h.store.state().created_plans.is_empty());
}

#[tokio::test]
async fn test_invalid_desired_version_fails() {
    let h = harness_with("v1.30.0");
    h.add(new_record());

    h.cycle().await;
    assert_eq!(h.state(NEW), InstallationState::Failed);
    assert_eq!(h.reason(NEW), "Invalid desired version v1.30.0");
}

#[tokio::test]
async fn test_same_kubernetes_version_new_build_upgrades() {
    let h = harness_with("v1.29.1+k0s.1");
    h.add(new_record());

    let outcome = h.cycle().await;
    assert_eq!(outcome.plan_action, PlanAction::Created);
    assert_eq!(h.state(NEW), InstallationState::Enqueued);
}

#[tokio::test]
async fn test_same_build_needs_no_plan() {
    let h = harness_with("v1.29.1+k0s.0");
    h.add(new_record());

    let outcome = h.cycle().await;
    assert_eq!(outcome.plan_action, PlanAction::None);
    assert!(h.store.plan(PLAN_NAME).is_none());
    // Straight to the chart stage
    assert_eq!(h.state(NEW), InstallationState::AddonsInstalling);
}

#[tokio::test]
async fn test_operator_at_desired_version_skips_upgrade() {
    let h = Harness::with_settings(EngineSettings {
        operator_version: format!("v{}", NEW_VERSION),
        ..Default::default()
    });
    h.metadata.put(NEW_VERSION, release("v1.30.0+k0s.0", vec![]));
    h.add(
        InstallationBuilder::new(OLD)
            .version(OLD_VERSION)
            .created_at(0)
            .state(InstallationState::Installed)
            .build(),
    );
    h.add(new_record());

    let outcome = h.cycle().await;
    assert_eq!(outcome.plan_action, PlanAction::None);
    assert_eq!(h.state(NEW), InstallationState::Installed);
}

#[tokio::test]
async fn test_foreign_plan_is_waited_for_then_deleted() {
    let h = harness();
    h.add(new_record());

    let mut foreign = new_plan("20231201000000", vec![]);
    foreign.status = Some(lifecycle_operator::crd::PlanStatus {
        state: "Schedulable".to_string(),
    });
    let foreign_id = foreign.spec.id.clone();
    h.store.insert_plan(foreign);

    let outcome = h.cycle().await;
    assert_eq!(outcome.plan_action, PlanAction::None);
    assert_eq!(h.state(NEW), InstallationState::Waiting);
    assert_eq!(
        h.reason(NEW),
        format!("Another upgrade is in progress ({})", foreign_id)
    );

    h.store.set_plan_state(PLAN_NAME, "Completed");
    let outcome = h.cycle().await;
    assert_eq!(outcome.plan_action, PlanAction::Deleted);
    assert_eq!(h.store.state().deleted_plans, vec![PLAN_NAME.to_string()]);
    assert_eq!(h.state(NEW), InstallationState::Waiting);

    let outcome = h.cycle().await;
    assert_eq!(outcome.plan_action, PlanAction::Created);
    assert_eq!(h.state(NEW), InstallationState::Enqueued);
    let plan = h.store.plan(PLAN_NAME).unwrap();
    assert_eq!(plan.annotations()[INSTALLATION_NAME_ANNOTATION], NEW);
}

#[tokio::test]
async fn test_plan_attributed_by_id() {
    let h = harness();
    h.add(new_record());

    let mut legacy = new_plan("unused", vec![]);
    legacy.metadata.annotations = None;
    legacy.spec.id = NEW.to_string();
    legacy.status = Some(lifecycle_operator::crd::PlanStatus {
        state: "SchedulableWait".to_string(),
    });
    h.store.insert_plan(legacy);

    h.cycle().await;
    assert_eq!(h.state(NEW), InstallationState::Installing);
    assert_eq!(h.reason(NEW), "SchedulableWait");
}

#[tokio::test]
async fn test_metadata_pull_failure_is_retried() {
    let h = Harness::new();
    h.add(
        InstallationBuilder::new(OLD)
            .version(OLD_VERSION)
            .created_at(0)
            .state(InstallationState::Installed)
            .build(),
    );
    // Airgapped: the metadata must first be pulled from the registry
    h.add(
        InstallationBuilder::new(NEW)
            .version(NEW_VERSION)
            .created_at(86_400)
            .air_gap()
            .build(),
    );

    let result = h.try_cycle().await;
    assert!(result.is_err());
    assert!(result.unwrap_err().is_retryable());
    assert_eq!(h.state(NEW), InstallationState::Unset);
}
