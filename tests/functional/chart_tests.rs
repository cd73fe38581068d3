//! Add-on convergence: drift, pending charts, chart errors and protected values.

use std::collections::BTreeMap;

use lifecycle_operator::charts::reconciler::CHART_FAILURE_PREFIX;
use lifecycle_operator::controller::status::MAX_REASON_LEN;
use lifecycle_operator::crd::{BuiltInExtension, HelmExtensions, InstallationState};
use lifecycle_operator::release::ReleaseMetadata;

use crate::common::*;

const NAME: &str = "20240101000000";
const VERSION: &str = "1.30.0+k8s-1.29";

fn two_charts() -> ReleaseMetadata {
    release(
        "v1.29.1+k0s.0",
        vec![chart("test", "1.0.0"), chart("test2", "2.0.0")],
    )
}

fn values_of(h: &Harness, chart: &str) -> serde_json::Value {
    let declared = h.store.declared_helm();
    let values = &declared.chart(chart).unwrap().values;
    serde_yaml::from_str(values).unwrap()
}

/// Run the first apply so the declaration matches the desired set.
async fn applied(h: &Harness) {
    h.cycle().await;
    assert_eq!(h.state(NAME), InstallationState::AddonsInstalling);
}

#[tokio::test]
async fn test_matching_live_charts_converge_without_errors() {
    let h = Harness::new().with_release(VERSION, two_charts());
    h.add(InstallationBuilder::new(NAME).version(VERSION).build());
    applied(&h).await;

    h.store.add_live_chart("test", "1.0.0", "");
    h.store.add_live_chart("test2", "2.0.0", "");
    let outcome = h.cycle().await;

    assert!(!outcome.charts.drift);
    assert!(outcome.charts.errors.is_empty());
    assert!(outcome.charts.pending.is_empty());
    assert_eq!(h.state(NAME), InstallationState::Installed);
}

#[tokio::test]
async fn test_chart_error_without_drift_is_terminal() {
    let h = Harness::new().with_release(VERSION, two_charts());
    h.add(InstallationBuilder::new(NAME).version(VERSION).build());
    applied(&h).await;

    h.store.add_live_chart("test", "1.0.0", "");
    h.store.add_live_chart("test2", "2.0.0", &"x".repeat(2000));
    let outcome = h.cycle().await;

    assert!(!outcome.charts.drift);
    assert_eq!(outcome.charts.errors.len(), 1);
    assert_eq!(h.state(NAME), InstallationState::HelmChartUpdateFailure);
    let reason = h.reason(NAME);
    assert!(reason.starts_with(CHART_FAILURE_PREFIX));
    assert_eq!(reason.len(), MAX_REASON_LEN);

    // No re-apply for a terminal chart error
    assert_eq!(h.store.state().helm_applies.len(), 1);
}

#[tokio::test]
async fn test_drift_overrides_chart_errors() {
    let h = Harness::new().with_release(VERSION, two_charts());
    h.add(InstallationBuilder::new(NAME).version(VERSION).build());
    applied(&h).await;

    h.store.add_live_chart("test", "1.0.0", "");
    h.store.add_live_chart("test2", "2.0.0", "release failed");
    h.cycle().await;
    assert_eq!(h.state(NAME), InstallationState::HelmChartUpdateFailure);

    // A new release bumps the failing chart
    h.metadata.put(
        VERSION,
        release(
            "v1.29.1+k0s.0",
            vec![chart("test", "1.0.0"), chart("test2", "2.0.1")],
        ),
    );
    let outcome = h.cycle().await;
    assert!(outcome.charts.drift);
    assert!(outcome.charts.applied);
    assert_eq!(h.state(NAME), InstallationState::AddonsInstalling);
    assert_eq!(h.store.declared_helm().chart("test2").unwrap().version, "2.0.1");
}

#[tokio::test]
async fn test_no_reapply_while_apply_in_flight() {
    let h = Harness::new().with_release(VERSION, two_charts());
    h.add(InstallationBuilder::new(NAME).version(VERSION).build());
    applied(&h).await;

    // The agent still reports the previous version of one chart
    h.store.add_live_chart("test", "0.9.0", "");
    h.store.add_live_chart("test2", "2.0.0", "");
    let outcome = h.cycle().await;

    assert!(outcome.charts.drift);
    assert!(!outcome.charts.applied);
    assert_eq!(h.state(NAME), InstallationState::AddonsInstalling);
    assert_eq!(h.store.state().helm_applies.len(), 1);
}

#[tokio::test]
async fn test_unknown_live_chart_is_drift() {
    let h = Harness::new().with_release(VERSION, two_charts());
    h.add(InstallationBuilder::new(NAME).version(VERSION).build());
    applied(&h).await;

    h.store.add_live_chart("test", "1.0.0", "");
    h.store.add_live_chart("test2", "2.0.0", "");
    h.store.add_live_chart("leftover", "0.1.0", "");
    let outcome = h.cycle().await;

    assert!(outcome.charts.drift);
    assert_ne!(h.state(NAME), InstallationState::Installed);
}

#[tokio::test]
async fn test_protected_values_survive_upgrade() {
    let mut meta = release("v1.29.1+k0s.0", vec![chart("openebs", "4.0.0")]);
    meta.configs.as_mut().unwrap().charts[0].values = "overridden: newval\n".to_string();
    meta.protected = BTreeMap::from([(
        "openebs".to_string(),
        vec!["password".to_string(), "overridden".to_string()],
    )]);

    let h = Harness::new().with_release(VERSION, meta);
    let mut previous = chart("openebs", "3.9.0");
    previous.values = "password: foo\noverridden: abcxyz\n".to_string();
    h.store.set_declared_helm(HelmExtensions {
        concurrency_level: 1,
        charts: vec![previous],
        ..Default::default()
    });
    h.store.add_live_chart("openebs", "3.9.0", "");
    h.add(
        InstallationBuilder::new(NAME)
            .version(VERSION)
            .state(InstallationState::KubernetesInstalled)
            .build(),
    );

    h.cycle().await;
    assert_eq!(h.state(NAME), InstallationState::AddonsInstalling);
    assert_eq!(
        values_of(&h, "openebs"),
        serde_json::json!({"password": "foo", "overridden": "abcxyz"})
    );
    assert_eq!(h.store.declared_helm().chart("openebs").unwrap().version, "4.0.0");
}

#[tokio::test]
async fn test_user_override_beats_protected_value() {
    let mut meta = release("v1.29.1+k0s.0", vec![chart("openebs", "4.0.0")]);
    meta.protected = BTreeMap::from([("openebs".to_string(), vec!["overridden".to_string()])]);

    let h = Harness::new().with_release(VERSION, meta);
    let mut previous = chart("openebs", "3.9.0");
    previous.values = "overridden: abcxyz\n".to_string();
    h.store.set_declared_helm(HelmExtensions {
        charts: vec![previous],
        ..Default::default()
    });

    let mut installation = InstallationBuilder::new(NAME)
        .version(VERSION)
        .state(InstallationState::KubernetesInstalled)
        .build();
    installation
        .spec
        .config
        .as_mut()
        .unwrap()
        .unsupported_overrides
        .built_in_extensions = vec![BuiltInExtension {
        name: "openebs".to_string(),
        values: "overridden: fromuser\n".to_string(),
    }];
    h.store.add_live_chart("openebs", "3.9.0", "");
    h.add(installation);

    h.cycle().await;
    assert_eq!(
        values_of(&h, "openebs"),
        serde_json::json!({"overridden": "fromuser"})
    );
}

#[tokio::test]
async fn test_user_charts_are_declared_after_release_charts() {
    let h = Harness::new().with_release(VERSION, two_charts());
    h.add(
        InstallationBuilder::new(NAME)
            .version(VERSION)
            .user_charts(vec![chart("myapp", "0.1.0")])
            .build(),
    );

    h.cycle().await;
    let declared = h.store.declared_helm();
    let orders: Vec<(&str, i32)> = declared
        .charts
        .iter()
        .map(|c| (c.name.as_str(), c.order))
        .collect();
    assert_eq!(orders, vec![("test", 100), ("test2", 100), ("myapp", 110)]);

    h.cycle().await;
    assert_eq!(
        h.reason(NAME),
        "Pending charts: [test, test2, myapp]"
    );
}

#[tokio::test]
async fn test_infra_chart_values_carry_cluster_identity() {
    let h = Harness::new().with_release(
        VERSION,
        release("v1.29.1+k0s.0", vec![chart("embedded-cluster-operator", "1.30.0")]),
    );
    h.add(InstallationBuilder::new(NAME).version(VERSION).build());

    h.cycle().await;
    let values = values_of(&h, "embedded-cluster-operator");
    assert_eq!(values["embeddedClusterID"], CLUSTER_ID);

    // Re-deriving the same values is not drift
    h.store.materialize_declared_charts();
    h.cycle().await;
    assert_eq!(h.state(NAME), InstallationState::Installed);
    assert_eq!(h.store.state().helm_applies.len(), 1);
}
