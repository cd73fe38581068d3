//! Unit tests for cluster-lifecycle-operator.
//!
//! These tests run without a Kubernetes cluster and test individual
//! components in isolation.

mod crd_tests {
    use lifecycle_operator::crd::{Condition, InstallationState, chart_object_name};

    #[test]
    fn test_state_display() {
        assert_eq!(InstallationState::Unset.to_string(), "");
        assert_eq!(InstallationState::Enqueued.to_string(), "Enqueued");
        assert_eq!(InstallationState::KubernetesInstalled.to_string(), "KubernetesInstalled");
        assert_eq!(
            InstallationState::HelmChartUpdateFailure.to_string(),
            "HelmChartUpdateFailure"
        );
        assert_eq!(InstallationState::Obsolete.to_string(), "Obsolete");
    }

    #[test]
    fn test_state_default() {
        assert_eq!(InstallationState::default(), InstallationState::Unset);
    }

    #[test]
    fn test_state_serializes_as_display() {
        for state in InstallationState::ALL {
            let serialized = serde_json::to_string(&state).unwrap();
            assert_eq!(serialized, format!("\"{}\"", state));
        }
    }

    #[test]
    fn test_kubernetes_installed_states() {
        assert!(InstallationState::Installed.is_kubernetes_installed());
        assert!(InstallationState::PendingChartCreation.is_kubernetes_installed());
        assert!(!InstallationState::Installing.is_kubernetes_installed());
        assert!(!InstallationState::CopyingArtifacts.is_kubernetes_installed());
        assert!(!InstallationState::Unset.is_kubernetes_installed());
    }

    #[test]
    fn test_condition_new() {
        let condition = Condition::new("RegistryMigrationStatus", true, "MigrationJobCompleted", "", Some(4));
        assert_eq!(condition.status, "True");
        assert_eq!(condition.reason, "MigrationJobCompleted");
        assert_eq!(condition.observed_generation, Some(4));

        let condition = Condition::new("RegistryMigrationStatus", false, "MigrationJobFailed", "", None);
        assert_eq!(condition.status, "False");
    }

    #[test]
    fn test_chart_object_name() {
        assert_eq!(chart_object_name("openebs"), "k0s-addon-chart-openebs");
    }
}

mod state_machine_tests {
    use lifecycle_operator::controller::installation_state_machine::{
        InstallationEvent, InstallationStateMachine, InstallationTransitionContext,
        determine_chart_event,
    };
    use lifecycle_operator::crd::InstallationState;

    fn ctx(drift: bool, pending: usize, errors: usize) -> InstallationTransitionContext {
        InstallationTransitionContext {
            chart_drift: drift,
            pending_charts: pending,
            chart_errors: errors,
        }
    }

    #[test]
    fn test_obsolete_is_terminal() {
        let sm = InstallationStateMachine::new();
        assert!(sm.is_terminal(InstallationState::Obsolete));
        assert!(sm.valid_transitions(InstallationState::Obsolete).is_empty());
    }

    #[test]
    fn test_every_live_state_can_be_superseded() {
        let sm = InstallationStateMachine::new();
        for state in InstallationState::ALL {
            if state == InstallationState::Obsolete {
                continue;
            }
            assert!(
                sm.accepts(state, InstallationEvent::Superseded),
                "Should be able to supersede {:?}",
                state
            );
        }
    }

    #[test]
    fn test_chart_events_need_kubernetes() {
        let sm = InstallationStateMachine::new();
        assert!(!sm.accepts(InstallationState::Installing, InstallationEvent::AddonsApplied));
        assert!(!sm.accepts(InstallationState::Unset, InstallationEvent::AddonsConverged));
        assert!(sm.accepts(InstallationState::KubernetesInstalled, InstallationEvent::AddonsApplied));
        assert!(sm.accepts(InstallationState::Installed, InstallationEvent::AddonsApplied));
    }

    #[test]
    fn test_guards() {
        let sm = InstallationStateMachine::new();
        let from = InstallationState::KubernetesInstalled;
        assert!(sm.transition(from, InstallationEvent::AddonsApplied, &ctx(false, 0, 0)).is_none());
        assert!(sm.transition(from, InstallationEvent::AddonsApplied, &ctx(true, 0, 0)).is_some());
        assert!(sm.transition(from, InstallationEvent::ChartsFailed, &ctx(true, 0, 1)).is_none());
        assert!(sm.transition(from, InstallationEvent::ChartsPending, &ctx(false, 0, 0)).is_none());
    }

    #[test]
    fn test_chart_event_priority() {
        let installed = InstallationState::Installed;
        assert_eq!(
            determine_chart_event(installed, &ctx(false, 2, 1)),
            Some(InstallationEvent::ChartsFailed)
        );
        assert_eq!(
            determine_chart_event(installed, &ctx(false, 0, 0)),
            Some(InstallationEvent::AddonsConverged)
        );
        assert_eq!(
            determine_chart_event(installed, &ctx(true, 1, 1)),
            Some(InstallationEvent::ChartsPending)
        );
        assert_eq!(
            determine_chart_event(installed, &ctx(true, 0, 1)),
            Some(InstallationEvent::AddonsApplied)
        );
        assert_eq!(
            determine_chart_event(InstallationState::AddonsInstalling, &ctx(true, 0, 0)),
            None
        );
    }

    #[test]
    fn test_rejected_event_keeps_status() {
        let sm = InstallationStateMachine::new();
        let mut status = lifecycle_operator::crd::InstallationStatus {
            state: InstallationState::Obsolete,
            reason: "old".to_string(),
            ..Default::default()
        };
        let result = sm.apply(
            &mut status,
            InstallationEvent::KubernetesReady,
            "new",
            &InstallationTransitionContext::default(),
        );
        assert!(!result.is_applied());
        assert_eq!(status.state, InstallationState::Obsolete);
        assert_eq!(status.reason, "old");
    }
}

mod upgrade_tests {
    use lifecycle_operator::controller::installation_state_machine::InstallationEvent;
    use lifecycle_operator::upgrade::version::should_upgrade_k0s;
    use lifecycle_operator::upgrade::{KubeVersion, PlanState};

    #[test]
    fn test_plan_state_events() {
        assert_eq!(PlanState::parse("").event(), InstallationEvent::PlanQueued);
        assert_eq!(PlanState::parse("SchedulableWait").event(), InstallationEvent::PlanRunning);
        assert_eq!(PlanState::parse("Completed").event(), InstallationEvent::KubernetesReady);
        assert_eq!(PlanState::parse("Restricted").event(), InstallationEvent::PolicyFailed);
        assert_eq!(PlanState::parse("Bogus").event(), InstallationEvent::PolicyFailed);
    }

    #[test]
    fn test_plan_state_terminal() {
        assert!(!PlanState::Pending.is_terminal());
        assert!(!PlanState::Schedulable.is_terminal());
        assert!(PlanState::Completed.is_terminal());
        assert!(PlanState::ApplyFailed.is_terminal());
        assert_eq!(PlanState::parse("Bogus").as_str(), "Bogus");
    }

    #[test]
    fn test_downgrade_detection() {
        let running = KubeVersion::parse("v1.29.1+k0s").unwrap();
        let desired = KubeVersion::from_k0s_version("v1.28.5+k0s.0").unwrap();
        assert!(running > desired);
        assert!(!should_upgrade_k0s(&running, &desired, "v1.28.5+k0s.0", ""));
    }

    #[test]
    fn test_build_change_needs_upgrade() {
        let running = KubeVersion::parse("v1.29.1+k0s").unwrap();
        let desired = KubeVersion::from_k0s_version("v1.29.1+k0s.1").unwrap();
        assert!(should_upgrade_k0s(&running, &desired, "v1.29.1+k0s.1", "v1.29.1+k0s.0"));
        assert!(!should_upgrade_k0s(&running, &desired, "v1.29.1+k0s.1", "v1.29.1+k0s.1"));
        assert!(!should_upgrade_k0s(&running, &desired, "v1.29.1+k0s.1", ""));
    }
}

mod release_tests {
    use lifecycle_operator::release::{local_metadata_config_map, metadata_url, trim_version};

    #[test]
    fn test_metadata_url() {
        assert_eq!(
            metadata_url("https://replicated.app/", "v1.30.0+k8s-1.29"),
            "https://replicated.app/embedded-cluster-public-files/metadata/v1.30.0+k8s-1.29.json"
        );
    }

    #[test]
    fn test_local_metadata_config_map_name() {
        let name = local_metadata_config_map("v1.30.0+k8s-1.29");
        assert!(!name.contains('+'));
        assert!(name.contains("1.30.0-k8s-1.29"));
        assert_eq!(name, local_metadata_config_map("1.30.0+k8s-1.29"));
    }

    #[test]
    fn test_trim_version() {
        assert_eq!(trim_version("v1.2.3"), "1.2.3");
        assert_eq!(trim_version("1.2.3"), "1.2.3");
    }
}

mod artifact_tests {
    use std::collections::BTreeMap;

    use lifecycle_operator::artifacts::distributor::aggregate;
    use lifecycle_operator::artifacts::{Distribution, NodeOutcome};

    #[test]
    fn test_all_succeeded_is_ready() {
        let outcomes = BTreeMap::from([
            ("node1".to_string(), NodeOutcome::Succeeded),
            ("node2".to_string(), NodeOutcome::Succeeded),
        ]);
        assert!(aggregate(&outcomes).is_ready());
    }

    #[test]
    fn test_any_failure_fails() {
        let outcomes = BTreeMap::from([
            ("node2".to_string(), NodeOutcome::Running),
            ("node1".to_string(), NodeOutcome::Failed("oops".to_string())),
        ]);
        assert_eq!(
            aggregate(&outcomes),
            Distribution::Failed {
                reason: "Copying artifacts to nodes: node1(JobFailed: oops), node2(JobRunning)"
                    .to_string()
            }
        );
    }

    #[test]
    fn test_in_progress_lists_every_node() {
        let outcomes = BTreeMap::from([
            ("node1".to_string(), NodeOutcome::Succeeded),
            ("node2".to_string(), NodeOutcome::WaitingDeletion),
        ]);
        assert_eq!(
            aggregate(&outcomes),
            Distribution::InProgress {
                reason: "Copying artifacts to nodes: node1(JobSucceeded), node2(WaitingPreviousJobDeletion)"
                    .to_string()
            }
        );
    }
}

mod chart_tests {
    use lifecycle_operator::charts::detect_chart_drift;
    use lifecycle_operator::charts::values::merge_protected;
    use lifecycle_operator::crd::{Chart, ChartSpec, ChartStatus, HelmChart, HelmExtensions};

    fn live(release: &str, version: &str, error: &str) -> Chart {
        let mut chart = Chart::new(
            &format!("k0s-addon-chart-{}", release),
            ChartSpec {
                release_name: release.to_string(),
                version: version.to_string(),
                ..Default::default()
            },
        );
        chart.status = Some(ChartStatus {
            error: error.to_string(),
            ..Default::default()
        });
        chart
    }

    fn desired(charts: &[(&str, &str)]) -> HelmExtensions {
        HelmExtensions {
            charts: charts
                .iter()
                .map(|(name, version)| HelmChart {
                    name: name.to_string(),
                    version: version.to_string(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_matching_charts_do_not_drift() {
        let result = detect_chart_drift(
            &desired(&[("test", "1.0.0"), ("test2", "2.0.0")]),
            &[live("test", "1.0.0", ""), live("test2", "2.0.0", "")],
        );
        assert!(!result.drift);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn test_errors_are_collected_with_drift() {
        let result = detect_chart_drift(
            &desired(&[("test", "1.0.1")]),
            &[live("test", "1.0.0", "exploded")],
        );
        assert!(result.drift);
        assert_eq!(result.errors, vec!["exploded".to_string()]);
    }

    #[test]
    fn test_missing_live_chart_drifts() {
        let result = detect_chart_drift(&desired(&[("test", "1.0.0")]), &[]);
        assert!(result.drift);
    }

    #[test]
    fn test_protected_paths_keep_old_values() {
        let merged = merge_protected(
            "admin:\n  password: foo\nreplicas: 1\n",
            "admin:\n  password: bar\n  user: x\nreplicas: 3\n",
            &["admin.password".to_string(), "missing.path".to_string()],
        )
        .unwrap();
        let doc: serde_json::Value = serde_yaml::from_str(&merged).unwrap();
        assert_eq!(
            doc,
            serde_json::json!({"admin": {"password": "foo", "user": "x"}, "replicas": 3})
        );
    }
}

mod error_tests {
    use lifecycle_operator::controller::error::Error;

    #[test]
    fn test_error_is_retryable() {
        let kube_err = Error::Kube(kube::Error::Api(
            kube::core::Status::failure("timeout", "Timeout")
                .with_code(504)
                .boxed(),
        ));
        assert!(kube_err.is_retryable());

        let validation_err = Error::Validation("invalid spec".to_string());
        assert!(!validation_err.is_retryable());

        let transient_err = Error::Transient("temporary failure".to_string());
        assert!(transient_err.is_retryable());

        assert!(Error::Conflict("installation status".to_string()).is_retryable());
        assert!(!Error::Permanent("job failed".to_string()).is_retryable());
    }

    #[test]
    fn test_conflicts_requeue_sooner() {
        let conflict = Error::Conflict("installation status".to_string());
        let transient = Error::Transient("temporary failure".to_string());
        assert!(conflict.requeue_after() < transient.requeue_after());
    }
}

mod config_tests {
    use lifecycle_operator::config::{DEFAULT_LEASE_NAME, OperatorConfig};

    #[test]
    fn test_defaults() {
        let config = OperatorConfig::default();
        assert_eq!(config.requeue_after().as_secs(), 3600);
        assert_eq!(config.metadata_timeout().as_secs(), 30);
        assert_eq!(config.lease_name, DEFAULT_LEASE_NAME);
    }

    #[test]
    fn test_holder_id_prefers_pod_name() {
        let config = OperatorConfig {
            pod_name: Some("operator-0".to_string()),
            ..Default::default()
        };
        assert_eq!(config.holder_id(), "operator-0");
        assert!(!OperatorConfig::default().holder_id().is_empty());
    }
}

mod status_tests {
    use lifecycle_operator::controller::status::{is_condition_true, set_condition};
    use lifecycle_operator::crd::{Condition, InstallationStatus};

    #[test]
    fn test_set_condition_replaces_existing() {
        let mut status = InstallationStatus::default();
        set_condition(&mut status, Condition::new("RegistryMigrationStatus", false, "MigrationJobInProgress", "", None));
        set_condition(&mut status, Condition::new("RegistryMigrationStatus", true, "MigrationJobCompleted", "", None));

        assert_eq!(status.conditions.len(), 1);
        assert!(is_condition_true(&status.conditions, "RegistryMigrationStatus"));
    }

    #[test]
    fn test_is_condition_true_missing() {
        let conditions: Vec<Condition> = vec![];
        assert!(!is_condition_true(&conditions, "RegistryMigrationStatus"));
    }
}
