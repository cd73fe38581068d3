//! Chart merge engine.
//!
//! Builds the desired add-on set of an installation from the release
//! defaults, the conditional built-in add-ons, the vendor's own charts and
//! the value documents already applied to the cluster.

use tracing::debug;

use super::{infra, values};
use crate::controller::error::Result;
use crate::controller::status::{REGISTRY_MIGRATION_CONDITION, condition_status};
use crate::crd::{HelmChart, HelmExtensions, Installation, Repository};
use crate::release::ReleaseMetadata;

/// Base installation order of every chart; infra charts sort before user charts.
pub const BASE_CHART_ORDER: i32 = 100;

/// Order given to user charts that do not declare one.
pub const DEFAULT_USER_CHART_ORDER: i32 = BASE_CHART_ORDER + 10;

pub const VELERO_CONFIG: &str = "velero";
pub const REGISTRY_CONFIG: &str = "registry";
pub const REGISTRY_HA_CONFIG: &str = "registry-ha";
pub const SEAWEEDFS_CONFIG: &str = "seaweedfs";

/// Feature flags that select the built-in add-ons.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeFlags {
    pub air_gap: bool,
    pub high_availability: bool,
    pub disaster_recovery: bool,
    /// Registry data has been migrated to the HA object store.
    pub migration_completed: bool,
}

impl MergeFlags {
    pub fn for_installation(installation: &Installation) -> Self {
        Self {
            air_gap: installation.spec.air_gap,
            high_availability: installation.spec.high_availability,
            disaster_recovery: installation.spec.disaster_recovery_supported(),
            migration_completed: condition_status(
                installation.status.as_ref(),
                REGISTRY_MIGRATION_CONDITION,
            ) == "True",
        }
    }

    /// Names of the built-in configs to include, in installation order.
    pub fn builtin_configs(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.disaster_recovery {
            names.push(VELERO_CONFIG);
        }
        if self.air_gap {
            if !self.high_availability {
                names.push(REGISTRY_CONFIG);
            } else if self.migration_completed {
                names.push(SEAWEEDFS_CONFIG);
                names.push(REGISTRY_HA_CONFIG);
            } else {
                // Storage first; the HA registry waits for the data migration
                names.push(SEAWEEDFS_CONFIG);
            }
        }
        names
    }
}

fn add_repositories(target: &mut Vec<Repository>, repositories: &[Repository]) {
    for repo in repositories {
        if !target.iter().any(|r| r.name == repo.name) {
            target.push(repo.clone());
        }
    }
}

fn with_base_order(mut chart: HelmChart) -> HelmChart {
    chart.order += BASE_CHART_ORDER;
    chart
}

/// Combine the user chart into an existing chart of the same name.
fn combine_chart(existing: &mut HelmChart, user: &HelmChart) -> Result<()> {
    if !user.version.is_empty() {
        existing.version = user.version.clone();
    }
    if !user.chart_name.is_empty() {
        existing.chart_name = user.chart_name.clone();
    }
    if !user.target_ns.is_empty() {
        existing.target_ns = user.target_ns.clone();
    }
    if !user.values.trim().is_empty() {
        existing.values = values::merge_documents(&existing.values, &user.values)?;
    }
    Ok(())
}

/// Release defaults, selected built-ins and user charts, with final orders.
///
/// The concurrency cap is the release's (1 when unset), lowered to the
/// user's cap when that is positive and smaller.
pub fn merge_helm_configs(
    meta: &ReleaseMetadata,
    installation: &Installation,
    flags: MergeFlags,
) -> Result<HelmExtensions> {
    let release = meta.configs.clone().unwrap_or_default();
    let mut combined = HelmExtensions {
        concurrency_level: if release.concurrency_level > 0 {
            release.concurrency_level
        } else {
            1
        },
        repositories: Vec::new(),
        charts: release.charts.into_iter().map(with_base_order).collect(),
    };
    add_repositories(&mut combined.repositories, &release.repositories);

    for name in flags.builtin_configs() {
        let Some(builtin) = meta.builtin_configs.get(name) else {
            debug!(config = name, "Release carries no built-in config");
            continue;
        };
        add_repositories(&mut combined.repositories, &builtin.repositories);
        combined
            .charts
            .extend(builtin.charts.iter().cloned().map(with_base_order));
    }

    let user = installation
        .spec
        .config
        .as_ref()
        .and_then(|c| c.extensions.helm.as_ref());
    if let Some(user) = user {
        add_repositories(&mut combined.repositories, &user.repositories);
        for chart in &user.charts {
            match combined.charts.iter_mut().find(|c| c.name == chart.name) {
                Some(existing) => combine_chart(existing, chart)?,
                None => {
                    let mut chart = chart.clone();
                    chart.order = if chart.order == 0 {
                        DEFAULT_USER_CHART_ORDER
                    } else {
                        BASE_CHART_ORDER + chart.order
                    };
                    combined.charts.push(chart);
                }
            }
        }
        if user.concurrency_level > 0 {
            combined.concurrency_level = combined.concurrency_level.min(user.concurrency_level);
        }
    }

    Ok(combined)
}

/// Carry protected values of the currently declared charts into the new set.
pub fn generate_desired_charts(
    meta: &ReleaseMetadata,
    current: &HelmExtensions,
    combined: HelmExtensions,
) -> Result<HelmExtensions> {
    let HelmExtensions {
        concurrency_level,
        repositories,
        charts,
    } = combined;

    let charts = charts
        .into_iter()
        .map(|mut chart| {
            let protected = meta
                .protected
                .get(&chart.name)
                .filter(|paths| !paths.is_empty());
            if let (Some(paths), Some(existing)) = (protected, current.chart(&chart.name)) {
                chart.values = values::merge_protected(&existing.values, &chart.values, paths)?;
            }
            Ok(chart)
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(HelmExtensions {
        concurrency_level,
        repositories,
        charts,
    })
}

/// Layer the installation's built-in overrides on top of matching charts.
pub fn apply_user_overrides(installation: &Installation, charts: Vec<HelmChart>) -> Result<Vec<HelmChart>> {
    let Some(config) = installation.spec.config.as_ref() else {
        return Ok(charts);
    };
    let overrides = &config.unsupported_overrides.built_in_extensions;
    if overrides.is_empty() {
        return Ok(charts);
    }

    charts
        .into_iter()
        .map(|mut chart| {
            for ext in overrides.iter().filter(|o| o.name == chart.name) {
                chart.values = values::merge_documents(&chart.values, &ext.values)?;
            }
            Ok(chart)
        })
        .collect()
}

/// The complete desired add-on set for `installation`.
///
/// `current` is the add-on set currently declared to the cluster and
/// `service_cidr` its service network.
pub fn desired_addons(
    meta: &ReleaseMetadata,
    installation: &Installation,
    current: &HelmExtensions,
    service_cidr: &str,
) -> Result<HelmExtensions> {
    let flags = MergeFlags::for_installation(installation);
    let combined = merge_helm_configs(meta, installation, flags)?;
    let mut desired = generate_desired_charts(meta, current, combined)?;
    let charts = apply_user_overrides(installation, std::mem::take(&mut desired.charts))?;
    desired.charts = infra::update_infra_charts(installation, service_cidr, charts)?;
    Ok(desired)
}
