//! Drift detection between the desired add-on set and the live charts.

use std::collections::BTreeSet;

use tracing::debug;

use crate::crd::{Chart, HelmExtensions};

/// Live charts compared with a desired add-on set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChartDrift {
    /// Live charts differ from the desired set.
    pub drift: bool,
    /// Error strings reported by live charts, in listing order.
    pub errors: Vec<String>,
}

/// Compare the desired charts with the live chart objects.
///
/// Drift is reported when the counts differ, when a live chart's version
/// differs from the desired one, when a live chart has no desired entry or
/// when a desired chart has no live entry.
/// Chart errors are collected whether or not there is drift.
pub fn detect_chart_drift(desired: &HelmExtensions, live: &[Chart]) -> ChartDrift {
    let mut result = ChartDrift {
        drift: desired.charts.len() != live.len(),
        errors: Vec::new(),
    };

    for chart in live {
        if let Some(err) = chart.error() {
            result.errors.push(err.to_string());
        }

        let release = chart.release_name();
        match desired.chart(release) {
            Some(target) if target.version != chart.spec.version => {
                debug!(
                    chart = release,
                    desired = %target.version,
                    live = %chart.spec.version,
                    "Chart version drift"
                );
                result.drift = true;
            }
            Some(_) => {}
            None => {
                debug!(chart = release, "Live chart has no desired entry");
                result.drift = true;
            }
        }
    }

    let live_names: BTreeSet<&str> = live.iter().map(Chart::release_name).collect();
    if let Some(missing) = desired
        .charts
        .iter()
        .find(|c| !live_names.contains(c.name.as_str()))
    {
        debug!(chart = %missing.name, "Desired chart has no live entry");
        result.drift = true;
    }

    result
}

/// Declared charts the agent has not created yet, in declaration order.
pub fn detect_pending_charts(declared: &HelmExtensions, live: &[Chart]) -> Vec<String> {
    let live_names: BTreeSet<&str> = live.iter().map(Chart::release_name).collect();
    declared
        .charts
        .iter()
        .filter(|c| !live_names.contains(c.name.as_str()))
        .map(|c| c.name.clone())
        .collect()
}
