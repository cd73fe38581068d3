//! Status management utilities.
//!
//! Helpers for reading and updating the conditions carried by an
//! Installation status.

use crate::crd::{Condition, InstallationStatus};

/// Condition type tracking the registry storage migration.
pub const REGISTRY_MIGRATION_CONDITION: &str = "RegistryMigrationStatus";

/// Maximum length of a status reason, in characters.
pub const MAX_REASON_LEN: usize = 1024;

/// Cut `reason` to at most `max` characters.
pub fn truncate_reason(mut reason: String, max: usize) -> String {
    if let Some((end, _)) = reason.char_indices().nth(max) {
        reason.truncate(end);
    }
    reason
}

/// Add or replace a condition by type.
///
/// The transition time of an existing condition is kept when its status
/// does not change.
pub fn set_condition(status: &mut InstallationStatus, condition: Condition) {
    if let Some(existing) = status
        .conditions
        .iter_mut()
        .find(|c| c.r#type == condition.r#type)
    {
        let last_transition_time = if existing.status == condition.status {
            existing.last_transition_time.clone()
        } else {
            condition.last_transition_time.clone()
        };
        *existing = Condition {
            last_transition_time,
            ..condition
        };
    } else {
        status.conditions.push(condition);
    }
}

/// Status string of a condition, empty when the condition is absent.
pub fn condition_status<'a>(status: Option<&'a InstallationStatus>, condition_type: &str) -> &'a str {
    status
        .and_then(|s| s.conditions.iter().find(|c| c.r#type == condition_type))
        .map(|c| c.status.as_str())
        .unwrap_or("")
}

/// Check if a condition type is true
pub fn is_condition_true(conditions: &[Condition], condition_type: &str) -> bool {
    conditions
        .iter()
        .find(|c| c.r#type == condition_type)
        .is_some_and(|c| c.status == "True")
}

/// Get the reason for a condition
pub fn get_condition_reason<'a>(
    conditions: &'a [Condition],
    condition_type: &str,
) -> Option<&'a str> {
    conditions
        .iter()
        .find(|c| c.r#type == condition_type)
        .map(|c| c.reason.as_str())
}
