//! State machine for Installation lifecycle transitions.
//!
//! Every stage of the reconcile cycle expresses its outcome as an
//! [`InstallationEvent`]. The state machine validates the event against the
//! record's current state and either applies the resulting state and reason
//! or rejects the transition. Rejections are logged and leave the status
//! untouched.

use tracing::{debug, warn};

use crate::crd::{InstallationState, InstallationStatus};

// ============================================================================
// Installation Events
// ============================================================================

/// Events that can trigger installation state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallationEvent {
    /// A newer record became authoritative.
    Superseded,

    /// Cluster version matches the desired version, or no change is required.
    KubernetesReady,

    /// Upgrade plan created, not yet picked up.
    PlanQueued,

    /// Upgrade plan is executing.
    PlanRunning,

    /// A plan owned by another record is still running.
    WaitingForPlan,

    /// Airgap artifacts are still being copied to nodes.
    ArtifactsCopying,

    /// Permanent policy failure (downgrade, invalid version, failed plan or artifact job).
    PolicyFailed,

    /// Desired add-on set written to the cluster declaration.
    AddonsApplied,

    /// Declared charts not yet created by the agent.
    ChartsPending,

    /// Every declared chart is live at its desired version.
    AddonsConverged,

    /// Charts report errors and no corrective drift exists.
    ChartsFailed,
}

impl std::fmt::Display for InstallationEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstallationEvent::Superseded => write!(f, "Superseded"),
            InstallationEvent::KubernetesReady => write!(f, "KubernetesReady"),
            InstallationEvent::PlanQueued => write!(f, "PlanQueued"),
            InstallationEvent::PlanRunning => write!(f, "PlanRunning"),
            InstallationEvent::WaitingForPlan => write!(f, "WaitingForPlan"),
            InstallationEvent::ArtifactsCopying => write!(f, "ArtifactsCopying"),
            InstallationEvent::PolicyFailed => write!(f, "PolicyFailed"),
            InstallationEvent::AddonsApplied => write!(f, "AddonsApplied"),
            InstallationEvent::ChartsPending => write!(f, "ChartsPending"),
            InstallationEvent::AddonsConverged => write!(f, "AddonsConverged"),
            InstallationEvent::ChartsFailed => write!(f, "ChartsFailed"),
        }
    }
}

impl InstallationEvent {
    /// Target state of the event.
    pub fn target(&self) -> InstallationState {
        match self {
            InstallationEvent::Superseded => InstallationState::Obsolete,
            InstallationEvent::KubernetesReady => InstallationState::KubernetesInstalled,
            InstallationEvent::PlanQueued => InstallationState::Enqueued,
            InstallationEvent::PlanRunning => InstallationState::Installing,
            InstallationEvent::WaitingForPlan => InstallationState::Waiting,
            InstallationEvent::ArtifactsCopying => InstallationState::CopyingArtifacts,
            InstallationEvent::PolicyFailed => InstallationState::Failed,
            InstallationEvent::AddonsApplied => InstallationState::AddonsInstalling,
            InstallationEvent::ChartsPending => InstallationState::PendingChartCreation,
            InstallationEvent::AddonsConverged => InstallationState::Installed,
            InstallationEvent::ChartsFailed => InstallationState::HelmChartUpdateFailure,
        }
    }

    /// Whether the event is produced by the chart stage.
    fn is_chart_stage(&self) -> bool {
        matches!(
            self,
            InstallationEvent::AddonsApplied
                | InstallationEvent::ChartsPending
                | InstallationEvent::AddonsConverged
                | InstallationEvent::ChartsFailed
        )
    }
}

// ============================================================================
// Transition Context
// ============================================================================

/// Observations used to evaluate transition guards.
#[derive(Debug, Clone, Default)]
pub struct InstallationTransitionContext {
    /// Desired and live add-on sets differ.
    pub chart_drift: bool,

    /// Declared charts with no live counterpart.
    pub pending_charts: usize,

    /// Error strings reported by live charts.
    pub chart_errors: usize,
}

// ============================================================================
// Installation Transition
// ============================================================================

/// Represents a single state transition.
#[derive(Debug, Clone)]
pub struct InstallationTransition {
    /// Source state.
    pub from: InstallationState,

    /// Target state.
    pub to: InstallationState,

    /// Event that triggers this transition.
    pub event: InstallationEvent,

    /// Human-readable description.
    pub description: &'static str,
}

/// Result of applying an event to a status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    /// State (or only the reason) was updated.
    Applied {
        from: InstallationState,
        to: InstallationState,
    },
    /// The event is not allowed from the current state.
    Rejected {
        from: InstallationState,
        event: InstallationEvent,
    },
}

impl TransitionResult {
    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionResult::Applied { .. })
    }
}

// ============================================================================
// Installation State Machine
// ============================================================================

/// State machine for validating Installation state transitions.
#[derive(Debug, Clone, Default)]
pub struct InstallationStateMachine {
    /// All valid transitions.
    transitions: Vec<InstallationTransition>,
}

impl InstallationStateMachine {
    /// Create a new state machine with all valid transitions.
    ///
    /// - Obsolete is terminal and the unset state is never a target.
    /// - Any live state may be superseded.
    /// - Orchestrator events are accepted from every live state.
    /// - Chart-stage events are accepted only once Kubernetes is installed;
    ///   a new apply is not accepted while one is already in flight.
    pub fn new() -> Self {
        let orchestrator_events = [
            (
                InstallationEvent::KubernetesReady,
                "Cluster version matches the desired version",
            ),
            (InstallationEvent::PlanQueued, "Upgrade plan created"),
            (InstallationEvent::PlanRunning, "Upgrade plan executing"),
            (
                InstallationEvent::WaitingForPlan,
                "Another record's upgrade plan is active",
            ),
            (
                InstallationEvent::ArtifactsCopying,
                "Copying airgap artifacts to nodes",
            ),
            (InstallationEvent::PolicyFailed, "Permanent failure"),
        ];
        let chart_events = [
            (InstallationEvent::AddonsApplied, "Desired add-ons applied"),
            (InstallationEvent::ChartsPending, "Waiting for chart creation"),
            (InstallationEvent::AddonsConverged, "All add-ons converged"),
            (InstallationEvent::ChartsFailed, "Charts reported errors"),
        ];

        let mut transitions = Vec::new();
        for from in InstallationState::ALL {
            if from == InstallationState::Obsolete {
                continue;
            }

            transitions.push(InstallationTransition {
                from,
                to: InstallationState::Obsolete,
                event: InstallationEvent::Superseded,
                description: "Superseded by a newer installation",
            });

            for (event, description) in orchestrator_events {
                transitions.push(InstallationTransition {
                    from,
                    to: event.target(),
                    event,
                    description,
                });
            }

            if !from.is_kubernetes_installed() {
                continue;
            }
            for (event, description) in chart_events {
                // Storm guard: no re-apply while an apply is in flight
                if event == InstallationEvent::AddonsApplied
                    && from == InstallationState::AddonsInstalling
                {
                    continue;
                }
                transitions.push(InstallationTransition {
                    from,
                    to: event.target(),
                    event,
                    description,
                });
            }
        }

        Self { transitions }
    }

    /// Attempt to transition from one state given an event.
    ///
    /// Returns the transition if valid, None otherwise.
    pub fn transition(
        &self,
        from: InstallationState,
        event: InstallationEvent,
        ctx: &InstallationTransitionContext,
    ) -> Option<InstallationTransition> {
        let transition = self
            .transitions
            .iter()
            .find(|t| t.from == from && t.event == event)?;

        if !self.evaluate_guards(transition, ctx) {
            return None;
        }

        Some(transition.clone())
    }

    /// Evaluate guards for a transition.
    fn evaluate_guards(
        &self,
        transition: &InstallationTransition,
        ctx: &InstallationTransitionContext,
    ) -> bool {
        match transition.event {
            // Converged means nothing pending and nothing drifting
            InstallationEvent::AddonsConverged => !ctx.chart_drift && ctx.pending_charts == 0,

            InstallationEvent::ChartsPending => ctx.pending_charts > 0,

            // Drift overrides chart errors
            InstallationEvent::ChartsFailed => !ctx.chart_drift,

            InstallationEvent::AddonsApplied => ctx.chart_drift,

            _ => true,
        }
    }

    /// Apply an event to a status, updating state and reason when allowed.
    pub fn apply(
        &self,
        status: &mut InstallationStatus,
        event: InstallationEvent,
        reason: impl Into<String>,
        ctx: &InstallationTransitionContext,
    ) -> TransitionResult {
        let from = status.state;
        match self.transition(from, event, ctx) {
            Some(transition) => {
                let reason = reason.into();
                debug!(
                    from = %from,
                    to = %transition.to,
                    event = %event,
                    reason = %reason,
                    "{}",
                    transition.description
                );
                status.state = transition.to;
                status.reason = reason;
                TransitionResult::Applied {
                    from,
                    to: transition.to,
                }
            }
            None => {
                warn!(
                    from = %from,
                    event = %event,
                    "Rejected illegal installation state transition"
                );
                TransitionResult::Rejected { from, event }
            }
        }
    }

    /// Check if a state transition is valid (without guards).
    pub fn can_transition(&self, from: InstallationState, to: InstallationState) -> bool {
        // Same state is always valid (reason update)
        if from == to {
            return true;
        }

        self.transitions
            .iter()
            .any(|t| t.from == from && t.to == to)
    }

    /// Get the list of valid next states from a given state.
    pub fn valid_transitions(&self, from: InstallationState) -> Vec<InstallationState> {
        let mut states: Vec<InstallationState> = Vec::new();
        for t in self.transitions.iter().filter(|t| t.from == from) {
            if !states.contains(&t.to) {
                states.push(t.to);
            }
        }
        states
    }

    /// Check if a state is terminal (no further transitions possible).
    pub fn is_terminal(&self, state: InstallationState) -> bool {
        !self.transitions.iter().any(|t| t.from == state)
    }

    /// Get all transitions from a state.
    pub fn transitions_from(&self, state: InstallationState) -> Vec<&InstallationTransition> {
        self.transitions
            .iter()
            .filter(|t| t.from == state)
            .collect()
    }

    /// Whether an event may ever be accepted from a state.
    pub fn accepts(&self, from: InstallationState, event: InstallationEvent) -> bool {
        self.transitions
            .iter()
            .any(|t| t.from == from && t.event == event)
    }
}

/// Determine the chart-stage event for the observed chart state.
///
/// Event priority:
/// 1. Chart errors without drift (terminal)
/// 2. Converged (nothing pending, no drift)
/// 3. Pending charts (defer, no re-apply)
/// 4. Apply already in flight (no event)
/// 5. Drift (re-apply)
pub fn determine_chart_event(
    state: InstallationState,
    ctx: &InstallationTransitionContext,
) -> Option<InstallationEvent> {
    if ctx.chart_errors > 0 && !ctx.chart_drift {
        return Some(InstallationEvent::ChartsFailed);
    }

    if ctx.pending_charts == 0 && !ctx.chart_drift {
        return Some(InstallationEvent::AddonsConverged);
    }

    if ctx.pending_charts > 0 {
        return Some(InstallationEvent::ChartsPending);
    }

    if state == InstallationState::AddonsInstalling {
        return None;
    }

    if !ctx.chart_drift {
        return None;
    }

    Some(InstallationEvent::AddonsApplied)
}
