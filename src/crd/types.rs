//! Enum types for plan states, target states and node roles.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// State of a plan, or of a single command within a plan.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash, JsonSchema)]
pub enum PlanState {
    #[default]
    NewPlan,
    Schedulable,
    SchedulableWait,
    Completed,
    InconsistentTargets,
    IncompleteTargets,
    Restricted,
    MissingSignalNode,
    ApplyFailed,
    /// The cluster is not ready for the requested version.
    Warning,
}

impl PlanState {
    /// Terminal states are never processed again.
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed
                | Self::InconsistentTargets
                | Self::IncompleteTargets
                | Self::Restricted
                | Self::MissingSignalNode
                | Self::ApplyFailed
                | Self::Warning
        )
    }

    /// Terminal states that need a corrected plan from the operator.
    pub const fn is_error(self) -> bool {
        self.is_terminal() && !matches!(self, Self::Completed)
    }
}

impl std::fmt::Display for PlanState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NewPlan => write!(f, "NewPlan"),
            Self::Schedulable => write!(f, "Schedulable"),
            Self::SchedulableWait => write!(f, "SchedulableWait"),
            Self::Completed => write!(f, "Completed"),
            Self::InconsistentTargets => write!(f, "InconsistentTargets"),
            Self::IncompleteTargets => write!(f, "IncompleteTargets"),
            Self::Restricted => write!(f, "Restricted"),
            Self::MissingSignalNode => write!(f, "MissingSignalNode"),
            Self::ApplyFailed => write!(f, "ApplyFailed"),
            Self::Warning => write!(f, "Warning"),
        }
    }
}

/// Signaling state of a single plan target.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash, JsonSchema)]
pub enum TargetState {
    #[default]
    SignalPending,
    SignalSent,
    SignalCompleted,
    SignalMissingNode,
    SignalMissingPlatform,
    SignalErrorDownload,
    SignalApplyFailed,
}

impl TargetState {
    /// Whether a target may move from `self` to `next`.
    ///
    /// Discovery marks only apply to pending targets; completion and apply
    /// errors only to targets that were sent a signal. Nothing moves back.
    pub const fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (
                Self::SignalPending,
                Self::SignalSent | Self::SignalMissingNode | Self::SignalMissingPlatform
            ) | (
                Self::SignalSent,
                Self::SignalCompleted | Self::SignalErrorDownload | Self::SignalApplyFailed
            )
        )
    }

    /// Target failed after being signaled.
    pub const fn is_error(self) -> bool {
        matches!(self, Self::SignalErrorDownload | Self::SignalApplyFailed)
    }
}

impl std::fmt::Display for TargetState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SignalPending => write!(f, "SignalPending"),
            Self::SignalSent => write!(f, "SignalSent"),
            Self::SignalCompleted => write!(f, "SignalCompleted"),
            Self::SignalMissingNode => write!(f, "SignalMissingNode"),
            Self::SignalMissingPlatform => write!(f, "SignalMissingPlatform"),
            Self::SignalErrorDownload => write!(f, "SignalErrorDownload"),
            Self::SignalApplyFailed => write!(f, "SignalApplyFailed"),
        }
    }
}

/// Role of a plan target. Doubles as the target group label and the
/// resource kind the target resolves to.
#[derive(
    Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, JsonSchema,
    clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Controller,
    Worker,
}

impl NodeRole {
    /// Roles in scheduling priority order.
    pub const ALL: [Self; 2] = [Self::Controller, Self::Worker];

    pub const fn label(self) -> &'static str {
        match self {
            Self::Controller => "controller",
            Self::Worker => "worker",
        }
    }

    /// Kubernetes kind a target of this role resolves to.
    pub const fn kind(self) -> &'static str {
        match self {
            Self::Controller => "ControlNode",
            Self::Worker => "Node",
        }
    }
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_state_default_is_new_plan() {
        assert_eq!(PlanState::default(), PlanState::NewPlan);
    }

    #[test]
    fn test_plan_state_terminal() {
        assert!(!PlanState::NewPlan.is_terminal());
        assert!(!PlanState::Schedulable.is_terminal());
        assert!(!PlanState::SchedulableWait.is_terminal());
        assert!(PlanState::Completed.is_terminal());
        assert!(!PlanState::Completed.is_error());
        for state in [
            PlanState::InconsistentTargets,
            PlanState::IncompleteTargets,
            PlanState::Restricted,
            PlanState::MissingSignalNode,
            PlanState::ApplyFailed,
            PlanState::Warning,
        ] {
            assert!(state.is_terminal(), "{state} should be terminal");
            assert!(state.is_error(), "{state} should be an error");
        }
    }

    #[test]
    fn test_plan_state_serializes_as_name() {
        let json = serde_json::to_string(&PlanState::SchedulableWait).unwrap();
        assert_eq!(json, r#""SchedulableWait""#);
        assert_eq!(PlanState::InconsistentTargets.to_string(), "InconsistentTargets");
    }

    #[test]
    fn test_target_state_wire_names() {
        let json = serde_json::to_string(&TargetState::SignalApplyFailed).unwrap();
        assert_eq!(json, r#""SignalApplyFailed""#);
        let state: TargetState = serde_json::from_str(r#""SignalApplyFailed""#).unwrap();
        assert_eq!(state, TargetState::SignalApplyFailed);
        assert_eq!(serde_json::to_string(&PlanState::Warning).unwrap(), r#""Warning""#);
    }

    #[test]
    fn test_target_state_forward_transitions() {
        use TargetState::*;
        assert!(SignalPending.can_advance_to(SignalSent));
        assert!(SignalPending.can_advance_to(SignalMissingNode));
        assert!(SignalPending.can_advance_to(SignalMissingPlatform));
        assert!(SignalSent.can_advance_to(SignalCompleted));
        assert!(SignalSent.can_advance_to(SignalErrorDownload));
        assert!(SignalSent.can_advance_to(SignalApplyFailed));
    }

    #[test]
    fn test_target_state_never_regresses() {
        use TargetState::*;
        assert!(!SignalSent.can_advance_to(SignalPending));
        assert!(!SignalCompleted.can_advance_to(SignalPending));
        assert!(!SignalCompleted.can_advance_to(SignalSent));
        assert!(!SignalPending.can_advance_to(SignalCompleted));
        assert!(!SignalMissingNode.can_advance_to(SignalSent));
        assert!(!SignalSent.can_advance_to(SignalSent));
    }

    #[test]
    fn test_node_role_labels() {
        assert_eq!(NodeRole::Controller.label(), "controller");
        assert_eq!(NodeRole::Worker.to_string(), "worker");
        assert_eq!(NodeRole::Controller.kind(), "ControlNode");
        assert_eq!(NodeRole::Worker.kind(), "Node");
        assert_eq!(NodeRole::ALL, [NodeRole::Controller, NodeRole::Worker]);
    }

    #[test]
    fn test_node_role_serde() {
        let role: NodeRole = serde_json::from_str(r#""worker""#).unwrap();
        assert_eq!(role, NodeRole::Worker);
    }
}
