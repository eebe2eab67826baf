//! `Plan` status types.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::plan::{AIRGAP_UPDATE, K0S_UPDATE};
use super::types::{NodeRole, PlanState, TargetState};

/// Signaling status of one target.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlanCommandTargetStatus {
    pub name: String,
    pub state: TargetState,
    pub last_updated_timestamp: DateTime<Utc>,
}

impl PlanCommandTargetStatus {
    pub fn new(name: impl Into<String>, state: TargetState) -> Self {
        Self {
            name: name.into(),
            state,
            last_updated_timestamp: Utc::now(),
        }
    }

    /// Move to `next` if allowed, refreshing the timestamp.
    /// Returns false and leaves the status untouched otherwise.
    pub fn advance(&mut self, next: TargetState) -> bool {
        if !self.state.can_advance_to(next) {
            return false;
        }
        self.state = next;
        self.last_updated_timestamp = Utc::now();
        true
    }
}

/// Per-target status of one command, grouped by role.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlanCommandTargetsStatus {
    #[serde(default)]
    pub controllers: Vec<PlanCommandTargetStatus>,

    #[serde(default)]
    pub workers: Vec<PlanCommandTargetStatus>,
}

impl PlanCommandTargetsStatus {
    pub fn group(&self, role: NodeRole) -> &[PlanCommandTargetStatus] {
        match role {
            NodeRole::Controller => &self.controllers,
            NodeRole::Worker => &self.workers,
        }
    }

    pub const fn group_mut(&mut self, role: NodeRole) -> &mut Vec<PlanCommandTargetStatus> {
        match role {
            NodeRole::Controller => &mut self.controllers,
            NodeRole::Worker => &mut self.workers,
        }
    }

    /// Advance the named target of `role`. Returns false if the target is
    /// unknown or the transition is not allowed.
    pub fn advance(&mut self, role: NodeRole, name: &str, next: TargetState) -> bool {
        self.group_mut(role)
            .iter_mut()
            .find(|t| t.name == name)
            .is_some_and(|t| t.advance(next))
    }

    /// Number of targets of `role` in `state`.
    pub fn count(&self, role: NodeRole, state: TargetState) -> usize {
        self.group(role).iter().filter(|t| t.state == state).count()
    }

    /// All targets across both groups, controllers first.
    pub fn iter(&self) -> impl Iterator<Item = (NodeRole, &PlanCommandTargetStatus)> {
        self.controllers
            .iter()
            .map(|t| (NodeRole::Controller, t))
            .chain(self.workers.iter().map(|t| (NodeRole::Worker, t)))
    }
}

/// Status of one plan command.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlanCommandStatus {
    /// Index of the command within the plan spec.
    pub id: usize,

    #[serde(default)]
    pub state: PlanState,

    /// Human-readable detail about the current state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, rename = "k0supdate", skip_serializing_if = "Option::is_none")]
    pub k0s_update: Option<PlanCommandTargetsStatus>,

    #[serde(default, rename = "airgapupdate", skip_serializing_if = "Option::is_none")]
    pub airgap_update: Option<PlanCommandTargetsStatus>,
}

impl PlanCommandStatus {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    /// Target status block for the given command kind, created if absent.
    pub fn targets_mut(&mut self, kind: &str) -> Option<&mut PlanCommandTargetsStatus> {
        match kind {
            K0S_UPDATE => Some(self.k0s_update.get_or_insert_with(Default::default)),
            AIRGAP_UPDATE => Some(self.airgap_update.get_or_insert_with(Default::default)),
            _ => None,
        }
    }
}

/// `Plan` status: overall state plus one entry per command.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlanStatus {
    #[serde(default)]
    pub state: PlanState,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commands: Vec<PlanCommandStatus>,
}
