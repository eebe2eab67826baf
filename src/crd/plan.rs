//! `Plan` spec types.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::status::PlanStatus;
use super::types::NodeRole;

/// Well-known name of the singleton plan.
pub const PLAN_NAME: &str = "autopilot";

/// `Plan` spec describes a cluster-wide update as an ordered list of commands.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "autopilot.k0sproject.io",
    version = "v1beta2",
    kind = "Plan",
    status = "PlanStatus",
    printcolumn = r#"{"name":"ID","type":"string","jsonPath":".spec.id"}"#,
    printcolumn = r#"{"name":"STATE","type":"string","jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"AGE","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PlanSpec {
    /// Correlation id, copied into every signal sent for this plan.
    pub id: String,

    /// Creation timestamp as supplied by the plan author.
    pub timestamp: String,

    /// Commands executed in declared order.
    pub commands: Vec<PlanCommand>,
}

/// A single plan command. Exactly one kind per entry.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
pub enum PlanCommand {
    #[serde(rename = "k0supdate")]
    K0sUpdate(PlanCommandK0sUpdate),

    #[serde(rename = "airgapupdate")]
    AirgapUpdate(PlanCommandAirgapUpdate),
}

impl PlanCommand {
    /// Tag used to look up the command provider.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::K0sUpdate(_) => K0S_UPDATE,
            Self::AirgapUpdate(_) => AIRGAP_UPDATE,
        }
    }
}

pub const K0S_UPDATE: &str = "k0supdate";
pub const AIRGAP_UPDATE: &str = "airgapupdate";

/// Platform identifier (`<os>-<arch>`) to downloadable resource.
pub type PlatformResourceMap = BTreeMap<String, PlanResourceUrl>;

/// Update of the k0s binary itself.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlanCommandK0sUpdate {
    pub version: String,

    /// Apply even when the node already runs `version`.
    #[serde(default, rename = "forceupdate")]
    pub force_update: bool,

    #[serde(default)]
    pub platforms: PlatformResourceMap,

    #[serde(default)]
    pub targets: PlanCommandTargets,
}

/// Update of the airgap image bundle.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlanCommandAirgapUpdate {
    pub version: String,

    #[serde(default)]
    pub platforms: PlatformResourceMap,

    #[serde(default)]
    pub targets: PlanCommandTargets,
}

/// Downloadable resource for one platform.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlanResourceUrl {
    #[serde(default)]
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

/// Targets of a command, grouped by role.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlanCommandTargets {
    #[serde(default)]
    pub controllers: PlanCommandTarget,

    #[serde(default)]
    pub workers: PlanCommandTarget,
}

impl PlanCommandTargets {
    pub const fn get(&self, role: NodeRole) -> &PlanCommandTarget {
        match role {
            NodeRole::Controller => &self.controllers,
            NodeRole::Worker => &self.workers,
        }
    }
}

/// How the targets of one role are found, and how many may update at once.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlanCommandTarget {
    #[serde(default)]
    pub discovery: PlanCommandTargetDiscovery,

    #[serde(default)]
    pub limits: PlanCommandTargetLimits,
}

impl PlanCommandTarget {
    /// True when no discovery method is declared.
    pub fn is_empty(&self) -> bool {
        match (&self.discovery.r#static, &self.discovery.selector) {
            (None, None) => true,
            (Some(s), None) => s.nodes.is_empty(),
            _ => false,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlanCommandTargetDiscovery {
    /// Explicit list of node names.
    #[serde(default, rename = "static", skip_serializing_if = "Option::is_none")]
    pub r#static: Option<PlanCommandTargetDiscoveryStatic>,

    /// Label and field selectors evaluated against the live cluster.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<PlanCommandTargetDiscoverySelector>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlanCommandTargetDiscoveryStatic {
    #[serde(default)]
    pub nodes: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlanCommandTargetDiscoverySelector {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<String>,
}

/// Concurrency limits for a target group.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlanCommandTargetLimits {
    /// Maximum number of targets with a signal in flight (default: 1).
    #[serde(default = "default_concurrent")]
    pub concurrent: u32,
}

impl Default for PlanCommandTargetLimits {
    fn default() -> Self {
        Self {
            concurrent: default_concurrent(),
        }
    }
}

const fn default_concurrent() -> u32 {
    1
}
