//! `Plan` and `ControlNode` CRD type definitions.

pub mod control_node;
pub mod plan;
pub mod status;
pub mod types;

// Some types are only consumed by test modules, but re-exporting keeps
// the public API consistent across `crate::crd::*`.
#[allow(unused_imports)]
pub use control_node::{ControlNode, ControlNodeAddress, ControlNodeSpec, ControlNodeStatus};
#[allow(unused_imports)]
pub use plan::{
    AIRGAP_UPDATE, K0S_UPDATE, PLAN_NAME, Plan, PlanCommand, PlanCommandAirgapUpdate,
    PlanCommandK0sUpdate, PlanCommandTarget, PlanCommandTargetDiscovery,
    PlanCommandTargetDiscoverySelector, PlanCommandTargetDiscoveryStatic,
    PlanCommandTargetLimits, PlanCommandTargets, PlanResourceUrl, PlanSpec, PlatformResourceMap,
};
#[allow(unused_imports)]
pub use status::{
    PlanCommandStatus, PlanCommandTargetStatus, PlanCommandTargetsStatus, PlanStatus,
};
pub use types::{NodeRole, PlanState, TargetState};
