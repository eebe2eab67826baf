//! Transition contract shared by all command providers.

use async_trait::async_trait;

use crate::crd::{PlanCommand, PlanCommandStatus, PlanState};
use crate::error::Error;

/// Outcome of one processing step for a command.
///
/// `retry` asks for a prompt re-check without a state change (a target is
/// not ready yet). Terminal states never set it. Infrastructure failures are
/// returned as `Err` instead.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition {
    pub next: PlanState,
    pub retry: bool,
}

impl Transition {
    pub const fn to(next: PlanState) -> Self {
        Self { next, retry: false }
    }

    pub const fn retry(next: PlanState) -> Self {
        Self { next, retry: true }
    }
}

/// Handles one kind of plan command (`k0supdate`, `airgapupdate`).
#[async_trait]
pub trait PlanCommandProvider: Send + Sync {
    /// Command tag this provider serves.
    fn kind(&self) -> &'static str;

    /// Resolve the command's targets and record them in `status`.
    async fn new_plan(
        &self,
        plan_id: &str,
        cmd: &PlanCommand,
        status: &mut PlanCommandStatus,
    ) -> Result<Transition, Error>;

    /// Signal the next eligible target, or report completion.
    async fn schedulable(
        &self,
        plan_id: &str,
        cmd: &PlanCommand,
        status: &mut PlanCommandStatus,
    ) -> Result<Transition, Error>;

    /// Re-check a command that is waiting on in-flight targets.
    async fn schedulable_wait(
        &self,
        plan_id: &str,
        cmd: &PlanCommand,
        status: &mut PlanCommandStatus,
    ) -> Result<Transition, Error> {
        self.schedulable(plan_id, cmd, status).await
    }
}
