//! `k0supdate` command provider.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::crd::{K0S_UPDATE, PlanCommand, PlanCommandK0sUpdate, PlanCommandStatus, PlanState};
use crate::error::Error;
use crate::plans::checks::UpdateCheck;
use crate::plans::core::{PlanCommandProvider, Transition};

use super::targets::{TargetEngine, UpdateCommand};

/// Rolls a new k0s binary out to the command's targets.
pub struct K0sUpdateProvider {
    engine: Arc<TargetEngine>,
    check: Arc<dyn UpdateCheck>,
}

impl K0sUpdateProvider {
    pub fn new(engine: Arc<TargetEngine>, check: Arc<dyn UpdateCheck>) -> Self {
        Self { engine, check }
    }

    /// Reason the cluster cannot move to `version`, if any.
    async fn blocker(&self, version: &str) -> Result<Option<String>, Error> {
        match self.check.blocker(version).await {
            Err(e @ Error::InvalidVersion(_)) => Ok(Some(e.to_string())),
            other => other,
        }
    }
}

fn k0s_command(cmd: &PlanCommand) -> Result<&PlanCommandK0sUpdate, Error> {
    match cmd {
        PlanCommand::K0sUpdate(update) => Ok(update),
        other => Err(Error::MissingProvider(other.kind().to_string())),
    }
}

#[async_trait]
impl PlanCommandProvider for K0sUpdateProvider {
    fn kind(&self) -> &'static str {
        K0S_UPDATE
    }

    async fn new_plan(
        &self,
        _plan_id: &str,
        cmd: &PlanCommand,
        status: &mut PlanCommandStatus,
    ) -> Result<Transition, Error> {
        let update = k0s_command(cmd)?;
        if !update.force_update
            && let Some(reason) = self.blocker(&update.version).await?
        {
            warn!(version = %update.version, "Cluster cannot be updated: {}", reason);
            status.description = Some(reason);
            return Ok(Transition::to(PlanState::Warning));
        }
        self.engine.new_plan(&UpdateCommand::K0s(update), status).await
    }

    async fn schedulable(
        &self,
        plan_id: &str,
        cmd: &PlanCommand,
        status: &mut PlanCommandStatus,
    ) -> Result<Transition, Error> {
        let update = k0s_command(cmd)?;
        self.engine
            .schedulable(plan_id, &UpdateCommand::K0s(update), status)
            .await
    }
}
