//! `airgapupdate` command provider.

use std::sync::Arc;

use async_trait::async_trait;

use crate::crd::{AIRGAP_UPDATE, PlanCommand, PlanCommandStatus};
use crate::error::Error;
use crate::plans::core::{PlanCommandProvider, Transition};

use super::targets::{TargetEngine, UpdateCommand};

/// Distributes an airgap image bundle to the command's targets.
pub struct AirgapUpdateProvider {
    engine: Arc<TargetEngine>,
}

impl AirgapUpdateProvider {
    pub const fn new(engine: Arc<TargetEngine>) -> Self {
        Self { engine }
    }
}

fn airgap_command(cmd: &PlanCommand) -> Result<UpdateCommand<'_>, Error> {
    match cmd {
        PlanCommand::AirgapUpdate(update) => Ok(UpdateCommand::Airgap(update)),
        other => Err(Error::MissingProvider(other.kind().to_string())),
    }
}

#[async_trait]
impl PlanCommandProvider for AirgapUpdateProvider {
    fn kind(&self) -> &'static str {
        AIRGAP_UPDATE
    }

    async fn new_plan(
        &self,
        _plan_id: &str,
        cmd: &PlanCommand,
        status: &mut PlanCommandStatus,
    ) -> Result<Transition, Error> {
        let update = airgap_command(cmd)?;
        self.engine.new_plan(&update, status).await
    }

    async fn schedulable(
        &self,
        plan_id: &str,
        cmd: &PlanCommand,
        status: &mut PlanCommandStatus,
    ) -> Result<Transition, Error> {
        let update = airgap_command(cmd)?;
        self.engine.schedulable(plan_id, &update, status).await
    }
}
