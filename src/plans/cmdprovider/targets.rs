//! Target discovery and signaling shared by the update providers.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::crd::{
    NodeRole, PlanCommand, PlanCommandAirgapUpdate, PlanCommandK0sUpdate, PlanCommandStatus,
    PlanCommandTarget, PlanCommandTargetStatus, PlanCommandTargets, PlanCommandTargetsStatus,
    PlanResourceUrl, PlanState, PlatformResourceMap, TargetState,
};
use crate::delegate::{ControllerDelegate, ControllerDelegateMap, UpdateReadiness};
use crate::error::Error;
use crate::k8s::{SignalNode, SignalNodeClient};
use crate::plans::core::Transition;
use crate::plans::selector::{RandomSource, find_next_schedulable};
use crate::signaling::{
    AirgapUpdateItem, K0sUpdateItem, SignalCommand, SignalData, status as signal_status,
};

/// Borrowed view over an update command of either kind.
#[derive(Clone, Copy, Debug)]
pub enum UpdateCommand<'a> {
    K0s(&'a PlanCommandK0sUpdate),
    Airgap(&'a PlanCommandAirgapUpdate),
}

impl<'a> UpdateCommand<'a> {
    pub const fn from_plan(cmd: &'a PlanCommand) -> Self {
        match cmd {
            PlanCommand::K0sUpdate(u) => Self::K0s(u),
            PlanCommand::AirgapUpdate(u) => Self::Airgap(u),
        }
    }

    pub const fn kind(&self) -> &'static str {
        match self {
            Self::K0s(_) => crate::crd::K0S_UPDATE,
            Self::Airgap(_) => crate::crd::AIRGAP_UPDATE,
        }
    }

    pub fn version(&self) -> &'a str {
        match self {
            Self::K0s(u) => &u.version,
            Self::Airgap(u) => &u.version,
        }
    }

    pub const fn platforms(&self) -> &'a PlatformResourceMap {
        match self {
            Self::K0s(u) => &u.platforms,
            Self::Airgap(u) => &u.platforms,
        }
    }

    pub const fn targets(&self) -> &'a PlanCommandTargets {
        match self {
            Self::K0s(u) => &u.targets,
            Self::Airgap(u) => &u.targets,
        }
    }

    /// Signal command requesting this update from `resource`.
    pub fn signal_command(&self, id: usize, resource: &PlanResourceUrl) -> SignalCommand {
        let mut command = SignalCommand {
            id: Some(id),
            ..Default::default()
        };
        match self {
            Self::K0s(u) => {
                command.k0s_update = Some(K0sUpdateItem {
                    url: resource.url.clone(),
                    version: u.version.clone(),
                    sha256: resource.sha256.clone(),
                    force_update: u.force_update,
                });
            }
            Self::Airgap(u) => {
                command.airgap_update = Some(AirgapUpdateItem {
                    url: resource.url.clone(),
                    version: u.version.clone(),
                    sha256: resource.sha256.clone(),
                });
            }
        }
        command
    }

    /// Maximum number of in-flight signals for `role`. Controllers are
    /// always updated one at a time.
    pub fn concurrency(&self, role: NodeRole) -> usize {
        match role {
            NodeRole::Controller => 1,
            NodeRole::Worker => {
                usize::try_from(self.targets().workers.limits.concurrent.max(1)).unwrap_or(1)
            }
        }
    }
}

/// Result of one scheduling step: the transition and an optional
/// human-readable description for the command status.
type Step = (Transition, Option<String>);

/// Discovery and signaling engine for update commands.
pub struct TargetEngine {
    client: Arc<dyn SignalNodeClient>,
    delegates: ControllerDelegateMap,
    excluded: BTreeSet<NodeRole>,
    rng: Arc<dyn RandomSource>,
}

impl TargetEngine {
    pub fn new(
        client: Arc<dyn SignalNodeClient>,
        delegates: ControllerDelegateMap,
        excluded: impl IntoIterator<Item = NodeRole>,
        rng: Arc<dyn RandomSource>,
    ) -> Self {
        Self {
            client,
            delegates,
            excluded: excluded.into_iter().collect(),
            rng,
        }
    }

    /// Resolve every declared target and decide whether the command can run.
    #[instrument(skip_all, fields(command = cmd.kind(), id = status.id))]
    pub async fn new_plan(
        &self,
        cmd: &UpdateCommand<'_>,
        status: &mut PlanCommandStatus,
    ) -> Result<Transition, Error> {
        let mut resolved = PlanCommandTargetsStatus::default();
        let mut incomplete = Vec::new();
        let mut restricted = Vec::new();

        for role in NodeRole::ALL {
            let target = cmd.targets().get(role);
            if target.is_empty() {
                continue;
            }

            let group = self.discover(role, target, cmd.platforms()).await?;
            incomplete.extend(
                group
                    .iter()
                    .filter(|t| t.state != TargetState::SignalPending)
                    .map(|t| format!("{} ({})", t.name, t.state)),
            );
            if !group.is_empty() && self.excluded.contains(&role) {
                restricted.push(role.label());
            }
            *resolved.group_mut(role) = group;
        }

        let (controllers, workers) = (resolved.controllers.len(), resolved.workers.len());
        *status
            .targets_mut(cmd.kind())
            .ok_or_else(|| Error::MissingProvider(cmd.kind().to_string()))? = resolved;

        if !incomplete.is_empty() {
            warn!("Plan command has incomplete targets: {}", incomplete.join(", "));
            status.description = Some(format!("Incomplete targets: {}", incomplete.join(", ")));
            return Ok(Transition::to(PlanState::IncompleteTargets));
        }
        if !restricted.is_empty() {
            warn!("Plan command targets excluded roles: {}", restricted.join(", "));
            status.description = Some(format!("Excluded roles: {}", restricted.join(", ")));
            return Ok(Transition::to(PlanState::Restricted));
        }

        info!(
            controllers,
            workers,
            version = cmd.version(),
            "Plan command targets resolved"
        );
        Ok(Transition::to(PlanState::SchedulableWait))
    }

    /// Sync in-flight targets, then signal at most one new target.
    #[instrument(skip_all, fields(command = cmd.kind(), id = status.id))]
    pub async fn schedulable(
        &self,
        plan_id: &str,
        cmd: &UpdateCommand<'_>,
        status: &mut PlanCommandStatus,
    ) -> Result<Transition, Error> {
        let cmd_id = status.id;
        let targets = status
            .targets_mut(cmd.kind())
            .ok_or_else(|| Error::MissingProvider(cmd.kind().to_string()))?;

        let (transition, description) = self.schedule(plan_id, cmd_id, cmd, targets).await?;
        if description.is_some() {
            status.description = description;
        }
        Ok(transition)
    }

    async fn schedule(
        &self,
        plan_id: &str,
        cmd_id: usize,
        cmd: &UpdateCommand<'_>,
        targets: &mut PlanCommandTargetsStatus,
    ) -> Result<Step, Error> {
        self.sync_in_flight(plan_id, cmd_id, targets).await?;

        if let Some((role, failed)) = targets.iter().find(|(_, t)| t.state.is_error()) {
            let message = format!("{role} '{}' reported {}", failed.name, failed.state);
            warn!("Plan command failed: {}", message);
            return Ok((Transition::to(PlanState::ApplyFailed), Some(message)));
        }

        let Some((role, name)) = find_next_schedulable(targets, self.rng.as_ref()) else {
            let in_flight = targets
                .iter()
                .filter(|(_, t)| t.state == TargetState::SignalSent)
                .count();
            if in_flight > 0 {
                debug!(in_flight, "Waiting for signaled targets");
                return Ok((Transition::retry(PlanState::SchedulableWait), None));
            }
            info!("All plan command targets completed");
            return Ok((Transition::to(PlanState::Completed), None));
        };

        // Probing a controller that is mid-update would fail the plan.
        let limit = cmd.concurrency(role);
        let in_flight = targets.count(role, TargetState::SignalSent);
        if in_flight >= limit {
            debug!(role = %role, in_flight, limit, "Concurrency limit reached");
            return Ok((Transition::retry(PlanState::SchedulableWait), None));
        }

        let Some(delegate) = self.delegates.get(&role) else {
            warn!(role = %role, "No controller delegate for target group");
            return Ok((
                Transition::to(PlanState::MissingSignalNode),
                Some(format!("No delegate for {role} targets")),
            ));
        };

        let Some(node) = delegate.get(self.client.as_ref(), &name).await? else {
            warn!(role = %role, node = %name, "Signal node not found");
            targets.advance(role, &name, TargetState::SignalMissingNode);
            return Ok((
                Transition::to(PlanState::MissingSignalNode),
                Some(format!("{} '{name}' not found", role.kind())),
            ));
        };

        match delegate
            .update_readiness(self.client.as_ref(), targets, &node)
            .await
        {
            UpdateReadiness::CanUpdate => {}
            UpdateReadiness::Inconsistent => {
                warn!(role = %role, node = %name, "Target is not a verifiable cluster member");
                return Ok((
                    Transition::to(PlanState::InconsistentTargets),
                    Some(format!(
                        "{} targets are not all live cluster members",
                        role.kind()
                    )),
                ));
            }
            UpdateReadiness::NotYet => {
                debug!(role = %role, node = %name, "Target not ready for update yet");
                return Ok((Transition::retry(PlanState::SchedulableWait), None));
            }
        }

        let Some(resource) = self.platform_resource(delegate.as_ref(), &node, cmd.platforms())
        else {
            targets.advance(role, &name, TargetState::SignalMissingPlatform);
            return Ok((
                Transition::to(PlanState::IncompleteTargets),
                Some(format!("No platform resource for {role} '{name}'")),
            ));
        };

        let signal = SignalData {
            command: cmd.signal_command(cmd_id, resource),
            ..SignalData::new(plan_id, cmd_id)
        };
        signal.validate()?;

        let mut updated = delegate.deep_copy(&node);
        signal.marshal(updated.annotations_mut())?;
        self.client.replace(&updated).await?;

        targets.advance(role, &name, TargetState::SignalSent);
        info!(
            role = %role,
            node = %name,
            version = cmd.version(),
            "Signaled target"
        );
        Ok((Transition::to(PlanState::SchedulableWait), None))
    }

    /// Discover the targets of one group, checking each for a platform
    /// resource.
    async fn discover(
        &self,
        role: NodeRole,
        target: &PlanCommandTarget,
        platforms: &PlatformResourceMap,
    ) -> Result<Vec<PlanCommandTargetStatus>, Error> {
        let static_nodes = target
            .discovery
            .r#static
            .as_ref()
            .map(|s| s.nodes.as_slice())
            .unwrap_or_default();

        let Some(delegate) = self.delegates.get(&role) else {
            warn!(role = %role, "No controller delegate for target group");
            return Ok(static_nodes
                .iter()
                .map(|n| PlanCommandTargetStatus::new(n, TargetState::SignalMissingNode))
                .collect());
        };

        let mut seen = BTreeSet::new();
        let mut statuses = Vec::new();

        for name in static_nodes {
            if !seen.insert(name.clone()) {
                continue;
            }
            let mut status = PlanCommandTargetStatus::new(name, TargetState::SignalPending);
            match delegate.get(self.client.as_ref(), name).await? {
                None => {
                    warn!(role = %role, node = %name, "Static target not found");
                    status.advance(TargetState::SignalMissingNode);
                }
                Some(node) => {
                    if self.platform_resource(delegate.as_ref(), &node, platforms).is_none() {
                        status.advance(TargetState::SignalMissingPlatform);
                    }
                }
            }
            statuses.push(status);
        }

        if target.discovery.r#static.is_some() {
            if target.discovery.selector.is_some() {
                debug!(role = %role, "Static discovery set, ignoring selector");
            }
            return Ok(statuses);
        }

        if let Some(selector) = &target.discovery.selector {
            let nodes: Vec<SignalNode> = self
                .client
                .list(role, selector)
                .await?
                .into_iter()
                .filter(|n| seen.insert(n.name()))
                .collect();
            let mut discovered = delegate.to_target_status(&nodes, TargetState::SignalPending);
            for (status, node) in discovered.iter_mut().zip(&nodes) {
                if self.platform_resource(delegate.as_ref(), node, platforms).is_none() {
                    status.advance(TargetState::SignalMissingPlatform);
                }
            }
            debug!(role = %role, count = discovered.len(), "Selector discovered targets");
            statuses.extend(discovered);
        }

        Ok(statuses)
    }

    fn platform_resource<'p>(
        &self,
        delegate: &dyn ControllerDelegate,
        node: &SignalNode,
        platforms: &'p PlatformResourceMap,
    ) -> Option<&'p PlanResourceUrl> {
        match delegate.platform_id(node) {
            Ok(id) => {
                let resource = platforms.get(&id);
                if resource.is_none() {
                    warn!(node = %node.name(), platform = %id, "No resource for platform");
                }
                resource
            }
            Err(e) => {
                warn!(node = %node.name(), "Unable to determine platform: {}", e);
                None
            }
        }
    }

    /// Pull agent-reported progress into the status of `SignalSent` targets.
    async fn sync_in_flight(
        &self,
        plan_id: &str,
        cmd_id: usize,
        targets: &mut PlanCommandTargetsStatus,
    ) -> Result<(), Error> {
        let in_flight: Vec<(NodeRole, String)> = targets
            .iter()
            .filter(|(_, t)| t.state == TargetState::SignalSent)
            .map(|(role, t)| (role, t.name.clone()))
            .collect();

        for (role, name) in in_flight {
            let Some(delegate) = self.delegates.get(&role) else {
                continue;
            };
            let Some(node) = delegate.get(self.client.as_ref(), &name).await? else {
                warn!(role = %role, node = %name, "Signaled node disappeared");
                continue;
            };
            let Some(annotations) = node.annotations() else {
                continue;
            };
            let signal = match SignalData::decode(annotations) {
                Ok(signal) => signal,
                Err(e) => {
                    warn!(node = %name, "Unable to read signal data: {}", e);
                    continue;
                }
            };
            if signal.plan_id != plan_id || signal.command.id != Some(cmd_id) {
                debug!(node = %name, signal_plan = %signal.plan_id, "Signal belongs to another plan command");
                continue;
            }

            let next = match signal.status_str() {
                Some(signal_status::COMPLETED) => TargetState::SignalCompleted,
                Some(signal_status::FAILED_DOWNLOAD) => TargetState::SignalErrorDownload,
                Some(signal_status::FAILED_UPDATE | signal_status::FAILED) => {
                    TargetState::SignalApplyFailed
                }
                _ => continue,
            };
            if targets.advance(role, &name, next) {
                info!(role = %role, node = %name, state = %next, "Target status changed");
            }
        }
        Ok(())
    }
}
