//! Plan-level state machine: runs the plan's commands in declared order.

use tracing::{debug, info, instrument, warn};

use crate::crd::{PlanCommandStatus, PlanSpec, PlanState, PlanStatus};
use crate::error::Error;

use super::core::Transition;
use super::registry::ProviderRegistry;

/// How soon the plan wants to be looked at again.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Requeue {
    /// Next command is ready to start.
    Now,
    /// A target is not ready yet.
    Soon,
    /// Waiting on agents; node events will also wake the plan.
    Later,
    /// Terminal.
    Never,
}

/// Result of processing a plan once.
#[derive(Clone, Debug, PartialEq)]
pub struct PlanOutcome {
    pub status: PlanStatus,
    pub requeue: Requeue,
}

pub struct PlanReconciler {
    registry: ProviderRegistry,
}

impl PlanReconciler {
    pub const fn new(registry: ProviderRegistry) -> Self {
        Self { registry }
    }

    /// Advance the active command of the plan by one step.
    #[instrument(skip_all, fields(plan_id = %spec.id, state = %current.state))]
    pub async fn process(&self, spec: &PlanSpec, current: &PlanStatus) -> Result<PlanOutcome, Error> {
        let mut status = current.clone();

        if status.state.is_terminal() {
            debug!("Plan is terminal, skipping");
            return Ok(PlanOutcome {
                status,
                requeue: Requeue::Never,
            });
        }

        sync_command_statuses(&mut status, spec.commands.len());

        let Some(idx) = status
            .commands
            .iter()
            .position(|c| c.state != PlanState::Completed)
        else {
            info!("All plan commands completed");
            status.state = PlanState::Completed;
            return Ok(PlanOutcome {
                status,
                requeue: Requeue::Never,
            });
        };

        let cmd = &spec.commands[idx];
        let provider = self
            .registry
            .get(cmd.kind())
            .ok_or_else(|| Error::MissingProvider(cmd.kind().to_string()))?;

        let cmd_status = &mut status.commands[idx];
        let transition = match cmd_status.state {
            PlanState::NewPlan => provider.new_plan(&spec.id, cmd, cmd_status).await?,
            PlanState::Schedulable => provider.schedulable(&spec.id, cmd, cmd_status).await?,
            PlanState::SchedulableWait => {
                provider.schedulable_wait(&spec.id, cmd, cmd_status).await?
            }
            other => Transition::to(other),
        };

        if transition.next != cmd_status.state {
            info!(
                command = idx,
                kind = cmd.kind(),
                "Plan command state {} -> {}",
                cmd_status.state,
                transition.next
            );
        }
        cmd_status.state = transition.next;

        let requeue = if transition.next.is_error() {
            warn!(command = idx, "Plan command stopped in {}", transition.next);
            status.state = transition.next;
            Requeue::Never
        } else if transition.next == PlanState::Completed {
            if idx + 1 < spec.commands.len() {
                status.state = PlanState::SchedulableWait;
                Requeue::Now
            } else {
                info!("All plan commands completed");
                status.state = PlanState::Completed;
                Requeue::Never
            }
        } else {
            status.state = transition.next;
            if transition.retry {
                Requeue::Soon
            } else {
                Requeue::Later
            }
        };

        Ok(PlanOutcome { status, requeue })
    }
}

/// Keep exactly one command status per declared command.
fn sync_command_statuses(status: &mut PlanStatus, count: usize) {
    status.commands.truncate(count);
    for id in status.commands.len()..count {
        status.commands.push(PlanCommandStatus::new(id));
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use super::*;
    use crate::crd::{K0S_UPDATE, PlanCommand, PlanCommandAirgapUpdate, PlanCommandK0sUpdate};
    use crate::plans::core::PlanCommandProvider;

    /// Provider replaying scripted transitions and recording each call.
    #[derive(Default)]
    struct Scripted {
        script: Mutex<VecDeque<Transition>>,
        calls: Mutex<Vec<(&'static str, usize)>>,
    }

    impl Scripted {
        fn new(script: impl IntoIterator<Item = Transition>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into_iter().collect()),
                calls: Mutex::default(),
            })
        }

        fn next(&self, phase: &'static str, id: usize) -> Transition {
            self.calls.lock().unwrap().push((phase, id));
            self.script.lock().unwrap().pop_front().unwrap()
        }

        fn calls(&self) -> Vec<(&'static str, usize)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PlanCommandProvider for Scripted {
        fn kind(&self) -> &'static str {
            K0S_UPDATE
        }

        async fn new_plan(
            &self,
            _plan_id: &str,
            _cmd: &PlanCommand,
            status: &mut PlanCommandStatus,
        ) -> Result<Transition, Error> {
            Ok(self.next("new_plan", status.id))
        }

        async fn schedulable(
            &self,
            _plan_id: &str,
            _cmd: &PlanCommand,
            status: &mut PlanCommandStatus,
        ) -> Result<Transition, Error> {
            Ok(self.next("schedulable", status.id))
        }

        async fn schedulable_wait(
            &self,
            _plan_id: &str,
            _cmd: &PlanCommand,
            status: &mut PlanCommandStatus,
        ) -> Result<Transition, Error> {
            Ok(self.next("schedulable_wait", status.id))
        }
    }

    fn reconciler(provider: Arc<Scripted>) -> PlanReconciler {
        let mut registry = ProviderRegistry::default();
        registry.register(provider);
        PlanReconciler::new(registry)
    }

    fn spec(commands: usize) -> PlanSpec {
        PlanSpec {
            id: "id123".to_string(),
            timestamp: "now".to_string(),
            commands: (0..commands)
                .map(|_| PlanCommand::K0sUpdate(PlanCommandK0sUpdate::default()))
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_multi_command_sequencing() {
        let provider = Scripted::new([
            Transition::to(PlanState::SchedulableWait),
            Transition::to(PlanState::Completed),
            Transition::to(PlanState::SchedulableWait),
            Transition::retry(PlanState::SchedulableWait),
            Transition::to(PlanState::Completed),
        ]);
        let reconciler = reconciler(provider.clone());
        let spec = spec(2);

        let out = reconciler.process(&spec, &PlanStatus::default()).await.unwrap();
        assert_eq!(out.status.state, PlanState::SchedulableWait);
        assert_eq!(out.status.commands.len(), 2);
        assert_eq!(out.requeue, Requeue::Later);

        let out = reconciler.process(&spec, &out.status).await.unwrap();
        assert_eq!(out.status.commands[0].state, PlanState::Completed);
        assert_eq!(out.status.state, PlanState::SchedulableWait);
        assert_eq!(out.requeue, Requeue::Now);

        let out = reconciler.process(&spec, &out.status).await.unwrap();
        assert_eq!(out.status.commands[1].state, PlanState::SchedulableWait);

        let out = reconciler.process(&spec, &out.status).await.unwrap();
        assert_eq!(out.requeue, Requeue::Soon);

        let out = reconciler.process(&spec, &out.status).await.unwrap();
        assert_eq!(out.status.state, PlanState::Completed);
        assert_eq!(out.requeue, Requeue::Never);

        assert_eq!(
            provider.calls(),
            vec![
                ("new_plan", 0),
                ("schedulable_wait", 0),
                ("new_plan", 1),
                ("schedulable_wait", 1),
                ("schedulable_wait", 1),
            ]
        );
    }

    #[tokio::test]
    async fn test_command_error_stops_plan() {
        let provider = Scripted::new([Transition::to(PlanState::IncompleteTargets)]);
        let reconciler = reconciler(provider.clone());
        let spec = spec(2);

        let out = reconciler.process(&spec, &PlanStatus::default()).await.unwrap();
        assert_eq!(out.status.state, PlanState::IncompleteTargets);
        assert_eq!(out.status.commands[0].state, PlanState::IncompleteTargets);
        assert_eq!(out.status.commands[1].state, PlanState::NewPlan);
        assert_eq!(out.requeue, Requeue::Never);
    }

    #[tokio::test]
    async fn test_terminal_plan_is_not_processed() {
        let provider = Scripted::new([]);
        let reconciler = reconciler(provider.clone());
        let current = PlanStatus {
            state: PlanState::Restricted,
            commands: vec![],
        };

        let out = reconciler.process(&spec(1), &current).await.unwrap();
        assert_eq!(out.status, current);
        assert_eq!(out.requeue, Requeue::Never);
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn test_schedulable_command_dispatch() {
        let provider = Scripted::new([Transition::to(PlanState::SchedulableWait)]);
        let reconciler = reconciler(provider.clone());
        let mut current = PlanStatus::default();
        current.commands.push(PlanCommandStatus {
            state: PlanState::Schedulable,
            ..PlanCommandStatus::new(0)
        });

        reconciler.process(&spec(1), &current).await.unwrap();
        assert_eq!(provider.calls(), vec![("schedulable", 0)]);
    }

    #[tokio::test]
    async fn test_empty_plan_completes() {
        let reconciler = reconciler(Scripted::new([]));
        let out = reconciler.process(&spec(0), &PlanStatus::default()).await.unwrap();
        assert_eq!(out.status.state, PlanState::Completed);
    }

    #[tokio::test]
    async fn test_missing_provider() {
        let reconciler = reconciler(Scripted::new([]));
        let spec = PlanSpec {
            commands: vec![PlanCommand::AirgapUpdate(PlanCommandAirgapUpdate::default())],
            ..spec(0)
        };
        let result = reconciler.process(&spec, &PlanStatus::default()).await;
        assert!(matches!(result, Err(Error::MissingProvider(kind)) if kind == "airgapupdate"));
    }

    #[test]
    fn test_sync_command_statuses() {
        let mut status = PlanStatus::default();
        sync_command_statuses(&mut status, 3);
        let ids: Vec<_> = status.commands.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);

        sync_command_statuses(&mut status, 1);
        assert_eq!(status.commands.len(), 1);
    }
}
