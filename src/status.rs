//! Status patch helpers and event recording for the `Plan`.

use k8s_openapi::api::core::v1::ObjectReference;
use kube::Api;
use kube::Resource;
use kube::api::{Patch, PatchParams};
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use tracing::debug;

use crate::crd::{Plan, PlanState, PlanStatus, TargetState};
use crate::error::Error;

const FIELD_MANAGER: &str = "autopilot";

/// Patch the status subresource of a `Plan`.
pub async fn patch_status(api: &Api<Plan>, name: &str, status: &PlanStatus) -> Result<Plan, Error> {
    debug!("Patching status for {}: state={}", name, status.state);

    let patch = serde_json::json!({ "status": status });
    let result = api
        .patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
        .await?;
    Ok(result)
}

/// An event worth publishing for a plan state change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlanEvent {
    pub warning: bool,
    pub reason: String,
    pub message: String,
}

/// Event describing the move from `old` to `new`, if the plan state changed
/// in a way operators care about.
pub fn plan_event(old: &PlanStatus, new: &PlanStatus) -> Option<PlanEvent> {
    if old.state == new.state {
        return None;
    }

    if new.state.is_error() {
        let message = failure_description(new)
            .unwrap_or_else(|| format!("Plan stopped in {}", new.state));
        return Some(PlanEvent {
            warning: true,
            reason: new.state.to_string(),
            message,
        });
    }

    match (old.state, new.state) {
        (PlanState::NewPlan, PlanState::SchedulableWait | PlanState::Schedulable) => {
            Some(PlanEvent {
                warning: false,
                reason: "PlanStarted".to_string(),
                message: format!("Plan accepted with {} command(s)", new.commands.len()),
            })
        }
        (_, PlanState::Completed) => Some(PlanEvent {
            warning: false,
            reason: "PlanCompleted".to_string(),
            message: format!("All {} command(s) completed", new.commands.len()),
        }),
        _ => None,
    }
}

/// Description of the first command that stopped in an error state.
fn failure_description(status: &PlanStatus) -> Option<String> {
    status
        .commands
        .iter()
        .find(|c| c.state.is_error())
        .map(|c| match &c.description {
            Some(desc) => format!("Command {} stopped in {}: {}", c.id, c.state, desc),
            None => format!("Command {} stopped in {}", c.id, c.state),
        })
}

/// Number of targets across all commands that have been sent a signal,
/// whether or not the agent has answered yet.
pub fn signaled_targets(status: &PlanStatus) -> usize {
    status
        .commands
        .iter()
        .flat_map(|c| c.k0s_update.iter().chain(c.airgap_update.iter()))
        .flat_map(|targets| targets.iter())
        .filter(|(_, t)| {
            matches!(
                t.state,
                TargetState::SignalSent
                    | TargetState::SignalCompleted
                    | TargetState::SignalErrorDownload
                    | TargetState::SignalApplyFailed
            )
        })
        .count()
}

/// Event recorder bundled with its target `ObjectReference`.
pub struct EventRecorder {
    recorder: Recorder,
    obj_ref: ObjectReference,
}

impl EventRecorder {
    /// Create an event recorder for the given `Plan` resource.
    pub fn new(client: kube::Client, obj: &Plan) -> Self {
        let reporter = Reporter {
            controller: FIELD_MANAGER.into(),
            instance: std::env::var(crate::config::env::POD_NAME).ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
            obj_ref: obj.object_ref(&()),
        }
    }

    /// Publish a Normal or Warning event for a plan state change.
    pub async fn publish_plan_event(&self, event: &PlanEvent) {
        if event.warning {
            self.publish_warning(&event.reason, &event.message).await;
        } else {
            self.publish(&event.reason, &event.message).await;
        }
    }

    /// Publish a Normal event.
    pub async fn publish(&self, reason: &str, message: &str) {
        self.recorder
            .publish(
                &Event {
                    type_: EventType::Normal,
                    reason: reason.into(),
                    note: Some(message.into()),
                    action: reason.into(),
                    secondary: None,
                },
                &self.obj_ref,
            )
            .await
            .unwrap_or_else(|e| tracing::warn!("Failed to publish event: {}", e));
    }

    /// Publish a Warning event.
    pub async fn publish_warning(&self, reason: &str, message: &str) {
        self.recorder
            .publish(
                &Event {
                    type_: EventType::Warning,
                    reason: reason.into(),
                    note: Some(message.into()),
                    action: reason.into(),
                    secondary: None,
                },
                &self.obj_ref,
            )
            .await
            .unwrap_or_else(|e| tracing::warn!("Failed to publish warning event: {}", e));
    }
}
