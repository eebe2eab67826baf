//! Plan controller: reconcile dispatch and error policy.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::runtime::controller::Action;
use kube::runtime::reflector::ObjectRef;
use kube::{Api, Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use crate::crd::{PLAN_NAME, Plan};
use crate::error::Error;
use crate::leader::LeaderStatus;
use crate::metrics::{Metrics, PlanLabels};
use crate::plans::{PlanReconciler, Requeue};
use crate::signaling::{SignalEventFilter, is_signaling_present};
use crate::status;

/// Requeue used when the next step can run right away.
const IMMEDIATE_REQUEUE: Duration = Duration::from_millis(100);
const TRANSIENT_ERROR_REQUEUE: Duration = Duration::from_secs(5);
const ERROR_REQUEUE: Duration = Duration::from_secs(30);

/// Shared context for the controller.
pub struct Context {
    pub kube_client: kube::Client,
    pub reconciler: PlanReconciler,
    pub metrics: Arc<Metrics>,
    pub leader: LeaderStatus,
    pub requeue_interval: Duration,
    pub retry_interval: Duration,
}

impl Context {
    fn action(&self, requeue: Requeue) -> Action {
        requeue_action(requeue, self.retry_interval, self.requeue_interval)
    }
}

fn requeue_action(requeue: Requeue, retry_interval: Duration, requeue_interval: Duration) -> Action {
    match requeue {
        Requeue::Now => Action::requeue(IMMEDIATE_REQUEUE),
        Requeue::Soon => Action::requeue(retry_interval),
        Requeue::Later => Action::requeue(requeue_interval),
        Requeue::Never => Action::await_change(),
    }
}

const fn error_requeue(err: &Error) -> Duration {
    if err.is_transient() {
        TRANSIENT_ERROR_REQUEUE
    } else {
        ERROR_REQUEUE
    }
}

/// Maps `ControlNode` and `Node` events to the plan. Only nodes carrying a
/// signal wake the plan; everything else is picked up by the regular requeue.
#[derive(Default)]
pub struct SignalNodeEvents {
    /// Last seen signal annotations keyed by `(kind, name)`.
    last: Mutex<HashMap<(String, String), ObjectMeta>>,
}

impl SignalNodeEvents {
    pub fn observe<K>(&self, node: &K) -> Option<ObjectRef<Plan>>
    where
        K: Resource<DynamicType = ()>,
    {
        let meta = node.meta();
        let name = meta.name.clone()?;
        let key = (K::kind(&()).into_owned(), name.clone());

        if meta.deletion_timestamp.is_some() {
            self.last
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&key);
        } else {
            let current = ObjectMeta {
                name: Some(name.clone()),
                annotations: meta.annotations.clone(),
                ..ObjectMeta::default()
            };
            let previous = self
                .last
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(key, current.clone());

            if let Some(previous) = previous
                && SignalEventFilter::applying_update(&name).matches(&previous, &current)
            {
                info!(kind = %K::kind(&()), node = %name, "Agent started applying the update");
            }
        }

        meta.annotations
            .as_ref()
            .is_some_and(is_signaling_present)
            .then(|| ObjectRef::new(PLAN_NAME))
    }
}

/// Reconcile the cluster-wide `Plan`.
///
/// Runs one step of the active command, patches the status if it changed and
/// publishes an event when the plan state moves.
#[instrument(skip_all, fields(plan = %obj.name_any(), plan_id = %obj.spec.id))]
pub async fn reconcile(obj: Arc<Plan>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = obj.name_any();
    if name != PLAN_NAME {
        debug!("Ignoring plan '{}', only '{}' is processed", name, PLAN_NAME);
        return Ok(Action::await_change());
    }

    if !ctx.leader.is_leader() {
        debug!("Not the leader, skipping reconcile");
        return Ok(Action::requeue(ctx.retry_interval));
    }

    let current = obj.status.clone().unwrap_or_default();
    if current.state.is_terminal() {
        debug!("Plan is in terminal state {}", current.state);
        return Ok(Action::await_change());
    }

    let plan_id = obj.spec.id.as_str();
    let started = Instant::now();
    let outcome = ctx.reconciler.process(&obj.spec, &current).await;
    ctx.metrics
        .reconcile_duration_seconds
        .get_or_create(&PlanLabels {
            plan_id: plan_id.to_string(),
        })
        .observe(started.elapsed().as_secs_f64());

    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(e) => {
            ctx.metrics.record_reconcile(plan_id, "error");
            return Err(e);
        }
    };

    if outcome.status != current {
        let api: Api<Plan> = Api::all(ctx.kube_client.clone());
        status::patch_status(&api, &name, &outcome.status).await?;

        ctx.metrics.record_signals(
            plan_id,
            status::signaled_targets(&outcome.status)
                .saturating_sub(status::signaled_targets(&current)),
        );
        ctx.metrics
            .record_transition(plan_id, current.state, outcome.status.state);

        if let Some(event) = status::plan_event(&current, &outcome.status) {
            if event.warning {
                warn!("Plan stopped: {}", event.message);
            } else {
                info!("{}: {}", event.reason, event.message);
            }
            let recorder = status::EventRecorder::new(ctx.kube_client.clone(), &obj);
            recorder.publish_plan_event(&event).await;
        }
    }

    let result = if outcome.requeue == Requeue::Never {
        "success"
    } else {
        "requeue"
    };
    ctx.metrics.record_reconcile(plan_id, result);

    Ok(ctx.action(outcome.requeue))
}

/// Error policy: requeue transient failures quickly, everything else slower.
pub fn error_policy(obj: Arc<Plan>, err: &Error, _ctx: Arc<Context>) -> Action {
    let delay = error_requeue(err);
    error!(
        plan = %obj.name_any(),
        transient = err.is_transient(),
        "Reconcile error, requeue in {}s: {}",
        delay.as_secs(),
        err
    );
    Action::requeue(delay)
}
