//! Prometheus metrics for the autopilot controller.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;

use crate::crd::PlanState;

/// Labels for reconcile metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReconcileLabels {
    pub plan_id: String,
    pub result: String,
}

/// Labels for plan-level metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct PlanLabels {
    pub plan_id: String,
}

/// Labels for plan state metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct StateLabels {
    pub plan_id: String,
    pub state: String,
}

/// All Prometheus metrics for the controller.
pub struct Metrics {
    pub reconcile_total: Family<ReconcileLabels, Counter>,
    pub reconcile_duration_seconds: Family<PlanLabels, Histogram>,
    pub plan_state_info: Family<StateLabels, Gauge>,
    pub plan_completed_total: Family<PlanLabels, Counter>,
    pub plan_failed_total: Family<StateLabels, Counter>,
    pub signals_sent_total: Family<PlanLabels, Counter>,
    pub leader: Gauge,
}

const RECONCILE_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

impl Metrics {
    /// Create and register all metrics with the given registry.
    pub fn new(registry: &mut Registry) -> Self {
        let reconcile_total = Family::<ReconcileLabels, Counter>::default();
        registry.register(
            "autopilot_reconcile",
            "Total number of plan reconcile calls",
            reconcile_total.clone(),
        );

        let reconcile_duration_seconds =
            Family::<PlanLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(RECONCILE_BUCKETS.iter().copied())
            });
        registry.register(
            "autopilot_reconcile_duration_seconds",
            "Duration of plan reconcile calls in seconds",
            reconcile_duration_seconds.clone(),
        );

        let plan_state_info = Family::<StateLabels, Gauge>::default();
        registry.register(
            "autopilot_plan_state_info",
            "Current plan state (1=active, 0=inactive)",
            plan_state_info.clone(),
        );

        let plan_completed_total = Family::<PlanLabels, Counter>::default();
        registry.register(
            "autopilot_plan_completed",
            "Total number of plans that reached Completed",
            plan_completed_total.clone(),
        );

        let plan_failed_total = Family::<StateLabels, Counter>::default();
        registry.register(
            "autopilot_plan_failed",
            "Total number of plans that stopped in an error state",
            plan_failed_total.clone(),
        );

        let signals_sent_total = Family::<PlanLabels, Counter>::default();
        registry.register(
            "autopilot_signals_sent",
            "Total number of update signals written to nodes",
            signals_sent_total.clone(),
        );

        let leader = Gauge::default();
        registry.register(
            "autopilot_leader",
            "Whether this instance holds the leader lease (1=leader)",
            leader.clone(),
        );

        Self {
            reconcile_total,
            reconcile_duration_seconds,
            plan_state_info,
            plan_completed_total,
            plan_failed_total,
            signals_sent_total,
            leader,
        }
    }

    /// Count one reconcile outcome (`success`, `requeue` or `error`).
    pub fn record_reconcile(&self, plan_id: &str, result: &str) {
        self.reconcile_total
            .get_or_create(&ReconcileLabels {
                plan_id: plan_id.to_string(),
                result: result.to_string(),
            })
            .inc();
    }

    /// Flip the state gauge from `old` to `new` and count terminal outcomes.
    pub fn record_transition(&self, plan_id: &str, old: PlanState, new: PlanState) {
        if old == new {
            return;
        }
        self.plan_state_info
            .get_or_create(&StateLabels {
                plan_id: plan_id.to_string(),
                state: old.to_string(),
            })
            .set(0);
        self.plan_state_info
            .get_or_create(&StateLabels {
                plan_id: plan_id.to_string(),
                state: new.to_string(),
            })
            .set(1);

        if new == PlanState::Completed {
            self.plan_completed_total
                .get_or_create(&PlanLabels {
                    plan_id: plan_id.to_string(),
                })
                .inc();
        } else if new.is_error() {
            self.plan_failed_total
                .get_or_create(&StateLabels {
                    plan_id: plan_id.to_string(),
                    state: new.to_string(),
                })
                .inc();
        }
    }

    pub fn record_signals(&self, plan_id: &str, count: usize) {
        if count == 0 {
            return;
        }
        self.signals_sent_total
            .get_or_create(&PlanLabels {
                plan_id: plan_id.to_string(),
            })
            .inc_by(count as u64);
    }
}

/// Axum handler that encodes the registry as OpenMetrics text.
async fn metrics_handler(State(registry): State<Arc<Registry>>) -> impl IntoResponse {
    let mut buf = String::new();
    if encode(&mut buf, &registry).is_err() {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to encode metrics".to_string(),
        );
    }
    (StatusCode::OK, buf)
}

/// Start the metrics server on the given port.
pub async fn serve(port: u16, registry: Arc<Registry>) -> anyhow::Result<()> {
    use axum::Router;
    use axum::routing::get;
    use tokio::net::TcpListener;
    use tracing::info;

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(registry);

    let listener = TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    info!("Metrics server listening on port {}", port);
    axum::serve(listener, app).await?;
    Ok(())
}
