//! autopilot - plan orchestration engine for k0s clusters.
//!
//! Watches the cluster-wide `Plan` CRD and rolls updates out to controller
//! and worker nodes by writing signal annotations that node agents act on.

mod config;
mod controller;
mod crd;
mod delegate;
mod error;
mod health;
mod k8s;
mod leader;
mod metrics;
mod plans;
mod signaling;
mod status;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Node;
use kube::Api;
use kube::runtime::Controller;
use kube::runtime::watcher;
use tracing::{error, info};

use config::{Config, LogFormat};
use controller::{Context, SignalNodeEvents};
use crd::{ControlNode, Plan};
use k8s::KubeSignalNodeClient;
use leader::{LeaderStatus, LeaseConfig, LeaseElector};
use plans::cmdprovider::TargetEngine;
use plans::{OsRandom, PlanReconciler, ProviderRegistry, RemovedApiCheck};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    let config = Config::from_args();

    if let Err(e) = init_tracing(&config) {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(1);
    }

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    info!("Starting autopilot v{}", VERSION);

    if let Err(e) = run(config).await {
        error!("Controller failed: {}", e);
        std::process::exit(1);
    }
}

/// Initialize the tracing subscriber in the configured format.
fn init_tracing(config: &Config) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| anyhow::anyhow!("Failed to initialize log filter: {e}"))?;

    match config.log_format {
        LogFormat::Json => fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(true)
            .with_target(true)
            .init(),
        LogFormat::Pretty => fmt()
            .with_env_filter(filter)
            .compact()
            .with_target(true)
            .init(),
    }

    Ok(())
}

/// Main controller loop.
async fn run(config: Config) -> Result<()> {
    let kube_config = kube::Config::infer().await?;
    let prober = delegate::HttpReadyProber::new(
        kube_config.root_cert.as_deref().unwrap_or_default(),
        config.ready_timeout(),
    )?;
    let client = kube::Client::try_from(kube_config)?;
    info!("Connected to Kubernetes API server");

    let mut registry = prometheus_client::registry::Registry::default();
    let metrics = Arc::new(metrics::Metrics::new(&mut registry));
    let registry = Arc::new(registry);

    let health_state = health::HealthState::new();
    let health_state_clone = health_state.clone();
    let health_port = config.health_port;
    tokio::spawn(async move {
        if let Err(e) = health::serve(health_port, health_state_clone).await {
            error!("Health server failed: {}", e);
        }
    });

    let metrics_port = config.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = metrics::serve(metrics_port, registry).await {
            error!("Metrics server failed: {}", e);
        }
    });

    if !config.exclude_from_plans.is_empty() {
        info!("Excluding roles from plans: {:?}", config.exclude_from_plans);
    }
    let engine = Arc::new(TargetEngine::new(
        Arc::new(KubeSignalNodeClient::new(client.clone())),
        delegate::default_delegates(Arc::new(prober)),
        config.exclude_from_plans.iter().copied(),
        Arc::new(OsRandom),
    ));
    let providers = ProviderRegistry::with_defaults(
        engine,
        Arc::new(RemovedApiCheck::new(client.clone())),
    );
    info!("Registered command providers: {:?}", providers.kinds());

    let leader = if config.leader_elect {
        let (elector, status) = LeaseElector::new(
            client.clone(),
            LeaseConfig {
                name: config.lease_name.clone(),
                namespace: config.lease_namespace.clone(),
                identity: config.identity.clone(),
                lease_duration: Duration::from_secs(config.lease_duration_secs),
                renew_interval: Duration::from_secs(config.renew_interval_secs),
            },
        );
        tokio::spawn(elector.run());
        status
    } else {
        info!("Leader election disabled");
        LeaderStatus::always()
    };

    let ctx = Arc::new(Context {
        kube_client: client.clone(),
        reconciler: PlanReconciler::new(providers),
        metrics: metrics.clone(),
        leader: leader.clone(),
        requeue_interval: config.requeue_interval(),
        retry_interval: config.retry_interval(),
    });

    health_state.set_ready(true);

    let run_controller = move || {
        let client = client.clone();
        let ctx = ctx.clone();
        let metrics = metrics.clone();
        async move {
            let _gauge = LeaderGauge::new(metrics);
            info!("Starting Plan controller");

            let events = Arc::new(SignalNodeEvents::default());
            let node_events = events.clone();
            Controller::new(Api::<Plan>::all(client.clone()), watcher::Config::default())
                .watches(
                    Api::<ControlNode>::all(client.clone()),
                    watcher::Config::default(),
                    move |node| events.observe(&node),
                )
                .watches(
                    Api::<Node>::all(client),
                    watcher::Config::default(),
                    move |node| node_events.observe(&node),
                )
                .run(controller::reconcile, controller::error_policy, ctx)
                .for_each(|res| async move {
                    match res {
                        Ok(o) => info!("Reconciled: {:?}", o),
                        Err(e) => error!("Reconcile failed: {:?}", e),
                    }
                })
                .await;
        }
    };

    if config.leader_elect {
        leader::run_while_leading(leader, run_controller).await;
    } else {
        run_controller().await;
    }

    Ok(())
}

/// Reports leadership through the metrics gauge for as long as it lives.
struct LeaderGauge(Arc<metrics::Metrics>);

impl LeaderGauge {
    fn new(metrics: Arc<metrics::Metrics>) -> Self {
        metrics.leader.set(1);
        Self(metrics)
    }
}

impl Drop for LeaderGauge {
    fn drop(&mut self) {
        self.0.leader.set(0);
    }
}
