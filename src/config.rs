//! Command-line and environment configuration.

use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::crd::NodeRole;

pub mod env {
    pub const LOG_FORMAT: &str = "LOG_FORMAT";
    pub const LOG_LEVEL: &str = "LOG_LEVEL";
    pub const HEALTH_PORT: &str = "HEALTH_PORT";
    pub const METRICS_PORT: &str = "METRICS_PORT";
    pub const EXCLUDE_FROM_PLANS: &str = "EXCLUDE_FROM_PLANS";
    pub const LEADER_ELECT: &str = "LEADER_ELECT";
    pub const LEASE_NAME: &str = "LEASE_NAME";
    pub const LEASE_NAMESPACE: &str = "LEASE_NAMESPACE";
    pub const POD_NAME: &str = "HOSTNAME";
    pub const LEASE_DURATION_SECS: &str = "LEASE_DURATION_SECS";
    pub const RENEW_INTERVAL_SECS: &str = "RENEW_INTERVAL_SECS";
    pub const REQUEUE_INTERVAL_SECS: &str = "REQUEUE_INTERVAL_SECS";
    pub const RETRY_INTERVAL_SECS: &str = "RETRY_INTERVAL_SECS";
    pub const READY_TIMEOUT_SECS: &str = "READY_TIMEOUT_SECS";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "autopilot",
    version,
    about = "Plan orchestration engine for rolling node updates",
    long_about = "Watches the cluster-wide autopilot Plan and signals controller and worker nodes, one at a time, to update k0s or load airgap bundles."
)]
pub struct Config {
    /// Log format
    #[arg(long, env = env::LOG_FORMAT, value_enum, default_value = "json")]
    pub log_format: LogFormat,

    /// Log level: trace, debug, info, warn, error
    #[arg(long, env = env::LOG_LEVEL, default_value = "info")]
    pub log_level: String,

    /// Health check server port
    #[arg(long, env = env::HEALTH_PORT, default_value = "10802")]
    pub health_port: u16,

    /// Metrics server port
    #[arg(long, env = env::METRICS_PORT, default_value = "10801")]
    pub metrics_port: u16,

    /// Node roles excluded from plans, comma-separated
    #[arg(long, env = env::EXCLUDE_FROM_PLANS, value_enum, value_delimiter = ',')]
    pub exclude_from_plans: Vec<NodeRole>,

    /// Run leader election; disable only for single-replica setups
    #[arg(
        long,
        env = env::LEADER_ELECT,
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub leader_elect: bool,

    /// Name of the leader election lease
    #[arg(long, env = env::LEASE_NAME, default_value = "autopilot")]
    pub lease_name: String,

    /// Namespace of the leader election lease
    #[arg(long, env = env::LEASE_NAMESPACE, default_value = "kube-system")]
    pub lease_namespace: String,

    /// Identity recorded as lease holder
    #[arg(long, env = env::POD_NAME, default_value = "autopilot")]
    pub identity: String,

    /// Lease validity in seconds
    #[arg(long, env = env::LEASE_DURATION_SECS, default_value = "30")]
    pub lease_duration_secs: u64,

    /// Lease renewal interval in seconds
    #[arg(long, env = env::RENEW_INTERVAL_SECS, default_value = "10")]
    pub renew_interval_secs: u64,

    /// Requeue interval while waiting on agents, in seconds
    #[arg(long, env = env::REQUEUE_INTERVAL_SECS, default_value = "10")]
    pub requeue_interval_secs: u64,

    /// Requeue interval while a target is not ready yet, in seconds
    #[arg(long, env = env::RETRY_INTERVAL_SECS, default_value = "5")]
    pub retry_interval_secs: u64,

    /// Timeout of a controller `/readyz` request, in seconds
    #[arg(long, env = env::READY_TIMEOUT_SECS, default_value = "10")]
    pub ready_timeout_secs: u64,
}

impl Config {
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Validate option combinations clap cannot express.
    pub fn validate(&self) -> Result<(), String> {
        if self.renew_interval_secs == 0 || self.lease_duration_secs == 0 {
            return Err("lease duration and renew interval must be positive".to_string());
        }
        if self.renew_interval_secs >= self.lease_duration_secs {
            return Err(format!(
                "renew interval ({}s) must be shorter than the lease duration ({}s)",
                self.renew_interval_secs, self.lease_duration_secs
            ));
        }
        if self.retry_interval_secs == 0 || self.requeue_interval_secs == 0 {
            return Err("requeue and retry intervals must be positive".to_string());
        }
        if self.ready_timeout_secs == 0 {
            return Err("ready timeout must be positive".to_string());
        }
        Ok(())
    }

    pub const fn requeue_interval(&self) -> Duration {
        Duration::from_secs(self.requeue_interval_secs)
    }

    pub const fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    pub const fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }
}
