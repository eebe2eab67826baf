//! Leader election on a `coordination.k8s.io/v1` Lease.
//!
//! Only the lease holder reconciles plans. Lease writes carry the
//! resourceVersion that was read, so two replicas racing for an expired
//! lease cannot both win: the loser gets a 409 and stays standby.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::Client;
use kube::api::{Api, PostParams};
use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::Error;

const RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Lease identity and timing.
#[derive(Clone, Debug)]
pub struct LeaseConfig {
    pub name: String,
    pub namespace: String,
    pub identity: String,
    pub lease_duration: Duration,
    pub renew_interval: Duration,
}

/// Read side of the leadership flag.
#[derive(Clone, Debug)]
pub struct LeaderStatus {
    rx: watch::Receiver<bool>,
}

impl LeaderStatus {
    /// Status that is always leading, for single-replica setups.
    pub fn always() -> Self {
        let (_tx, rx) = watch::channel(true);
        Self { rx }
    }

    fn channel(initial: bool) -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(initial);
        (tx, Self { rx })
    }

    pub fn is_leader(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until leadership is held. Returns false once the elector is gone.
    async fn acquired(&mut self) -> bool {
        self.rx.wait_for(|leading| *leading).await.is_ok()
    }

    /// Wait until leadership is lost. Returns false if the elector went away
    /// while still leading.
    async fn lost(&mut self) -> bool {
        self.rx.wait_for(|leading| !*leading).await.is_ok()
    }
}

/// Snapshot of the fields of a Lease that drive the election.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct LeaseView {
    holder: Option<String>,
    acquire_time: Option<DateTime<Utc>>,
    renew_time: Option<DateTime<Utc>>,
    duration_secs: Option<i64>,
    transitions: i32,
    resource_version: Option<String>,
}

impl LeaseView {
    fn from_lease(lease: &Lease) -> Result<Self, Error> {
        let Some(spec) = lease.spec.as_ref() else {
            return Ok(Self {
                resource_version: lease.metadata.resource_version.clone(),
                ..Self::default()
            });
        };
        Ok(Self {
            holder: spec.holder_identity.clone(),
            acquire_time: spec.acquire_time.as_ref().map(to_utc).transpose()?,
            renew_time: spec.renew_time.as_ref().map(to_utc).transpose()?,
            duration_secs: spec.lease_duration_seconds.map(i64::from),
            transitions: spec.lease_transitions.unwrap_or(0),
            resource_version: lease.metadata.resource_version.clone(),
        })
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match (self.renew_time, self.duration_secs) {
            (Some(renewed), Some(secs)) => now > renewed + chrono::Duration::seconds(secs),
            _ => true,
        }
    }
}

/// What to do with the lease on this round.
#[derive(Clone, Debug, PartialEq, Eq)]
enum LeaseDecision {
    Create,
    Renew { acquired: Option<DateTime<Utc>>, transitions: i32 },
    TakeOver { transitions: i32 },
    Wait { holder: Option<String> },
}

fn decide(existing: Option<&LeaseView>, identity: &str, now: DateTime<Utc>) -> LeaseDecision {
    let Some(lease) = existing else {
        return LeaseDecision::Create;
    };
    if lease.holder.as_deref() == Some(identity) {
        return LeaseDecision::Renew {
            acquired: lease.acquire_time,
            transitions: lease.transitions,
        };
    }
    if lease.holder.is_none() || lease.is_expired(now) {
        return LeaseDecision::TakeOver {
            transitions: lease.transitions + 1,
        };
    }
    LeaseDecision::Wait {
        holder: lease.holder.clone(),
    }
}

fn micro_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

// MicroTime does not wrap chrono; convert through its RFC 3339 wire form.
fn to_utc(t: &MicroTime) -> Result<DateTime<Utc>, Error> {
    Ok(serde_json::from_value(serde_json::to_value(t)?)?)
}

fn from_utc(t: DateTime<Utc>) -> Result<MicroTime, Error> {
    Ok(serde_json::from_value(json!(micro_time(t)))?)
}

/// Lease elector publishing its view of leadership to [`LeaderStatus`].
pub struct LeaseElector {
    api: Api<Lease>,
    config: LeaseConfig,
    tx: watch::Sender<bool>,
}

impl LeaseElector {
    pub fn new(client: Client, config: LeaseConfig) -> (Self, LeaderStatus) {
        let (tx, status) = LeaderStatus::channel(false);
        let api = Api::namespaced(client, &config.namespace);
        (Self { api, config, tx }, status)
    }

    fn lease_body(
        &self,
        resource_version: Option<String>,
        acquired: DateTime<Utc>,
        now: DateTime<Utc>,
        transitions: i32,
    ) -> Result<Lease, Error> {
        let duration = i32::try_from(self.config.lease_duration.as_secs())
            .map_err(|_| Error::Lease("lease duration out of range".to_string()))?;
        let lease = Lease {
            metadata: ObjectMeta {
                name: Some(self.config.name.clone()),
                namespace: Some(self.config.namespace.clone()),
                resource_version,
                ..ObjectMeta::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: Some(self.config.identity.clone()),
                lease_duration_seconds: Some(duration),
                acquire_time: Some(from_utc(acquired)?),
                renew_time: Some(from_utc(now)?),
                lease_transitions: Some(transitions),
                ..LeaseSpec::default()
            }),
        };
        Ok(lease)
    }

    /// One election round. Returns whether this replica holds the lease.
    pub async fn try_acquire_or_renew(&self) -> Result<bool, Error> {
        let now = Utc::now();
        let existing = match self.api.get_opt(&self.config.name).await? {
            Some(lease) => Some(LeaseView::from_lease(&lease)?),
            None => None,
        };

        let (lease, create) = match decide(existing.as_ref(), &self.config.identity, now) {
            LeaseDecision::Wait { holder } => {
                debug!(holder = ?holder, "Lease held by another replica");
                return Ok(false);
            }
            LeaseDecision::Create => (self.lease_body(None, now, now, 0)?, true),
            LeaseDecision::Renew { acquired, transitions } => {
                let rv = existing.and_then(|l| l.resource_version);
                (
                    self.lease_body(rv, acquired.unwrap_or(now), now, transitions)?,
                    false,
                )
            }
            LeaseDecision::TakeOver { transitions } => {
                let rv = existing.and_then(|l| l.resource_version);
                info!(transitions, "Taking over expired lease");
                (self.lease_body(rv, now, now, transitions)?, false)
            }
        };

        let written = if create {
            self.api.create(&PostParams::default(), &lease).await
        } else {
            self.api
                .replace(&self.config.name, &PostParams::default(), &lease)
                .await
        };

        match written.map_err(|e| Error::from_write("Lease", &self.config.name, e)) {
            Ok(_) => Ok(true),
            Err(Error::Conflict { .. }) => {
                debug!("Lease write conflict, another replica won this round");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Run the election loop forever, publishing every change of leadership.
    pub async fn run(self) {
        info!(
            identity = %self.config.identity,
            lease = %self.config.name,
            "Starting leader election"
        );
        loop {
            let leading = match self.try_acquire_or_renew().await {
                Ok(leading) => leading,
                Err(e) => {
                    warn!(error = %e, "Lease round failed");
                    false
                }
            };

            let was_leading = self.tx.send_replace(leading);
            if leading && !was_leading {
                info!(identity = %self.config.identity, "Leadership acquired");
            } else if !leading && was_leading {
                warn!(identity = %self.config.identity, "Leadership lost");
            }

            let wait = if leading {
                self.config.renew_interval
            } else {
                RETRY_INTERVAL
            };
            tokio::time::sleep(wait).await;
        }
    }
}

/// Run the future built by `make` only while leading. The future is
/// dropped when leadership is lost and rebuilt once it is regained.
/// Returns when the future completes or the elector goes away.
pub async fn run_while_leading<F, Fut>(mut status: LeaderStatus, mut make: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    loop {
        if !status.acquired().await {
            return;
        }
        info!("Leading, starting controller");
        tokio::select! {
            () = make() => return,
            lost = status.lost() => {
                if !lost {
                    return;
                }
                warn!("Stopped controller after losing leadership");
            }
        }
    }
}
