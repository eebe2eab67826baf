//! Receive-side event filter for signal annotation updates.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use super::status;
use super::v2::SignalData;

/// Decides whether an update to a signal node is addressed to this host and
/// has reached the status the handler is waiting for.
#[derive(Clone, Debug)]
pub struct SignalEventFilter {
    hostname: String,
    awaited_status: String,
}

impl SignalEventFilter {
    pub fn new(hostname: impl Into<String>, awaited_status: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            awaited_status: awaited_status.into(),
        }
    }

    /// Filter for agents waiting to apply a downloaded update.
    pub fn applying_update(hostname: impl Into<String>) -> Self {
        Self::new(hostname, status::APPLYING_UPDATE)
    }

    /// True when `new` belongs to this host, its annotations differ from
    /// `old`, and it carries a v2 signal in the awaited status.
    pub fn matches(&self, old: &ObjectMeta, new: &ObjectMeta) -> bool {
        if new.name.as_deref() != Some(self.hostname.as_str()) {
            return false;
        }
        if old.annotations == new.annotations {
            return false;
        }

        let Some(annotations) = new.annotations.as_ref() else {
            return false;
        };

        SignalData::decode(annotations)
            .ok()
            .is_some_and(|signal| signal.status_str() == Some(self.awaited_status.as_str()))
    }
}
