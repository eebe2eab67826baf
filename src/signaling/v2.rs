//! Version 2 of the signaling annotation format.
//!
//! A signal is two annotations on the target resource: a version marker and
//! a JSON document describing the requested update and, once the agent has
//! picked it up, its progress.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

pub const SIGNAL_VERSION: &str = "v2";
pub const SIGNAL_VERSION_ANNOTATION: &str = "k0sproject.io/autopilot-signal-version";
pub const SIGNAL_DATA_ANNOTATION: &str = "k0sproject.io/autopilot-signal-data";

/// Payload of the signal data annotation.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SignalData {
    pub plan_id: String,

    /// RFC3339 creation time of the signal.
    pub created: String,

    pub command: SignalCommand,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SignalStatus>,
}

/// Requested update. Exactly one update item must be set.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct SignalCommand {
    /// Index of the plan command this signal was issued for.
    pub id: Option<usize>,

    #[serde(default, rename = "k0supdate", skip_serializing_if = "Option::is_none")]
    pub k0s_update: Option<K0sUpdateItem>,

    #[serde(default, rename = "airgapupdate", skip_serializing_if = "Option::is_none")]
    pub airgap_update: Option<AirgapUpdateItem>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct K0sUpdateItem {
    pub url: String,
    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,

    #[serde(default, rename = "forceupdate", skip_serializing_if = "std::ops::Not::not")]
    pub force_update: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct AirgapUpdateItem {
    pub url: String,
    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

/// Progress reported by the agent handling the signal.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct SignalStatus {
    pub status: String,
    pub timestamp: String,
}

impl SignalStatus {
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}

impl SignalData {
    /// New signal for command `id` of plan `plan_id`, stamped now.
    pub fn new(plan_id: impl Into<String>, id: usize) -> Self {
        Self {
            plan_id: plan_id.into(),
            created: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            command: SignalCommand {
                id: Some(id),
                ..Default::default()
            },
            status: None,
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.plan_id.is_empty() {
            return Err(Error::InvalidSignal("planId is required".to_string()));
        }
        if DateTime::parse_from_rfc3339(&self.created).is_err() {
            return Err(Error::InvalidSignal(format!(
                "created '{}' is not an RFC3339 timestamp",
                self.created
            )));
        }
        if self.command.id.is_none() {
            return Err(Error::InvalidSignal("command id is required".to_string()));
        }

        match (&self.command.k0s_update, &self.command.airgap_update) {
            (Some(k0s), None) => validate_item(&k0s.version, &k0s.url, k0s.sha256.as_deref()),
            (None, Some(airgap)) => {
                validate_item(&airgap.version, &airgap.url, airgap.sha256.as_deref())
            }
            (None, None) => Err(Error::InvalidSignal(
                "command has no update item".to_string(),
            )),
            (Some(_), Some(_)) => Err(Error::InvalidSignal(
                "command has more than one update item".to_string(),
            )),
        }
    }

    /// Write the signal into `annotations`, replacing any previous signal.
    pub fn marshal(&self, annotations: &mut BTreeMap<String, String>) -> Result<(), Error> {
        let data = serde_json::to_string(self)?;
        annotations.insert(
            SIGNAL_VERSION_ANNOTATION.to_string(),
            SIGNAL_VERSION.to_string(),
        );
        annotations.insert(SIGNAL_DATA_ANNOTATION.to_string(), data);
        Ok(())
    }

    /// Read and validate a signal from `annotations`.
    pub fn unmarshal(annotations: &BTreeMap<String, String>) -> Result<Self, Error> {
        let signal = Self::decode(annotations)?;
        signal.validate()?;
        Ok(signal)
    }

    /// Read a signal from `annotations`, checking only the envelope.
    pub fn decode(annotations: &BTreeMap<String, String>) -> Result<Self, Error> {
        let (Some(version), Some(data)) = (
            annotations.get(SIGNAL_VERSION_ANNOTATION),
            annotations.get(SIGNAL_DATA_ANNOTATION),
        ) else {
            return Err(Error::MissingSignal);
        };

        if version != SIGNAL_VERSION {
            return Err(Error::UnsupportedSignalVersion(version.clone()));
        }

        Ok(serde_json::from_str(data)?)
    }

    /// Agent-reported status string, if any.
    pub fn status_str(&self) -> Option<&str> {
        self.status.as_ref().map(|s| s.status.as_str())
    }
}

/// True when both signaling annotations are present.
pub fn is_signaling_present(annotations: &BTreeMap<String, String>) -> bool {
    annotations.contains_key(SIGNAL_VERSION_ANNOTATION)
        && annotations.contains_key(SIGNAL_DATA_ANNOTATION)
}

fn validate_item(version: &str, url: &str, sha256: Option<&str>) -> Result<(), Error> {
    if version.is_empty() {
        return Err(Error::InvalidSignal("version is required".to_string()));
    }
    if !is_http_url(url) {
        return Err(Error::InvalidSignal(format!("url '{url}' is not an http(s) URL")));
    }
    if let Some(sha) = sha256
        && !(sha.len() == 64 && sha.bytes().all(|b| b.is_ascii_hexdigit()))
    {
        return Err(Error::InvalidSignal(format!(
            "sha256 '{sha}' is not a 64 character hex digest"
        )));
    }
    Ok(())
}

fn is_http_url(url: &str) -> bool {
    url.strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .and_then(|rest| rest.split(['/', '?', '#']).next())
        .is_some_and(|host| !host.is_empty())
}
