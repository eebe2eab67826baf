//! `ControlNode` CRD: the plan-facing representation of a controller host.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// `ControlNode` carries no desired state; it exists so controllers can be
/// targeted and signaled like worker `Node`s.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "autopilot.k0sproject.io",
    version = "v1beta2",
    kind = "ControlNode",
    status = "ControlNodeStatus",
    printcolumn = r#"{"name":"AGE","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
pub struct ControlNodeSpec {}

/// Reported by the agent running on the controller itself.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ControlNodeStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<ControlNodeAddress>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ControlNodeAddress {
    /// `InternalIP`, `ExternalIP` or `Hostname`.
    #[serde(rename = "type")]
    pub type_: String,
    pub address: String,
}

impl ControlNodeStatus {
    /// First `InternalIP` address reported by the controller, if any.
    pub fn internal_ip(&self) -> Option<&str> {
        self.addresses
            .iter()
            .find(|a| a.type_ == "InternalIP" && !a.address.is_empty())
            .map(|a| a.address.as_str())
    }
}
