//! In-memory `SignalNodeClient` and resource builders for tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, NodeCondition, NodeStatus, NodeSystemInfo};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use super::client::{SignalNode, SignalNodeClient};
use crate::crd::{
    ControlNode, ControlNodeAddress, ControlNodeSpec, ControlNodeStatus, NodeRole,
    PlanCommandTargetDiscoverySelector,
};
use crate::delegate::ReadyProber;
use crate::error::Error;

const OS_LABEL: &str = "kubernetes.io/os";
const ARCH_LABEL: &str = "kubernetes.io/arch";

/// `ControlNode` carrying platform annotations. A `live` controller reports
/// an address in its status.
pub fn control_node(name: &str, os: &str, arch: &str, live: bool) -> SignalNode {
    let mut cn = ControlNode::new(name, ControlNodeSpec {});
    cn.metadata.annotations = Some(BTreeMap::from([
        (OS_LABEL.to_string(), os.to_string()),
        (ARCH_LABEL.to_string(), arch.to_string()),
    ]));
    cn.status = Some(ControlNodeStatus {
        addresses: if live {
            vec![ControlNodeAddress {
                type_: "InternalIP".to_string(),
                address: "10.0.0.1".to_string(),
            }]
        } else {
            vec![]
        },
    });
    SignalNode::Controller(cn)
}

/// Live `linux-amd64` controller reporting `address` as its internal IP.
pub fn control_node_at(name: &str, address: &str) -> SignalNode {
    let mut node = control_node(name, "linux", "amd64", true);
    if let SignalNode::Controller(cn) = &mut node {
        cn.status = Some(ControlNodeStatus {
            addresses: vec![ControlNodeAddress {
                type_: "InternalIP".to_string(),
                address: address.to_string(),
            }],
        });
    }
    node
}

/// `ReadyProber` that fails for a fixed set of addresses and records the
/// names it was asked to probe.
#[derive(Default)]
pub struct FakeReadyProber {
    unreachable: BTreeSet<String>,
    probed: Mutex<Vec<String>>,
}

impl FakeReadyProber {
    pub fn unreachable<'a>(addresses: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            unreachable: addresses.into_iter().map(str::to_string).collect(),
            ..Self::default()
        }
    }

    /// Probed node names, sorted.
    pub fn probed(&self) -> Vec<String> {
        let mut probed = self.probed.lock().unwrap().clone();
        probed.sort();
        probed
    }
}

#[async_trait]
impl ReadyProber for FakeReadyProber {
    async fn probe(&self, name: &str, address: &str) -> Result<(), Error> {
        self.probed.lock().unwrap().push(name.to_string());
        if self.unreachable.contains(address) {
            return Err(Error::Probe {
                name: name.to_string(),
                message: format!("{address} unreachable"),
            });
        }
        Ok(())
    }
}

/// Worker `Node` carrying platform labels and a `Ready` condition.
pub fn worker(name: &str, os: &str, arch: &str, ready: bool) -> SignalNode {
    SignalNode::Worker(Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(BTreeMap::from([
                (OS_LABEL.to_string(), os.to_string()),
                (ARCH_LABEL.to_string(), arch.to_string()),
            ])),
            ..Default::default()
        },
        status: Some(NodeStatus {
            conditions: Some(vec![NodeCondition {
                type_: "Ready".to_string(),
                status: if ready { "True" } else { "False" }.to_string(),
                ..Default::default()
            }]),
            node_info: Some(NodeSystemInfo {
                operating_system: os.to_string(),
                architecture: arch.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// In-memory cluster of signal nodes. Writes are checked against the stored
/// `resourceVersion` like the API server does.
#[derive(Default)]
pub struct FakeSignalNodeClient {
    nodes: Mutex<BTreeMap<(NodeRole, String), SignalNode>>,
    writes: Mutex<Vec<SignalNode>>,
}

impl FakeSignalNodeClient {
    pub fn with_nodes(nodes: impl IntoIterator<Item = SignalNode>) -> Self {
        let client = Self::default();
        for node in nodes {
            client.store(node);
        }
        client
    }

    /// Insert or overwrite a node out of band, bumping its version.
    pub fn store(&self, mut node: SignalNode) {
        let mut nodes = self.nodes.lock().unwrap();
        let key = (node.role(), node.name());
        let version = nodes
            .get(&key)
            .and_then(|n| n.resource_version())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);
        set_resource_version(&mut node, version + 1);
        nodes.insert(key, node);
    }

    pub fn node(&self, role: NodeRole, name: &str) -> Option<SignalNode> {
        self.nodes
            .lock()
            .unwrap()
            .get(&(role, name.to_string()))
            .cloned()
    }

    /// Nodes written through `replace`, in order.
    pub fn writes(&self) -> Vec<SignalNode> {
        self.writes.lock().unwrap().clone()
    }
}

fn set_resource_version(node: &mut SignalNode, version: u64) {
    let meta = match node {
        SignalNode::Controller(cn) => &mut cn.metadata,
        SignalNode::Worker(n) => &mut n.metadata,
    };
    meta.resource_version = Some(version.to_string());
}

fn matches_selector(node: &SignalNode, selector: &PlanCommandTargetDiscoverySelector) -> bool {
    let labels = node.labels();
    let label_ok = selector.labels.as_deref().map_or(true, |expr| {
        expr.split(',').filter(|t| !t.is_empty()).all(|term| {
            term.split_once('=').is_some_and(|(k, v)| {
                labels.and_then(|l| l.get(k.trim())).map(String::as_str) == Some(v.trim())
            })
        })
    });
    let field_ok = selector.fields.as_deref().map_or(true, |expr| {
        expr.split(',').filter(|t| !t.is_empty()).all(|term| {
            term.split_once('=')
                .is_some_and(|(k, v)| k.trim() == "metadata.name" && node.name() == v.trim())
        })
    });
    label_ok && field_ok
}

#[async_trait]
impl SignalNodeClient for FakeSignalNodeClient {
    async fn get(&self, role: NodeRole, name: &str) -> Result<Option<SignalNode>, Error> {
        Ok(self.node(role, name))
    }

    async fn list(
        &self,
        role: NodeRole,
        selector: &PlanCommandTargetDiscoverySelector,
    ) -> Result<Vec<SignalNode>, Error> {
        Ok(self
            .nodes
            .lock()
            .unwrap()
            .iter()
            .filter(|((r, _), node)| *r == role && matches_selector(node, selector))
            .map(|(_, node)| node.clone())
            .collect())
    }

    async fn replace(&self, node: &SignalNode) -> Result<SignalNode, Error> {
        let mut nodes = self.nodes.lock().unwrap();
        let key = (node.role(), node.name());
        let Some(current) = nodes.get(&key) else {
            return Err(Error::Conflict {
                kind: node.role().kind(),
                name: node.name(),
                message: "not found".to_string(),
            });
        };
        if current.resource_version() != node.resource_version() {
            return Err(Error::Conflict {
                kind: node.role().kind(),
                name: node.name(),
                message: "the object has been modified".to_string(),
            });
        }

        let version = current
            .resource_version()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);
        let mut stored = node.clone();
        set_resource_version(&mut stored, version + 1);
        nodes.insert(key, stored.clone());
        self.writes.lock().unwrap().push(stored.clone());
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replace_checks_resource_version() {
        let client = FakeSignalNodeClient::with_nodes([worker("worker0", "linux", "amd64", true)]);
        let node = client.get(NodeRole::Worker, "worker0").await.unwrap().unwrap();
        assert_eq!(node.resource_version(), Some("1"));

        let written = client.replace(&node).await.unwrap();
        assert_eq!(written.resource_version(), Some("2"));

        // Stale copy is rejected.
        assert!(matches!(
            client.replace(&node).await,
            Err(Error::Conflict { .. })
        ));
        assert_eq!(client.writes().len(), 1);
    }

    #[tokio::test]
    async fn test_list_by_selector() {
        let client = FakeSignalNodeClient::with_nodes([
            worker("worker0", "linux", "amd64", true),
            worker("worker1", "linux", "arm64", true),
            control_node("controller0", "linux", "amd64", true),
        ]);

        let arm = PlanCommandTargetDiscoverySelector {
            labels: Some("kubernetes.io/arch=arm64".to_string()),
            fields: None,
        };
        let found = client.list(NodeRole::Worker, &arm).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name(), "worker1");

        let by_name = PlanCommandTargetDiscoverySelector {
            labels: None,
            fields: Some("metadata.name=worker0".to_string()),
        };
        let found = client.list(NodeRole::Worker, &by_name).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name(), "worker0");

        let all = PlanCommandTargetDiscoverySelector::default();
        assert_eq!(client.list(NodeRole::Worker, &all).await.unwrap().len(), 2);
    }
}
