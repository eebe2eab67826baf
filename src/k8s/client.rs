//! Signal node client: read, discover and write the resources that receive
//! update signals.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, ListParams, PostParams};
use kube::{Client, ResourceExt};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::crd::{ControlNode, NodeRole, PlanCommandTargetDiscoverySelector};
use crate::error::Error;

/// A resource that can receive a signal. Controllers are represented by
/// `ControlNode`s, workers by core `Node`s.
#[derive(Clone, Debug)]
pub enum SignalNode {
    Controller(ControlNode),
    Worker(Node),
}

impl SignalNode {
    pub fn name(&self) -> String {
        match self {
            Self::Controller(cn) => cn.name_any(),
            Self::Worker(node) => node.name_any(),
        }
    }

    pub const fn role(&self) -> NodeRole {
        match self {
            Self::Controller(_) => NodeRole::Controller,
            Self::Worker(_) => NodeRole::Worker,
        }
    }

    pub const fn meta(&self) -> &ObjectMeta {
        match self {
            Self::Controller(cn) => &cn.metadata,
            Self::Worker(node) => &node.metadata,
        }
    }

    const fn meta_mut(&mut self) -> &mut ObjectMeta {
        match self {
            Self::Controller(cn) => &mut cn.metadata,
            Self::Worker(node) => &mut node.metadata,
        }
    }

    pub fn annotations(&self) -> Option<&BTreeMap<String, String>> {
        self.meta().annotations.as_ref()
    }

    /// Annotations map, created if the resource has none.
    pub fn annotations_mut(&mut self) -> &mut BTreeMap<String, String> {
        self.meta_mut().annotations.get_or_insert_with(BTreeMap::new)
    }

    pub fn labels(&self) -> Option<&BTreeMap<String, String>> {
        self.meta().labels.as_ref()
    }

    pub fn resource_version(&self) -> Option<&str> {
        self.meta().resource_version.as_deref()
    }
}

/// Trait abstracting signal node access.
///
/// Allows the plan engine to be exercised against an in-memory cluster in
/// tests while using the real API server in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SignalNodeClient: Send + Sync {
    /// Fetch a signal node by name. `Ok(None)` if it does not exist.
    async fn get(&self, role: NodeRole, name: &str) -> Result<Option<SignalNode>, Error>;

    /// List signal nodes matching a label/field selector.
    async fn list(
        &self,
        role: NodeRole,
        selector: &PlanCommandTargetDiscoverySelector,
    ) -> Result<Vec<SignalNode>, Error>;

    /// Replace a signal node, guarded by its `resourceVersion`.
    async fn replace(&self, node: &SignalNode) -> Result<SignalNode, Error>;
}

/// `SignalNodeClient` backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeSignalNodeClient {
    client: Client,
}

impl KubeSignalNodeClient {
    pub const fn new(client: Client) -> Self {
        Self { client }
    }

    fn control_nodes(&self) -> Api<ControlNode> {
        Api::all(self.client.clone())
    }

    fn nodes(&self) -> Api<Node> {
        Api::all(self.client.clone())
    }
}

fn list_params(selector: &PlanCommandTargetDiscoverySelector) -> ListParams {
    let mut lp = ListParams::default();
    if let Some(labels) = selector.labels.as_deref().filter(|s| !s.is_empty()) {
        lp = lp.labels(labels);
    }
    if let Some(fields) = selector.fields.as_deref().filter(|s| !s.is_empty()) {
        lp = lp.fields(fields);
    }
    lp
}

#[async_trait]
impl SignalNodeClient for KubeSignalNodeClient {
    async fn get(&self, role: NodeRole, name: &str) -> Result<Option<SignalNode>, Error> {
        let node = match role {
            NodeRole::Controller => self
                .control_nodes()
                .get_opt(name)
                .await?
                .map(SignalNode::Controller),
            NodeRole::Worker => self.nodes().get_opt(name).await?.map(SignalNode::Worker),
        };
        debug!(role = %role, name, found = node.is_some(), "Fetched signal node");
        Ok(node)
    }

    async fn list(
        &self,
        role: NodeRole,
        selector: &PlanCommandTargetDiscoverySelector,
    ) -> Result<Vec<SignalNode>, Error> {
        let lp = list_params(selector);
        let nodes: Vec<SignalNode> = match role {
            NodeRole::Controller => self
                .control_nodes()
                .list(&lp)
                .await?
                .items
                .into_iter()
                .map(SignalNode::Controller)
                .collect(),
            NodeRole::Worker => self
                .nodes()
                .list(&lp)
                .await?
                .items
                .into_iter()
                .map(SignalNode::Worker)
                .collect(),
        };
        debug!(role = %role, count = nodes.len(), "Listed signal nodes");
        Ok(nodes)
    }

    async fn replace(&self, node: &SignalNode) -> Result<SignalNode, Error> {
        let name = node.name();
        let pp = PostParams::default();
        let kind = node.role().kind();
        match node {
            SignalNode::Controller(cn) => self
                .control_nodes()
                .replace(&name, &pp, cn)
                .await
                .map(SignalNode::Controller)
                .map_err(|e| Error::from_write(kind, &name, e)),
            SignalNode::Worker(n) => self
                .nodes()
                .replace(&name, &pp, n)
                .await
                .map(SignalNode::Worker)
                .map_err(|e| Error::from_write(kind, &name, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::fake;

    #[test]
    fn test_annotations_mut_creates_map() {
        let mut node = fake::worker("worker0", "linux", "amd64", true);
        node.meta_mut().annotations = None;
        assert!(node.annotations().is_none());

        node.annotations_mut().insert("a".to_string(), "b".to_string());
        assert_eq!(node.annotations().unwrap()["a"], "b");
    }

    #[test]
    fn test_signal_node_role() {
        let cn = fake::control_node("controller0", "linux", "amd64", true);
        assert_eq!(cn.role(), NodeRole::Controller);
        assert_eq!(cn.name(), "controller0");

        let worker = fake::worker("worker0", "linux", "arm64", true);
        assert_eq!(worker.role(), NodeRole::Worker);
        assert_eq!(worker.labels().unwrap()["kubernetes.io/arch"], "arm64");
    }

    #[test]
    fn test_list_params_skips_empty_selectors() {
        let lp = list_params(&PlanCommandTargetDiscoverySelector {
            labels: Some("foo=bar".to_string()),
            fields: Some(String::new()),
        });
        assert_eq!(lp.label_selector.as_deref(), Some("foo=bar"));
        assert!(lp.field_selector.is_none());
    }
}
