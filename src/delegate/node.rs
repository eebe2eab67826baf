//! Delegate for worker targets, backed by core `Node`.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::crd::{NodeRole, PlanCommandTargetsStatus, TargetState};
use crate::error::Error;
use crate::k8s::{SignalNode, SignalNodeClient};

use super::{ARCH_KEY, ControllerDelegate, OS_KEY, UpdateReadiness, platform_from};

pub struct NodeDelegate;

fn is_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .and_then(|c| c.iter().find(|c| c.type_ == "Ready"))
        .is_some_and(|c| c.status == "True")
}

#[async_trait]
impl ControllerDelegate for NodeDelegate {
    fn role(&self) -> NodeRole {
        NodeRole::Worker
    }

    fn new_object(&self, name: &str) -> SignalNode {
        SignalNode::Worker(Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        })
    }

    fn platform_id(&self, node: &SignalNode) -> Result<String, Error> {
        let SignalNode::Worker(n) = node else {
            return Err(Error::UnknownPlatform(
                node.name(),
                "not a Node".to_string(),
            ));
        };
        let label = |key: &str| node.labels().and_then(|l| l.get(key)).map(String::as_str);
        let info = n.status.as_ref().and_then(|s| s.node_info.as_ref());
        let os = label(OS_KEY).or_else(|| info.map(|i| i.operating_system.as_str()));
        let arch = label(ARCH_KEY).or_else(|| info.map(|i| i.architecture.as_str()));
        platform_from(&node.name(), os, arch)
    }

    /// Workers wait for every in-flight controller to finish, and for the
    /// node itself to report `Ready`.
    async fn update_readiness(
        &self,
        _client: &dyn SignalNodeClient,
        status: &PlanCommandTargetsStatus,
        node: &SignalNode,
    ) -> UpdateReadiness {
        let SignalNode::Worker(n) = node else {
            return UpdateReadiness::Inconsistent;
        };
        if status.count(NodeRole::Controller, TargetState::SignalSent) > 0 {
            return UpdateReadiness::NotYet;
        }
        if !is_ready(n) {
            return UpdateReadiness::NotYet;
        }
        UpdateReadiness::CanUpdate
    }
}
