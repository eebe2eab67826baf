//! Controller delegates: per-role knowledge about signal node resources.
//!
//! The plan engine never inspects `ControlNode` or `Node` directly; it asks
//! the delegate registered for the target group.

pub mod control_node;
pub mod node;
pub mod prober;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::crd::{NodeRole, PlanCommandTargetStatus, PlanCommandTargetsStatus, TargetState};
use crate::error::Error;
use crate::k8s::{SignalNode, SignalNodeClient};

pub use control_node::ControlNodeDelegate;
pub use node::NodeDelegate;
pub use prober::{HttpReadyProber, ReadyProber};

/// Annotation/label keys carrying the platform of a signal node.
pub const OS_KEY: &str = "kubernetes.io/os";
pub const ARCH_KEY: &str = "kubernetes.io/arch";

/// Whether a target may be signaled right now.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateReadiness {
    CanUpdate,
    /// The target cannot be updated safely; the plan must stop.
    Inconsistent,
    /// Not yet; check again later.
    NotYet,
}

impl std::fmt::Display for UpdateReadiness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CanUpdate => write!(f, "CanUpdate"),
            Self::Inconsistent => write!(f, "Inconsistent"),
            Self::NotYet => write!(f, "NotYet"),
        }
    }
}

#[async_trait]
pub trait ControllerDelegate: Send + Sync {
    fn role(&self) -> NodeRole;

    /// Fetch the signal node backing target `name`.
    async fn get(
        &self,
        client: &dyn SignalNodeClient,
        name: &str,
    ) -> Result<Option<SignalNode>, Error> {
        client.get(self.role(), name).await
    }

    /// Empty resource of this delegate's kind.
    fn new_object(&self, name: &str) -> SignalNode;

    fn deep_copy(&self, node: &SignalNode) -> SignalNode {
        node.clone()
    }

    /// Platform identifier `<os>-<arch>` of the node.
    fn platform_id(&self, node: &SignalNode) -> Result<String, Error>;

    /// Whether `node` may be signaled, given the command's target status.
    async fn update_readiness(
        &self,
        client: &dyn SignalNodeClient,
        status: &PlanCommandTargetsStatus,
        node: &SignalNode,
    ) -> UpdateReadiness;

    /// Target statuses for a discovered set of nodes.
    fn to_target_status(
        &self,
        nodes: &[SignalNode],
        state: TargetState,
    ) -> Vec<PlanCommandTargetStatus> {
        nodes
            .iter()
            .map(|n| PlanCommandTargetStatus::new(n.name(), state))
            .collect()
    }
}

/// Delegates keyed by the target group they serve.
pub type ControllerDelegateMap = BTreeMap<NodeRole, Arc<dyn ControllerDelegate>>;

/// The standard delegate for each role. Controllers are probed through
/// `prober` before any of them is signaled.
pub fn default_delegates(prober: Arc<dyn ReadyProber>) -> ControllerDelegateMap {
    BTreeMap::from([
        (
            NodeRole::Controller,
            Arc::new(ControlNodeDelegate::new(prober)) as Arc<dyn ControllerDelegate>,
        ),
        (
            NodeRole::Worker,
            Arc::new(NodeDelegate) as Arc<dyn ControllerDelegate>,
        ),
    ])
}

/// Join `os` and `arch` into a platform id, rejecting blanks.
fn platform_from(name: &str, os: Option<&str>, arch: Option<&str>) -> Result<String, Error> {
    match (
        os.filter(|s| !s.is_empty()),
        arch.filter(|s| !s.is_empty()),
    ) {
        (Some(os), Some(arch)) => Ok(format!("{os}-{arch}")),
        (None, _) => Err(Error::UnknownPlatform(
            name.to_string(),
            format!("missing {OS_KEY}"),
        )),
        (_, None) => Err(Error::UnknownPlatform(
            name.to_string(),
            format!("missing {ARCH_KEY}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::fake;

    #[test]
    fn test_default_delegates() {
        let delegates = default_delegates(Arc::new(fake::FakeReadyProber::default()));
        assert_eq!(delegates.len(), 2);
        assert_eq!(delegates[&NodeRole::Controller].role(), NodeRole::Controller);
        assert_eq!(delegates[&NodeRole::Worker].role(), NodeRole::Worker);
    }

    #[test]
    fn test_platform_from() {
        assert_eq!(
            platform_from("n", Some("linux"), Some("amd64")).unwrap(),
            "linux-amd64"
        );
        assert!(matches!(
            platform_from("n", Some(""), Some("amd64")),
            Err(Error::UnknownPlatform(..))
        ));
        assert!(matches!(
            platform_from("n", Some("linux"), None),
            Err(Error::UnknownPlatform(..))
        ));
    }

    #[test]
    fn test_to_target_status() {
        let nodes = [
            fake::worker("worker0", "linux", "amd64", true),
            fake::worker("worker1", "linux", "amd64", true),
        ];
        let statuses = NodeDelegate.to_target_status(&nodes, TargetState::SignalPending);
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[1].name, "worker1");
        assert!(statuses.iter().all(|s| s.state == TargetState::SignalPending));
    }

    #[tokio::test]
    async fn test_get_uses_delegate_role() {
        let client = fake::FakeSignalNodeClient::with_nodes([
            fake::control_node("node0", "linux", "amd64", true),
        ]);
        let controllers = ControlNodeDelegate::new(Arc::new(fake::FakeReadyProber::default()));
        assert!(controllers.get(&client, "node0").await.unwrap().is_some());
        assert!(NodeDelegate.get(&client, "node0").await.unwrap().is_none());
    }
}
