//! Delegate for controller targets, backed by `ControlNode`.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{error, info};

use crate::crd::{
    ControlNode, ControlNodeSpec, ControlNodeStatus, NodeRole, PlanCommandTargetsStatus,
};
use crate::error::Error;
use crate::k8s::{SignalNode, SignalNodeClient};

use super::{ARCH_KEY, ControllerDelegate, OS_KEY, ReadyProber, UpdateReadiness, platform_from};

pub struct ControlNodeDelegate {
    prober: Arc<dyn ReadyProber>,
}

impl ControlNodeDelegate {
    pub fn new(prober: Arc<dyn ReadyProber>) -> Self {
        Self { prober }
    }

    /// Probe the API server of controller `name` at its internal IP.
    async fn probe_one(&self, client: &dyn SignalNodeClient, name: &str) -> Result<(), Error> {
        let failed = |message: &str| Error::Probe {
            name: name.to_string(),
            message: message.to_string(),
        };
        let Some(SignalNode::Controller(cn)) = client.get(NodeRole::Controller, name).await?
        else {
            return Err(failed("ControlNode not found"));
        };
        let address = cn
            .status
            .as_ref()
            .and_then(ControlNodeStatus::internal_ip)
            .ok_or_else(|| failed("no internal IP address found"))?;

        info!(node = name, address, "Probing controller");
        self.prober.probe(name, address).await
    }
}

#[async_trait]
impl ControllerDelegate for ControlNodeDelegate {
    fn role(&self) -> NodeRole {
        NodeRole::Controller
    }

    fn new_object(&self, name: &str) -> SignalNode {
        SignalNode::Controller(ControlNode::new(name, ControlNodeSpec {}))
    }

    fn platform_id(&self, node: &SignalNode) -> Result<String, Error> {
        let lookup = |key: &str| {
            node.annotations()
                .and_then(|a| a.get(key))
                .or_else(|| node.labels().and_then(|l| l.get(key)))
                .map(String::as_str)
        };
        platform_from(&node.name(), lookup(OS_KEY), lookup(ARCH_KEY))
    }

    /// A controller may only be updated while every controller of the
    /// command, not just the selected one, answers its readiness probe.
    async fn update_readiness(
        &self,
        client: &dyn SignalNodeClient,
        status: &PlanCommandTargetsStatus,
        node: &SignalNode,
    ) -> UpdateReadiness {
        if !matches!(node, SignalNode::Controller(_)) {
            return UpdateReadiness::Inconsistent;
        }

        let selected = node.name();
        let mut names: Vec<&str> = status.controllers.iter().map(|t| t.name.as_str()).collect();
        if !names.contains(&selected.as_str()) {
            names.push(selected.as_str());
        }

        let failures: Vec<String> = join_all(names.iter().map(|name| self.probe_one(client, name)))
            .await
            .into_iter()
            .filter_map(Result::err)
            .map(|e| e.to_string())
            .collect();
        if failures.is_empty() {
            return UpdateReadiness::CanUpdate;
        }

        error!(
            "Plan can not be applied to controllers: {}",
            failures.join("; ")
        );
        UpdateReadiness::Inconsistent
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::crd::{PlanCommandTargetStatus, TargetState};
    use crate::k8s::fake::{self, FakeReadyProber, FakeSignalNodeClient};

    fn delegate(prober: FakeReadyProber) -> (ControlNodeDelegate, Arc<FakeReadyProber>) {
        let prober = Arc::new(prober);
        (ControlNodeDelegate::new(prober.clone()), prober)
    }

    fn controllers(names: &[(&str, TargetState)]) -> PlanCommandTargetsStatus {
        PlanCommandTargetsStatus {
            controllers: names
                .iter()
                .map(|(name, state)| PlanCommandTargetStatus::new(*name, *state))
                .collect(),
            workers: vec![],
        }
    }

    #[test]
    fn test_platform_from_annotations() {
        let (delegate, _) = delegate(FakeReadyProber::default());
        let node = fake::control_node("controller0", "linux", "arm64", true);
        assert_eq!(delegate.platform_id(&node).unwrap(), "linux-arm64");
    }

    #[test]
    fn test_platform_falls_back_to_labels() {
        let (delegate, _) = delegate(FakeReadyProber::default());
        let SignalNode::Controller(mut cn) = delegate.new_object("controller0") else {
            unreachable!();
        };
        cn.metadata.labels = Some(BTreeMap::from([
            (OS_KEY.to_string(), "linux".to_string()),
            (ARCH_KEY.to_string(), "amd64".to_string()),
        ]));
        let node = SignalNode::Controller(cn);
        assert_eq!(delegate.platform_id(&node).unwrap(), "linux-amd64");
    }

    #[test]
    fn test_platform_unknown() {
        let (delegate, _) = delegate(FakeReadyProber::default());
        let node = delegate.new_object("controller0");
        assert!(matches!(
            delegate.platform_id(&node),
            Err(Error::UnknownPlatform(name, _)) if name == "controller0"
        ));
    }

    #[tokio::test]
    async fn test_readiness_checks_every_controller() {
        let client = FakeSignalNodeClient::with_nodes([
            fake::control_node_at("controller0", "10.0.0.1"),
            fake::control_node_at("controller1", "10.0.0.2"),
            fake::control_node_at("controller2", "10.0.0.3"),
        ]);
        let status = controllers(&[
            ("controller0", TargetState::SignalCompleted),
            ("controller1", TargetState::SignalPending),
            ("controller2", TargetState::SignalPending),
        ]);
        let (delegate, prober) = delegate(FakeReadyProber::default());
        let selected = client.node(NodeRole::Controller, "controller1").unwrap();

        assert_eq!(
            delegate.update_readiness(&client, &status, &selected).await,
            UpdateReadiness::CanUpdate
        );
        assert_eq!(
            prober.probed(),
            vec!["controller0", "controller1", "controller2"]
        );
    }

    #[tokio::test]
    async fn test_readiness_inconsistent_when_peer_not_ready() {
        let client = FakeSignalNodeClient::with_nodes([
            fake::control_node_at("controller0", "10.0.0.1"),
            fake::control_node_at("controller1", "10.0.0.2"),
        ]);
        let status = controllers(&[
            ("controller0", TargetState::SignalPending),
            ("controller1", TargetState::SignalPending),
        ]);
        let (delegate, _) = delegate(FakeReadyProber::unreachable(["10.0.0.2"]));
        let selected = client.node(NodeRole::Controller, "controller0").unwrap();

        assert_eq!(
            delegate.update_readiness(&client, &status, &selected).await,
            UpdateReadiness::Inconsistent
        );
    }

    #[tokio::test]
    async fn test_readiness_inconsistent_without_address() {
        let client = FakeSignalNodeClient::with_nodes([
            fake::control_node("controller0", "linux", "amd64", true),
            fake::control_node("controller1", "linux", "amd64", false),
        ]);
        let status = controllers(&[
            ("controller0", TargetState::SignalPending),
            ("controller1", TargetState::SignalPending),
        ]);
        let (delegate, prober) = delegate(FakeReadyProber::default());
        let selected = client.node(NodeRole::Controller, "controller0").unwrap();

        assert_eq!(
            delegate.update_readiness(&client, &status, &selected).await,
            UpdateReadiness::Inconsistent
        );
        assert_eq!(prober.probed(), vec!["controller0"]);
    }

    #[tokio::test]
    async fn test_readiness_inconsistent_when_peer_missing() {
        let client =
            FakeSignalNodeClient::with_nodes([fake::control_node_at("controller0", "10.0.0.1")]);
        let status = controllers(&[
            ("controller0", TargetState::SignalPending),
            ("controller1", TargetState::SignalCompleted),
        ]);
        let (delegate, _) = delegate(FakeReadyProber::default());
        let selected = client.node(NodeRole::Controller, "controller0").unwrap();

        assert_eq!(
            delegate.update_readiness(&client, &status, &selected).await,
            UpdateReadiness::Inconsistent
        );
    }

    #[tokio::test]
    async fn test_readiness_checks_selected_node_outside_status() {
        let client =
            FakeSignalNodeClient::with_nodes([fake::control_node_at("controller0", "10.0.0.1")]);
        let (delegate, prober) = delegate(FakeReadyProber::unreachable(["10.0.0.1"]));
        let selected = client.node(NodeRole::Controller, "controller0").unwrap();

        assert_eq!(
            delegate
                .update_readiness(&client, &PlanCommandTargetsStatus::default(), &selected)
                .await,
            UpdateReadiness::Inconsistent
        );
        assert_eq!(prober.probed(), vec!["controller0"]);
    }

    #[tokio::test]
    async fn test_readiness_rejects_wrong_kind() {
        let client = FakeSignalNodeClient::default();
        let (delegate, prober) = delegate(FakeReadyProber::default());
        let worker = fake::worker("worker0", "linux", "amd64", true);
        assert_eq!(
            delegate
                .update_readiness(&client, &PlanCommandTargetsStatus::default(), &worker)
                .await,
            UpdateReadiness::Inconsistent
        );
        assert!(prober.probed().is_empty());
    }
}
