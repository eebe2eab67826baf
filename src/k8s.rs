//! Kubernetes access for signal nodes (`ControlNode` and `Node`).

pub mod client;
#[cfg(test)]
pub mod fake;

#[cfg(test)]
pub use client::MockSignalNodeClient;
pub use client::{KubeSignalNodeClient, SignalNode, SignalNodeClient};
