//! Custom error types for autopilot.

use thiserror::Error;

/// Errors that can occur while orchestrating a plan.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubernetesApi(#[from] kube::Error),

    #[error("Write conflict on {kind} '{name}': {message}")]
    Conflict {
        kind: &'static str,
        name: String,
        message: String,
    },

    #[error("Invalid signal data: {0}")]
    InvalidSignal(String),

    #[error("Unsupported signal version: {0}")]
    UnsupportedSignalVersion(String),

    #[error("Signal data missing from annotations")]
    MissingSignal,

    #[error("Unable to determine platform of '{0}': {1}")]
    UnknownPlatform(String, String),

    #[error("No command provider registered for '{0}'")]
    MissingProvider(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Lease error: {0}")]
    Lease(String),

    #[error("Invalid version format: {0}")]
    InvalidVersion(String),

    #[error("Readiness probe of '{name}' failed: {message}")]
    Probe { name: String, message: String },
}

impl Error {
    /// Build an error from a Kubernetes write, keeping 409s distinguishable.
    pub fn from_write(kind: &'static str, name: &str, err: kube::Error) -> Self {
        if matches!(&err, kube::Error::Api(ae) if ae.code == 409) {
            return Self::Conflict {
                kind,
                name: name.to_string(),
                message: err.to_string(),
            };
        }
        Self::KubernetesApi(err)
    }

    /// Returns true if this error is transient and should be retried quickly.
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::KubernetesApi(_) | Self::Conflict { .. } | Self::Lease(_)
        )
    }
}
