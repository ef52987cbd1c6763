//! Controller-specific error types.
//!
//! Errors are classified for the dispatch queues: conflicts are retried
//! inside the mutation that hit them, terminal errors are recorded on the
//! intent's status and never requeued, everything else is retried with
//! backoff.

use cluster_store::StoreError;
use config_render::RenderError;
use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the container runtime config controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Cluster store error
    #[error("{0}")]
    Store(#[from] StoreError),

    /// Configuration rendering error
    #[error("{0}")]
    Render(#[from] RenderError),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML manifest error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Invalid controller configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// ContainerRuntimeConfig spec failed validation
    #[error("{0}")]
    Validation(String),

    /// Selector of a ContainerRuntimeConfig matched no pool
    #[error("could not find any MachineConfigPool set for ContainerRuntimeConfig {0}")]
    NoMatchingPools(String),

    /// Release image reference could not be parsed
    #[error("error parsing release image reference {0:?}")]
    ReleaseImageParse(String),

    /// A required cluster object is missing
    #[error("{kind} {name} not found")]
    MissingObject { kind: &'static str, name: String },

    /// Reconciliation failed
    #[error("{0}")]
    Reconciliation(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Bootstrap file I/O failed
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl ControllerError {
    /// Optimistic-concurrency conflict worth an immediate retry
    pub fn is_conflict(&self) -> bool {
        match self {
            ControllerError::Store(e) => e.is_conflict(),
            ControllerError::Kube(KubeError::Api(ae)) => ae.code == 409,
            _ => false,
        }
    }

    /// Errors that only a spec edit can fix; they are not requeued
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ControllerError::Validation(_) | ControllerError::NoMatchingPools(_)
        )
    }
}
