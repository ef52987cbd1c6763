//! Cluster store errors

use thiserror::Error;

/// Errors that can occur when reading or writing cluster objects
#[derive(Debug, Error)]
pub enum StoreError {
    /// Kubernetes API error not covered by a more specific variant
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource version mismatch on a conditional write
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Create of an object that already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Patch could not be computed or applied
    #[error("Invalid patch: {0}")]
    InvalidPatch(String),

    /// Watch-fed caches never became ready
    #[error("Cache not ready: {0}")]
    CacheNotReady(String),
}

impl StoreError {
    /// Map a kube API error onto the store taxonomy
    pub fn from_kube(err: kube::Error, what: &str) -> Self {
        match err {
            kube::Error::Api(ref ae) if ae.code == 404 => StoreError::NotFound(what.to_string()),
            kube::Error::Api(ref ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
                StoreError::AlreadyExists(what.to_string())
            }
            kube::Error::Api(ref ae) if ae.code == 409 => {
                StoreError::Conflict(format!("{}: {}", what, ae.message))
            }
            other => StoreError::Kube(other),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists(_))
    }
}
