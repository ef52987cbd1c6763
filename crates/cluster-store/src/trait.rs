//! ClusterStore trait for mocking
//!
//! This trait abstracts the cluster object store and its caches so the
//! reconciler can run against Kubernetes or against the in-memory mock.
//!
//! Reads of intent and pool objects are served from watch-fed caches and may
//! lag behind the API server. Reads of `MachineConfig`s and `ConfigMap`s go to
//! the API server directly.

use crate::error::StoreError;
use crds::{
    ClusterVersion, ContainerRuntimeConfig, ControllerConfig, Image, ImageContentSourcePolicy,
    MachineConfig, MachineConfigPool,
};
use k8s_openapi::api::core::v1::ConfigMap;

/// Trait for cluster object store operations
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait ClusterStore: Send + Sync {
    // Cached reads
    async fn get_runtime_config(&self, name: &str) -> Result<Option<ContainerRuntimeConfig>, StoreError>;
    async fn list_runtime_configs(&self) -> Result<Vec<ContainerRuntimeConfig>, StoreError>;
    async fn list_machine_config_pools(&self) -> Result<Vec<MachineConfigPool>, StoreError>;
    async fn get_controller_config(&self, name: &str) -> Result<Option<ControllerConfig>, StoreError>;
    async fn get_image_config(&self, name: &str) -> Result<Option<Image>, StoreError>;
    async fn get_cluster_version(&self, name: &str) -> Result<Option<ClusterVersion>, StoreError>;
    async fn list_image_content_source_policies(&self) -> Result<Vec<ImageContentSourcePolicy>, StoreError>;

    // MachineConfig operations
    async fn get_machine_config(&self, name: &str) -> Result<Option<MachineConfig>, StoreError>;
    async fn list_machine_configs(&self) -> Result<Vec<MachineConfig>, StoreError>;
    async fn create_machine_config(&self, mc: &MachineConfig) -> Result<MachineConfig, StoreError>;
    /// Replace a MachineConfig; conditional on `metadata.resourceVersion`
    async fn update_machine_config(&self, mc: &MachineConfig) -> Result<MachineConfig, StoreError>;
    async fn delete_machine_config(&self, name: &str) -> Result<(), StoreError>;

    // ContainerRuntimeConfig writes
    /// Replace metadata/spec; conditional on `metadata.resourceVersion`
    async fn update_runtime_config(&self, cfg: &ContainerRuntimeConfig) -> Result<ContainerRuntimeConfig, StoreError>;
    /// Write the status subresource; conditional on `metadata.resourceVersion`
    async fn update_runtime_config_status(&self, cfg: &ContainerRuntimeConfig) -> Result<ContainerRuntimeConfig, StoreError>;
    /// Apply a JSON merge patch (RFC 7386)
    async fn patch_runtime_config(&self, name: &str, patch: &serde_json::Value) -> Result<ContainerRuntimeConfig, StoreError>;

    // ConfigMap operations
    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>, StoreError>;
    async fn create_config_map(&self, cm: &ConfigMap) -> Result<ConfigMap, StoreError>;

    /// Block until every cache has completed its initial list
    async fn wait_for_cache_sync(&self) -> Result<(), StoreError>;
}
