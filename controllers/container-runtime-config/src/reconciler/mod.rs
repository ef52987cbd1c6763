//! Synchronization logic for container runtime and image registry configuration.
//!
//! - `runtime_config`: ContainerRuntimeConfig → `99-<pool>-generated-containerruntime[-N]`
//! - `image_config`: Image `cluster` → `99-<pool>-generated-registries`
//! - `seccomp`: one-time `99-<pool>-generated-crio-seccomp-use-default`
//! - `cascade`: finalizer push/pop and owned MachineConfig deletion
//! - `status`: condition recording and annotation writes
//! - `keys`: MachineConfig naming

pub mod cascade;
pub mod image_config;
pub mod keys;
pub mod runtime_config;
pub mod seccomp;
pub mod status;

#[cfg(test)]
mod image_config_test;
#[cfg(test)]
mod runtime_config_test;

use crate::error::ControllerError;
use crate::retry::{RetryPolicy, retry_on_conflict};
use cluster_store::{ClusterStore, StoreError};
use config_render::ArtifactRenderer;
use crds::well_known::{
    CLUSTER_VERSION_NAME, CONTROLLER_CONFIG_NAME, GENERATED_BY_CONTROLLER_VERSION_ANNOTATION,
    IMAGE_CONFIG_NAME, MACHINE_CONFIG_ROLE_LABEL,
};
use crds::{MachineConfig, MachineConfigSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use std::collections::BTreeMap;
use tracing::debug;

/// Key pre-seeded into the runtime config queue on every start
pub const FORCE_SYNC_ON_UPGRADE_KEY: &str = "force-sync-on-upgrade";

/// Process-wide values the synchronizers depend on
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Stamped on every generated MachineConfig; a mismatch forces regeneration
    pub build_version: String,
    /// Namespace of the seccomp marker ConfigMap
    pub namespace: String,
    /// Queue key that forces a resync of every config on startup
    pub startup_sentinel_key: String,
    /// Name of the cluster Image config singleton
    pub image_config_name: String,
    /// Name of the ClusterVersion singleton
    pub cluster_version_name: String,
    /// Name of the ControllerConfig singleton
    pub controller_config_name: String,
    /// Shared by every conditional write
    pub update_retry: RetryPolicy,
}

impl SyncSettings {
    /// Settings for `build_version` with the well-known singleton names
    pub fn new(build_version: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            build_version: build_version.into(),
            namespace: namespace.into(),
            startup_sentinel_key: FORCE_SYNC_ON_UPGRADE_KEY.to_string(),
            image_config_name: IMAGE_CONFIG_NAME.to_string(),
            cluster_version_name: CLUSTER_VERSION_NAME.to_string(),
            controller_config_name: CONTROLLER_CONFIG_NAME.to_string(),
            update_retry: RetryPolicy::default(),
        }
    }
}

/// Reconciles ContainerRuntimeConfigs and the cluster Image config into MachineConfigs.
pub struct Reconciler {
    pub(crate) store: Box<dyn ClusterStore>,
    pub(crate) renderer: Box<dyn ArtifactRenderer>,
    pub(crate) settings: SyncSettings,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Creates a new reconciler instance.
    pub fn new(
        store: impl ClusterStore + 'static,
        renderer: impl ArtifactRenderer + 'static,
        settings: SyncSettings,
    ) -> Self {
        Self {
            store: Box::new(store),
            renderer: Box::new(renderer),
            settings,
        }
    }

    /// Settings this reconciler was built with
    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Empty MachineConfig shell for `role`
    pub(crate) fn new_machine_config(name: &str, role: &str) -> MachineConfig {
        let mut labels = BTreeMap::new();
        labels.insert(MACHINE_CONFIG_ROLE_LABEL.to_string(), role.to_string());
        MachineConfig {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(labels),
                ..Default::default()
            },
            spec: MachineConfigSpec::default(),
        }
    }

    /// Create `desired` or bring the stored MachineConfig in line with it.
    ///
    /// Spec and owner references are replaced; labels and annotations are
    /// merged into the stored ones. With `skip_unchanged`, an existing object
    /// whose payload equals the desired one and whose build version matches
    /// is left alone. Returns whether anything was written.
    pub(crate) async fn apply_machine_config(
        &self,
        desired: &MachineConfig,
        skip_unchanged: bool,
    ) -> Result<bool, ControllerError> {
        let name = desired.name_any();
        let operation = format!("apply MachineConfig {}", name);
        let name = name.as_str();

        let applied = retry_on_conflict(&self.settings.update_retry, &operation, || async move {
            let existing = self.store.get_machine_config(name).await?;
            let Some(mut current) = existing else {
                return match self.store.create_machine_config(desired).await {
                    Ok(_) => Ok(true),
                    // lost a create race: treat like a stale read and go again
                    Err(StoreError::AlreadyExists(what)) => Err(StoreError::Conflict(what)),
                    Err(e) => Err(e),
                };
            };

            if skip_unchanged
                && current.spec.config == desired.spec.config
                && current.annotations().get(GENERATED_BY_CONTROLLER_VERSION_ANNOTATION)
                    == desired.annotations().get(GENERATED_BY_CONTROLLER_VERSION_ANNOTATION)
            {
                debug!("MachineConfig {} is up to date", name);
                return Ok(false);
            }

            current.spec = desired.spec.clone();
            current.metadata.owner_references = desired.metadata.owner_references.clone();
            for (key, value) in desired.labels() {
                current.labels_mut().insert(key.clone(), value.clone());
            }
            for (key, value) in desired.annotations() {
                current.annotations_mut().insert(key.clone(), value.clone());
            }
            self.store.update_machine_config(&current).await?;
            Ok::<_, StoreError>(true)
        })
        .await?;

        Ok(applied)
    }
}
