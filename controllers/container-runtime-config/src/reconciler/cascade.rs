//! Finalizer handling for ContainerRuntimeConfigs.
//!
//! Each finalizer on a config is the name of a MachineConfig it owns. On
//! deletion the first finalizer's MachineConfig is deleted and the token is
//! popped; one token per pass. Both push and pop go through a three-way merge
//! patch carrying the read resource version, so unrelated concurrent edits
//! survive and a stale read conflicts.

use super::Reconciler;
use crate::error::ControllerError;
use crate::retry::retry_on_conflict;
use cluster_store::{StoreError, create_three_way_merge_patch};
use crds::ContainerRuntimeConfig;
use kube::ResourceExt;
use serde_json::Value;
use tracing::{debug, info};

/// Merge patch turning `current` into `modified`, conditional on the resource version of `current`
fn finalizer_patch(current: &ContainerRuntimeConfig, modified: &ContainerRuntimeConfig) -> Result<Value, StoreError> {
    let original = serde_json::to_value(current)?;
    let target = serde_json::to_value(modified)?;
    let mut patch = create_three_way_merge_patch(&original, &target, &original)?;

    if let (Some(rv), Some(obj)) = (current.resource_version(), patch.as_object_mut()) {
        let metadata = obj
            .entry("metadata")
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        if let Some(metadata) = metadata.as_object_mut() {
            metadata.insert("resourceVersion".to_string(), Value::String(rv));
        }
    }
    Ok(patch)
}

impl Reconciler {
    /// Delete the MachineConfig named by the first finalizer, then pop that finalizer
    pub(crate) async fn cascade_delete(&self, cfg: &ContainerRuntimeConfig) -> Result<(), ControllerError> {
        let Some(mc_name) = cfg.finalizers().first().cloned() else {
            return Ok(());
        };

        match self.store.delete_machine_config(&mc_name).await {
            Ok(()) => info!("Deleted MachineConfig {} owned by ContainerRuntimeConfig {}", mc_name, cfg.name_any()),
            Err(e) if e.is_not_found() => debug!("MachineConfig {} already gone", mc_name),
            Err(e) => return Err(e.into()),
        }

        self.pop_finalizer(&cfg.name_any(), &mc_name).await
    }

    /// Remove finalizer `token` from the named config
    pub(crate) async fn pop_finalizer(&self, name: &str, token: &str) -> Result<(), ControllerError> {
        retry_on_conflict(&self.settings.update_retry, "remove ContainerRuntimeConfig finalizer", || async move {
            let Some(current) = self.store.get_runtime_config(name).await? else {
                return Ok(());
            };
            let Some(position) = current.finalizers().iter().position(|f| f == token) else {
                return Ok(());
            };

            let mut modified = current.clone();
            modified.finalizers_mut().remove(position);
            let patch = finalizer_patch(&current, &modified)?;
            self.store.patch_runtime_config(name, &patch).await?;
            debug!("Removed finalizer {} from ContainerRuntimeConfig {}", token, name);
            Ok::<(), StoreError>(())
        })
        .await?;
        Ok(())
    }

    /// Add finalizer `token` to the named config unless it is already there
    pub(crate) async fn add_finalizer(&self, name: &str, token: &str) -> Result<(), ControllerError> {
        retry_on_conflict(&self.settings.update_retry, "add ContainerRuntimeConfig finalizer", || async move {
            // Deleted since it was read; the owner reference lets GC collect the MachineConfig
            let Some(current) = self.store.get_runtime_config(name).await? else {
                debug!("ContainerRuntimeConfig {} is gone, not adding finalizer {}", name, token);
                return Ok(());
            };
            if current.finalizers().iter().any(|f| f == token) {
                return Ok(());
            }

            let mut modified = current.clone();
            modified.finalizers_mut().push(token.to_string());
            let patch = finalizer_patch(&current, &modified)?;
            self.store.patch_runtime_config(name, &patch).await?;
            debug!("Added finalizer {} to ContainerRuntimeConfig {}", token, name);
            Ok::<(), StoreError>(())
        })
        .await?;
        Ok(())
    }
}
