//! One-time CRI-O `seccomp_use_default_when_empty` rollout.
//!
//! Built-in pools get a MachineConfig enabling the default seccomp profile
//! once. A marker ConfigMap records that the rollout happened, so a user who
//! later deletes the MachineConfig keeps it deleted.

use super::Reconciler;
use super::keys::seccomp_use_default_key;
use crate::error::ControllerError;
use crate::retry::retry_on_conflict;
use cluster_store::StoreError;
use config_render::{ConfigManifest, seccomp_use_default_dropin};
use crds::well_known::{BUILT_IN_POOL_LABEL, SECCOMP_USE_DEFAULT_MARKER};
use crds::{MachineConfig, MachineConfigPool};
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use tracing::{debug, info};

/// Pools shipped with the cluster (`mco-built-in: ""`)
pub fn is_built_in_pool(pool: &MachineConfigPool) -> bool {
    pool.labels().get(BUILT_IN_POOL_LABEL).is_some_and(|v| v.is_empty())
}

/// MachineConfig enabling the default seccomp profile on `pool`
pub fn seccomp_machine_config(pool: &str) -> Result<MachineConfig, ControllerError> {
    let manifest = ConfigManifest::from_files(&[seccomp_use_default_dropin()?]);
    let mut mc = Reconciler::new_machine_config(&seccomp_use_default_key(pool), pool);
    mc.spec.config = manifest.to_value()?;
    Ok(mc)
}

impl Reconciler {
    /// Create the seccomp MachineConfig on every built-in pool, unless the marker says it was done
    pub async fn ensure_seccomp_use_default(&self) -> Result<(), ControllerError> {
        let namespace = self.settings.namespace.as_str();
        if self
            .store
            .get_config_map(namespace, SECCOMP_USE_DEFAULT_MARKER)
            .await?
            .is_some()
        {
            debug!("{} config map exists, skipping seccomp rollout", SECCOMP_USE_DEFAULT_MARKER);
            return Ok(());
        }

        let pools = self.store.list_machine_config_pools().await?;
        for pool in pools.iter().filter(|p| is_built_in_pool(p)) {
            let pool_name = pool.name_any();
            let key = seccomp_use_default_key(&pool_name);
            if self.store.get_machine_config(&key).await?.is_some() {
                continue;
            }

            let mc = seccomp_machine_config(&pool_name)?;
            let mc = &mc;
            retry_on_conflict(&self.settings.update_retry, "create seccomp MachineConfig", || async move {
                match self.store.create_machine_config(mc).await {
                    Ok(_) => Ok(()),
                    Err(e) if e.is_already_exists() => Ok(()),
                    Err(e) => Err(e),
                }
            })
            .await?;
            info!("Created MachineConfig {} on MachineConfigPool {}", key, pool_name);
        }

        let marker = ConfigMap {
            metadata: ObjectMeta {
                name: Some(SECCOMP_USE_DEFAULT_MARKER.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        match self.store.create_config_map(&marker).await {
            Ok(_) => Ok(()),
            Err(StoreError::AlreadyExists(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
