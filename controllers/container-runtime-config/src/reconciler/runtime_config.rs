//! ContainerRuntimeConfig synchronization.
//!
//! Each selected pool gets one MachineConfig per config carrying the
//! rendered storage.conf override and CRI-O drop-ins. A MachineConfig is
//! regenerated when the config's generation moved, the previous pass failed,
//! or the MachineConfig was produced by a different controller build.

use super::Reconciler;
use super::keys::{RUNTIME_CONFIG_NAME_MARKER, managed_key_for_runtime_config, managed_key_suffix};
use crate::error::ControllerError;
use config_render::{
    ConfigManifest, GeneratedConfigFile, STORAGE_CONFIG_PATH, crio_dropin_files, is_zero_quantity,
    parse_quantity, update_storage_config,
};
use crds::well_known::{GENERATED_BY_CONTROLLER_VERSION_ANNOTATION, MC_NAME_SUFFIX_ANNOTATION};
use crds::{
    ContainerRuntimeConfig, ContainerRuntimeConfigConditionType, MachineConfig, MachineConfigPool, selector_matches,
};
use kube::{Resource, ResourceExt};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Log levels accepted by CRI-O
pub const VALID_LOG_LEVELS: [&str; 7] = ["error", "fatal", "panic", "warn", "info", "debug", "trace"];

fn validate_quantity(field: &str, value: Option<&str>) -> Result<(), ControllerError> {
    let Some(value) = value else {
        return Ok(());
    };
    match parse_quantity(value) {
        Ok(bytes) if bytes < 0 => Err(ControllerError::Validation(format!(
            "invalid {} {:?}: must not be negative",
            field, value
        ))),
        Ok(_) => Ok(()),
        Err(e) => Err(ControllerError::Validation(format!("invalid {} {:?}: {}", field, value, e))),
    }
}

/// Check a config before anything is rendered from it
pub fn validate_runtime_config(cfg: &ContainerRuntimeConfig) -> Result<(), ControllerError> {
    if let Some(selector) = &cfg.spec.machine_config_pool_selector {
        selector
            .validate()
            .map_err(|e| ControllerError::Validation(e.to_string()))?;
    }

    let Some(settings) = &cfg.spec.container_runtime_config else {
        return Err(ControllerError::Validation(format!(
            "containerRuntimeConfig of ContainerRuntimeConfig {} is empty",
            cfg.name_any()
        )));
    };

    if let Some(level) = settings
        .log_level
        .as_deref()
        .filter(|l| !l.is_empty() && !VALID_LOG_LEVELS.contains(l))
    {
        return Err(ControllerError::Validation(format!(
            "invalid logLevel {:?}, must be one of {}",
            level,
            VALID_LOG_LEVELS.join(", ")
        )));
    }

    if let Some(limit) = settings.pids_limit.filter(|l| *l <= 0) {
        return Err(ControllerError::Validation(format!(
            "invalid pidsLimit {}, must be greater than zero",
            limit
        )));
    }

    validate_quantity("logSizeMax", settings.log_size_max.as_deref())?;
    validate_quantity("overlaySize", settings.overlay_size.as_deref())?;
    Ok(())
}

/// Whether the MachineConfig generated for `cfg` can be left as is
fn is_up_to_date(cfg: &ContainerRuntimeConfig, mc: &MachineConfig, build_version: &str) -> bool {
    let last_succeeded = cfg
        .latest_condition()
        .is_some_and(|c| c.type_ == ContainerRuntimeConfigConditionType::Success);
    cfg.observed_generation() >= cfg.metadata.generation.unwrap_or(0)
        && last_succeeded
        && mc.annotations().get(GENERATED_BY_CONTROLLER_VERSION_ANNOTATION).map(String::as_str) == Some(build_version)
}

impl Reconciler {
    /// Reconcile the ContainerRuntimeConfig named by `key`.
    ///
    /// The startup sentinel key runs the seccomp rollout instead.
    pub async fn sync_container_runtime_config(&self, key: &str) -> Result<(), ControllerError> {
        let started = Instant::now();
        debug!("Started syncing ContainerRuntimeConfig {:?}", key);
        let result = self.sync_runtime_config_key(key).await;
        debug!(
            "Finished syncing ContainerRuntimeConfig {:?} ({:?})",
            key,
            started.elapsed()
        );
        result
    }

    async fn sync_runtime_config_key(&self, key: &str) -> Result<(), ControllerError> {
        if key == self.settings.startup_sentinel_key {
            return self.ensure_seccomp_use_default().await;
        }

        let name = key.rsplit_once('/').map_or(key, |(_, name)| name);
        let Some(mut cfg) = self.store.get_runtime_config(name).await? else {
            debug!("ContainerRuntimeConfig {} has been deleted", key);
            return Ok(());
        };

        if cfg.metadata.deletion_timestamp.is_some() {
            if !cfg.finalizers().is_empty() {
                return self.cascade_delete(&cfg).await;
            }
            return Ok(());
        }

        if let Err(e) = validate_runtime_config(&cfg) {
            return self.sync_status_only(&cfg, Some(e), None).await;
        }

        let pools = match self.pools_for_runtime_config(&cfg).await {
            Ok(pools) => pools,
            Err(e) if e.is_terminal() => return self.sync_status_only(&cfg, Some(e), None).await,
            Err(e) => return Err(e),
        };

        let controller_config = self
            .store
            .get_controller_config(&self.settings.controller_config_name)
            .await?
            .ok_or_else(|| ControllerError::MissingObject {
                kind: "ControllerConfig",
                name: self.settings.controller_config_name.clone(),
            })?;

        let settings = cfg.spec.container_runtime_config.clone().unwrap_or_default();
        let all_configs = self.store.list_runtime_configs().await?;
        let mut degraded: Option<(ControllerError, String)> = None;
        let mut applied = false;

        for pool in &pools {
            let pool_name = pool.name_any();
            let managed_key = match managed_key_for_runtime_config(pool, &cfg, &all_configs) {
                Ok(managed_key) => managed_key,
                Err(e) => return self.fail_with_context(&cfg, e, "could not get ctrcfg key").await,
            };

            let existing = match self.store.get_machine_config(&managed_key).await {
                Ok(existing) => existing,
                Err(e) => {
                    let context = format!("could not find MachineConfig {}", managed_key);
                    return self.fail_with_context(&cfg, e, &context).await;
                }
            };
            if existing
                .as_ref()
                .is_some_and(|mc| is_up_to_date(&cfg, mc, &self.settings.build_version))
            {
                debug!("MachineConfig {} is up to date", managed_key);
                continue;
            }

            let defaults = match self.renderer.render_defaults(&pool_name, &controller_config.spec) {
                Ok(defaults) => defaults,
                Err(e) => {
                    return self
                        .fail_with_context(&cfg, e, "could not generate origin ContainerRuntime Configs")
                        .await;
                }
            };

            let mut files = Vec::new();
            if let Some(overlay) = settings
                .overlay_size
                .as_deref()
                .filter(|size| !is_zero_quantity(Some(*size)))
            {
                let merged = defaults
                    .storage
                    .decoded_contents()
                    .and_then(|data| update_storage_config(&data, overlay));
                match merged {
                    Ok(data) => files.push(GeneratedConfigFile::new(STORAGE_CONFIG_PATH, data)),
                    Err(e) => {
                        warn!("error merging user changes to storage.conf for {}: {}", cfg.name_any(), e);
                        if degraded.is_none() {
                            let message = format!("could not update storage config: {}", e);
                            degraded = Some((e.into(), message));
                        }
                    }
                }
            }

            match crio_dropin_files(&settings) {
                Ok(dropins) => files.extend(dropins),
                Err(e) => return self.fail_with_context(&cfg, e, "could not generate CRI-O drop-in files").await,
            }

            let config = match ConfigManifest::from_files(&files).to_value() {
                Ok(config) => config,
                Err(e) => {
                    return self
                        .fail_with_context(&cfg, e, "error marshalling container runtime config Ignition")
                        .await;
                }
            };

            if existing.is_none() && !cfg.annotations().contains_key(MC_NAME_SUFFIX_ANNOTATION) {
                if let Some(suffix) = managed_key_suffix(&managed_key, &pool_name) {
                    if let Err(e) = self.add_annotation(name, MC_NAME_SUFFIX_ANNOTATION, &suffix).await {
                        return self
                            .fail_with_context(&cfg, e, "could not update annotation for containerRuntimeConfig")
                            .await;
                    }
                    // later pools in this pass must not hand out a second suffix
                    cfg.annotations_mut().insert(MC_NAME_SUFFIX_ANNOTATION.to_string(), suffix);
                }
            }

            let mut mc = Self::new_machine_config(&managed_key, &pool_name);
            mc.spec.config = config;
            mc.annotations_mut().insert(
                GENERATED_BY_CONTROLLER_VERSION_ANNOTATION.to_string(),
                self.settings.build_version.clone(),
            );
            mc.metadata.owner_references = cfg.controller_owner_ref(&()).map(|owner| vec![owner]);

            if let Err(e) = self.apply_machine_config(&mc, false).await {
                return self.fail_with_context(&cfg, e, "could not Create/Update MachineConfig").await;
            }
            if let Err(e) = self.add_finalizer(name, &managed_key).await {
                return self
                    .fail_with_context(&cfg, e, "could not add finalizers to ContainerRuntimeConfig")
                    .await;
            }
            applied = true;
            info!("Applied ContainerRuntimeConfig {} on MachineConfigPool {}", key, pool_name);
        }

        if let Err(e) = self.delete_stale_runtime_config_machine_configs().await {
            return self.fail_with_context(&cfg, e, "could not delete stale MachineConfigs").await;
        }

        if let Some((err, message)) = degraded {
            self.record_condition(&cfg, Some(&err), Some(message)).await;
            return Ok(());
        }

        let already_succeeded = cfg.observed_generation() >= cfg.metadata.generation.unwrap_or(0)
            && cfg
                .latest_condition()
                .is_some_and(|c| c.type_ == ContainerRuntimeConfigConditionType::Success);
        if !applied && already_succeeded {
            debug!("ContainerRuntimeConfig {} is up to date", key);
            return Ok(());
        }
        self.sync_status_only(&cfg, None, None).await
    }

    /// Pools selected by `cfg`; none is an error
    async fn pools_for_runtime_config(
        &self,
        cfg: &ContainerRuntimeConfig,
    ) -> Result<Vec<MachineConfigPool>, ControllerError> {
        let selector = cfg.spec.machine_config_pool_selector.as_ref();
        let pools: Vec<MachineConfigPool> = self
            .store
            .list_machine_config_pools()
            .await?
            .into_iter()
            .filter(|pool| selector_matches(selector, pool.labels()))
            .collect();

        if pools.is_empty() {
            return Err(ControllerError::NoMatchingPools(cfg.name_any()));
        }
        Ok(pools)
    }

    /// Record `err` with a context message and return it
    async fn fail_with_context(
        &self,
        cfg: &ContainerRuntimeConfig,
        err: impl Into<ControllerError>,
        context: &str,
    ) -> Result<(), ControllerError> {
        let err = err.into();
        let message = format!("{}: {}", context, err);
        self.sync_status_only(cfg, Some(err), Some(message)).await
    }

    /// Delete runtime config MachineConfigs written by another controller build.
    ///
    /// After an upgrade a config may be regenerated under a suffixed name,
    /// leaving the old unsuffixed MachineConfig behind.
    async fn delete_stale_runtime_config_machine_configs(&self) -> Result<(), ControllerError> {
        let build_version = self.settings.build_version.as_str();
        for mc in self.store.list_machine_configs().await? {
            let name = mc.name_any();
            if !name.contains(RUNTIME_CONFIG_NAME_MARKER) {
                continue;
            }
            if mc.annotations().get(GENERATED_BY_CONTROLLER_VERSION_ANNOTATION).map(String::as_str) == Some(build_version) {
                continue;
            }

            match self.store.delete_machine_config(&name).await {
                Ok(()) => info!("Deleted stale MachineConfig {}", name),
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    return Err(ControllerError::Reconciliation(format!(
                        "error deleting degraded containerruntime machine config {}: {}",
                        name, e
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_runtime_config;
    use crds::{ContainerRuntimeConfiguration, LabelSelector, LabelSelectorRequirement, SelectorOperator};

    fn with_settings(settings: ContainerRuntimeConfiguration) -> ContainerRuntimeConfig {
        let mut cfg = create_test_runtime_config("a", "worker");
        cfg.spec.container_runtime_config = Some(settings);
        cfg
    }

    #[test]
    fn test_valid_settings() {
        let cfg = with_settings(ContainerRuntimeConfiguration {
            pids_limit: Some(2048),
            log_level: Some("debug".to_string()),
            log_size_max: Some("10Mi".to_string()),
            overlay_size: Some("10G".to_string()),
        });
        assert!(validate_runtime_config(&cfg).is_ok());
    }

    #[test]
    fn test_invalid_settings_are_terminal() {
        let cases = [
            ContainerRuntimeConfiguration {
                log_level: Some("verbose".to_string()),
                ..Default::default()
            },
            ContainerRuntimeConfiguration {
                pids_limit: Some(0),
                ..Default::default()
            },
            ContainerRuntimeConfiguration {
                log_size_max: Some("-1Mi".to_string()),
                ..Default::default()
            },
            ContainerRuntimeConfiguration {
                overlay_size: Some("lots".to_string()),
                ..Default::default()
            },
        ];
        for settings in cases {
            let err = validate_runtime_config(&with_settings(settings.clone())).unwrap_err();
            assert!(err.is_terminal(), "{:?} should be rejected", settings);
        }
    }

    #[test]
    fn test_missing_settings_and_bad_selector() {
        let mut cfg = create_test_runtime_config("a", "worker");
        cfg.spec.container_runtime_config = None;
        assert!(validate_runtime_config(&cfg).unwrap_err().to_string().contains("is empty"));

        let mut cfg = create_test_runtime_config("a", "worker");
        cfg.spec.machine_config_pool_selector = Some(LabelSelector {
            match_expressions: vec![LabelSelectorRequirement {
                key: "tier".to_string(),
                operator: SelectorOperator::In,
                values: Vec::new(),
            }],
            ..Default::default()
        });
        assert!(validate_runtime_config(&cfg).is_err());
    }
}
