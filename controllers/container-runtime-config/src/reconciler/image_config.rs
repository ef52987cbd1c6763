//! Image config synchronization.
//!
//! The cluster `Image` config and every ImageContentSourcePolicy are rendered
//! into `registries.conf`, `policy.json` and a search registries drop-in for
//! each built-in pool. Only the `cluster` key is ever queued.

use super::Reconciler;
use super::keys::registries_key;
use super::seccomp::is_built_in_pool;
use crate::error::ControllerError;
use crate::registries::effective_blocked_registries;
use config_render::{
    ArtifactRenderer, ConfigManifest, GeneratedConfigFile, MirrorRule, REGISTRIES_CONFIG_PATH, POLICY_CONFIG_PATH,
    RenderError, search_registries_dropin, update_policy_json, update_registries_config,
};
use crds::well_known::GENERATED_BY_CONTROLLER_VERSION_ANNOTATION;
use crds::{ControllerConfigSpec, Image, ImageContentSourcePolicy, RegistrySources};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};
use std::time::Instant;
use tracing::{debug, info};

/// Registry settings after blocked registries have been filtered
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryPolicy {
    pub insecure: Vec<String>,
    pub blocked: Vec<String>,
    pub allowed: Vec<String>,
    pub search: Vec<String>,
}

impl RegistryPolicy {
    /// Policy from the Image config sources, with `blocked` replacing the requested list
    pub fn from_sources(sources: &RegistrySources, blocked: Vec<String>) -> Self {
        Self {
            insecure: sources.insecure_registries.clone(),
            blocked,
            allowed: sources.allowed_registries.clone(),
            search: sources.container_runtime_search_registries.clone(),
        }
    }
}

/// Flatten ImageContentSourcePolicies into mirror rules
pub fn mirror_rules(icsps: &[ImageContentSourcePolicy]) -> Vec<MirrorRule> {
    icsps
        .iter()
        .flat_map(|icsp| icsp.spec.repository_digest_mirrors.iter())
        .map(|m| MirrorRule {
            source: m.source.clone(),
            mirrors: m.mirrors.clone(),
        })
        .collect()
}

/// Manifest holding the registries, policy and search drop-in files for `role`.
///
/// A default file is only shipped when a setting changes it.
pub fn registries_config_manifest(
    renderer: &dyn ArtifactRenderer,
    controller_config: &ControllerConfigSpec,
    role: &str,
    policy: &RegistryPolicy,
    icsps: &[ImageContentSourcePolicy],
) -> Result<ConfigManifest, RenderError> {
    let defaults = renderer.render_defaults(role, controller_config)?;
    let rules = mirror_rules(icsps);
    let mut files = Vec::new();

    if !policy.insecure.is_empty() || !policy.blocked.is_empty() || !rules.is_empty() {
        let data = update_registries_config(
            &defaults.registries.decoded_contents()?,
            &policy.insecure,
            &policy.blocked,
            &rules,
        )?;
        files.push(GeneratedConfigFile::new(REGISTRIES_CONFIG_PATH, data));
    }

    if !policy.blocked.is_empty() || !policy.allowed.is_empty() {
        let data = update_policy_json(&defaults.policy.decoded_contents()?, &policy.blocked, &policy.allowed)?;
        files.push(GeneratedConfigFile::new(POLICY_CONFIG_PATH, data));
    }

    if !policy.search.is_empty() {
        files.push(search_registries_dropin(&policy.search)?);
    }

    Ok(ConfigManifest::from_files(&files))
}

/// Non-controlling owner reference to the Image config
pub(crate) fn image_owner_reference(image: &Image) -> OwnerReference {
    OwnerReference {
        api_version: Image::api_version(&()).to_string(),
        kind: Image::kind(&()).to_string(),
        name: image.name_any(),
        uid: image.uid().unwrap_or_default(),
        ..Default::default()
    }
}

impl Reconciler {
    /// Reconcile the cluster Image config into registries MachineConfigs
    pub async fn sync_image_config(&self, key: &str) -> Result<(), ControllerError> {
        let started = Instant::now();
        debug!("Started syncing ImageConfig {:?}", key);
        let result = self.sync_image_config_inner().await;
        debug!("Finished syncing ImageConfig {:?} ({:?})", key, started.elapsed());
        result
    }

    async fn sync_image_config_inner(&self) -> Result<(), ControllerError> {
        let Some(image) = self.store.get_image_config(&self.settings.image_config_name).await? else {
            debug!("Image config {} not found, nothing to do", self.settings.image_config_name);
            return Ok(());
        };
        let Some(cluster_version) = self
            .store
            .get_cluster_version(&self.settings.cluster_version_name)
            .await?
        else {
            debug!("ClusterVersion {} not found, nothing to do", self.settings.cluster_version_name);
            return Ok(());
        };

        let controller_config = self
            .store
            .get_controller_config(&self.settings.controller_config_name)
            .await?
            .ok_or_else(|| ControllerError::MissingObject {
                kind: "ControllerConfig",
                name: self.settings.controller_config_name.clone(),
            })?;

        let sources = &image.spec.registry_sources;
        let release_image = cluster_version.desired_image().unwrap_or_default();
        let blocked = effective_blocked_registries(release_image, &sources.blocked_registries)?;
        let policy = RegistryPolicy::from_sources(sources, blocked);

        let icsps = match self.store.list_image_content_source_policies().await {
            Ok(icsps) => icsps,
            Err(e) if e.is_not_found() => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let pools = self.store.list_machine_config_pools().await?;
        for pool in pools.iter().filter(|p| is_built_in_pool(p)) {
            let role = pool.name_any();
            let manifest =
                registries_config_manifest(self.renderer.as_ref(), &controller_config.spec, &role, &policy, &icsps)?;

            let mut mc = Self::new_machine_config(&registries_key(&role), &role);
            mc.spec.config = manifest.to_value()?;
            mc.annotations_mut().insert(
                GENERATED_BY_CONTROLLER_VERSION_ANNOTATION.to_string(),
                self.settings.build_version.clone(),
            );
            mc.metadata.owner_references = Some(vec![image_owner_reference(&image)]);

            let applied = self
                .apply_machine_config(&mc, true)
                .await
                .map_err(|e| ControllerError::Reconciliation(format!("could not Create/Update MachineConfig: {}", e)))?;
            if applied {
                info!("Applied ImageConfig {} on MachineConfigPool {}", image.name_any(), role);
            }
        }
        Ok(())
    }
}
