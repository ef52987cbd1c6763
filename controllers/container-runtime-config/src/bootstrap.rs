//! Bootstrap rendering.
//!
//! Before the cluster API exists, the installer needs the registries and
//! seccomp MachineConfigs on disk. Bootstrap mode reads the install manifests
//! from a directory and writes one `<name>.yaml` per generated MachineConfig.
//!
//! Registries MachineConfigs written here carry no build version annotation,
//! so the first in-cluster pass always regenerates them.

use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crate::reconciler::image_config::{RegistryPolicy, registries_config_manifest};
use crate::reconciler::keys::registries_key;
use crate::reconciler::seccomp::seccomp_machine_config;
use crate::registries::effective_blocked_registries;
use config_render::{ArtifactRenderer, TemplateRenderer};
use crds::{ControllerConfig, Image, ImageContentSourcePolicy, MachineConfig, MachineConfigPool};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Seccomp MachineConfig for every pool
pub fn run_seccomp_use_default_bootstrap(pools: &[MachineConfigPool]) -> Result<Vec<MachineConfig>, ControllerError> {
    pools.iter().map(|pool| seccomp_machine_config(&pool.name_any())).collect()
}

/// Registries MachineConfig for every pool, from the Image config when there is one
pub fn run_image_bootstrap(
    renderer: &dyn ArtifactRenderer,
    controller_config: &ControllerConfig,
    pools: &[MachineConfigPool],
    icsps: &[ImageContentSourcePolicy],
    image: Option<&Image>,
) -> Result<Vec<MachineConfig>, ControllerError> {
    let policy = match image {
        Some(image) => {
            let sources = &image.spec.registry_sources;
            let blocked =
                effective_blocked_registries(&controller_config.spec.release_image, &sources.blocked_registries)?;
            RegistryPolicy::from_sources(sources, blocked)
        }
        None => RegistryPolicy::default(),
    };

    // name and uid are filled in by the first in-cluster pass
    let owner = OwnerReference {
        api_version: Image::api_version(&()).to_string(),
        kind: Image::kind(&()).to_string(),
        ..Default::default()
    };

    let mut machine_configs = Vec::with_capacity(pools.len());
    for pool in pools {
        let role = pool.name_any();
        let manifest = registries_config_manifest(renderer, &controller_config.spec, &role, &policy, icsps)?;
        let mut mc = Reconciler::new_machine_config(&registries_key(&role), &role);
        mc.spec.config = manifest.to_value()?;
        mc.metadata.owner_references = Some(vec![owner.clone()]);
        machine_configs.push(mc);
    }
    Ok(machine_configs)
}

/// Objects found in the bootstrap manifests directory
#[derive(Debug, Default)]
pub struct BootstrapInputs {
    pub controller_config: Option<ControllerConfig>,
    pub pools: Vec<MachineConfigPool>,
    pub icsps: Vec<ImageContentSourcePolicy>,
    pub image: Option<Image>,
}

impl BootstrapInputs {
    /// Sort one multi-document YAML file into the inputs; unrelated kinds are ignored
    pub fn add_documents(&mut self, contents: &str) -> Result<(), ControllerError> {
        for document in serde_yaml::Deserializer::from_str(contents) {
            let value = serde_yaml::Value::deserialize(document)?;
            let kind = value.get("kind").and_then(serde_yaml::Value::as_str).unwrap_or_default();
            match kind {
                "ControllerConfig" => self.controller_config = Some(serde_yaml::from_value(value)?),
                "MachineConfigPool" => self.pools.push(serde_yaml::from_value(value)?),
                "ImageContentSourcePolicy" => self.icsps.push(serde_yaml::from_value(value)?),
                "Image" => self.image = Some(serde_yaml::from_value(value)?),
                "" => {}
                other => debug!("Ignoring bootstrap manifest of kind {}", other),
            }
        }
        Ok(())
    }

    /// Read every `.yaml`/`.yml` file in `dir`
    pub fn from_dir(dir: &Path) -> Result<Self, ControllerError> {
        let io_error = |path: &Path, source| ControllerError::Io {
            path: path.display().to_string(),
            source,
        };

        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
            .map_err(|e| io_error(dir, e))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext == "yaml" || ext == "yml")
            })
            .collect();
        paths.sort();

        let mut inputs = Self::default();
        for path in paths {
            let contents = std::fs::read_to_string(&path).map_err(|e| io_error(&path, e))?;
            inputs.add_documents(&contents)?;
        }
        Ok(inputs)
    }
}

/// Render every bootstrap MachineConfig from `manifests_dir` into `dest_dir`
pub fn run_bootstrap(
    renderer: &dyn ArtifactRenderer,
    manifests_dir: &Path,
    dest_dir: &Path,
) -> Result<Vec<PathBuf>, ControllerError> {
    let inputs = BootstrapInputs::from_dir(manifests_dir)?;
    let controller_config = inputs.controller_config.ok_or_else(|| ControllerError::MissingObject {
        kind: "ControllerConfig",
        name: manifests_dir.display().to_string(),
    })?;
    if inputs.pools.is_empty() {
        warn!("No MachineConfigPools found in {}", manifests_dir.display());
    }

    let mut machine_configs = run_seccomp_use_default_bootstrap(&inputs.pools)?;
    machine_configs.extend(run_image_bootstrap(
        renderer,
        &controller_config,
        &inputs.pools,
        &inputs.icsps,
        inputs.image.as_ref(),
    )?);

    std::fs::create_dir_all(dest_dir).map_err(|source| ControllerError::Io {
        path: dest_dir.display().to_string(),
        source,
    })?;

    let mut written = Vec::with_capacity(machine_configs.len());
    for mc in &machine_configs {
        let path = dest_dir.join(format!("{}.yaml", mc.name_any()));
        std::fs::write(&path, serde_yaml::to_string(mc)?).map_err(|source| ControllerError::Io {
            path: path.display().to_string(),
            source,
        })?;
        info!("Wrote bootstrap MachineConfig {}", path.display());
        written.push(path);
    }
    Ok(written)
}

/// Bootstrap mode entry point: `BOOTSTRAP_MANIFESTS_DIR` in, `BOOTSTRAP_DEST_DIR` out
pub fn run_from_env() -> Result<(), ControllerError> {
    let required = |key: &str| {
        std::env::var(key)
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .ok_or_else(|| ControllerError::InvalidConfig(format!("{} environment variable is required", key)))
    };
    let manifests_dir = required("BOOTSTRAP_MANIFESTS_DIR")?;
    let dest_dir = required("BOOTSTRAP_DEST_DIR")?;
    let templates_dir = std::env::var("TEMPLATES_DIR").ok().filter(|d| !d.is_empty()).map(PathBuf::from);

    info!("Rendering bootstrap MachineConfigs");
    info!("  Manifests: {}", manifests_dir.display());
    info!("  Destination: {}", dest_dir.display());

    let renderer = TemplateRenderer::new(templates_dir);
    let written = run_bootstrap(&renderer, &manifests_dir, &dest_dir)?;
    info!("Wrote {} MachineConfigs", written.len());
    Ok(())
}
