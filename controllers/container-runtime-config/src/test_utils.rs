//! Test utilities for unit testing reconcilers
//!
//! Builders for the cluster objects the synchronizers read, and a reconciler
//! wired to an in-memory store.

#[cfg(test)]
use crate::reconciler::{Reconciler, SyncSettings};
#[cfg(test)]
use crate::retry::RetryPolicy;
#[cfg(test)]
use cluster_store::MockClusterStore;
#[cfg(test)]
use config_render::{ArtifactRenderer, DefaultRuntimeConfigs, ManifestFile, RenderError, TemplateRenderer};
#[cfg(test)]
use crds::well_known::BUILT_IN_POOL_LABEL;
#[cfg(test)]
use crds::*;
#[cfg(test)]
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
#[cfg(test)]
use std::collections::BTreeMap;

/// Build version stamped by reconcilers built with [`test_reconciler`]
#[cfg(test)]
pub const TEST_BUILD_VERSION: &str = "v-test";

/// Namespace of the seccomp marker in tests
#[cfg(test)]
pub const TEST_NAMESPACE: &str = "openshift-machine-config-operator";

#[cfg(test)]
pub const TEST_RELEASE_IMAGE: &str = "quay.io/example/release@sha256:abc";

/// Label a custom pool carries so configs can select it
#[cfg(test)]
pub fn pool_label(pool: &str) -> String {
    format!("pools.operator.machineconfiguration.openshift.io/{}", pool)
}

/// Helper to create a custom MachineConfigPool
#[cfg(test)]
pub fn create_test_pool(name: &str) -> MachineConfigPool {
    let mut labels = BTreeMap::new();
    labels.insert(pool_label(name), String::new());
    MachineConfigPool {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: MachineConfigPoolSpec::default(),
        status: None,
    }
}

/// Helper to create a built-in MachineConfigPool (master, worker)
#[cfg(test)]
pub fn create_test_builtin_pool(name: &str) -> MachineConfigPool {
    let mut pool = create_test_pool(name);
    pool.metadata
        .labels
        .get_or_insert_with(BTreeMap::new)
        .insert(BUILT_IN_POOL_LABEL.to_string(), String::new());
    pool
}

/// Helper to create a ContainerRuntimeConfig selecting `pool`, with pidsLimit 2048
#[cfg(test)]
pub fn create_test_runtime_config(name: &str, pool: &str) -> ContainerRuntimeConfig {
    ContainerRuntimeConfig {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: ContainerRuntimeConfigSpec {
            machine_config_pool_selector: Some(LabelSelector::from_label(pool_label(pool), "")),
            container_runtime_config: Some(ContainerRuntimeConfiguration {
                pids_limit: Some(2048),
                ..Default::default()
            }),
        },
        status: None,
    }
}

/// Helper to create the ControllerConfig singleton
#[cfg(test)]
pub fn create_test_controller_config() -> ControllerConfig {
    ControllerConfig::new(
        crds::well_known::CONTROLLER_CONFIG_NAME,
        ControllerConfigSpec {
            release_image: TEST_RELEASE_IMAGE.to_string(),
            ..Default::default()
        },
    )
}

/// Helper to create the `cluster` Image config
#[cfg(test)]
pub fn create_test_image(sources: RegistrySources) -> Image {
    Image::new(
        crds::well_known::IMAGE_CONFIG_NAME,
        ImageSpec {
            registry_sources: sources,
        },
    )
}

/// Helper to create the `version` ClusterVersion with a desired release image
#[cfg(test)]
pub fn create_test_cluster_version(release_image: &str) -> ClusterVersion {
    let mut cv = ClusterVersion::new(crds::well_known::CLUSTER_VERSION_NAME, ClusterVersionSpec::default());
    cv.status = Some(ClusterVersionStatus {
        desired: Release {
            image: release_image.to_string(),
            version: Some("4.14.0".to_string()),
        },
    });
    cv
}

/// Settings used by test reconcilers: fixed build version, no retry delays
#[cfg(test)]
pub fn test_settings() -> SyncSettings {
    let mut settings = SyncSettings::new(TEST_BUILD_VERSION, TEST_NAMESPACE);
    settings.update_retry = RetryPolicy::immediate(5);
    settings
}

/// Reconciler over a clone of `store` (clones share state)
#[cfg(test)]
pub fn test_reconciler(store: &MockClusterStore) -> Reconciler {
    Reconciler::new(store.clone(), TemplateRenderer::default(), test_settings())
}

/// Reconciler with an explicit renderer and build version
#[cfg(test)]
pub fn test_reconciler_with(
    store: &MockClusterStore,
    renderer: impl ArtifactRenderer + 'static,
    build_version: &str,
) -> Reconciler {
    let mut settings = test_settings();
    settings.build_version = build_version.to_string();
    Reconciler::new(store.clone(), renderer, settings)
}

/// Renderer whose storage.conf is not valid TOML
#[cfg(test)]
#[derive(Debug, Default)]
pub struct BrokenStorageRenderer;

#[cfg(test)]
impl ArtifactRenderer for BrokenStorageRenderer {
    fn render_defaults(
        &self,
        role: &str,
        controller_config: &ControllerConfigSpec,
    ) -> Result<DefaultRuntimeConfigs, RenderError> {
        let mut defaults = TemplateRenderer::default().render_defaults(role, controller_config)?;
        defaults.storage = ManifestFile::from_bytes(&defaults.storage.path, b"[storage\nnot toml");
        Ok(defaults)
    }
}

/// Renderer that always fails
#[cfg(test)]
#[derive(Debug, Default)]
pub struct FailingRenderer;

#[cfg(test)]
impl ArtifactRenderer for FailingRenderer {
    fn render_defaults(&self, role: &str, _: &ControllerConfigSpec) -> Result<DefaultRuntimeConfigs, RenderError> {
        Err(RenderError::InvalidDocument {
            file: format!("templates/{}", role),
            reason: "unreadable".to_string(),
        })
    }
}

/// Store seeded with the ControllerConfig and one custom pool per name
#[cfg(test)]
pub fn seeded_store(pools: &[&str]) -> MockClusterStore {
    let store = MockClusterStore::new();
    store.set_controller_config(create_test_controller_config());
    for pool in pools {
        store.add_machine_config_pool(create_test_pool(pool));
    }
    store
}
