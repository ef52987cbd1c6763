//! Kubernetes-backed cluster store
//!
//! Intent objects, pools and the cluster singletons are read from
//! reflector caches. The caches are filled by watch streams the controller
//! drives with the [`CacheWriters`] handed out by [`KubeClusterStore::new`].
//! Everything else goes straight to the API server.

use crate::error::StoreError;
use crate::store_trait::ClusterStore;
use crds::{
    ClusterVersion, ContainerRuntimeConfig, ControllerConfig, Image, ImageContentSourcePolicy,
    MachineConfig, MachineConfigPool,
};
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::runtime::reflector::{self, store::Writer, ObjectRef, Store};
use kube::{Api, Client, Resource, ResourceExt};
use serde_json::json;
use tracing::debug;

/// Writers feeding the store's caches, one per cached kind
pub struct CacheWriters {
    pub runtime_configs: Writer<ContainerRuntimeConfig>,
    pub machine_config_pools: Writer<MachineConfigPool>,
    pub controller_configs: Writer<ControllerConfig>,
    pub images: Writer<Image>,
    pub cluster_versions: Writer<ClusterVersion>,
    pub image_content_source_policies: Writer<ImageContentSourcePolicy>,
}

impl std::fmt::Debug for CacheWriters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheWriters").finish_non_exhaustive()
    }
}

/// Cluster store backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeClusterStore {
    client: Client,
    runtime_configs: Store<ContainerRuntimeConfig>,
    machine_config_pools: Store<MachineConfigPool>,
    controller_configs: Store<ControllerConfig>,
    images: Store<Image>,
    cluster_versions: Store<ClusterVersion>,
    image_content_source_policies: Store<ImageContentSourcePolicy>,
}

impl KubeClusterStore {
    /// Create the store and the writers that populate its caches
    pub fn new(client: Client) -> (Self, CacheWriters) {
        let (runtime_configs, runtime_configs_writer) = reflector::store();
        let (machine_config_pools, machine_config_pools_writer) = reflector::store();
        let (controller_configs, controller_configs_writer) = reflector::store();
        let (images, images_writer) = reflector::store();
        let (cluster_versions, cluster_versions_writer) = reflector::store();
        let (image_content_source_policies, icsp_writer) = reflector::store();

        let store = Self {
            client,
            runtime_configs,
            machine_config_pools,
            controller_configs,
            images,
            cluster_versions,
            image_content_source_policies,
        };
        let writers = CacheWriters {
            runtime_configs: runtime_configs_writer,
            machine_config_pools: machine_config_pools_writer,
            controller_configs: controller_configs_writer,
            images: images_writer,
            cluster_versions: cluster_versions_writer,
            image_content_source_policies: icsp_writer,
        };
        (store, writers)
    }

    /// Kubernetes client used for direct API calls
    pub fn client(&self) -> &Client {
        &self.client
    }

    fn machine_configs(&self) -> Api<MachineConfig> {
        Api::all(self.client.clone())
    }

    fn runtime_config_api(&self) -> Api<ContainerRuntimeConfig> {
        Api::all(self.client.clone())
    }
}

fn cached<K>(store: &Store<K>, name: &str) -> Option<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    store.get(&ObjectRef::new(name)).map(|obj| obj.as_ref().clone())
}

fn cached_list<K>(store: &Store<K>) -> Vec<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    let mut items: Vec<K> = store.state().iter().map(|obj| obj.as_ref().clone()).collect();
    items.sort_by(|a, b| a.meta().name.cmp(&b.meta().name));
    items
}

async fn wait_ready<K>(store: &Store<K>, kind: &str) -> Result<(), StoreError>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    store
        .wait_until_ready()
        .await
        .map_err(|e| StoreError::CacheNotReady(format!("{}: {}", kind, e)))?;
    debug!("{} cache synced", kind);
    Ok(())
}

#[async_trait::async_trait]
impl ClusterStore for KubeClusterStore {
    async fn get_runtime_config(&self, name: &str) -> Result<Option<ContainerRuntimeConfig>, StoreError> {
        Ok(cached(&self.runtime_configs, name))
    }

    async fn list_runtime_configs(&self) -> Result<Vec<ContainerRuntimeConfig>, StoreError> {
        Ok(cached_list(&self.runtime_configs))
    }

    async fn list_machine_config_pools(&self) -> Result<Vec<MachineConfigPool>, StoreError> {
        Ok(cached_list(&self.machine_config_pools))
    }

    async fn get_controller_config(&self, name: &str) -> Result<Option<ControllerConfig>, StoreError> {
        Ok(cached(&self.controller_configs, name))
    }

    async fn get_image_config(&self, name: &str) -> Result<Option<Image>, StoreError> {
        Ok(cached(&self.images, name))
    }

    async fn get_cluster_version(&self, name: &str) -> Result<Option<ClusterVersion>, StoreError> {
        Ok(cached(&self.cluster_versions, name))
    }

    async fn list_image_content_source_policies(&self) -> Result<Vec<ImageContentSourcePolicy>, StoreError> {
        Ok(cached_list(&self.image_content_source_policies))
    }

    async fn get_machine_config(&self, name: &str) -> Result<Option<MachineConfig>, StoreError> {
        self.machine_configs()
            .get_opt(name)
            .await
            .map_err(|e| StoreError::from_kube(e, &format!("MachineConfig {}", name)))
    }

    async fn list_machine_configs(&self) -> Result<Vec<MachineConfig>, StoreError> {
        let list = self
            .machine_configs()
            .list(&ListParams::default())
            .await
            .map_err(|e| StoreError::from_kube(e, "MachineConfig list"))?;
        Ok(list.items)
    }

    async fn create_machine_config(&self, mc: &MachineConfig) -> Result<MachineConfig, StoreError> {
        self.machine_configs()
            .create(&PostParams::default(), mc)
            .await
            .map_err(|e| StoreError::from_kube(e, &format!("MachineConfig {}", mc.name_any())))
    }

    async fn update_machine_config(&self, mc: &MachineConfig) -> Result<MachineConfig, StoreError> {
        let name = mc.name_any();
        self.machine_configs()
            .replace(&name, &PostParams::default(), mc)
            .await
            .map_err(|e| StoreError::from_kube(e, &format!("MachineConfig {}", name)))
    }

    async fn delete_machine_config(&self, name: &str) -> Result<(), StoreError> {
        self.machine_configs()
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| StoreError::from_kube(e, &format!("MachineConfig {}", name)))
    }

    async fn update_runtime_config(&self, cfg: &ContainerRuntimeConfig) -> Result<ContainerRuntimeConfig, StoreError> {
        let name = cfg.name_any();
        self.runtime_config_api()
            .replace(&name, &PostParams::default(), cfg)
            .await
            .map_err(|e| StoreError::from_kube(e, &format!("ContainerRuntimeConfig {}", name)))
    }

    async fn update_runtime_config_status(&self, cfg: &ContainerRuntimeConfig) -> Result<ContainerRuntimeConfig, StoreError> {
        let name = cfg.name_any();
        // resourceVersion in a merge patch makes the write conditional
        let patch = json!({
            "metadata": { "resourceVersion": cfg.metadata.resource_version },
            "status": cfg.status,
        });
        self.runtime_config_api()
            .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| StoreError::from_kube(e, &format!("ContainerRuntimeConfig {} status", name)))
    }

    async fn patch_runtime_config(&self, name: &str, patch: &serde_json::Value) -> Result<ContainerRuntimeConfig, StoreError> {
        self.runtime_config_api()
            .patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(|e| StoreError::from_kube(e, &format!("ContainerRuntimeConfig {}", name)))
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>, StoreError> {
        Api::<ConfigMap>::namespaced(self.client.clone(), namespace)
            .get_opt(name)
            .await
            .map_err(|e| StoreError::from_kube(e, &format!("ConfigMap {}/{}", namespace, name)))
    }

    async fn create_config_map(&self, cm: &ConfigMap) -> Result<ConfigMap, StoreError> {
        let namespace = cm.namespace().unwrap_or_default();
        Api::<ConfigMap>::namespaced(self.client.clone(), &namespace)
            .create(&PostParams::default(), cm)
            .await
            .map_err(|e| StoreError::from_kube(e, &format!("ConfigMap {}/{}", namespace, cm.name_any())))
    }

    async fn wait_for_cache_sync(&self) -> Result<(), StoreError> {
        wait_ready(&self.runtime_configs, "ContainerRuntimeConfig").await?;
        wait_ready(&self.machine_config_pools, "MachineConfigPool").await?;
        wait_ready(&self.controller_configs, "ControllerConfig").await?;
        wait_ready(&self.images, "Image").await?;
        wait_ready(&self.cluster_versions, "ClusterVersion").await?;
        wait_ready(&self.image_content_source_policies, "ImageContentSourcePolicy").await?;
        Ok(())
    }
}
