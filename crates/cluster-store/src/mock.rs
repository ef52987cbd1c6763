//! Mock ClusterStore for unit testing
//!
//! Keeps every object in memory and emulates the API server behaviour the
//! controller depends on:
//! - resource versions bump on every write and conditional writes conflict
//!   when the caller's version is stale
//! - generation bumps only on spec changes
//! - an object with a deletion timestamp disappears once its last finalizer
//!   is removed
//!
//! Every write is recorded so tests can assert on exactly what was written.

use crate::error::StoreError;
use crate::store_trait::ClusterStore;
use crds::{
    ClusterVersion, ContainerRuntimeConfig, ControllerConfig, Image, ImageContentSourcePolicy,
    MachineConfig, MachineConfigPool,
};
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Mock ClusterStore for testing
#[derive(Clone, Default)]
pub struct MockClusterStore {
    pub(crate) runtime_configs: Arc<Mutex<BTreeMap<String, ContainerRuntimeConfig>>>,
    pub(crate) machine_configs: Arc<Mutex<BTreeMap<String, MachineConfig>>>,
    pub(crate) pools: Arc<Mutex<BTreeMap<String, MachineConfigPool>>>,
    pub(crate) controller_configs: Arc<Mutex<BTreeMap<String, ControllerConfig>>>,
    pub(crate) images: Arc<Mutex<BTreeMap<String, Image>>>,
    pub(crate) cluster_versions: Arc<Mutex<BTreeMap<String, ClusterVersion>>>,
    pub(crate) icsps: Arc<Mutex<BTreeMap<String, ImageContentSourcePolicy>>>,
    pub(crate) config_maps: Arc<Mutex<BTreeMap<(String, String), ConfigMap>>>,
    // Counter for generating resource versions
    pub(crate) next_resource_version: Arc<Mutex<u64>>,
    // Log of every write, e.g. "update MachineConfig/99-worker-generated-registries"
    pub(crate) writes: Arc<Mutex<Vec<String>>>,
    // Number of upcoming conditional writes that fail with a conflict
    pub(crate) pending_conflicts: Arc<Mutex<u32>>,
    // Number of upcoming MachineConfig deletes that fail
    pub(crate) pending_delete_failures: Arc<Mutex<u32>>,
}

impl std::fmt::Debug for MockClusterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockClusterStore")
            .field("writes", &lock(&self.writes).len())
            .finish_non_exhaustive()
    }
}

// Time is built through serde so the mock does not depend on the
// datetime backend k8s-openapi was compiled with.
fn now() -> Option<Time> {
    let stamp = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    serde_json::from_value(serde_json::Value::String(stamp)).ok()
}

// Poisoned locks are recovered so one failed assertion does not cascade
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockClusterStore {
    /// Create an empty mock store
    pub fn new() -> Self {
        Self::default()
    }

    fn next_rv(&self) -> String {
        let mut rv = lock(&self.next_resource_version);
        *rv += 1;
        rv.to_string()
    }

    fn stamp(&self, meta: &mut ObjectMeta) {
        meta.resource_version = Some(self.next_rv());
        if meta.uid.is_none() {
            meta.uid = Some(uuid::Uuid::new_v4().to_string());
        }
        if meta.generation.is_none() {
            meta.generation = Some(1);
        }
    }

    fn record(&self, entry: String) {
        lock(&self.writes).push(entry);
    }

    fn take_conflict(&self, what: &str) -> Result<(), StoreError> {
        let mut pending = lock(&self.pending_conflicts);
        if *pending > 0 {
            *pending -= 1;
            return Err(StoreError::Conflict(format!("injected conflict on {}", what)));
        }
        Ok(())
    }

    fn check_version(stored: &ObjectMeta, incoming: &ObjectMeta, what: &str) -> Result<(), StoreError> {
        match &incoming.resource_version {
            Some(rv) if Some(rv) != stored.resource_version.as_ref() => Err(StoreError::Conflict(format!(
                "{}: resource version {} is stale",
                what, rv
            ))),
            _ => Ok(()),
        }
    }

    // Seeding helpers (not recorded as writes)

    /// Seed a ContainerRuntimeConfig
    pub fn add_runtime_config(&self, mut cfg: ContainerRuntimeConfig) {
        self.stamp(&mut cfg.metadata);
        lock(&self.runtime_configs).insert(cfg.name_any(), cfg);
    }

    /// Seed a MachineConfigPool
    pub fn add_machine_config_pool(&self, mut pool: MachineConfigPool) {
        self.stamp(&mut pool.metadata);
        lock(&self.pools).insert(pool.name_any(), pool);
    }

    /// Seed a MachineConfig
    pub fn add_machine_config(&self, mut mc: MachineConfig) {
        self.stamp(&mut mc.metadata);
        lock(&self.machine_configs).insert(mc.name_any(), mc);
    }

    /// Seed a ControllerConfig
    pub fn set_controller_config(&self, mut cc: ControllerConfig) {
        self.stamp(&mut cc.metadata);
        lock(&self.controller_configs).insert(cc.name_any(), cc);
    }

    /// Seed an Image config
    pub fn set_image_config(&self, mut image: Image) {
        self.stamp(&mut image.metadata);
        lock(&self.images).insert(image.name_any(), image);
    }

    /// Seed a ClusterVersion
    pub fn set_cluster_version(&self, mut cv: ClusterVersion) {
        self.stamp(&mut cv.metadata);
        lock(&self.cluster_versions).insert(cv.name_any(), cv);
    }

    /// Seed an ImageContentSourcePolicy
    pub fn add_image_content_source_policy(&self, mut icsp: ImageContentSourcePolicy) {
        self.stamp(&mut icsp.metadata);
        lock(&self.icsps).insert(icsp.name_any(), icsp);
    }

    // User actions

    /// Simulate a user edit of the spec: bumps generation and resource version
    pub fn edit_runtime_config(&self, name: &str, edit: impl FnOnce(&mut ContainerRuntimeConfig)) {
        let rv = self.next_rv();
        let mut configs = lock(&self.runtime_configs);
        if let Some(cfg) = configs.get_mut(name) {
            edit(cfg);
            cfg.metadata.generation = Some(cfg.metadata.generation.unwrap_or(0) + 1);
            cfg.metadata.resource_version = Some(rv);
        }
    }

    /// Simulate `kubectl delete`: sets the deletion timestamp when finalizers
    /// are present, removes the object otherwise
    pub fn delete_runtime_config(&self, name: &str) {
        let rv = self.next_rv();
        let mut configs = lock(&self.runtime_configs);
        let has_finalizers = configs.get(name).is_some_and(|c| !c.finalizers().is_empty());
        if has_finalizers {
            if let Some(cfg) = configs.get_mut(name) {
                cfg.metadata.deletion_timestamp = now();
                cfg.metadata.resource_version = Some(rv);
            }
        } else {
            configs.remove(name);
        }
    }

    /// Make the next `count` conditional writes fail with a conflict
    pub fn inject_conflicts(&self, count: u32) {
        *lock(&self.pending_conflicts) = count;
    }

    /// Make the next `count` MachineConfig deletes fail
    pub fn fail_machine_config_deletes(&self, count: u32) {
        *lock(&self.pending_delete_failures) = count;
    }

    // Inspection helpers

    /// Stored ContainerRuntimeConfig, if any
    pub fn runtime_config(&self, name: &str) -> Option<ContainerRuntimeConfig> {
        lock(&self.runtime_configs).get(name).cloned()
    }

    /// Stored MachineConfig, if any
    pub fn machine_config(&self, name: &str) -> Option<MachineConfig> {
        lock(&self.machine_configs).get(name).cloned()
    }

    /// Names of every stored MachineConfig, sorted
    pub fn machine_config_names(&self) -> Vec<String> {
        lock(&self.machine_configs).keys().cloned().collect()
    }

    /// Stored ConfigMap, if any
    pub fn config_map(&self, namespace: &str, name: &str) -> Option<ConfigMap> {
        lock(&self.config_maps)
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Every write recorded so far
    pub fn writes(&self) -> Vec<String> {
        lock(&self.writes).clone()
    }

    /// Number of writes recorded so far
    pub fn write_count(&self) -> usize {
        lock(&self.writes).len()
    }

    /// Forget the recorded writes
    pub fn clear_writes(&self) {
        lock(&self.writes).clear();
    }
}

#[async_trait::async_trait]
impl ClusterStore for MockClusterStore {
    async fn get_runtime_config(&self, name: &str) -> Result<Option<ContainerRuntimeConfig>, StoreError> {
        Ok(lock(&self.runtime_configs).get(name).cloned())
    }

    async fn list_runtime_configs(&self) -> Result<Vec<ContainerRuntimeConfig>, StoreError> {
        Ok(lock(&self.runtime_configs).values().cloned().collect())
    }

    async fn list_machine_config_pools(&self) -> Result<Vec<MachineConfigPool>, StoreError> {
        Ok(lock(&self.pools).values().cloned().collect())
    }

    async fn get_controller_config(&self, name: &str) -> Result<Option<ControllerConfig>, StoreError> {
        Ok(lock(&self.controller_configs).get(name).cloned())
    }

    async fn get_image_config(&self, name: &str) -> Result<Option<Image>, StoreError> {
        Ok(lock(&self.images).get(name).cloned())
    }

    async fn get_cluster_version(&self, name: &str) -> Result<Option<ClusterVersion>, StoreError> {
        Ok(lock(&self.cluster_versions).get(name).cloned())
    }

    async fn list_image_content_source_policies(&self) -> Result<Vec<ImageContentSourcePolicy>, StoreError> {
        Ok(lock(&self.icsps).values().cloned().collect())
    }

    async fn get_machine_config(&self, name: &str) -> Result<Option<MachineConfig>, StoreError> {
        Ok(lock(&self.machine_configs).get(name).cloned())
    }

    async fn list_machine_configs(&self) -> Result<Vec<MachineConfig>, StoreError> {
        Ok(lock(&self.machine_configs).values().cloned().collect())
    }

    async fn create_machine_config(&self, mc: &MachineConfig) -> Result<MachineConfig, StoreError> {
        let name = mc.name_any();
        if lock(&self.machine_configs).contains_key(&name) {
            return Err(StoreError::AlreadyExists(format!("MachineConfig {}", name)));
        }
        let mut created = mc.clone();
        created.metadata.uid = None;
        self.stamp(&mut created.metadata);
        lock(&self.machine_configs).insert(name.clone(), created.clone());
        self.record(format!("create MachineConfig/{}", name));
        Ok(created)
    }

    async fn update_machine_config(&self, mc: &MachineConfig) -> Result<MachineConfig, StoreError> {
        let name = mc.name_any();
        let what = format!("MachineConfig {}", name);
        self.take_conflict(&what)?;
        let rv = self.next_rv();
        let mut configs = lock(&self.machine_configs);
        let stored = configs
            .get_mut(&name)
            .ok_or_else(|| StoreError::NotFound(what.clone()))?;
        Self::check_version(&stored.metadata, &mc.metadata, &what)?;

        let mut updated = mc.clone();
        updated.metadata.uid = stored.metadata.uid.clone();
        updated.metadata.generation = stored.metadata.generation;
        if updated.spec != stored.spec {
            updated.metadata.generation = Some(stored.metadata.generation.unwrap_or(0) + 1);
        }
        updated.metadata.resource_version = Some(rv);
        *stored = updated.clone();
        drop(configs);
        self.record(format!("update MachineConfig/{}", name));
        Ok(updated)
    }

    async fn delete_machine_config(&self, name: &str) -> Result<(), StoreError> {
        {
            let mut pending = lock(&self.pending_delete_failures);
            if *pending > 0 {
                *pending -= 1;
                return Err(StoreError::Conflict(format!("injected delete failure on MachineConfig {}", name)));
            }
        }
        if lock(&self.machine_configs).remove(name).is_none() {
            return Err(StoreError::NotFound(format!("MachineConfig {}", name)));
        }
        self.record(format!("delete MachineConfig/{}", name));
        Ok(())
    }

    async fn update_runtime_config(&self, cfg: &ContainerRuntimeConfig) -> Result<ContainerRuntimeConfig, StoreError> {
        let name = cfg.name_any();
        let what = format!("ContainerRuntimeConfig {}", name);
        self.take_conflict(&what)?;
        let rv = self.next_rv();
        let mut configs = lock(&self.runtime_configs);
        let stored = configs
            .get_mut(&name)
            .ok_or_else(|| StoreError::NotFound(what.clone()))?;
        Self::check_version(&stored.metadata, &cfg.metadata, &what)?;

        // status is a subresource and is ignored on the main resource
        let mut updated = cfg.clone();
        updated.status = stored.status.clone();
        updated.metadata.uid = stored.metadata.uid.clone();
        updated.metadata.deletion_timestamp = stored.metadata.deletion_timestamp.clone();
        updated.metadata.generation = stored.metadata.generation;
        if serde_json::to_value(&updated.spec)? != serde_json::to_value(&stored.spec)? {
            updated.metadata.generation = Some(stored.metadata.generation.unwrap_or(0) + 1);
        }
        updated.metadata.resource_version = Some(rv);
        *stored = updated.clone();
        drop(configs);
        self.record(format!("update ContainerRuntimeConfig/{}", name));
        Ok(updated)
    }

    async fn update_runtime_config_status(&self, cfg: &ContainerRuntimeConfig) -> Result<ContainerRuntimeConfig, StoreError> {
        let name = cfg.name_any();
        let what = format!("ContainerRuntimeConfig {} status", name);
        self.take_conflict(&what)?;
        let rv = self.next_rv();
        let mut configs = lock(&self.runtime_configs);
        let stored = configs
            .get_mut(&name)
            .ok_or_else(|| StoreError::NotFound(what.clone()))?;
        Self::check_version(&stored.metadata, &cfg.metadata, &what)?;

        stored.status = cfg.status.clone();
        stored.metadata.resource_version = Some(rv);
        let updated = stored.clone();
        drop(configs);
        self.record(format!("update ContainerRuntimeConfig/{}/status", name));
        Ok(updated)
    }

    async fn patch_runtime_config(&self, name: &str, patch: &serde_json::Value) -> Result<ContainerRuntimeConfig, StoreError> {
        let what = format!("ContainerRuntimeConfig {}", name);
        self.take_conflict(&what)?;
        let rv = self.next_rv();
        let mut configs = lock(&self.runtime_configs);
        let stored = configs
            .get(name)
            .ok_or_else(|| StoreError::NotFound(what.clone()))?;

        if let Some(rv_precondition) = patch.pointer("/metadata/resourceVersion").and_then(|v| v.as_str()) {
            if Some(rv_precondition) != stored.metadata.resource_version.as_deref() {
                return Err(StoreError::Conflict(format!("{}: resource version {} is stale", what, rv_precondition)));
            }
        }

        let mut doc = serde_json::to_value(stored)?;
        json_patch::merge(&mut doc, patch);
        let mut patched: ContainerRuntimeConfig = serde_json::from_value(doc)?;
        patched.status = stored.status.clone();
        patched.metadata.uid = stored.metadata.uid.clone();
        patched.metadata.generation = stored.metadata.generation;
        patched.metadata.resource_version = Some(rv);

        let finalized = patched.metadata.deletion_timestamp.is_some() && patched.finalizers().is_empty();
        if finalized {
            configs.remove(name);
        } else {
            configs.insert(name.to_string(), patched.clone());
        }
        drop(configs);
        self.record(format!("patch ContainerRuntimeConfig/{}", name));
        Ok(patched)
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>, StoreError> {
        Ok(self.config_map(namespace, name))
    }

    async fn create_config_map(&self, cm: &ConfigMap) -> Result<ConfigMap, StoreError> {
        let key = (cm.namespace().unwrap_or_default(), cm.name_any());
        if lock(&self.config_maps).contains_key(&key) {
            return Err(StoreError::AlreadyExists(format!("ConfigMap {}/{}", key.0, key.1)));
        }
        let mut created = cm.clone();
        self.stamp(&mut created.metadata);
        lock(&self.config_maps).insert(key.clone(), created.clone());
        self.record(format!("create ConfigMap/{}/{}", key.0, key.1));
        Ok(created)
    }

    async fn wait_for_cache_sync(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
