//! Kubernetes resource watchers.
//!
//! Every watched kind runs one reflector stream that keeps the cluster store's
//! cache current. Streams for intent kinds also decide which queue keys an
//! event should trigger. Pools and the ControllerConfig are only cached; they
//! are read when a sync runs.

use crate::error::ControllerError;
use crate::queue::WorkQueue;
use crds::well_known::IMAGE_CONFIG_NAME;
use crds::{
    ClusterVersion, ContainerRuntimeConfig, ControllerConfig, Image, ImageContentSourcePolicy, MachineConfigPool,
};
use futures::StreamExt;
use kube::{Api, Client, Resource, ResourceExt};
use kube_runtime::reflector::store::Writer;
use kube_runtime::{WatchStreamExt, reflector, watcher};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Drive one reflector stream until it ends, handing every event to `on_event`.
///
/// The stream reconnects with backoff on its own; errors are logged and the
/// loop continues. The stream only ends when the API server goes away for
/// good, which is reported as a watch error.
async fn watch_resource<K, F>(
    api: Api<K>,
    writer: Writer<K>,
    resource_name: &'static str,
    mut on_event: F,
) -> Result<(), ControllerError>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + std::fmt::Debug + Send + Sync + 'static,
    F: FnMut(watcher::Event<K>) + Send,
{
    info!("Starting {} watcher", resource_name);

    let stream = reflector(writer, watcher(api, watcher::Config::default())).default_backoff();
    let mut stream = std::pin::pin!(stream);
    while let Some(event) = stream.next().await {
        match event {
            Ok(event) => on_event(event),
            Err(e) => warn!("{} watch error: {}", resource_name, e),
        }
    }

    Err(ControllerError::Watch(format!("{} watch stream ended", resource_name)))
}

/// Whether an intent update needs a sync.
///
/// New objects and spec edits always do. So does the start of a deletion,
/// and every finalizer change while deleting: each pass pops one finalizer
/// and the resulting update drives the next one.
pub fn runtime_config_needs_sync(old: Option<&ContainerRuntimeConfig>, new: &ContainerRuntimeConfig) -> bool {
    let Some(old) = old else {
        return true;
    };

    let spec_changed = serde_json::to_value(&old.spec).ok() != serde_json::to_value(&new.spec).ok();
    let deletion_changed = old.metadata.deletion_timestamp != new.metadata.deletion_timestamp;
    let deleting = new.metadata.deletion_timestamp.is_some();

    spec_changed || deletion_changed || (deleting && old.finalizers() != new.finalizers())
}

/// Whether the release image the cluster is moving to changed
fn desired_image_changed(old: Option<&String>, new: &ClusterVersion) -> bool {
    old.map(String::as_str) != Some(new.desired_image().unwrap_or_default())
}

/// Watches the kinds the controller depends on and feeds the work queues.
pub struct Watcher {
    client: Client,
    runtime_config_queue: Arc<WorkQueue>,
    image_queue: Arc<WorkQueue>,
}

impl Watcher {
    /// Creates a new watcher instance.
    pub fn new(client: Client, runtime_config_queue: Arc<WorkQueue>, image_queue: Arc<WorkQueue>) -> Self {
        Self {
            client,
            runtime_config_queue,
            image_queue,
        }
    }

    /// Watches ContainerRuntimeConfigs; relevant changes enqueue the object's name.
    pub async fn watch_runtime_configs(&self, writer: Writer<ContainerRuntimeConfig>) -> Result<(), ControllerError> {
        let api: Api<ContainerRuntimeConfig> = Api::all(self.client.clone());
        let queue = self.runtime_config_queue.clone();
        let mut last_seen: HashMap<String, ContainerRuntimeConfig> = HashMap::new();

        watch_resource(api, writer, "ContainerRuntimeConfig", move |event| match event {
            watcher::Event::Apply(cfg) | watcher::Event::InitApply(cfg) => {
                let name = cfg.name_any();
                if runtime_config_needs_sync(last_seen.get(&name), &cfg) {
                    debug!("Enqueueing ContainerRuntimeConfig {}", name);
                    queue.add(&name);
                }
                last_seen.insert(name, cfg);
            }
            watcher::Event::Delete(cfg) => {
                let name = cfg.name_any();
                debug!("ContainerRuntimeConfig {} deleted", name);
                last_seen.remove(&name);
            }
            watcher::Event::Init | watcher::Event::InitDone => {}
        })
        .await
    }

    /// Watches the Image config; any change enqueues the singleton key.
    pub async fn watch_images(&self, writer: Writer<Image>) -> Result<(), ControllerError> {
        let api: Api<Image> = Api::all(self.client.clone());
        let queue = self.image_queue.clone();

        watch_resource(api, writer, "Image", move |event| match event {
            watcher::Event::Apply(image) | watcher::Event::InitApply(image) | watcher::Event::Delete(image) => {
                debug!("Image {} changed", image.name_any());
                queue.add(IMAGE_CONFIG_NAME);
            }
            watcher::Event::Init | watcher::Event::InitDone => {}
        })
        .await
    }

    /// Watches ImageContentSourcePolicies; mirror changes regenerate registries.conf.
    pub async fn watch_image_content_source_policies(
        &self,
        writer: Writer<ImageContentSourcePolicy>,
    ) -> Result<(), ControllerError> {
        let api: Api<ImageContentSourcePolicy> = Api::all(self.client.clone());
        let queue = self.image_queue.clone();

        watch_resource(api, writer, "ImageContentSourcePolicy", move |event| match event {
            watcher::Event::Apply(icsp) | watcher::Event::InitApply(icsp) | watcher::Event::Delete(icsp) => {
                debug!("ImageContentSourcePolicy {} changed", icsp.name_any());
                queue.add(IMAGE_CONFIG_NAME);
            }
            watcher::Event::Init | watcher::Event::InitDone => {}
        })
        .await
    }

    /// Watches ClusterVersion; a new desired release image re-validates blocked registries.
    pub async fn watch_cluster_versions(&self, writer: Writer<ClusterVersion>) -> Result<(), ControllerError> {
        let api: Api<ClusterVersion> = Api::all(self.client.clone());
        let queue = self.image_queue.clone();
        let mut last_image: HashMap<String, String> = HashMap::new();

        watch_resource(api, writer, "ClusterVersion", move |event| match event {
            watcher::Event::Apply(cv) | watcher::Event::InitApply(cv) => {
                let name = cv.name_any();
                if desired_image_changed(last_image.get(&name), &cv) {
                    debug!("ClusterVersion {} desired image changed", name);
                    queue.add(IMAGE_CONFIG_NAME);
                }
                last_image.insert(name, cv.desired_image().unwrap_or_default().to_string());
            }
            watcher::Event::Delete(cv) => {
                last_image.remove(&cv.name_any());
            }
            watcher::Event::Init | watcher::Event::InitDone => {}
        })
        .await
    }

    /// Caches MachineConfigPools.
    pub async fn watch_machine_config_pools(&self, writer: Writer<MachineConfigPool>) -> Result<(), ControllerError> {
        let api: Api<MachineConfigPool> = Api::all(self.client.clone());
        watch_resource(api, writer, "MachineConfigPool", |_| {}).await
    }

    /// Caches the ControllerConfig.
    pub async fn watch_controller_configs(&self, writer: Writer<ControllerConfig>) -> Result<(), ControllerError> {
        let api: Api<ControllerConfig> = Api::all(self.client.clone());
        watch_resource(api, writer, "ControllerConfig", |_| {}).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{TEST_RELEASE_IMAGE, create_test_cluster_version, create_test_runtime_config};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    fn deleting(mut cfg: ContainerRuntimeConfig, finalizers: &[&str]) -> ContainerRuntimeConfig {
        let stamp = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        let time: Time = serde_json::from_value(serde_json::Value::String(stamp)).unwrap();
        cfg.metadata.deletion_timestamp = Some(time);
        cfg.metadata.finalizers = Some(finalizers.iter().map(|f| (*f).to_string()).collect());
        cfg
    }

    #[test]
    fn test_new_config_needs_sync() {
        let cfg = create_test_runtime_config("set-pids", "worker");
        assert!(runtime_config_needs_sync(None, &cfg));
    }

    #[test]
    fn test_metadata_only_update_is_ignored() {
        let old = create_test_runtime_config("set-pids", "worker");
        let mut new = old.clone();
        new.annotations_mut().insert("example.com/owner".to_string(), "team-a".to_string());
        new.metadata.finalizers = Some(vec!["99-worker-generated-containerruntime".to_string()]);
        assert!(!runtime_config_needs_sync(Some(&old), &new));
    }

    #[test]
    fn test_spec_edit_needs_sync() {
        let old = create_test_runtime_config("set-pids", "worker");
        let mut new = old.clone();
        if let Some(settings) = new.spec.container_runtime_config.as_mut() {
            settings.pids_limit = Some(4096);
        }
        assert!(runtime_config_needs_sync(Some(&old), &new));
    }

    #[test]
    fn test_deletion_drives_finalizer_drain() {
        let live = create_test_runtime_config("multi", "worker");
        let first = deleting(live.clone(), &["mc-a", "mc-b"]);
        assert!(runtime_config_needs_sync(Some(&live), &first));

        let mut popped = first.clone();
        popped.metadata.finalizers = Some(vec!["mc-b".to_string()]);
        assert!(runtime_config_needs_sync(Some(&first), &popped));

        // unchanged finalizers while deleting: nothing new to do
        assert!(!runtime_config_needs_sync(Some(&popped), &popped.clone()));
    }

    #[test]
    fn test_cluster_version_trigger() {
        let cv = create_test_cluster_version(TEST_RELEASE_IMAGE);
        assert!(desired_image_changed(None, &cv));
        assert!(!desired_image_changed(Some(&TEST_RELEASE_IMAGE.to_string()), &cv));
        assert!(desired_image_changed(Some(&"quay.io/example/old@sha256:def".to_string()), &cv));
    }
}
