//! Main controller implementation.
//!
//! Wires the cluster store caches, watchers, work queues and workers:
//!
//! - ContainerRuntimeConfig events feed the `containerruntimeconfig` queue,
//!   drained by `WORKERS` workers
//! - Image, ImageContentSourcePolicy and ClusterVersion events feed the
//!   `image` queue, drained by a single worker
//! - MachineConfigPools and the ControllerConfig are cached only

use crate::config::ControllerSettings;
use crate::dispatch::Dispatcher;
use crate::error::ControllerError;
use crate::health::{self, HealthState};
use crate::metrics::Metrics;
use crate::queue::WorkQueue;
use crate::reconciler::{FORCE_SYNC_ON_UPGRADE_KEY, Reconciler, SyncSettings};
use crate::watcher::Watcher;
use cluster_store::{ClusterStore, KubeClusterStore};
use config_render::TemplateRenderer;
use crds::well_known::IMAGE_CONFIG_NAME;
use kube::Client;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinHandle;
use tracing::{info, warn};

const RUNTIME_CONFIG_QUEUE: &str = "containerruntimeconfig";
const IMAGE_QUEUE: &str = "image";

/// Main controller for container runtime and registry configuration.
pub struct Controller {
    runtime_config_queue: Arc<WorkQueue>,
    image_queue: Arc<WorkQueue>,
    runtime_config_watcher: JoinHandle<Result<(), ControllerError>>,
    machine_config_pool_watcher: JoinHandle<Result<(), ControllerError>>,
    controller_config_watcher: JoinHandle<Result<(), ControllerError>>,
    image_watcher: JoinHandle<Result<(), ControllerError>>,
    cluster_version_watcher: JoinHandle<Result<(), ControllerError>>,
    icsp_watcher: JoinHandle<Result<(), ControllerError>>,
    workers: Vec<JoinHandle<()>>,
    health_server: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Creates a new controller instance: starts the watchers, waits for the
    /// caches to sync, then starts the workers and the health server.
    pub async fn new(settings: ControllerSettings) -> Result<Self, ControllerError> {
        info!("Initializing ContainerRuntimeConfig Controller");

        let client = Client::try_default().await?;
        let (store, writers) = KubeClusterStore::new(client.clone());

        let metrics = Arc::new(
            Metrics::new().map_err(|e| ControllerError::InvalidConfig(format!("metrics registry: {}", e)))?,
        );
        let ready = Arc::new(AtomicBool::new(false));
        let health_server = {
            let state = HealthState {
                ready: ready.clone(),
                metrics: metrics.clone(),
            };
            let addr = settings.health_addr;
            tokio::spawn(async move { health::serve(addr, state).await })
        };

        let runtime_config_queue = Arc::new(WorkQueue::new(RUNTIME_CONFIG_QUEUE));
        let image_queue = Arc::new(WorkQueue::new(IMAGE_QUEUE));

        let watcher = Arc::new(Watcher::new(client, runtime_config_queue.clone(), image_queue.clone()));
        let runtime_config_watcher = {
            let watcher = watcher.clone();
            let writer = writers.runtime_configs;
            tokio::spawn(async move { watcher.watch_runtime_configs(writer).await })
        };
        let machine_config_pool_watcher = {
            let watcher = watcher.clone();
            let writer = writers.machine_config_pools;
            tokio::spawn(async move { watcher.watch_machine_config_pools(writer).await })
        };
        let controller_config_watcher = {
            let watcher = watcher.clone();
            let writer = writers.controller_configs;
            tokio::spawn(async move { watcher.watch_controller_configs(writer).await })
        };
        let image_watcher = {
            let watcher = watcher.clone();
            let writer = writers.images;
            tokio::spawn(async move { watcher.watch_images(writer).await })
        };
        let cluster_version_watcher = {
            let watcher = watcher.clone();
            let writer = writers.cluster_versions;
            tokio::spawn(async move { watcher.watch_cluster_versions(writer).await })
        };
        let icsp_watcher = {
            let watcher = watcher.clone();
            let writer = writers.image_content_source_policies;
            tokio::spawn(async move { watcher.watch_image_content_source_policies(writer).await })
        };

        info!("Waiting for caches to sync...");
        store.wait_for_cache_sync().await?;
        info!("Caches synced");

        let reconciler = Arc::new(Reconciler::new(
            store,
            TemplateRenderer::new(settings.templates_dir.clone()),
            SyncSettings::new(settings.build_version.clone(), settings.namespace.clone()),
        ));

        // Regenerate everything stamped by an older build, and run the one-time seccomp rollout
        runtime_config_queue.add(FORCE_SYNC_ON_UPGRADE_KEY);
        image_queue.add(IMAGE_CONFIG_NAME);

        let mut workers = Vec::with_capacity(settings.workers + 1);
        for _ in 0..settings.workers {
            let dispatcher = Dispatcher::new(runtime_config_queue.clone()).with_metrics(metrics.clone());
            let reconciler = reconciler.clone();
            workers.push(tokio::spawn(async move {
                dispatcher
                    .run_worker(|key| {
                        let reconciler = reconciler.clone();
                        async move { reconciler.sync_container_runtime_config(&key).await }
                    })
                    .await;
            }));
        }
        {
            let dispatcher = Dispatcher::new(image_queue.clone()).with_metrics(metrics.clone());
            let reconciler = reconciler.clone();
            workers.push(tokio::spawn(async move {
                dispatcher
                    .run_worker(|key| {
                        let reconciler = reconciler.clone();
                        async move { reconciler.sync_image_config(&key).await }
                    })
                    .await;
            }));
        }

        ready.store(true, Ordering::SeqCst);
        info!("Started {} ContainerRuntimeConfig workers and 1 Image worker", settings.workers);

        Ok(Self {
            runtime_config_queue,
            image_queue,
            runtime_config_watcher,
            machine_config_pool_watcher,
            controller_config_watcher,
            image_watcher,
            cluster_version_watcher,
            icsp_watcher,
            workers,
            health_server,
        })
    }

    /// Runs the controller until a watcher exits or the process is interrupted.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("ContainerRuntimeConfig Controller running");

        let result = tokio::select! {
            result = &mut self.runtime_config_watcher => watcher_exit("ContainerRuntimeConfig", result),
            result = &mut self.machine_config_pool_watcher => watcher_exit("MachineConfigPool", result),
            result = &mut self.controller_config_watcher => watcher_exit("ControllerConfig", result),
            result = &mut self.image_watcher => watcher_exit("Image", result),
            result = &mut self.cluster_version_watcher => watcher_exit("ClusterVersion", result),
            result = &mut self.icsp_watcher => watcher_exit("ImageContentSourcePolicy", result),
            result = &mut self.health_server => match result {
                Ok(inner) => inner,
                Err(e) => Err(ControllerError::Watch(format!("health server panicked: {}", e))),
            },
            signal = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                signal.map_err(|source| ControllerError::Io {
                    path: "signal".to_string(),
                    source,
                })
            }
        };

        self.runtime_config_queue.shut_down();
        self.image_queue.shut_down();
        for worker in self.workers {
            if let Err(e) = worker.await {
                warn!("Worker exited abnormally: {}", e);
            }
        }
        info!("ContainerRuntimeConfig Controller stopped");
        result
    }
}

fn watcher_exit(
    kind: &str,
    result: Result<Result<(), ControllerError>, tokio::task::JoinError>,
) -> Result<(), ControllerError> {
    result
        .map_err(|e| ControllerError::Watch(format!("{} watcher panicked: {}", kind, e)))?
        .map_err(|e| ControllerError::Watch(format!("{} watcher error: {}", kind, e)))
}
