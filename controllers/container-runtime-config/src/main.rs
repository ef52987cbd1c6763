//! ContainerRuntimeConfig Controller
//!
//! Renders ContainerRuntimeConfig intents and the cluster Image registry
//! policy into per-pool MachineConfigs:
//! - ContainerRuntimeConfig: CRI-O drop-ins and storage.conf per selected pool
//! - Image `cluster`: registries.conf, policy.json and search registries per built-in pool
//! - seccomp: one-time `seccompUseDefault` drop-in per built-in pool
//!
//! `container-runtime-config-controller bootstrap` renders the registries and
//! seccomp MachineConfigs from manifests on disk instead of running the controller.

mod backoff;
mod bootstrap;
mod config;
mod controller;
mod dispatch;
mod error;
mod health;
mod metrics;
mod queue;
mod reconciler;
mod registries;
mod retry;
mod watcher;

#[cfg(test)]
mod test_utils;

use crate::config::ControllerSettings;
use crate::error::ControllerError;
use controller::Controller;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    // kube's rustls-tls needs a process-wide crypto provider
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        info!("rustls crypto provider already installed");
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if std::env::args().nth(1).as_deref() == Some("bootstrap") {
        info!("Starting ContainerRuntimeConfig bootstrap");
        return bootstrap::run_from_env();
    }

    info!("Starting ContainerRuntimeConfig Controller");

    let settings = ControllerSettings::from_env()?;
    info!("Configuration:");
    info!("  Namespace: {}", settings.namespace);
    info!("  Build version: {}", settings.build_version);
    info!("  Workers: {}", settings.workers);
    info!("  Health address: {}", settings.health_addr);
    info!(
        "  Templates: {}",
        settings
            .templates_dir
            .as_ref()
            .map_or_else(|| "built-in".to_string(), |d| d.display().to_string())
    );

    let controller = Controller::new(settings).await?;
    controller.run().await?;

    Ok(())
}
