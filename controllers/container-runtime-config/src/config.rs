//! Controller settings loaded from environment variables.

use crate::error::ControllerError;
use std::net::SocketAddr;
use std::path::PathBuf;

const DEFAULT_NAMESPACE: &str = "openshift-machine-config-operator";
const DEFAULT_WORKERS: usize = 5;
const DEFAULT_HEALTH_ADDR: &str = "0.0.0.0:8080";

/// Process-wide settings
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// Namespace holding the controller's own objects (seccomp marker ConfigMap)
    pub namespace: String,
    /// Optional directory overriding the built-in templates
    pub templates_dir: Option<PathBuf>,
    /// Worker loops draining the ContainerRuntimeConfig queue
    pub workers: usize,
    /// Build identifier stamped on every generated MachineConfig
    pub build_version: String,
    /// Listen address for health checks and metrics
    pub health_addr: SocketAddr,
}

impl ControllerSettings {
    /// Load settings from the process environment
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings through `lookup`, which returns the value of a variable
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ControllerError> {
        let namespace = lookup("CONTROLLER_NAMESPACE")
            .filter(|ns| !ns.is_empty())
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());

        let templates_dir = lookup("TEMPLATES_DIR")
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from);

        let workers = match lookup("WORKERS") {
            Some(raw) => raw
                .parse::<usize>()
                .ok()
                .filter(|w| *w > 0)
                .ok_or_else(|| {
                    ControllerError::InvalidConfig(format!("WORKERS must be a positive integer, got {:?}", raw))
                })?,
            None => DEFAULT_WORKERS,
        };

        let build_version = lookup("BUILD_VERSION")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string());

        let health_addr_raw = lookup("HEALTH_ADDR").unwrap_or_else(|| DEFAULT_HEALTH_ADDR.to_string());
        let health_addr = health_addr_raw.parse::<SocketAddr>().map_err(|e| {
            ControllerError::InvalidConfig(format!("HEALTH_ADDR {:?} is not a socket address: {}", health_addr_raw, e))
        })?;

        Ok(Self {
            namespace,
            templates_dir,
            workers,
            build_version,
            health_addr,
        })
    }
}
