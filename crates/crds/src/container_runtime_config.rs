//! ContainerRuntimeConfig CRD
//!
//! User-authored overrides for CRI-O and container storage settings, applied
//! to every `MachineConfigPool` selected by `machineConfigPoolSelector`.

use crate::selector::LabelSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "machineconfiguration.openshift.io",
    version = "v1",
    kind = "ContainerRuntimeConfig",
    status = "ContainerRuntimeConfigStatus",
    shortname = "ctrcfg"
)]
#[serde(rename_all = "camelCase")]
pub struct ContainerRuntimeConfigSpec {
    /// Selects the pools the runtime settings apply to.
    /// A missing or empty selector matches no pool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_config_pool_selector: Option<LabelSelector>,

    /// Runtime settings to render
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_runtime_config: Option<ContainerRuntimeConfiguration>,
}

/// CRI-O and container storage settings
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerRuntimeConfiguration {
    /// Maximum number of processes per container (CRI-O `pids_limit`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pids_limit: Option<i64>,

    /// CRI-O log level (error, fatal, panic, warn, info, debug, trace)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// Maximum size of a container log file, as a quantity (e.g. "10Mi")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_size_max: Option<String>,

    /// Maximum size of a container image overlay, as a quantity (e.g. "10G")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overlay_size: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerRuntimeConfigStatus {
    /// Generation last processed by the controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Reconciliation outcomes, most recent last
    #[serde(default)]
    pub conditions: Vec<ContainerRuntimeConfigCondition>,
}

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerRuntimeConfigCondition {
    #[serde(rename = "type")]
    pub type_: ContainerRuntimeConfigConditionType,

    /// "True" or "False"
    pub status: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<chrono::DateTime<chrono::Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum ContainerRuntimeConfigConditionType {
    /// The configuration was rendered and applied
    Success,

    /// The configuration could not be applied
    Failure,
}

impl ContainerRuntimeConfig {
    /// Last recorded condition, if any
    pub fn latest_condition(&self) -> Option<&ContainerRuntimeConfigCondition> {
        self.status.as_ref().and_then(|s| s.conditions.last())
    }

    /// Generation the controller last processed
    pub fn observed_generation(&self) -> i64 {
        self.status
            .as_ref()
            .and_then(|s| s.observed_generation)
            .unwrap_or(0)
    }
}
