//! MachineConfigPool CRD
//!
//! A group of nodes sharing a role. The pool name doubles as the role used
//! when rendering configuration for it.

use crate::selector::LabelSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "machineconfiguration.openshift.io",
    version = "v1",
    kind = "MachineConfigPool",
    status = "MachineConfigPoolStatus",
    shortname = "mcp"
)]
#[serde(rename_all = "camelCase")]
pub struct MachineConfigPoolSpec {
    /// Selects the MachineConfigs merged into this pool's rendered config
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_config_selector: Option<LabelSelector>,

    /// Selects the nodes belonging to this pool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<LabelSelector>,

    /// Stop rolling out new configuration to the pool
    #[serde(default)]
    pub paused: bool,

    /// Target rendered configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<RenderedConfigReference>,
}

/// Reference to a rendered `MachineConfig`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RenderedConfigReference {
    /// Name of the rendered MachineConfig
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct MachineConfigPoolStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Rendered configuration currently applied to the pool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<RenderedConfigReference>,

    #[serde(default)]
    pub machine_count: i32,

    #[serde(default)]
    pub updated_machine_count: i32,
}
