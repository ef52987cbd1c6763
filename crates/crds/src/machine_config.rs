//! MachineConfig CRD
//!
//! Rendered configuration consumed by the node agent. The controller only
//! writes `spec.config`, an Ignition-style file manifest, and never looks
//! inside it beyond equality checks.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "machineconfiguration.openshift.io",
    version = "v1",
    kind = "MachineConfig",
    shortname = "mc"
)]
#[serde(rename_all = "camelCase")]
pub struct MachineConfigSpec {
    /// Raw file manifest
    #[serde(default)]
    #[schemars(schema_with = "crate::preserve_unknown_fields")]
    pub config: serde_json::Value,

    /// Extra kernel arguments
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kernel_arguments: Vec<String>,

    /// OS image override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde(rename = "osImageURL")]
    pub os_image_url: Option<String>,
}
