//! ControllerConfig CRD
//!
//! Base configuration handed to the template renderer.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "machineconfiguration.openshift.io",
    version = "v1",
    kind = "ControllerConfig"
)]
#[serde(rename_all = "camelCase")]
pub struct ControllerConfigSpec {
    /// Release payload image the cluster runs
    #[serde(default)]
    pub release_image: String,

    /// Infrastructure platform (e.g. "aws", "none")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,

    /// Base OS container image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_os_container_image: Option<String>,
}
