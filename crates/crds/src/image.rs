//! Image config CRD (`config.openshift.io/v1`)
//!
//! Cluster-wide registry policy. Only the `cluster` singleton is honoured.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(group = "config.openshift.io", version = "v1", kind = "Image")]
#[serde(rename_all = "camelCase")]
pub struct ImageSpec {
    /// Registry access policy for container runtimes
    #[serde(default)]
    pub registry_sources: RegistrySources,
}

/// Registry lists applied to `registries.conf` and `policy.json`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySources {
    /// Registries reachable without TLS verification
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub insecure_registries: Vec<String>,

    /// Registries pulls are refused from
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocked_registries: Vec<String>,

    /// When set, the only registries pulls are allowed from
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_registries: Vec<String>,

    /// Registries searched for short image names
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub container_runtime_search_registries: Vec<String>,
}
