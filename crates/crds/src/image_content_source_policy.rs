//! ImageContentSourcePolicy CRD (`operator.openshift.io/v1alpha1`)
//!
//! Digest mirror rules merged into `registries.conf`.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "operator.openshift.io",
    version = "v1alpha1",
    kind = "ImageContentSourcePolicy"
)]
#[serde(rename_all = "camelCase")]
pub struct ImageContentSourcePolicySpec {
    #[serde(default)]
    pub repository_digest_mirrors: Vec<RepositoryDigestMirrors>,
}

/// Mirrors serving the same content as `source`, pulled by digest only
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryDigestMirrors {
    /// Repository being mirrored
    pub source: String,

    /// Mirror repositories, in preference order
    #[serde(default)]
    pub mirrors: Vec<String>,
}
