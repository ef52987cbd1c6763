//! Container Runtime Config CRD Definitions
//!
//! Kubernetes resource types read and written by the container runtime
//! config controller, plus label selector matching and well-known names.

pub mod cluster_version;
pub mod container_runtime_config;
pub mod controller_config;
pub mod image;
pub mod image_content_source_policy;
pub mod machine_config;
pub mod machine_config_pool;
pub mod selector;
pub mod well_known;

pub use cluster_version::*;
pub use container_runtime_config::*;
pub use controller_config::*;
pub use image::*;
pub use image_content_source_policy::*;
pub use machine_config::*;
pub use machine_config_pool::*;
pub use selector::*;

/// Schema for free-form JSON fields (`x-kubernetes-preserve-unknown-fields`)
pub(crate) fn preserve_unknown_fields(_: &mut schemars::SchemaGenerator) -> schemars::Schema {
    schemars::json_schema!({
        "type": "object",
        "x-kubernetes-preserve-unknown-fields": true
    })
}
