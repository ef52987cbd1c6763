//! Runtime Configuration Rendering
//!
//! Produces the files shipped to nodes through generated `MachineConfig`s:
//! default `storage.conf`, `registries.conf` and `policy.json` templates,
//! edits applied on top of them, CRI-O drop-ins, and the manifest encoding
//! used for `MachineConfig.spec.config`.
//!
//! # Example
//!
//! ```
//! use config_render::{ArtifactRenderer, ConfigManifest, TemplateRenderer, update_storage_config};
//! use crds::ControllerConfigSpec;
//!
//! # fn example() -> Result<(), config_render::RenderError> {
//! let renderer = TemplateRenderer::default();
//! let defaults = renderer.render_defaults("worker", &ControllerConfigSpec::default())?;
//!
//! let storage = update_storage_config(&defaults.storage.decoded_contents()?, "10G")?;
//! let manifest = ConfigManifest::from_files(&[
//!     config_render::GeneratedConfigFile::new(defaults.storage.path.clone(), storage),
//! ]);
//! assert_eq!(manifest.storage.files.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod dropins;
pub mod error;
pub mod manifest;
pub mod quantity;
pub mod registries;
pub mod renderer;
pub mod storage;

pub use dropins::*;
pub use error::RenderError;
pub use manifest::{ConfigManifest, GeneratedConfigFile, ManifestFile, decode_data_url, encode_data_url};
pub use quantity::{is_zero_quantity, parse_quantity};
pub use registries::{MirrorRule, scope_matches, update_policy_json, update_registries_config};
pub use renderer::{
    ArtifactRenderer, DefaultRuntimeConfigs, POLICY_CONFIG_PATH, REGISTRIES_CONFIG_PATH,
    STORAGE_CONFIG_PATH, TemplateRenderer,
};
pub use storage::update_storage_config;
