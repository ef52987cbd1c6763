//! Default configuration rendering
//!
//! The renderer produces the default `storage.conf`, `registries.conf` and
//! `policy.json` for a pool role. The controller then applies user deltas on
//! top of the decoded defaults.
//!
//! Templates are looked up in `<templates_dir>/<role>/<file>`, then
//! `<templates_dir>/common/<file>`, then the defaults compiled into the
//! binary. `{{releaseImage}}` and `{{role}}` are substituted.

use crate::error::RenderError;
use crate::manifest::ManifestFile;
use crds::ControllerConfigSpec;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Node path of the rendered storage.conf
pub const STORAGE_CONFIG_PATH: &str = "/etc/containers/storage.conf";
/// Node path of the rendered registries.conf
pub const REGISTRIES_CONFIG_PATH: &str = "/etc/containers/registries.conf";
/// Node path of the rendered policy.json
pub const POLICY_CONFIG_PATH: &str = "/etc/containers/policy.json";

const DEFAULT_STORAGE_CONF: &str = include_str!("../templates/common/storage.conf");
const DEFAULT_REGISTRIES_CONF: &str = include_str!("../templates/common/registries.conf");
const DEFAULT_POLICY_JSON: &str = include_str!("../templates/common/policy.json");

/// Default files for one pool role
#[derive(Debug, Clone)]
pub struct DefaultRuntimeConfigs {
    pub storage: ManifestFile,
    pub registries: ManifestFile,
    pub policy: ManifestFile,
}

/// Renders the default runtime configuration files
pub trait ArtifactRenderer: Send + Sync {
    fn render_defaults(
        &self,
        role: &str,
        controller_config: &ControllerConfigSpec,
    ) -> Result<DefaultRuntimeConfigs, RenderError>;
}

/// Renderer reading templates from disk, with compiled-in fallbacks
#[derive(Debug, Clone, Default)]
pub struct TemplateRenderer {
    templates_dir: Option<PathBuf>,
}

impl TemplateRenderer {
    pub fn new(templates_dir: Option<PathBuf>) -> Self {
        Self { templates_dir }
    }

    fn load(&self, role: &str, file_name: &str, fallback: &str) -> Result<String, RenderError> {
        let Some(dir) = &self.templates_dir else {
            return Ok(fallback.to_string());
        };

        for candidate in [dir.join(role).join(file_name), dir.join("common").join(file_name)] {
            if let Some(contents) = read_if_exists(&candidate)? {
                debug!("Using template {}", candidate.display());
                return Ok(contents);
            }
        }
        Ok(fallback.to_string())
    }
}

fn read_if_exists(path: &Path) -> Result<Option<String>, RenderError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(RenderError::Template {
            path: path.display().to_string(),
            source,
        }),
    }
}

fn substitute(template: &str, role: &str, controller_config: &ControllerConfigSpec) -> String {
    template
        .replace("{{releaseImage}}", &controller_config.release_image)
        .replace("{{role}}", role)
}

impl ArtifactRenderer for TemplateRenderer {
    fn render_defaults(
        &self,
        role: &str,
        controller_config: &ControllerConfigSpec,
    ) -> Result<DefaultRuntimeConfigs, RenderError> {
        let storage = self.load(role, "storage.conf", DEFAULT_STORAGE_CONF)?;
        let registries = self.load(role, "registries.conf", DEFAULT_REGISTRIES_CONF)?;
        let policy = self.load(role, "policy.json", DEFAULT_POLICY_JSON)?;

        Ok(DefaultRuntimeConfigs {
            storage: ManifestFile::from_bytes(
                STORAGE_CONFIG_PATH,
                substitute(&storage, role, controller_config).as_bytes(),
            ),
            registries: ManifestFile::from_bytes(
                REGISTRIES_CONFIG_PATH,
                substitute(&registries, role, controller_config).as_bytes(),
            ),
            policy: ManifestFile::from_bytes(
                POLICY_CONFIG_PATH,
                substitute(&policy, role, controller_config).as_bytes(),
            ),
        })
    }
}
