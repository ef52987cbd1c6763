//! MachineConfig naming
//!
//! Several ContainerRuntimeConfigs may select the same pool. Each one owns its
//! own MachineConfig, told apart by a numeric suffix that is persisted on the
//! intent in the `mc-name-suffix` annotation. The first intent on a pool gets
//! the unsuffixed name (stored as an empty suffix).

use crate::error::ControllerError;
use crds::well_known::MC_NAME_SUFFIX_ANNOTATION;
use crds::{ContainerRuntimeConfig, MachineConfigPool, selector_matches};
use kube::ResourceExt;

/// Substring shared by every runtime config MachineConfig name
pub const RUNTIME_CONFIG_NAME_MARKER: &str = "generated-containerruntime";

/// Highest suffix handed out; ten intents per pool in total
const MAX_SUFFIX: u32 = 9;

pub fn runtime_config_base_key(pool: &str) -> String {
    format!("99-{}-{}", pool, RUNTIME_CONFIG_NAME_MARKER)
}

pub fn registries_key(pool: &str) -> String {
    format!("99-{}-generated-registries", pool)
}

pub fn seccomp_use_default_key(pool: &str) -> String {
    format!("99-{}-generated-crio-seccomp-use-default", pool)
}

fn suffix_annotation(cfg: &ContainerRuntimeConfig) -> Option<&str> {
    cfg.annotations().get(MC_NAME_SUFFIX_ANNOTATION).map(String::as_str)
}

/// MachineConfig name for `cfg` on `pool`, given every ContainerRuntimeConfig in the cluster
pub fn managed_key_for_runtime_config(
    pool: &MachineConfigPool,
    cfg: &ContainerRuntimeConfig,
    all_configs: &[ContainerRuntimeConfig],
) -> Result<String, ControllerError> {
    let pool_name = pool.name_any();
    let base = runtime_config_base_key(&pool_name);

    let matching: Vec<&ContainerRuntimeConfig> = all_configs
        .iter()
        .filter(|c| selector_matches(c.spec.machine_config_pool_selector.as_ref(), pool.labels()))
        .collect();
    if matching.is_empty() {
        return Ok(base);
    }

    let cfg_name = cfg.name_any();
    let known = matching.iter().find(|c| c.name_any() == cfg_name);
    if let Some(known) = known {
        match suffix_annotation(known) {
            None if matching.len() < 2 => return Ok(base),
            Some("") => return Ok(base),
            Some(suffix) => return Ok(format!("{}-{}", base, suffix)),
            None => {}
        }
    }

    // new intent on a shared pool: one past the highest suffix in use
    let highest = matching
        .iter()
        .filter_map(|c| suffix_annotation(c))
        .filter_map(|s| if s.is_empty() { Some(0) } else { s.parse::<u32>().ok() })
        .max()
        .unwrap_or(0);
    let suffix = highest + 1;
    if suffix > MAX_SUFFIX {
        return Err(ControllerError::Validation(format!(
            "max number of supported ctrcfgs ({}) has been reached",
            MAX_SUFFIX + 1
        )));
    }
    Ok(format!("{}-{}", base, suffix))
}

/// Suffix encoded in `key` for `pool`: `""` for the base name, `"N"` otherwise
pub fn managed_key_suffix(key: &str, pool: &str) -> Option<String> {
    let rest = key.strip_prefix(&runtime_config_base_key(pool))?;
    if rest.is_empty() {
        return Some(String::new());
    }
    let number = rest.strip_prefix('-')?;
    number.parse::<u32>().ok().map(|n| n.to_string())
}
