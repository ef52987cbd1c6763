//! Drop-in files
//!
//! CRI-O reads every file under `/etc/crio/crio.conf.d` in lexical order,
//! and containers/image reads `/etc/containers/registries.conf.d`.

use crate::error::RenderError;
use crate::manifest::GeneratedConfigFile;
use crate::quantity::parse_quantity;
use crds::ContainerRuntimeConfiguration;
use toml::{Table, Value};

/// CRI-O drop-in carrying `log_level`
pub const LOG_LEVEL_DROPIN_PATH: &str = "/etc/crio/crio.conf.d/01-ctrcfg-logLevel";
/// CRI-O drop-in carrying `pids_limit`
pub const PIDS_LIMIT_DROPIN_PATH: &str = "/etc/crio/crio.conf.d/01-ctrcfg-pidsLimit";
/// CRI-O drop-in carrying `log_size_max`
pub const LOG_SIZE_MAX_DROPIN_PATH: &str = "/etc/crio/crio.conf.d/01-ctrcfg-logSizeMax";
/// CRI-O drop-in carrying `seccomp_use_default_when_empty`
pub const SECCOMP_USE_DEFAULT_DROPIN_PATH: &str = "/etc/crio/crio.conf.d/01-mc-seccompUseDefault";
/// registries.conf drop-in carrying `unqualified-search-registries`
pub const SEARCH_REGISTRIES_DROPIN_PATH: &str =
    "/etc/containers/registries.conf.d/01-image-searchRegistries.conf";

fn crio_runtime_dropin(key: &str, value: Value) -> Result<Vec<u8>, RenderError> {
    let mut runtime = Table::new();
    runtime.insert(key.to_string(), value);
    let mut crio = Table::new();
    crio.insert("runtime".to_string(), Value::Table(runtime));
    let mut doc = Table::new();
    doc.insert("crio".to_string(), Value::Table(crio));
    Ok(toml::to_string(&doc)?.into_bytes())
}

/// CRI-O drop-ins for every runtime setting that is set
pub fn crio_dropin_files(cfg: &ContainerRuntimeConfiguration) -> Result<Vec<GeneratedConfigFile>, RenderError> {
    let mut files = Vec::new();

    if let Some(level) = cfg.log_level.as_deref().filter(|l| !l.is_empty()) {
        files.push(GeneratedConfigFile::new(
            LOG_LEVEL_DROPIN_PATH,
            crio_runtime_dropin("log_level", Value::String(level.to_string()))?,
        ));
    }

    if let Some(limit) = cfg.pids_limit {
        files.push(GeneratedConfigFile::new(
            PIDS_LIMIT_DROPIN_PATH,
            crio_runtime_dropin("pids_limit", Value::Integer(limit))?,
        ));
    }

    if let Some(size) = cfg.log_size_max.as_deref() {
        let bytes = parse_quantity(size)?;
        if bytes != 0 {
            files.push(GeneratedConfigFile::new(
                LOG_SIZE_MAX_DROPIN_PATH,
                crio_runtime_dropin("log_size_max", Value::Integer(bytes))?,
            ));
        }
    }

    Ok(files)
}

/// Drop-in making CRI-O apply its default seccomp profile to pods without one
pub fn seccomp_use_default_dropin() -> Result<GeneratedConfigFile, RenderError> {
    Ok(GeneratedConfigFile::new(
        SECCOMP_USE_DEFAULT_DROPIN_PATH,
        crio_runtime_dropin("seccomp_use_default_when_empty", Value::Boolean(true))?,
    ))
}

/// Drop-in listing the registries searched for short image names
pub fn search_registries_dropin(search: &[String]) -> Result<GeneratedConfigFile, RenderError> {
    let mut doc = Table::new();
    doc.insert(
        "unqualified-search-registries".to_string(),
        Value::Array(search.iter().cloned().map(Value::String).collect()),
    );
    Ok(GeneratedConfigFile::new(
        SEARCH_REGISTRIES_DROPIN_PATH,
        toml::to_string(&doc)?.into_bytes(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::parse_toml;

    #[test]
    fn test_only_set_fields_produce_files() {
        let cfg = ContainerRuntimeConfiguration {
            pids_limit: Some(2048),
            ..Default::default()
        };
        let files = crio_dropin_files(&cfg).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, PIDS_LIMIT_DROPIN_PATH);

        let doc = Value::Table(parse_toml(&files[0].data, PIDS_LIMIT_DROPIN_PATH).unwrap());
        assert_eq!(doc["crio"]["runtime"]["pids_limit"].as_integer(), Some(2048));
    }

    #[test]
    fn test_log_size_is_written_in_bytes() {
        let cfg = ContainerRuntimeConfiguration {
            log_level: Some("debug".to_string()),
            log_size_max: Some("10Mi".to_string()),
            ..Default::default()
        };
        let files = crio_dropin_files(&cfg).unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec![LOG_LEVEL_DROPIN_PATH, LOG_SIZE_MAX_DROPIN_PATH]);

        let doc = Value::Table(parse_toml(&files[1].data, LOG_SIZE_MAX_DROPIN_PATH).unwrap());
        assert_eq!(doc["crio"]["runtime"]["log_size_max"].as_integer(), Some(10_485_760));
    }

    #[test]
    fn test_zero_log_size_is_skipped() {
        let cfg = ContainerRuntimeConfiguration {
            log_size_max: Some("0".to_string()),
            ..Default::default()
        };
        assert!(crio_dropin_files(&cfg).unwrap().is_empty());
    }

    #[test]
    fn test_seccomp_and_search_dropins() {
        let seccomp = seccomp_use_default_dropin().unwrap();
        let doc = Value::Table(parse_toml(&seccomp.data, &seccomp.path).unwrap());
        assert_eq!(doc["crio"]["runtime"]["seccomp_use_default_when_empty"].as_bool(), Some(true));

        let search = search_registries_dropin(&["quay.io".to_string(), "docker.io".to_string()]).unwrap();
        let doc = Value::Table(parse_toml(&search.data, &search.path).unwrap());
        let regs: Vec<&str> = doc["unqualified-search-registries"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|v| v.as_str())
            .collect();
        assert_eq!(regs, vec!["quay.io", "docker.io"]);
    }
}
