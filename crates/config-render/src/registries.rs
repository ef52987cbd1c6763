//! `registries.conf` and `policy.json` edits
//!
//! `registries.conf` uses the v2 format: one `[[registry]]` table per scope,
//! keyed by `prefix` (falling back to `location`). Scopes are either a
//! repository prefix (`quay.io/example`) or a wildcard host (`*.example.com`).

use crate::error::RenderError;
use crate::renderer::{POLICY_CONFIG_PATH, REGISTRIES_CONFIG_PATH};
use crate::storage::parse_toml;
use serde_json::json;
use toml::{Table, Value};

/// Digest mirrors for one source repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorRule {
    pub source: String,
    pub mirrors: Vec<String>,
}

/// Whether `reference` (an image or repository reference) falls inside `scope`
pub fn scope_matches(scope: &str, reference: &str) -> bool {
    if let Some(suffix) = scope.strip_prefix("*.") {
        let host = reference.split('/').next().unwrap_or_default();
        let host = host.split(':').next().unwrap_or_default();
        return host.ends_with(&format!(".{}", suffix));
    }

    if reference == scope {
        return true;
    }
    let Some(rest) = reference.strip_prefix(scope) else {
        return false;
    };
    // a tag separator only makes sense once past the host
    rest.starts_with('/') || rest.starts_with('@') || (scope.contains('/') && rest.starts_with(':'))
}

fn entry_scope(entry: &Table) -> Option<&str> {
    entry
        .get("prefix")
        .and_then(Value::as_str)
        .filter(|p| !p.is_empty())
        .or_else(|| entry.get("location").and_then(Value::as_str))
}

fn registry_entry<'a>(registries: &'a mut Vec<Table>, scope: &str) -> &'a mut Table {
    let index = match registries.iter().position(|r| entry_scope(r) == Some(scope)) {
        Some(index) => index,
        None => {
            let mut entry = Table::new();
            entry.insert("prefix".to_string(), Value::String(scope.to_string()));
            if !scope.starts_with("*.") {
                entry.insert("location".to_string(), Value::String(scope.to_string()));
            }
            registries.push(entry);
            registries.len() - 1
        }
    };
    &mut registries[index]
}

fn take_registries(doc: &mut Table) -> Result<Vec<Table>, RenderError> {
    let invalid = || RenderError::InvalidDocument {
        file: REGISTRIES_CONFIG_PATH.to_string(),
        reason: "registry must be an array of tables".to_string(),
    };
    match doc.remove("registry") {
        None => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                Value::Table(table) => Ok(table),
                _ => Err(invalid()),
            })
            .collect(),
        Some(_) => Err(invalid()),
    }
}

/// Apply insecure, blocked and mirror settings to a `registries.conf` document
pub fn update_registries_config(
    data: &[u8],
    insecure: &[String],
    blocked: &[String],
    mirror_rules: &[MirrorRule],
) -> Result<Vec<u8>, RenderError> {
    let mut doc = parse_toml(data, REGISTRIES_CONFIG_PATH)?;
    let mut registries = take_registries(&mut doc)?;

    for rule in mirror_rules.iter().filter(|r| !r.mirrors.is_empty()) {
        let entry = registry_entry(&mut registries, &rule.source);
        entry.insert("mirror-by-digest-only".to_string(), Value::Boolean(true));
        let mirrors = entry
            .entry("mirror".to_string())
            .or_insert(Value::Array(Vec::new()));
        if let Value::Array(mirrors) = mirrors {
            for location in &rule.mirrors {
                let present = mirrors
                    .iter()
                    .any(|m| m.get("location").and_then(Value::as_str) == Some(location.as_str()));
                if !present {
                    let mut mirror = Table::new();
                    mirror.insert("location".to_string(), Value::String(location.clone()));
                    mirrors.push(Value::Table(mirror));
                }
            }
        }
    }

    for scope in insecure {
        registry_entry(&mut registries, scope).insert("insecure".to_string(), Value::Boolean(true));
    }

    // mirrors hosted inside an insecure scope must be reached insecurely too
    for entry in &mut registries {
        if let Some(Value::Array(mirrors)) = entry.get_mut("mirror") {
            for mirror in mirrors.iter_mut() {
                if let Value::Table(mirror) = mirror {
                    let location = mirror.get("location").and_then(Value::as_str).unwrap_or_default();
                    if insecure.iter().any(|scope| scope_matches(scope, location)) {
                        mirror.insert("insecure".to_string(), Value::Boolean(true));
                    }
                }
            }
        }
    }

    for scope in blocked {
        registry_entry(&mut registries, scope).insert("blocked".to_string(), Value::Boolean(true));
    }

    registries.sort_by(|a, b| entry_scope(a).cmp(&entry_scope(b)));
    if !registries.is_empty() {
        doc.insert(
            "registry".to_string(),
            Value::Array(registries.into_iter().map(Value::Table).collect()),
        );
    }

    Ok(toml::to_string(&doc)?.into_bytes())
}

/// Apply blocked and allowed registries to a `policy.json` document.
///
/// A non-empty allowed list turns the default into `reject`.
pub fn update_policy_json(data: &[u8], blocked: &[String], allowed: &[String]) -> Result<Vec<u8>, RenderError> {
    let mut policy: serde_json::Value = serde_json::from_slice(data)?;
    let invalid = |reason: &str| RenderError::InvalidDocument {
        file: POLICY_CONFIG_PATH.to_string(),
        reason: reason.to_string(),
    };

    let root = policy
        .as_object_mut()
        .ok_or_else(|| invalid("policy must be a JSON object"))?;

    if !allowed.is_empty() {
        root.insert("default".to_string(), json!([{ "type": "reject" }]));
    }

    let transports = root
        .entry("transports")
        .or_insert_with(|| json!({}))
        .as_object_mut()
        .ok_or_else(|| invalid("transports must be a JSON object"))?;

    for transport in ["docker", "atomic"] {
        let scopes = transports
            .entry(transport)
            .or_insert_with(|| json!({}))
            .as_object_mut()
            .ok_or_else(|| invalid("transport scopes must be a JSON object"))?;
        for scope in allowed {
            scopes.insert(scope.clone(), json!([{ "type": "insecureAcceptAnything" }]));
        }
        for scope in blocked {
            scopes.insert(scope.clone(), json!([{ "type": "reject" }]));
        }
    }

    Ok(serde_json::to_vec_pretty(&policy)?)
}
