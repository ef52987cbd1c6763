//! Registry policy helpers: image reference parsing and blocked registry filtering.

use crate::error::ControllerError;
use config_render::scope_matches;
use tracing::warn;

const DEFAULT_DOMAIN: &str = "docker.io";

/// Parsed image reference, without tag or digest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Registry host, with port if any
    pub domain: String,
    /// Repository path below the domain
    pub path: String,
}

impl ImageReference {
    /// `domain/path`
    pub fn repository(&self) -> String {
        format!("{}/{}", self.domain, self.path)
    }
}

fn valid_path_component(component: &str) -> bool {
    !component.is_empty()
        && component
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-'))
        && component.starts_with(|c: char| c.is_ascii_alphanumeric())
}

fn valid_host(host: &str) -> bool {
    let (name, port) = match host.rsplit_once(':') {
        Some((name, port)) => (name, Some(port)),
        None => (host, None),
    };
    if port.is_some_and(|p| p.is_empty() || !p.chars().all(|c| c.is_ascii_digit())) {
        return false;
    }
    !name.is_empty()
        && name.split('.').all(|label| {
            !label.is_empty()
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
                && !label.starts_with('-')
                && !label.ends_with('-')
        })
}

/// Parse a pull spec such as `quay.io/org/repo:tag` or `quay.io/org/repo@sha256:...`
pub fn parse_image_reference(reference: &str) -> Result<ImageReference, ControllerError> {
    let parse_error = || ControllerError::ReleaseImageParse(reference.to_string());

    let (name, digest) = match reference.split_once('@') {
        Some((name, digest)) => (name, Some(digest)),
        None => (reference, None),
    };
    if let Some(digest) = digest {
        let (algorithm, hex) = digest.split_once(':').ok_or_else(parse_error)?;
        if algorithm.is_empty() || hex.is_empty() || !hex.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(parse_error());
        }
    }

    // a tag can only follow the last path separator
    let name = match name.rfind(':') {
        Some(idx) if !name[idx..].contains('/') => &name[..idx],
        _ => name,
    };
    if name.is_empty() {
        return Err(parse_error());
    }

    let (domain, path) = match name.split_once('/') {
        Some((first, rest)) if first.contains('.') || first.contains(':') || first == "localhost" => {
            (first.to_string(), rest.to_string())
        }
        _ => (DEFAULT_DOMAIN.to_string(), name.to_string()),
    };
    if !valid_host(&domain) || !path.split('/').all(valid_path_component) {
        return Err(parse_error());
    }

    Ok(ImageReference { domain, path })
}

/// Whether `scope` is a well-formed registry scope: `[*.]host[:port][/path]`
pub fn is_valid_registry_scope(scope: &str) -> bool {
    let scope = scope.strip_prefix("*.").unwrap_or(scope);
    let (host, path) = match scope.split_once('/') {
        Some((host, path)) => (host, Some(path)),
        None => (scope, None),
    };
    valid_host(host) && path.is_none_or(|p| p.split('/').all(valid_path_component))
}

/// Blocked registries that are safe to apply.
///
/// Malformed entries are dropped with a warning, and so is any scope that
/// covers the release image's repository, so the cluster can always pull its
/// own payload. An unparsable release image is an error, unless nothing is
/// requested to be blocked.
pub fn effective_blocked_registries(
    release_image: &str,
    requested: &[String],
) -> Result<Vec<String>, ControllerError> {
    if requested.is_empty() {
        return Ok(Vec::new());
    }
    let release = parse_image_reference(release_image)?;
    let repository = release.repository();

    let mut blocked = Vec::with_capacity(requested.len());
    for scope in requested {
        if !is_valid_registry_scope(scope) {
            warn!("Invalid blocked registry {:?}, skipping", scope);
            continue;
        }
        if scope == &release.domain || scope_matches(scope, &repository) {
            warn!(
                "Not blocking {:?}: it serves the release image {}",
                scope, release_image
            );
            continue;
        }
        blocked.push(scope.clone());
    }
    Ok(blocked)
}
