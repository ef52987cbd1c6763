//! Status conditions and annotation writes on ContainerRuntimeConfigs.
//!
//! A repeated message overwrites the last condition instead of growing the
//! list, so a config failing the same way on every pass keeps one entry.

use super::Reconciler;
use crate::error::ControllerError;
use crate::retry::retry_on_conflict;
use cluster_store::StoreError;
use crds::{
    ContainerRuntimeConfig, ContainerRuntimeConfigCondition, ContainerRuntimeConfigConditionType,
    ContainerRuntimeConfigStatus,
};
use kube::ResourceExt;
use tracing::{debug, warn};

/// Condition describing the outcome of a pass
pub fn wrap_error_with_condition(
    err: Option<&ControllerError>,
    message: Option<String>,
) -> ContainerRuntimeConfigCondition {
    let now = Some(chrono::Utc::now());
    match err {
        Some(err) => ContainerRuntimeConfigCondition {
            type_: ContainerRuntimeConfigConditionType::Failure,
            status: "False".to_string(),
            last_transition_time: now,
            reason: None,
            message: message.unwrap_or_else(|| format!("Error: {}", err)),
        },
        None => ContainerRuntimeConfigCondition {
            type_: ContainerRuntimeConfigConditionType::Success,
            status: "True".to_string(),
            last_transition_time: now,
            reason: None,
            message: "Success".to_string(),
        },
    }
}

/// Append `condition` unless it repeats the last message, in which case the last entry is replaced
pub fn append_condition(conditions: &mut Vec<ContainerRuntimeConfigCondition>, condition: ContainerRuntimeConfigCondition) {
    match conditions.last_mut() {
        Some(last) if last.message == condition.message => *last = condition,
        _ => conditions.push(condition),
    }
}

impl Reconciler {
    /// Record the outcome of a pass on `cfg` and hand `err` back
    pub(crate) async fn sync_status_only(
        &self,
        cfg: &ContainerRuntimeConfig,
        err: Option<ControllerError>,
        message: Option<String>,
    ) -> Result<(), ControllerError> {
        self.record_condition(cfg, err.as_ref(), message).await;
        match err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Append a condition to the status of `cfg`.
    ///
    /// Failing to write the status is only logged so it never masks the
    /// outcome being recorded.
    pub(crate) async fn record_condition(
        &self,
        cfg: &ContainerRuntimeConfig,
        err: Option<&ControllerError>,
        message: Option<String>,
    ) {
        let condition = wrap_error_with_condition(err, message);
        let name = cfg.name_any();
        let name = name.as_str();
        let condition = &condition;

        let written = retry_on_conflict(&self.settings.update_retry, "update ContainerRuntimeConfig status", || async move {
            let Some(mut current) = self.store.get_runtime_config(name).await? else {
                return Err(StoreError::NotFound(format!("ContainerRuntimeConfig {}", name)));
            };
            let generation = current.metadata.generation;
            let status = current.status.get_or_insert_with(ContainerRuntimeConfigStatus::default);
            status.observed_generation = generation;
            append_condition(&mut status.conditions, condition.clone());
            self.store.update_runtime_config_status(&current).await?;
            Ok::<(), StoreError>(())
        })
        .await;

        if let Err(e) = written {
            warn!("error updating container runtime config status: {}", e);
        }
    }

    /// Set annotation `key` on the named config, keeping its other annotations
    pub(crate) async fn add_annotation(&self, name: &str, key: &str, value: &str) -> Result<(), ControllerError> {
        retry_on_conflict(&self.settings.update_retry, "annotate ContainerRuntimeConfig", || async move {
            let Some(mut current) = self.store.get_runtime_config(name).await? else {
                return Err(StoreError::NotFound(format!("ContainerRuntimeConfig {}", name)));
            };
            if current.annotations().get(key).map(String::as_str) == Some(value) {
                return Ok(());
            }
            current.annotations_mut().insert(key.to_string(), value.to_string());
            self.store.update_runtime_config(&current).await?;
            debug!("Annotated ContainerRuntimeConfig {} with {}={:?}", name, key, value);
            Ok::<(), StoreError>(())
        })
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(message: &str) -> ContainerRuntimeConfigCondition {
        wrap_error_with_condition(
            Some(&ControllerError::Reconciliation("boom".to_string())),
            Some(message.to_string()),
        )
    }

    #[test]
    fn test_condition_messages() {
        let ok = wrap_error_with_condition(None, None);
        assert_eq!(ok.type_, ContainerRuntimeConfigConditionType::Success);
        assert_eq!(ok.status, "True");
        assert_eq!(ok.message, "Success");

        let err = wrap_error_with_condition(Some(&ControllerError::Validation("bad".to_string())), None);
        assert_eq!(err.type_, ContainerRuntimeConfigConditionType::Failure);
        assert_eq!(err.status, "False");
        assert_eq!(err.message, "Error: bad");

        let ctx = failure("could not Create/Update MachineConfig: boom");
        assert_eq!(ctx.message, "could not Create/Update MachineConfig: boom");
    }

    #[test]
    fn test_repeated_message_overwrites_last() {
        let mut conditions = Vec::new();
        for _ in 0..5 {
            append_condition(&mut conditions, failure("same"));
        }
        assert_eq!(conditions.len(), 1);

        append_condition(&mut conditions, wrap_error_with_condition(None, None));
        append_condition(&mut conditions, failure("same"));
        assert_eq!(conditions.len(), 3);
        assert_eq!(conditions[2].message, "same");
    }
}
