//! Label selectors
//!
//! Kubernetes-style label selectors used by `ContainerRuntimeConfig` to pick
//! the `MachineConfigPool`s it applies to, and by the controller to find the
//! built-in pools.
//!
//! Unlike the upstream apimachinery helper, an empty selector here is treated
//! as matching **nothing**: callers must opt in to every pool explicitly.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors raised while validating a label selector
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SelectorError {
    /// `In` / `NotIn` requirement without values
    #[error("invalid label selector: operator {operator} on key {key:?} requires at least one value")]
    MissingValues { key: String, operator: String },

    /// `Exists` / `DoesNotExist` requirement with values
    #[error("invalid label selector: operator {operator} on key {key:?} must not have values")]
    UnexpectedValues { key: String, operator: String },

    /// Empty label key
    #[error("invalid label selector: empty label key")]
    EmptyKey,
}

/// Set-based requirement operator
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum SelectorOperator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

impl std::fmt::Display for SelectorOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SelectorOperator::In => "In",
            SelectorOperator::NotIn => "NotIn",
            SelectorOperator::Exists => "Exists",
            SelectorOperator::DoesNotExist => "DoesNotExist",
        };
        f.write_str(s)
    }
}

/// A single set-based requirement (`matchExpressions` entry)
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelectorRequirement {
    /// Label key the requirement applies to
    pub key: String,

    /// Relationship between the key and the values
    pub operator: SelectorOperator,

    /// Values for `In` / `NotIn`; must be empty for `Exists` / `DoesNotExist`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

/// Label selector (`matchLabels` AND `matchExpressions`)
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    /// Exact key/value matches
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,

    /// Set-based requirements
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_expressions: Vec<LabelSelectorRequirement>,
}

impl LabelSelector {
    /// Selector requiring a single label to have the given value
    pub fn from_label(key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut match_labels = BTreeMap::new();
        match_labels.insert(key.into(), value.into());
        Self {
            match_labels,
            match_expressions: Vec::new(),
        }
    }

    /// True when the selector carries no requirement at all
    pub fn is_empty(&self) -> bool {
        self.match_labels.is_empty() && self.match_expressions.is_empty()
    }

    /// Check the selector is well-formed
    pub fn validate(&self) -> Result<(), SelectorError> {
        if self.match_labels.keys().any(|k| k.is_empty()) {
            return Err(SelectorError::EmptyKey);
        }
        for req in &self.match_expressions {
            if req.key.is_empty() {
                return Err(SelectorError::EmptyKey);
            }
            match req.operator {
                SelectorOperator::In | SelectorOperator::NotIn if req.values.is_empty() => {
                    return Err(SelectorError::MissingValues {
                        key: req.key.clone(),
                        operator: req.operator.to_string(),
                    });
                }
                SelectorOperator::Exists | SelectorOperator::DoesNotExist if !req.values.is_empty() => {
                    return Err(SelectorError::UnexpectedValues {
                        key: req.key.clone(),
                        operator: req.operator.to_string(),
                    });
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Whether `labels` satisfies every requirement of this selector.
    ///
    /// An empty selector matches nothing.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        if self.is_empty() {
            return false;
        }

        let labels_match = self
            .match_labels
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v));
        if !labels_match {
            return false;
        }

        self.match_expressions.iter().all(|req| {
            let current = labels.get(&req.key);
            match req.operator {
                SelectorOperator::In => current.is_some_and(|v| req.values.contains(v)),
                SelectorOperator::NotIn => current.is_none_or(|v| !req.values.contains(v)),
                SelectorOperator::Exists => current.is_some(),
                SelectorOperator::DoesNotExist => current.is_none(),
            }
        })
    }
}

/// Match an optional selector; `None` matches nothing
pub fn selector_matches(selector: Option<&LabelSelector>, labels: &BTreeMap<String, String>) -> bool {
    selector.is_some_and(|s| s.matches(labels))
}
