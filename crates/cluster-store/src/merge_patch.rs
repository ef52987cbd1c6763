//! JSON merge patches (RFC 7386)
//!
//! `create_three_way_merge_patch` builds a patch that carries only the
//! changes between `original` and `modified`, and brings `current` up to
//! `modified` without reverting fields the patch author never touched.
//! Arrays are replaced wholesale, as merge patch semantics require.

use crate::error::StoreError;
use serde_json::{Map, Value};

/// Compute a three-way JSON merge patch.
///
/// * deletions come from `original` → `modified` (keys present in
///   `original` but gone from `modified` become `null`)
/// * additions and changes come from `current` → `modified`
pub fn create_three_way_merge_patch(
    original: &Value,
    modified: &Value,
    current: &Value,
) -> Result<Value, StoreError> {
    let (Value::Object(original), Value::Object(modified), Value::Object(current)) =
        (original, modified, current)
    else {
        return Err(StoreError::InvalidPatch(
            "three-way merge patch requires JSON objects".to_string(),
        ));
    };

    let deletions = diff_objects(original, modified, DiffMode::DeletionsOnly);
    let delta = diff_objects(current, modified, DiffMode::AdditionsAndChanges);

    let mut patch = Value::Object(deletions);
    merge_into(&mut patch, Value::Object(delta));
    Ok(patch)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum DiffMode {
    DeletionsOnly,
    AdditionsAndChanges,
}

fn diff_objects(from: &Map<String, Value>, to: &Map<String, Value>, mode: DiffMode) -> Map<String, Value> {
    let mut patch = Map::new();

    for (key, to_value) in to {
        match from.get(key) {
            None => {
                if mode == DiffMode::AdditionsAndChanges {
                    patch.insert(key.clone(), to_value.clone());
                }
            }
            Some(from_value) if from_value == to_value => {}
            Some(Value::Object(from_obj)) => {
                if let Value::Object(to_obj) = to_value {
                    let nested = diff_objects(from_obj, to_obj, mode);
                    if !nested.is_empty() {
                        patch.insert(key.clone(), Value::Object(nested));
                    }
                } else if mode == DiffMode::AdditionsAndChanges {
                    patch.insert(key.clone(), to_value.clone());
                }
            }
            Some(_) => {
                if mode == DiffMode::AdditionsAndChanges {
                    patch.insert(key.clone(), to_value.clone());
                }
            }
        }
    }

    if mode == DiffMode::DeletionsOnly {
        for key in from.keys() {
            if !to.contains_key(key) {
                patch.insert(key.clone(), Value::Null);
            }
        }
    }

    patch
}

/// Overlay `overlay` onto `base`, recursing into objects
fn merge_into(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                let recurse = value.is_object() && base_map.get(&key).is_some_and(Value::is_object);
                if recurse {
                    if let Some(existing) = base_map.get_mut(&key) {
                        merge_into(existing, value);
                    }
                } else {
                    base_map.insert(key, value);
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}
