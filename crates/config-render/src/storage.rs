//! `storage.conf` edits

use crate::error::RenderError;
use crate::renderer::STORAGE_CONFIG_PATH;
use toml::{Table, Value};

/// Set `[storage.options.overlay] size` in a `storage.conf` document
pub fn update_storage_config(data: &[u8], overlay_size: &str) -> Result<Vec<u8>, RenderError> {
    let mut doc = parse_toml(data, STORAGE_CONFIG_PATH)?;

    let storage = child_table(&mut doc, "storage", STORAGE_CONFIG_PATH)?;
    let options = child_table(storage, "options", STORAGE_CONFIG_PATH)?;
    let overlay = child_table(options, "overlay", STORAGE_CONFIG_PATH)?;
    overlay.insert("size".to_string(), Value::String(overlay_size.to_string()));

    Ok(toml::to_string(&doc)?.into_bytes())
}

pub(crate) fn parse_toml(data: &[u8], path: &str) -> Result<Table, RenderError> {
    let text = std::str::from_utf8(data).map_err(|_| RenderError::Utf8 {
        path: path.to_string(),
    })?;
    Ok(text.parse::<Table>()?)
}

/// Get `key` as a sub-table, creating it when missing
pub(crate) fn child_table<'a>(parent: &'a mut Table, key: &str, path: &str) -> Result<&'a mut Table, RenderError> {
    let entry = parent
        .entry(key.to_string())
        .or_insert(Value::Table(Table::new()));
    match entry {
        Value::Table(table) => Ok(table),
        _ => Err(RenderError::InvalidDocument {
            file: path.to_string(),
            reason: format!("{} is not a table", key),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sets_overlay_size_and_keeps_other_keys() {
        let input = b"[storage]\ndriver = \"overlay\"\n\n[storage.options]\nadditionalimagestores = []\n";
        let out = update_storage_config(input, "10G").unwrap();
        let doc = Value::Table(parse_toml(&out, STORAGE_CONFIG_PATH).unwrap());

        assert_eq!(doc["storage"]["driver"].as_str(), Some("overlay"));
        assert_eq!(doc["storage"]["options"]["overlay"]["size"].as_str(), Some("10G"));
    }

    #[test]
    fn test_rejects_invalid_toml() {
        let result = update_storage_config(b"[storage\n", "10G");
        assert!(matches!(result, Err(RenderError::TomlParse(_))));
    }

    #[test]
    fn test_rejects_non_table_storage() {
        let result = update_storage_config(b"storage = 1\n", "10G");
        assert!(matches!(result, Err(RenderError::InvalidDocument { .. })));
    }
}
