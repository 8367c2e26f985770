//! JSON flattening
//!
//! Turns one JSON item into a single-level `column → scalar` map:
//! - nested object keys are joined with `_` (`{"a":{"b":1}}` → `a_b`)
//! - arrays are stored as their compact JSON text
//! - oversized arrays and strings are truncated
//!
//! Column names are built from [`sanitize`]d key segments, so every produced
//! key is a valid unquoted identifier.

use dref_common::identifier::{sanitize, truncate_identifier};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::warn;

use crate::models::table::JSON_DATA_COLUMN;

/// Flattened item: column name → JSON scalar (arrays already as text)
pub type FlatRow = BTreeMap<String, Value>;

const TRUNCATION_SUFFIX: &str = "... [truncated]";

/// Flattening failure
#[derive(Debug, Error)]
pub enum FlattenError {
    #[error("Nesting deeper than {0} levels")]
    TooDeep(usize),

    #[error("Serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Flattening limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlattenConfig {
    /// Longest column name, leaving room under the 63-byte identifier limit
    pub max_key_len: usize,
    /// Longest stored text, in characters
    pub max_text_len: usize,
    /// Deepest nesting followed before giving up
    pub max_depth: usize,
}

impl Default for FlattenConfig {
    fn default() -> Self {
        Self {
            max_key_len: 58,
            max_text_len: 8000,
            max_depth: 128,
        }
    }
}

impl FlattenConfig {
    /// Flatten `value` under `prefix`, never failing
    ///
    /// On failure the whole result degrades to a single `json_data` column
    /// holding the serialized input.
    pub fn flatten(&self, value: &Value, prefix: &str) -> FlatRow {
        match self.try_flatten(value, prefix) {
            Ok(row) => row,
            Err(e) => {
                warn!("Flattening failed, keeping the raw item: {}", e);
                let mut row = FlatRow::new();
                row.insert(JSON_DATA_COLUMN.to_string(), Value::String(value.to_string()));
                row
            }
        }
    }

    /// Flatten `value` under `prefix`, reporting failures
    pub fn try_flatten(&self, value: &Value, prefix: &str) -> Result<FlatRow, FlattenError> {
        let mut out = FlatRow::new();
        self.walk(value, prefix, 0, &mut out)?;
        Ok(out)
    }

    fn walk(
        &self,
        value: &Value,
        path: &str,
        depth: usize,
        out: &mut FlatRow,
    ) -> Result<(), FlattenError> {
        if depth > self.max_depth {
            return Err(FlattenError::TooDeep(self.max_depth));
        }

        match value {
            Value::Object(map) => {
                for (key, child) in map {
                    let segment = sanitize(key);
                    let mut child_path = format!(
                        "{}{}_",
                        path,
                        truncate_identifier(&segment, self.max_key_len)
                    );
                    if child_path.len() > self.max_key_len {
                        child_path =
                            format!("{}_", truncate_identifier(&child_path, self.max_key_len));
                    }
                    self.walk(child, &child_path, depth + 1, out)?;
                }
            }
            Value::Array(items) => {
                let mut text = serde_json::to_string(value)?;
                if text.chars().count() > self.max_text_len {
                    text = serde_json::to_string(&json!({
                        "warning": "List truncated",
                        "length": items.len(),
                    }))?;
                }
                store(out, path, Value::String(text));
            }
            Value::String(s) if s.chars().count() > self.max_text_len => {
                let mut truncated: String = s.chars().take(self.max_text_len).collect();
                truncated.push_str(TRUNCATION_SUFFIX);
                store(out, path, Value::String(truncated));
            }
            scalar => store(out, path, scalar.clone()),
        }

        Ok(())
    }
}

/// Insert under the path minus its trailing separator; root scalars are dropped
fn store(out: &mut FlatRow, path: &str, value: Value) {
    let key = path.strip_suffix('_').unwrap_or(path);
    if !key.is_empty() {
        out.insert(key.to_string(), value);
    }
}

/// Flatten with default limits
pub fn flatten(value: &Value, prefix: &str) -> FlatRow {
    FlattenConfig::default().flatten(value, prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_object_with_array() {
        let row = flatten(&json!({"a": {"b": [1, 2, 3]}}), "");
        assert_eq!(row.len(), 1);
        assert_eq!(row.get("a_b"), Some(&json!("[1,2,3]")));
    }

    #[test]
    fn test_scalars_kept_as_is() {
        let row = flatten(
            &json!({"name": "Fireball", "level": 3, "ritual": false, "notes": null}),
            "",
        );
        assert_eq!(row.get("name"), Some(&json!("Fireball")));
        assert_eq!(row.get("level"), Some(&json!(3)));
        assert_eq!(row.get("ritual"), Some(&json!(false)));
        assert_eq!(row.get("notes"), Some(&Value::Null));
    }

    #[test]
    fn test_keys_are_sanitized() {
        let row = flatten(&json!({"Casting Time": {"1st-level": "x"}}), "");
        assert_eq!(row.get("casting_time_c_1st_level"), Some(&json!("x")));
    }

    #[test]
    fn test_root_scalar_dropped() {
        assert!(flatten(&json!(42), "").is_empty());
        assert!(flatten(&json!("text"), "").is_empty());
    }

    #[test]
    fn test_prefix_applied() {
        let row = flatten(&json!({"b": 1}), "a_");
        assert_eq!(row.get("a_b"), Some(&json!(1)));
    }

    #[test]
    fn test_long_keys_bounded() {
        let long_key = "k".repeat(100);
        let mut inner = serde_json::Map::new();
        inner.insert(long_key.clone(), json!(1));
        let mut outer = serde_json::Map::new();
        outer.insert(long_key, Value::Object(inner));

        let row = flatten(&Value::Object(outer), "");
        let key = row.keys().next().unwrap();
        assert!(key.len() <= 58, "{} is {} bytes", key, key.len());
    }

    #[test]
    fn test_long_string_truncated() {
        let row = flatten(&json!({"text": "x".repeat(9000)}), "");
        let text = row.get("text").and_then(Value::as_str).unwrap();
        assert!(text.ends_with("... [truncated]"));
        assert_eq!(text.chars().count(), 8000 + "... [truncated]".len());
    }

    #[test]
    fn test_long_array_replaced_by_warning() {
        let items: Vec<String> = (0..2000).map(|i| format!("entry-{}", i)).collect();
        let row = flatten(&json!({ "list": items }), "");
        let text = row.get("list").and_then(Value::as_str).unwrap();
        let parsed: Value = serde_json::from_str(text).unwrap();
        assert_eq!(parsed["warning"], "List truncated");
        assert_eq!(parsed["length"], 2000);
    }

    #[test]
    fn test_depth_failure_degrades_to_json_data() {
        let config = FlattenConfig {
            max_depth: 2,
            ..FlattenConfig::default()
        };
        let value = json!({"a": {"b": {"c": {"d": 1}}}});

        assert!(matches!(
            config.try_flatten(&value, ""),
            Err(FlattenError::TooDeep(2))
        ));

        let row = config.flatten(&value, "");
        assert_eq!(row.len(), 1);
        let raw = row.get("json_data").and_then(Value::as_str).unwrap();
        assert_eq!(serde_json::from_str::<Value>(raw).unwrap(), value);
    }

    #[test]
    fn test_empty_containers() {
        assert!(flatten(&json!({}), "").is_empty());
        let row = flatten(&json!({"tags": []}), "");
        assert_eq!(row.get("tags"), Some(&json!("[]")));
    }
}
