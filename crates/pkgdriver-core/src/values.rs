//! Values handling with deep merge support

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::path::Path;

use crate::error::{CoreError, Result};

/// Key injected by the registry authenticator to reference pull secrets
pub const IMAGE_PULL_SECRETS_KEY: &str = "imagePullSecrets";

/// Configuration values tree
///
/// Equality is structural: two `Values` are equal when their trees are deeply
/// equal, regardless of the order in which mapping keys were inserted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Values(pub JsonValue);

impl Values {
    /// Create empty values
    pub fn new() -> Self {
        Self(JsonValue::Object(serde_json::Map::new()))
    }

    /// Load values from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse values from YAML string
    ///
    /// An empty document yields empty values rather than `null`.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let value: JsonValue = serde_yaml::from_str(yaml)?;
        Ok(Self::from(value))
    }

    /// Parse values from JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let value: JsonValue = serde_json::from_str(json)?;
        Ok(Self::from(value))
    }

    /// Deep merge another Values into this one
    ///
    /// Rules:
    /// - Scalars: overlay replaces base
    /// - Objects: recursive merge
    /// - Arrays: overlay replaces base (not appended)
    pub fn merge(&mut self, overlay: &Values) {
        deep_merge(&mut self.0, &overlay.0);
    }

    /// Replace top-level keys with the ones from `overlay`
    ///
    /// Unlike [`Values::merge`], nested objects are not merged: each key of the
    /// overlay wins outright.
    pub fn overlay(&mut self, overlay: &Values) {
        let JsonValue::Object(source) = &overlay.0 else {
            return;
        };
        for (key, value) in source {
            self.insert(key.clone(), value.clone());
        }
    }

    /// Set a value by dotted path (e.g., "image.tag")
    pub fn set(&mut self, path: &str, value: JsonValue) -> Result<()> {
        let parts: Vec<&str> = path.split('.').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(CoreError::ValuesMerge {
                message: format!("invalid value path '{}'", path),
            });
        }
        set_nested(&mut self.0, &parts, value);
        Ok(())
    }

    /// Get a value by dotted path
    pub fn get(&self, path: &str) -> Option<&JsonValue> {
        let parts: Vec<&str> = path.split('.').collect();
        get_nested(&self.0, &parts)
    }

    /// Get a top-level key without path splitting
    pub fn get_key(&self, key: &str) -> Option<&JsonValue> {
        self.0.as_object().and_then(|map| map.get(key))
    }

    /// Check whether a top-level key is present
    pub fn contains_key(&self, key: &str) -> bool {
        self.get_key(key).is_some()
    }

    /// Insert a top-level key
    pub fn insert(&mut self, key: impl Into<String>, value: JsonValue) {
        match &mut self.0 {
            JsonValue::Object(map) => {
                map.insert(key.into(), value);
            }
            root => {
                let mut map = serde_json::Map::new();
                map.insert(key.into(), value);
                *root = JsonValue::Object(map);
            }
        }
    }

    /// Get the inner JSON value
    pub fn inner(&self) -> &JsonValue {
        &self.0
    }

    /// Convert to JSON value
    pub fn into_inner(self) -> JsonValue {
        self.0
    }

    /// Check if values are empty
    pub fn is_empty(&self) -> bool {
        match &self.0 {
            JsonValue::Object(map) => map.is_empty(),
            JsonValue::Null => true,
            _ => false,
        }
    }

    /// Render as YAML (used for display and diffing)
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(&self.0)?)
    }
}

impl From<JsonValue> for Values {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::new(),
            other => Self(other),
        }
    }
}

/// Deep merge two JSON values
fn deep_merge(base: &mut JsonValue, overlay: &JsonValue) {
    match (base, overlay) {
        (JsonValue::Object(base_map), JsonValue::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => {
                        base_map.insert(key.clone(), overlay_value.clone());
                    }
                }
            }
        }
        (base, overlay) => {
            *base = overlay.clone();
        }
    }
}

/// Set a nested value by path
fn set_nested(value: &mut JsonValue, path: &[&str], new_value: JsonValue) {
    let Some((key, remaining)) = path.split_first() else {
        *value = new_value;
        return;
    };

    if !value.is_object() {
        *value = JsonValue::Object(serde_json::Map::new());
    }

    if let JsonValue::Object(map) = value {
        let entry = map
            .entry(key.to_string())
            .or_insert_with(|| JsonValue::Object(serde_json::Map::new()));
        set_nested(entry, remaining, new_value);
    }
}

/// Get a nested value by path
fn get_nested<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a JsonValue> {
    let Some((key, remaining)) = path.split_first() else {
        return Some(value);
    };

    match value {
        JsonValue::Object(map) => map.get(*key).and_then(|v| get_nested(v, remaining)),
        _ => None,
    }
}

/// Parse --set arguments (key=value format)
pub fn parse_set_values(set_args: &[String]) -> Result<Values> {
    let mut values = Values::new();

    for arg in set_args {
        let (key, val) = arg.split_once('=').ok_or_else(|| CoreError::ValuesMerge {
            message: format!("Invalid --set format: '{}'. Expected key=value", arg),
        })?;

        let json_value = if val == "true" {
            JsonValue::Bool(true)
        } else if val == "false" {
            JsonValue::Bool(false)
        } else if val == "null" {
            JsonValue::Null
        } else if let Ok(num) = val.parse::<i64>() {
            JsonValue::Number(num.into())
        } else if let Some(num) = val
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
        {
            JsonValue::Number(num)
        } else if val.starts_with('[') || val.starts_with('{') {
            serde_json::from_str(val).unwrap_or_else(|_| JsonValue::String(val.to_string()))
        } else {
            JsonValue::String(val.to_string())
        };

        values.set(key, json_value)?;
    }

    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deep_merge() {
        let mut base = Values::from_yaml(
            r#"
image:
  repository: nginx
  tag: "1.0"
replicas: 1
"#,
        )
        .unwrap();

        let overlay = Values::from_yaml(
            r#"
image:
  tag: "2.0"
  pullPolicy: Always
replicas: 3
"#,
        )
        .unwrap();

        base.merge(&overlay);

        assert_eq!(base.get("image.repository").unwrap(), "nginx");
        assert_eq!(base.get("image.tag").unwrap(), "2.0");
        assert_eq!(base.get("image.pullPolicy").unwrap(), "Always");
        assert_eq!(base.get("replicas").unwrap(), 3);
    }

    #[test]
    fn test_overlay_replaces_whole_keys() {
        let mut values = Values(json!({"image": {"tag": "1.0", "repository": "nginx"}, "replicas": 1}));
        let auth = Values(json!({"image": {"tag": "2.0"}, "imagePullSecrets": [{"name": "creds"}]}));

        values.overlay(&auth);

        assert_eq!(values.get("image.tag").unwrap(), "2.0");
        assert!(values.get("image.repository").is_none());
        assert_eq!(values.get("replicas").unwrap(), 1);
        assert!(values.contains_key(IMAGE_PULL_SECRETS_KEY));
    }

    #[test]
    fn test_structural_equality_ignores_key_order() {
        let a = Values::from_json(r#"{"replicas": 3, "image": {"tag": "v1", "repo": "x"}}"#).unwrap();
        let b = Values::from_json(r#"{"image": {"repo": "x", "tag": "v1"}, "replicas": 3}"#).unwrap();
        let c = Values::from_json(r#"{"image": {"repo": "x", "tag": "v2"}, "replicas": 3}"#).unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_empty_yaml_is_empty_object() {
        let values = Values::from_yaml("").unwrap();
        assert!(values.is_empty());
        assert_eq!(values, Values::new());
    }

    #[test]
    fn test_set_nested() {
        let mut values = Values::new();
        values.set("image.tag", JsonValue::String("v1".into())).unwrap();
        values.set("replicas", JsonValue::Number(3.into())).unwrap();

        assert_eq!(values.get("image.tag").unwrap(), "v1");
        assert_eq!(values.get("replicas").unwrap(), 3);
    }

    #[test]
    fn test_set_rejects_empty_segment() {
        let mut values = Values::new();
        assert!(values.set("image..tag", JsonValue::Null).is_err());
    }

    #[test]
    fn test_get_key_does_not_split() {
        let values = Values(json!({"a.b": 1, "a": {"b": 2}}));
        assert_eq!(values.get_key("a.b").unwrap(), 1);
        assert_eq!(values.get("a.b").unwrap(), 2);
    }

    #[test]
    fn test_parse_set_values() {
        let args = vec![
            "image.tag=v2".to_string(),
            "replicas=5".to_string(),
            "debug=true".to_string(),
            "ratio=0.5".to_string(),
        ];

        let values = parse_set_values(&args).unwrap();

        assert_eq!(values.get("image.tag").unwrap(), "v2");
        assert_eq!(values.get("replicas").unwrap(), 5);
        assert_eq!(values.get("debug").unwrap(), true);
        assert_eq!(values.get("ratio").unwrap(), 0.5);
    }

    #[test]
    fn test_parse_set_values_invalid() {
        let err = parse_set_values(&["novalue".to_string()]).unwrap_err();
        assert!(err.to_string().contains("Expected key=value"));
    }
}
