//! Masking of request variables before they are recorded.

use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Replacement used by [`VariablesSanitizer::default`].
pub const FILTERED: &str = "[FILTERED]";

/// Structural transform applied to every leaf of the variables document.
///
/// Objects and arrays are walked; every other value (including `null`) is a
/// leaf and is passed through the mapping function.
#[derive(Clone)]
pub struct VariablesSanitizer {
    map_leaf: Arc<dyn Fn(&Value) -> Value + Send + Sync>,
}

impl VariablesSanitizer {
    /// Replaces every leaf with `replacement`.
    pub fn values_to(replacement: impl Into<Value>) -> Self {
        let replacement = replacement.into();
        Self::map_values(move |_| replacement.clone())
    }

    /// Replaces every leaf with `f(leaf)`.
    pub fn map_values<F>(f: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        Self {
            map_leaf: Arc::new(f),
        }
    }

    /// Keeps values untouched.
    pub fn passthrough() -> Self {
        Self::map_values(Value::clone)
    }

    pub fn sanitize(&self, variables: &Map<String, Value>) -> Map<String, Value> {
        variables
            .iter()
            .map(|(k, v)| (k.clone(), self.transform(v)))
            .collect()
    }

    fn transform(&self, value: &Value) -> Value {
        match value {
            Value::Object(map) => Value::Object(self.sanitize(map)),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.transform(v)).collect()),
            leaf => (self.map_leaf)(leaf),
        }
    }
}

impl Default for VariablesSanitizer {
    fn default() -> Self {
        Self::values_to(FILTERED)
    }
}

impl fmt::Debug for VariablesSanitizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VariablesSanitizer").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn variables() -> Map<String, Value> {
        let doc = json!({
            "root": {
                "nested": {
                    "cc": "4111111111111111",
                    "int": 123,
                    "list": ["str", {"foo": 123}]
                }
            }
        });
        match doc {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_values_to() {
        let sanitized = VariablesSanitizer::values_to("[VAL]").sanitize(&variables());
        assert_eq!(
            Value::Object(sanitized),
            json!({
                "root": {
                    "nested": {
                        "cc": "[VAL]",
                        "int": "[VAL]",
                        "list": ["[VAL]", {"foo": "[VAL]"}]
                    }
                }
            })
        );
    }

    #[test]
    fn test_map_values() {
        let kind = VariablesSanitizer::map_values(|v| {
            let name = match v {
                Value::String(_) => "String",
                Value::Number(_) => "Number",
                _ => "Other",
            };
            Value::from(name)
        });
        let sanitized = kind.sanitize(&variables());
        assert_eq!(
            sanitized["root"]["nested"],
            json!({"cc": "String", "int": "Number", "list": ["String", {"foo": "Number"}]})
        );
    }

    #[test]
    fn test_default_filters_and_passthrough_keeps() {
        let vars = variables();
        let filtered = VariablesSanitizer::default().sanitize(&vars);
        assert_eq!(filtered["root"]["nested"]["cc"], json!(FILTERED));
        assert_eq!(VariablesSanitizer::passthrough().sanitize(&vars), vars);
    }
}
