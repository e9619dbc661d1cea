// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! In-process script transformers and their registry.
//!
//! Scripts are registered at startup under `<format>_<method>` names
//! (e.g. `json_clean`) and looked up by name; nothing is loaded from paths
//! at runtime.

use crate::error::TransformError;
use crate::transformer::{normalize_output, Item, Transformer};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Script body. May return `null`, a single item or an array of items.
pub type ScriptFn = dyn Fn(&Item) -> Result<Value, TransformError> + Send + Sync;

#[derive(Clone)]
pub struct ScriptTransformer {
    name: String,
    func: Arc<ScriptFn>,
}

impl ScriptTransformer {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Item) -> Result<Value, TransformError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }
}

impl fmt::Debug for ScriptTransformer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptTransformer").field("name", &self.name).finish()
    }
}

impl Transformer for ScriptTransformer {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, item: &Item) -> Result<Vec<Item>, TransformError> {
        (self.func)(item).map(normalize_output)
    }
}

/// Script name for a data format and method
pub fn script_name(format: &str, method: &str) -> String {
    format!("{}_{}", format, method)
}

/// Registry of scripts available to transform jobs
pub struct ScriptRegistry {
    scripts: RwLock<HashMap<String, ScriptTransformer>>,
}

impl ScriptRegistry {
    pub fn new() -> Self {
        Self {
            scripts: RwLock::new(HashMap::new()),
        }
    }

    /// Registry preloaded with `json_clean`, `json_denoise` and `text_clean`
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register(ScriptTransformer::new("json_clean", builtin::json_clean));
        registry.register(ScriptTransformer::new("json_denoise", builtin::json_denoise));
        registry.register(ScriptTransformer::new("text_clean", builtin::text_clean));
        registry
    }

    /// Register a script, replacing any script with the same name
    pub fn register(&self, script: ScriptTransformer) {
        tracing::debug!("Registered script {}", script.name);
        self.scripts.write().insert(script.name.clone(), script);
    }

    pub fn get(&self, name: &str) -> Result<ScriptTransformer, TransformError> {
        self.scripts
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| TransformError::UnknownScript(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.scripts.read().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.scripts.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for ScriptRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

pub mod builtin {
    use super::*;

    fn map_strings(value: &Value, f: &dyn Fn(&str) -> String) -> Value {
        match value {
            Value::String(s) => Value::String(f(s)),
            Value::Array(items) => Value::Array(items.iter().map(|v| map_strings(v, f)).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), map_strings(v, f)))
                    .collect::<Map<_, _>>(),
            ),
            other => other.clone(),
        }
    }

    /// Trim strings; drop blank strings and records whose text fields are all empty
    pub fn json_clean(item: &Item) -> Result<Value, TransformError> {
        let cleaned = map_strings(item, &|s| s.trim().to_string());
        let keep = match &cleaned {
            Value::String(s) => !s.is_empty(),
            Value::Object(map) => {
                let mut texts = map.values().filter_map(Value::as_str).peekable();
                texts.peek().is_none() || texts.any(|s| !s.is_empty())
            }
            _ => true,
        };
        Ok(if keep { cleaned } else { Value::Null })
    }

    /// Strip control characters and collapse whitespace runs
    pub fn json_denoise(item: &Item) -> Result<Value, TransformError> {
        Ok(map_strings(item, &|s| {
            s.split(|c: char| c.is_whitespace() || c.is_control())
                .filter(|part| !part.is_empty())
                .collect::<Vec<_>>()
                .join(" ")
        }))
    }

    /// Trim plain-text items, drop blanks
    pub fn text_clean(item: &Item) -> Result<Value, TransformError> {
        match item {
            Value::String(s) if s.trim().is_empty() => Ok(Value::Null),
            Value::String(s) => Ok(Value::String(s.trim().to_string())),
            Value::Null => Ok(Value::Null),
            other => Err(TransformError::script(format!(
                "text_clean expects a string item, got {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_registry_lookup() {
        let registry = ScriptRegistry::with_builtins();
        assert_eq!(registry.names(), vec!["json_clean", "json_denoise", "text_clean"]);
        assert!(matches!(
            registry.get("json_missing"),
            Err(TransformError::UnknownScript(_))
        ));

        registry.register(ScriptTransformer::new(script_name("json", "augment"), |item| {
            Ok(json!([item.clone(), item.clone()]))
        }));
        let augment = registry.get("json_augment").unwrap();
        assert_eq!(augment.apply(&json!({"a": 1})).unwrap().len(), 2);
    }

    #[test]
    fn test_json_clean() {
        let clean = ScriptRegistry::with_builtins().get("json_clean").unwrap();
        assert_eq!(
            clean.apply(&json!({"q": "  hi ", "n": 1})).unwrap(),
            vec![json!({"q": "hi", "n": 1})]
        );
        assert!(clean.apply(&json!({"q": "  ", "a": ""})).unwrap().is_empty());
        assert!(clean.apply(&json!("   ")).unwrap().is_empty());
        // records without text fields are kept
        assert_eq!(clean.apply(&json!({"n": 1})).unwrap(), vec![json!({"n": 1})]);
    }

    #[test]
    fn test_json_denoise() {
        let out = builtin::json_denoise(&json!({"t": "a\u{0007}b   c\n\td", "tags": [" x  y "]})).unwrap();
        assert_eq!(out, json!({"t": "a b c d", "tags": ["x y"]}));
    }

    #[test]
    fn test_text_clean() {
        assert_eq!(builtin::text_clean(&json!("  line ")).unwrap(), json!("line"));
        assert_eq!(builtin::text_clean(&json!(" ")).unwrap(), Value::Null);
        assert!(builtin::text_clean(&json!({"a": 1})).is_err());
    }
}
