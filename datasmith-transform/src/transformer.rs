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

//! The per-item transform interface.

use crate::error::TransformError;
use serde_json::Value;

/// One dataset item: a mapping or a scalar
pub type Item = Value;

/// A pure per-item function: one item in, zero or more items out.
pub trait Transformer: Send + Sync {
    fn name(&self) -> &str;

    fn apply(&self, item: &Item) -> Result<Vec<Item>, TransformError>;
}

/// Interpret a raw unit result: `null` is empty, an array is a sequence,
/// anything else is a single item.
pub fn normalize_output(raw: Value) -> Vec<Item> {
    match raw {
        Value::Null => Vec::new(),
        Value::Array(items) => items,
        other => vec![other],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_output() {
        assert!(normalize_output(Value::Null).is_empty());
        assert!(normalize_output(json!([])).is_empty());
        assert_eq!(normalize_output(json!([1, 2])), vec![json!(1), json!(2)]);
        assert_eq!(normalize_output(json!({"a": 1})), vec![json!({"a": 1})]);
    }
}
