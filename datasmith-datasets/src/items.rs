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

//! Item codecs for stored files and inline payloads.

use datasmith_core::{DatasmithError, ItemFormat, Result};
use datasmith_transform::{normalize_output, Item};
use serde_json::Value;

/// Split file content into items
pub fn parse_items(format: ItemFormat, data: &[u8]) -> Result<Vec<Item>> {
    match format {
        ItemFormat::Json => {
            let value: Value = serde_json::from_slice(data)
                .map_err(|e| DatasmithError::validation(format!("invalid JSON: {}", e)))?;
            Ok(normalize_output(value))
        }
        ItemFormat::Jsonl => {
            let text = utf8(data)?;
            text.lines()
                .enumerate()
                .filter(|(_, line)| !line.trim().is_empty())
                .map(|(n, line)| {
                    serde_json::from_str(line).map_err(|e| {
                        DatasmithError::validation(format!("line {}: invalid JSON: {}", n + 1, e))
                    })
                })
                .collect()
        }
        ItemFormat::Text => {
            let text = utf8(data)?;
            Ok(text
                .lines()
                .filter(|line| !line.trim().is_empty())
                .map(|line| Value::String(line.to_string()))
                .collect())
        }
    }
}

/// Serialize items back into file content of the same format
pub fn encode_items(format: ItemFormat, items: &[Item]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    match format {
        ItemFormat::Json => {
            out = serde_json::to_vec_pretty(items)?;
            out.push(b'\n');
        }
        ItemFormat::Jsonl => {
            for item in items {
                serde_json::to_writer(&mut out, item)?;
                out.push(b'\n');
            }
        }
        ItemFormat::Text => {
            for item in items {
                match item {
                    Value::String(s) => out.extend_from_slice(s.as_bytes()),
                    other => out.extend_from_slice(other.to_string().as_bytes()),
                }
                out.push(b'\n');
            }
        }
    }
    Ok(out)
}

/// Items carried by an inline payload: `null` is empty, an array is a sequence
pub fn inline_items(item: &Value) -> Vec<Item> {
    normalize_output(item.clone())
}

/// Inverse of [`inline_items`]
pub fn inline_payload(mut items: Vec<Item>) -> Value {
    match items.len() {
        0 => Value::Null,
        1 if !items[0].is_array() && !items[0].is_null() => items.remove(0),
        _ => Value::Array(items),
    }
}

fn utf8(data: &[u8]) -> Result<&str> {
    std::str::from_utf8(data).map_err(|e| DatasmithError::validation(format!("not UTF-8: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_jsonl_skips_blank_lines() {
        let items = parse_items(ItemFormat::Jsonl, b"{\"a\":1}\n\n{\"a\":2}\r\n").unwrap();
        assert_eq!(items, vec![json!({"a": 1}), json!({"a": 2})]);

        let err = parse_items(ItemFormat::Jsonl, b"{\"a\":1}\nnope\n").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_json_array_or_single() {
        assert_eq!(parse_items(ItemFormat::Json, b"[1, 2, 3]").unwrap().len(), 3);
        assert_eq!(parse_items(ItemFormat::Json, b"{\"q\": \"x\"}").unwrap().len(), 1);
        assert!(parse_items(ItemFormat::Json, b"null").unwrap().is_empty());
    }

    #[test]
    fn test_text_reencodes_non_strings() {
        let data = encode_items(ItemFormat::Text, &[json!("hello"), json!({"k": 1})]).unwrap();
        assert_eq!(String::from_utf8(data).unwrap(), "hello\n{\"k\":1}\n");
    }

    #[test]
    fn test_encoded_jsonl_parses_back() {
        let items = vec![json!({"q": "a"}), json!({"q": "b"})];
        let data = encode_items(ItemFormat::Jsonl, &items).unwrap();
        assert_eq!(parse_items(ItemFormat::Jsonl, &data).unwrap(), items);
    }

    #[test]
    fn test_inline_payload_shapes() {
        assert_eq!(inline_payload(vec![]), Value::Null);
        assert_eq!(inline_payload(vec![json!({"a": 1})]), json!({"a": 1}));
        let many = inline_payload(vec![json!(1), json!(2)]);
        assert_eq!(inline_items(&many), vec![json!(1), json!(2)]);
    }
}
