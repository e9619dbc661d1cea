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

//! Property tests for the transformation engine

use datasmith_core::Operation;
use datasmith_transform::{
    normalize_output, preserves_shape, CancellationToken, Item, ScriptTransformer,
    TransformEngine, TransformError, Transformer,
};
use proptest::prelude::*;
use serde_json::{json, Value};
use std::time::Duration;

/// Deterministic unit whose behaviour and latency depend only on the item
fn mixed_unit() -> ScriptTransformer {
    ScriptTransformer::new("mixed", |item: &Item| {
        let n = item["n"].as_u64().unwrap_or(0);
        std::thread::sleep(Duration::from_micros((n * 37) % 500));
        match n % 5 {
            0 => Err(TransformError::script("unlucky")),
            1 => Ok(Value::Null),
            2 => Ok(json!({"n": n, "even": n % 2 == 0})),
            3 => Ok(json!([{"n": n, "copy": 1}, {"n": n, "copy": 2}])),
            // malformed: drops "n"
            _ => Ok(json!({"other": n})),
        }
    })
}

/// Single-threaded reference of the engine's per-item policy
fn reference(unit: &dyn Transformer, items: &[Item], op: Operation) -> Vec<Item> {
    let mut out = Vec::new();
    for item in items {
        match unit.apply(item) {
            Err(_) => out.push(item.clone()),
            Ok(res) if res.is_empty() => {
                if op.preserves_items() {
                    out.push(item.clone());
                }
            }
            Ok(res) => {
                if res.iter().all(|o| preserves_shape(item, o)) {
                    out.extend(res);
                } else {
                    out.push(item.clone());
                }
            }
        }
    }
    out
}

fn items(ns: &[u64]) -> Vec<Item> {
    ns.iter().map(|n| json!({"n": n})).collect()
}

fn operation() -> impl Strategy<Value = Operation> {
    prop_oneof![
        Just(Operation::Clean),
        Just(Operation::Augment),
        Just(Operation::Denoise),
        Just(Operation::AgentProcess),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_parallel_matches_sequential(
        ns in prop::collection::vec(0u64..1000, 0..60),
        workers in 1usize..9,
        op in operation(),
    ) {
        let unit = mixed_unit();
        let input = items(&ns);
        let expected = reference(&unit, &input, op);
        let report = TransformEngine::new(workers).run(
            input,
            &unit,
            op,
            &CancellationToken::new(),
            &|_| {},
        );
        prop_assert_eq!(report.items, expected);
        prop_assert!(!report.cancelled);
        prop_assert_eq!(report.skipped, 0);
    }

    #[test]
    fn prop_augmentation_never_shrinks(ns in prop::collection::vec(0u64..1000, 0..60)) {
        let unit = mixed_unit();
        let input = items(&ns);
        let report = TransformEngine::new(4).run(
            input.clone(),
            &unit,
            Operation::Augment,
            &CancellationToken::new(),
            &|_| {},
        );
        prop_assert!(report.items.len() >= input.len());
    }

    #[test]
    fn prop_outputs_never_lose_original_keys(ns in prop::collection::vec(0u64..1000, 1..40)) {
        let unit = mixed_unit();
        let report = TransformEngine::new(4).run(
            items(&ns),
            &unit,
            Operation::Clean,
            &CancellationToken::new(),
            &|_| {},
        );
        for item in &report.items {
            prop_assert!(item.get("n").is_some());
        }
    }
}

#[test]
fn test_normalize_matches_unit_contract() {
    assert_eq!(normalize_output(json!(null)).len(), 0);
    assert_eq!(normalize_output(json!("s")).len(), 1);
}
