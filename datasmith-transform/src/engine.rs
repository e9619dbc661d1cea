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

//! Bounded parallel transformation engine.
//!
//! Items are dispatched one at a time over a rendezvous channel to a scoped
//! worker pool; results come back tagged with their index and are reassembled
//! in input order, so output order never depends on completion order.
//!
//! Per-item policy:
//! - unit error or panic: keep the original item
//! - empty result: keep the original when the operation preserves items
//!   (augmentation), otherwise drop the item
//! - any output whose keys are not a superset of the original's: keep the
//!   original
//!
//! Cancellation is checked before each dispatch. Items already handed to a
//! worker finish; items never dispatched are kept unchanged.

use crate::error::TransformError;
use crate::transformer::{Item, Transformer};
use crossbeam_channel::SendTimeoutError;
use datasmith_core::{Operation, MAX_ITEM_WORKERS};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How often a blocked dispatcher re-checks cancellation
const DISPATCH_POLL: Duration = Duration::from_millis(5);

/// Reported after each item completes
#[derive(Debug, Clone, PartialEq)]
pub struct ItemProgress {
    pub processed: usize,
    pub total: usize,
    pub index: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
enum ItemOutcome {
    Transformed(Vec<Item>),
    Fallback,
    Dropped,
}

/// Output of one engine run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformReport {
    pub items: Vec<Item>,
    pub total: usize,
    /// Items replaced by the unit's output
    pub transformed: usize,
    /// Items kept unchanged after an error, empty augmentation or malformed output
    pub fallbacks: usize,
    pub dropped: usize,
    /// Items never dispatched because the run was cancelled
    pub skipped: usize,
    pub cancelled: bool,
}

/// True when every key of `original` is present in `output`.
///
/// Scalars carry no keys, so any output is acceptable for them.
pub fn preserves_shape(original: &Item, output: &Item) -> bool {
    match original.as_object() {
        None => true,
        Some(keys) => match output.as_object() {
            Some(out) => keys.keys().all(|k| out.contains_key(k)),
            None => false,
        },
    }
}

pub struct TransformEngine {
    workers: usize,
}

impl TransformEngine {
    /// Engine with `workers` item threads, clamped to `1..=16`
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.clamp(1, MAX_ITEM_WORKERS),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn run(
        &self,
        items: Vec<Item>,
        unit: &dyn Transformer,
        operation: Operation,
        cancel: &CancellationToken,
        on_progress: &(dyn Fn(ItemProgress) + Sync),
    ) -> TransformReport {
        let total = items.len();
        let mut report = TransformReport {
            total,
            ..Default::default()
        };
        if total == 0 {
            return report;
        }

        let keep_on_empty = operation.preserves_items();
        let mut outcomes: Vec<Option<ItemOutcome>> = (0..total).map(|_| None).collect();
        let mut cancelled = false;

        let (job_tx, job_rx) = crossbeam_channel::bounded::<usize>(0);
        let (result_tx, result_rx) = crossbeam_channel::unbounded::<(usize, ItemOutcome)>();
        let processed = AtomicUsize::new(0);

        thread::scope(|scope| {
            let items = &items;
            let processed = &processed;
            for worker in 0..self.workers.min(total) {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                thread::Builder::new()
                    .name(format!("datasmith-item-{}", worker))
                    .spawn_scoped(scope, move || {
                        for index in job_rx.iter() {
                            let (outcome, message) = apply_one(unit, &items[index], keep_on_empty, index);
                            let done = processed.fetch_add(1, Ordering::SeqCst) + 1;
                            on_progress(ItemProgress {
                                processed: done,
                                total,
                                index,
                                message,
                            });
                            if result_tx.send((index, outcome)).is_err() {
                                break;
                            }
                        }
                    })
                    .map(|_| ())
                    .unwrap_or_else(|e| tracing::warn!("Failed to spawn item worker: {}", e));
            }
            drop(job_rx);
            drop(result_tx);

            'dispatch: for index in 0..total {
                let mut pending = index;
                loop {
                    if cancel.is_cancelled() {
                        cancelled = true;
                        break 'dispatch;
                    }
                    match job_tx.send_timeout(pending, DISPATCH_POLL) {
                        Ok(()) => break,
                        Err(SendTimeoutError::Timeout(back)) => pending = back,
                        // every worker is gone
                        Err(SendTimeoutError::Disconnected(_)) => break 'dispatch,
                    }
                }
            }
            drop(job_tx);

            for (index, outcome) in result_rx.iter() {
                outcomes[index] = Some(outcome);
            }
        });

        report.cancelled = cancelled;
        for (original, outcome) in items.into_iter().zip(outcomes) {
            match outcome {
                Some(ItemOutcome::Transformed(out)) => {
                    report.transformed += 1;
                    report.items.extend(out);
                }
                Some(ItemOutcome::Fallback) => {
                    report.fallbacks += 1;
                    report.items.push(original);
                }
                Some(ItemOutcome::Dropped) => report.dropped += 1,
                None => {
                    report.skipped += 1;
                    report.items.push(original);
                }
            }
        }

        tracing::debug!(
            "Transform run via {}: {} items, {} transformed, {} kept, {} dropped, {} skipped",
            unit.name(),
            total,
            report.transformed,
            report.fallbacks,
            report.dropped,
            report.skipped
        );
        report
    }
}

impl Default for TransformEngine {
    fn default() -> Self {
        Self::new(datasmith_core::config::default_item_workers())
    }
}

fn apply_one(
    unit: &dyn Transformer,
    item: &Item,
    keep_on_empty: bool,
    index: usize,
) -> (ItemOutcome, String) {
    let result = panic::catch_unwind(AssertUnwindSafe(|| unit.apply(item)))
        .unwrap_or_else(|_| Err(TransformError::script("transform unit panicked")));
    match result {
        Err(e) => {
            tracing::debug!("Item {} kept original after error: {}", index, e);
            (ItemOutcome::Fallback, format!("item {} kept original: {}", index, e))
        }
        Ok(out) if out.is_empty() => {
            if keep_on_empty {
                (ItemOutcome::Fallback, format!("item {} kept original: empty result", index))
            } else {
                (ItemOutcome::Dropped, format!("item {} dropped", index))
            }
        }
        Ok(out) => {
            if out.iter().all(|o| preserves_shape(item, o)) {
                (ItemOutcome::Transformed(out), format!("item {} transformed", index))
            } else {
                tracing::debug!("Item {} kept original: output missing keys", index);
                (ItemOutcome::Fallback, format!("item {} kept original: malformed output", index))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::ScriptTransformer;
    use parking_lot::Mutex;
    use serde_json::json;

    fn run(unit: &dyn Transformer, items: Vec<Item>, op: Operation) -> TransformReport {
        TransformEngine::new(4).run(items, unit, op, &CancellationToken::new(), &|_| {})
    }

    #[test]
    fn test_error_keeps_original() {
        let unit = ScriptTransformer::new("flaky", |item| {
            if item["n"] == json!(2) {
                Err(TransformError::script("bad item"))
            } else {
                Ok(json!({"n": item["n"], "ok": true}))
            }
        });
        let items: Vec<_> = (0..4).map(|n| json!({"n": n})).collect();
        let report = run(&unit, items, Operation::Clean);
        assert_eq!(report.items.len(), 4);
        assert_eq!(report.items[2], json!({"n": 2}));
        assert_eq!(report.items[3], json!({"n": 3, "ok": true}));
        assert_eq!((report.transformed, report.fallbacks), (3, 1));
    }

    #[test]
    fn test_panicking_unit_keeps_original() {
        let unit = ScriptTransformer::new("boom", |item| {
            if item["n"] == json!(1) {
                panic!("unit bug");
            }
            Ok(item.clone())
        });
        let items: Vec<_> = (0..3).map(|n| json!({"n": n})).collect();
        let report = run(&unit, items.clone(), Operation::Clean);
        assert_eq!(report.items, items);
        assert_eq!(report.fallbacks, 1);
    }

    #[test]
    fn test_empty_result_drops_unless_augmenting() {
        let unit = ScriptTransformer::new("nothing", |_| Ok(serde_json::Value::Null));
        let items = vec![json!({"a": 1}), json!({"a": 2})];

        let cleaned = run(&unit, items.clone(), Operation::Clean);
        assert!(cleaned.items.is_empty());
        assert_eq!(cleaned.dropped, 2);

        let augmented = run(&unit, items.clone(), Operation::Augment);
        assert_eq!(augmented.items, items);
    }

    #[test]
    fn test_malformed_output_falls_back() {
        // drops the "label" key
        let unit = ScriptTransformer::new("lossy", |item| Ok(json!({"text": item["text"]})));
        let items = vec![json!({"text": "t", "label": "x"})];
        let report = run(&unit, items.clone(), Operation::AgentProcess);
        assert_eq!(report.items, items);
        assert_eq!(report.fallbacks, 1);

        // one bad element poisons the whole sequence
        let unit = ScriptTransformer::new("mixed", |item| Ok(json!([item.clone(), {"text": "only"}])));
        let report = run(&unit, items.clone(), Operation::Augment);
        assert_eq!(report.items, items);
    }

    #[test]
    fn test_scalar_items_accept_any_output() {
        assert!(preserves_shape(&json!("x"), &json!({"y": 1})));
        assert!(preserves_shape(&json!({"a": 1}), &json!({"a": 2, "b": 3})));
        assert!(!preserves_shape(&json!({"a": 1}), &json!("a")));
    }

    #[test]
    fn test_expansion_keeps_index_order() {
        let unit = ScriptTransformer::new("dup", |item| {
            let n = item.as_u64().unwrap_or(0);
            std::thread::sleep(Duration::from_millis((10 - n) * 2));
            Ok(json!([n, n + 100]))
        });
        let report = run(&unit, (0..10).map(|n| json!(n)).collect(), Operation::Augment);
        let expected: Vec<_> = (0..10u64).flat_map(|n| [json!(n), json!(n + 100)]).collect();
        assert_eq!(report.items, expected);
    }

    #[test]
    fn test_progress_reported_per_item() {
        let seen = Mutex::new(Vec::new());
        let unit = ScriptTransformer::new("id", |item| Ok(item.clone()));
        let report = TransformEngine::new(3).run(
            (0..7).map(|n| json!(n)).collect(),
            &unit,
            Operation::Clean,
            &CancellationToken::new(),
            &|p| seen.lock().push((p.processed, p.total)),
        );
        assert_eq!(report.transformed, 7);
        let mut seen = seen.into_inner();
        seen.sort();
        assert_eq!(seen, (1..=7).map(|n| (n, 7)).collect::<Vec<_>>());
    }

    #[test]
    fn test_cancellation_stops_dispatch() {
        let cancel = CancellationToken::new();
        let unit = ScriptTransformer::new("slow", |item| {
            std::thread::sleep(Duration::from_millis(10));
            Ok(item.clone())
        });
        let trigger = cancel.clone();
        let report = TransformEngine::new(2).run(
            (0..50).map(|n| json!(n)).collect(),
            &unit,
            Operation::Clean,
            &cancel,
            &|p| {
                if p.processed == 5 {
                    trigger.cancel();
                }
            },
        );
        assert!(report.cancelled);
        assert!(report.transformed >= 5 && report.transformed <= 5 + 2);
        // untouched items are preserved, order intact
        assert_eq!(report.items.len(), 50);
        assert_eq!(report.items[49], json!(49));
        assert_eq!(report.transformed + report.skipped, 50);
    }

    #[test]
    fn test_empty_input() {
        let unit = ScriptTransformer::new("id", |item| Ok(item.clone()));
        let report = run(&unit, Vec::new(), Operation::Clean);
        assert_eq!(report, TransformReport::default());
    }

    #[test]
    fn test_worker_count_clamped() {
        assert_eq!(TransformEngine::new(0).workers(), 1);
        assert_eq!(TransformEngine::new(64).workers(), MAX_ITEM_WORKERS);
    }
}
