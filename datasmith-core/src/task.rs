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

//! Asynchronous task lifecycle and progress snapshots.
//!
//! `pending -> running -> {completed | failed | cancelled}`; a pending task
//! may also be cancelled before it ever runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskEvent {
    Start,
    Complete,
    Fail,
    Cancel,
}

#[derive(Debug, Error)]
#[error("Invalid task transition: {current} -> {event:?}")]
pub struct InvalidTaskTransition {
    pub current: TaskStatus,
    pub event: TaskEvent,
}

impl TaskStatus {
    pub fn transition(self, event: TaskEvent) -> Result<TaskStatus, InvalidTaskTransition> {
        use TaskEvent::*;
        use TaskStatus::*;

        let next = match (self, event) {
            (Pending, Start) => Running,
            (Running, Complete) => Completed,
            (Running, Fail) => Failed,
            (Pending, Cancel) | (Running, Cancel) => Cancelled,
            _ => {
                return Err(InvalidTaskTransition {
                    current: self,
                    event,
                })
            }
        };

        Ok(next)
    }
}

/// Progress inside the current unit of work (e.g. items within a file)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NestedProgress {
    pub label: String,
    pub total: u64,
    pub processed: u64,
}

/// Snapshot of one task. Readers always see a complete snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskProgress {
    pub id: Uuid,
    pub label: String,
    /// Version the task operates on, if any
    pub version_id: Option<Uuid>,
    pub status: TaskStatus,
    pub total_items: u64,
    pub processed_items: u64,
    pub success_items: u64,
    pub failed_items: u64,
    pub current_item: Option<String>,
    pub message: Option<String>,
    pub error: Option<String>,
    pub nested: Option<NestedProgress>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl TaskProgress {
    pub fn new(label: impl Into<String>, total_items: u64, version_id: Option<Uuid>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            label: label.into(),
            version_id,
            status: TaskStatus::Pending,
            total_items,
            processed_items: 0,
            success_items: 0,
            failed_items: 0,
            current_item: None,
            message: None,
            error: None,
            nested: None,
            created_at: now,
            started_at: None,
            finished_at: None,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Completion percentage in `[0, 100]`
    pub fn percent(&self) -> f64 {
        if self.total_items == 0 {
            return if self.is_terminal() { 100.0 } else { 0.0 };
        }
        (self.processed_items as f64 / self.total_items as f64 * 100.0).min(100.0)
    }

    /// Apply a lifecycle event, stamping timestamps
    pub fn advance(&mut self, event: TaskEvent) -> Result<(), InvalidTaskTransition> {
        self.status = self.status.transition(event)?;
        let now = Utc::now();
        match self.status {
            TaskStatus::Running => self.started_at = Some(now),
            s if s.is_terminal() => self.finished_at = Some(now),
            _ => {}
        }
        self.updated_at = now;
        Ok(())
    }

    pub fn apply(&mut self, update: &ProgressUpdate) {
        if let Some(total) = update.total_items {
            self.total_items = total;
        }
        if let Some(processed) = update.processed {
            self.processed_items = processed;
        }
        if let Some(success) = update.success {
            self.success_items = success;
        }
        if let Some(failed) = update.failed {
            self.failed_items = failed;
        }
        self.processed_items += update.add_processed;
        self.success_items += update.add_success;
        self.failed_items += update.add_failed;
        if let Some(item) = &update.current_item {
            self.current_item = Some(item.clone());
        }
        if let Some(message) = &update.message {
            self.message = Some(message.clone());
        }
        if let Some(nested) = &update.nested {
            self.nested = nested.clone();
        }
        self.updated_at = Utc::now();
    }
}

/// Partial progress update. Absolute fields overwrite, `add_*` fields increment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressUpdate {
    pub total_items: Option<u64>,
    pub processed: Option<u64>,
    pub success: Option<u64>,
    pub failed: Option<u64>,
    pub add_processed: u64,
    pub add_success: u64,
    pub add_failed: u64,
    pub current_item: Option<String>,
    pub message: Option<String>,
    /// `Some(None)` clears nested progress
    pub nested: Option<Option<NestedProgress>>,
}

impl ProgressUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total(mut self, n: u64) -> Self {
        self.total_items = Some(n);
        self
    }

    pub fn processed(mut self, n: u64) -> Self {
        self.processed = Some(n);
        self
    }

    pub fn success(mut self, n: u64) -> Self {
        self.success = Some(n);
        self
    }

    pub fn failed(mut self, n: u64) -> Self {
        self.failed = Some(n);
        self
    }

    /// One more unit processed, counted as success or failure
    pub fn item_done(mut self, ok: bool) -> Self {
        self.add_processed += 1;
        if ok {
            self.add_success += 1;
        } else {
            self.add_failed += 1;
        }
        self
    }

    pub fn current_item(mut self, item: impl Into<String>) -> Self {
        self.current_item = Some(item.into());
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn nested(mut self, nested: Option<NestedProgress>) -> Self {
        self.nested = Some(nested);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle() {
        let mut p = TaskProgress::new("clean", 10, None);
        p.advance(TaskEvent::Start).unwrap();
        assert!(p.started_at.is_some());
        p.advance(TaskEvent::Complete).unwrap();
        assert!(p.is_terminal());
        assert!(p.finished_at.is_some());
        assert!(p.advance(TaskEvent::Cancel).is_err());
    }

    #[test]
    fn test_pending_can_be_cancelled() {
        assert_eq!(
            TaskStatus::Pending.transition(TaskEvent::Cancel).unwrap(),
            TaskStatus::Cancelled
        );
        assert!(TaskStatus::Pending.transition(TaskEvent::Complete).is_err());
    }

    #[test]
    fn test_terminal_states_are_final() {
        for s in [TaskStatus::Completed, TaskStatus::Failed, TaskStatus::Cancelled] {
            for e in [TaskEvent::Start, TaskEvent::Complete, TaskEvent::Fail, TaskEvent::Cancel] {
                assert!(s.transition(e).is_err());
            }
        }
    }

    #[test]
    fn test_apply_update() {
        let mut p = TaskProgress::new("t", 4, None);
        p.apply(&ProgressUpdate::new().item_done(true).current_item("a"));
        p.apply(&ProgressUpdate::new().item_done(false));
        assert_eq!((p.processed_items, p.success_items, p.failed_items), (2, 1, 1));
        assert_eq!(p.current_item.as_deref(), Some("a"));
        assert_eq!(p.percent(), 50.0);

        p.apply(&ProgressUpdate::new().processed(4).nested(Some(NestedProgress {
            label: "items".into(),
            total: 3,
            processed: 1,
        })));
        assert_eq!(p.processed_items, 4);
        assert!(p.nested.is_some());
        p.apply(&ProgressUpdate::new().nested(None));
        assert!(p.nested.is_none());
    }
}
