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

//! Per-task state shared between the registry, the job thread and pollers.

use crate::mirror::task_key;
use crossbeam_channel::{Receiver, Sender};
use datasmith_core::{ProgressUpdate, Result, TaskEvent, TaskProgress};
use datasmith_storage::ProgressStore;
use parking_lot::{Condvar, Mutex, RwLock};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Work run on a job thread. Returning `Err` or panicking fails the task.
pub type WorkFn = Box<dyn FnOnce(&TaskContext) -> Result<()> + Send + 'static>;

/// Registry entry for one task.
///
/// Readers load the current snapshot without taking the update lock; every
/// mutation happens under `update_lock` and publishes a fresh snapshot.
pub(crate) struct TaskSlot {
    pub(crate) id: Uuid,
    snapshot: RwLock<Arc<TaskProgress>>,
    update_lock: Mutex<()>,
    pub(crate) cancel: CancellationToken,
    pub(crate) work: Mutex<Option<WorkFn>>,
    done: Mutex<bool>,
    done_cv: Condvar,
    subscribers: Mutex<Vec<Sender<Arc<TaskProgress>>>>,
    store: Arc<dyn ProgressStore>,
    ttl: Duration,
}

impl TaskSlot {
    pub(crate) fn new(
        progress: TaskProgress,
        work: WorkFn,
        store: Arc<dyn ProgressStore>,
        ttl: Duration,
    ) -> Self {
        Self {
            id: progress.id,
            snapshot: RwLock::new(Arc::new(progress)),
            update_lock: Mutex::new(()),
            cancel: CancellationToken::new(),
            work: Mutex::new(Some(work)),
            done: Mutex::new(false),
            done_cv: Condvar::new(),
            subscribers: Mutex::new(Vec::new()),
            store,
            ttl,
        }
    }

    pub(crate) fn snapshot(&self) -> Arc<TaskProgress> {
        self.snapshot.read().clone()
    }

    /// Apply `f` to a copy of the snapshot and publish it. `f` returns
    /// `false` to leave the task untouched.
    pub(crate) fn mutate(&self, f: impl FnOnce(&mut TaskProgress) -> bool) -> bool {
        let _guard = self.update_lock.lock();
        let mut next = TaskProgress::clone(&self.snapshot());
        if !f(&mut next) {
            return false;
        }
        let next = Arc::new(next);
        *self.snapshot.write() = next.clone();
        self.publish(&next);
        true
    }

    /// Progress update; ignored once the task is terminal
    pub(crate) fn update(&self, update: &ProgressUpdate) -> bool {
        self.mutate(|p| {
            if p.is_terminal() {
                return false;
            }
            p.apply(update);
            true
        })
    }

    /// Lifecycle transition; `false` if the current status does not allow it
    pub(crate) fn advance(&self, event: TaskEvent, error: Option<String>) -> bool {
        self.mutate(|p| {
            if let Err(e) = p.advance(event) {
                tracing::debug!(task_id = %p.id, "Ignoring task event: {}", e);
                return false;
            }
            if error.is_some() {
                p.error = error;
            }
            true
        })
    }

    /// Mirror to the durable store and fan out to subscribers.
    /// Called with the update lock held so both see snapshots in order.
    fn publish(&self, snapshot: &Arc<TaskProgress>) {
        match serde_json::to_string(snapshot.as_ref()) {
            Ok(json) => {
                if let Err(e) = self.store.set(&task_key(self.id), &json, self.ttl) {
                    tracing::warn!(task_id = %self.id, "Failed to mirror task progress: {}", e);
                }
            }
            Err(e) => tracing::warn!(task_id = %self.id, "Failed to encode task progress: {}", e),
        }

        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(snapshot.clone()).is_ok());
        if snapshot.is_terminal() {
            subscribers.clear();
        }
    }

    pub(crate) fn subscribe(&self) -> ProgressStream {
        let _guard = self.update_lock.lock();
        let current = self.snapshot();
        let (tx, rx) = crossbeam_channel::unbounded();
        if !current.is_terminal() {
            self.subscribers.lock().push(tx);
        }
        ProgressStream {
            first: Some(current),
            rx,
            finished: false,
        }
    }

    pub(crate) fn mark_done(&self) {
        let mut done = self.done.lock();
        *done = true;
        self.done_cv.notify_all();
    }

    pub(crate) fn is_done(&self) -> bool {
        *self.done.lock()
    }

    /// Block until the work function has returned (or will never run).
    /// Returns `false` on timeout.
    pub(crate) fn wait_done(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut done = self.done.lock();
        while !*done {
            if self.done_cv.wait_until(&mut done, deadline).timed_out() {
                return *done;
            }
        }
        true
    }
}

/// Handle passed to a running work function
pub struct TaskContext {
    pub(crate) slot: Arc<TaskSlot>,
}

impl TaskContext {
    pub fn task_id(&self) -> Uuid {
        self.slot.id
    }

    /// Cooperative cancellation check; poll between units of work
    pub fn is_cancelled(&self) -> bool {
        self.slot.cancel.is_cancelled()
    }

    /// Token to hand down to nested loops (e.g. the transformation engine)
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.slot.cancel
    }

    /// Thread-safe partial update; a no-op after the task turned terminal
    pub fn update(&self, update: ProgressUpdate) {
        self.slot.update(&update);
    }

    pub fn progress(&self) -> Arc<TaskProgress> {
        self.slot.snapshot()
    }
}

/// Stream of progress snapshots, ending after the first terminal one
pub struct ProgressStream {
    first: Option<Arc<TaskProgress>>,
    rx: Receiver<Arc<TaskProgress>>,
    finished: bool,
}

impl ProgressStream {
    /// Next snapshot, waiting at most `timeout`
    pub fn next_timeout(&mut self, timeout: Duration) -> Option<Arc<TaskProgress>> {
        if self.finished {
            return None;
        }
        let next = match self.first.take() {
            Some(first) => Some(first),
            None => self.rx.recv_timeout(timeout).ok(),
        };
        self.observe(next)
    }

    fn observe(&mut self, next: Option<Arc<TaskProgress>>) -> Option<Arc<TaskProgress>> {
        if next.as_ref().is_some_and(|p| p.is_terminal()) {
            self.finished = true;
        }
        next
    }
}

impl Iterator for ProgressStream {
    type Item = Arc<TaskProgress>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let next = match self.first.take() {
            Some(first) => Some(first),
            None => self.rx.recv().ok(),
        };
        if next.is_none() {
            self.finished = true;
        }
        self.observe(next)
    }
}
