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

//! Async Job Manager.
//!
//! Two pool tiers: this manager owns the outer pool (one thread per in-flight
//! job, `max_concurrent_jobs` threads); a job may run its own inner pool.
//!
//! Lifecycle: `create_task` registers a pending task and takes the version's
//! advisory lock; `start_task` moves it to running and queues the work on the
//! outer pool; the work function reports progress through its
//! [`TaskContext`] and polls for cancellation; when it returns, the task is
//! completed or failed (unless it was cancelled meanwhile) and the version
//! lock is released.

use crate::mirror::{load_task, task_key};
use crate::references::VersionReferences;
use crate::task::{ProgressStream, TaskContext, TaskSlot, WorkFn};
use chrono::Utc;
use crossbeam_channel::Sender;
use datasmith_core::{
    DatasmithError, JobsConfig, ProgressUpdate, Result, TaskEvent, TaskProgress,
};
use datasmith_storage::ProgressStore;
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct JobManagerConfig {
    pub max_concurrent_jobs: usize,
    /// Expiry of snapshots mirrored to the progress store
    pub progress_ttl: Duration,
    /// Terminal tasks older than this are swept from the registry
    pub retention: Duration,
}

impl Default for JobManagerConfig {
    fn default() -> Self {
        Self::from(&JobsConfig::default())
    }
}

impl From<&JobsConfig> for JobManagerConfig {
    fn from(config: &JobsConfig) -> Self {
        Self {
            max_concurrent_jobs: config.max_concurrent_jobs.max(1),
            progress_ttl: Duration::from_secs(config.progress_ttl_secs),
            retention: Duration::from_secs(config.retention_secs),
        }
    }
}

/// What a new task is about
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub label: String,
    pub total_items: u64,
    /// Version the task writes to; at most one such task per version
    pub version_id: Option<Uuid>,
}

impl TaskSpec {
    pub fn new(label: impl Into<String>, total_items: u64) -> Self {
        Self {
            label: label.into(),
            total_items,
            version_id: None,
        }
    }

    pub fn for_version(mut self, version_id: Uuid) -> Self {
        self.version_id = Some(version_id);
        self
    }
}

type Job = (Arc<TaskSlot>, WorkFn);

/// Holder of a version's advisory lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VersionLock {
    Task(Uuid),
    /// Reserved by [`JobManager::with_version_lock`]
    Exclusive,
}

fn version_locked(version_id: Uuid, lock: VersionLock) -> DatasmithError {
    match lock {
        VersionLock::Task(task_id) => DatasmithError::conflict(format!(
            "version {} is being processed by task {}",
            version_id, task_id
        )),
        VersionLock::Exclusive => {
            DatasmithError::conflict(format!("version {} is locked by another operation", version_id))
        }
    }
}

/// Drops an exclusive reservation, also when the guarded closure panics
struct Reservation<'a> {
    locks: &'a Mutex<HashMap<Uuid, VersionLock>>,
    version_id: Uuid,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock();
        if locks.get(&self.version_id) == Some(&VersionLock::Exclusive) {
            locks.remove(&self.version_id);
        }
    }
}

struct Inner {
    config: JobManagerConfig,
    tasks: RwLock<HashMap<Uuid, Arc<TaskSlot>>>,
    version_locks: Mutex<HashMap<Uuid, VersionLock>>,
    store: Arc<dyn ProgressStore>,
}

impl Inner {
    fn slot(&self, task_id: Uuid) -> Result<Arc<TaskSlot>> {
        self.tasks
            .read()
            .get(&task_id)
            .cloned()
            .ok_or_else(|| DatasmithError::not_found("task", task_id))
    }

    fn release_version_lock(&self, slot: &TaskSlot) {
        if let Some(version_id) = slot.snapshot().version_id {
            let mut locks = self.version_locks.lock();
            if locks.get(&version_id) == Some(&VersionLock::Task(slot.id)) {
                locks.remove(&version_id);
            }
        }
    }

    fn run_job(&self, slot: Arc<TaskSlot>, work: WorkFn) {
        if slot.cancel.is_cancelled() {
            tracing::info!(task_id = %slot.id, "Task cancelled before it ran");
            self.release_version_lock(&slot);
            slot.mark_done();
            return;
        }

        let ctx = TaskContext { slot: slot.clone() };
        let outcome = match catch_unwind(AssertUnwindSafe(|| work(&ctx))) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(panic) => Err(format!("job panicked: {}", panic_message(panic.as_ref()))),
        };
        self.release_version_lock(&slot);

        match outcome {
            Ok(()) => {
                if slot.advance(TaskEvent::Complete, None) {
                    tracing::info!(task_id = %slot.id, "Task completed");
                }
            }
            Err(message) => {
                if slot.advance(TaskEvent::Fail, Some(message.clone())) {
                    tracing::warn!(task_id = %slot.id, "Task failed: {}", message);
                }
            }
        }
        slot.mark_done();
    }

    /// Drop terminal tasks past the retention window
    fn sweep(&self) {
        let Ok(retention) = chrono::Duration::from_std(self.config.retention) else {
            return;
        };
        let cutoff = Utc::now() - retention;
        let mut tasks = self.tasks.write();
        let before = tasks.len();
        tasks.retain(|_, slot| {
            let p = slot.snapshot();
            !(p.is_terminal() && slot.is_done() && p.finished_at.is_some_and(|t| t < cutoff))
        });
        let swept = before - tasks.len();
        if swept > 0 {
            tracing::debug!("Swept {} expired tasks", swept);
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

pub struct JobManager {
    inner: Arc<Inner>,
    queue: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl JobManager {
    pub fn new(config: JobManagerConfig, store: Arc<dyn ProgressStore>) -> Self {
        let inner = Arc::new(Inner {
            config,
            tasks: RwLock::new(HashMap::new()),
            version_locks: Mutex::new(HashMap::new()),
            store,
        });

        let (tx, rx) = crossbeam_channel::unbounded::<Job>();
        let mut workers = Vec::with_capacity(inner.config.max_concurrent_jobs);
        for i in 0..inner.config.max_concurrent_jobs {
            let rx = rx.clone();
            let inner = inner.clone();
            let spawned = std::thread::Builder::new()
                .name(format!("datasmith-job-{}", i))
                .spawn(move || {
                    for (slot, work) in rx.iter() {
                        inner.run_job(slot, work);
                    }
                });
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => tracing::warn!("Failed to spawn job worker {}: {}", i, e),
            }
        }

        tracing::info!("Job manager started with {} job workers", workers.len());
        Self {
            inner,
            queue: Some(tx),
            workers,
        }
    }

    /// Register a pending task. Fails with `Conflict` if another unfinished
    /// task holds the same version.
    pub fn create_task<F>(&self, spec: TaskSpec, work: F) -> Result<Uuid>
    where
        F: FnOnce(&TaskContext) -> Result<()> + Send + 'static,
    {
        self.inner.sweep();

        let progress = TaskProgress::new(spec.label, spec.total_items, spec.version_id);
        let task_id = progress.id;

        if let Some(version_id) = spec.version_id {
            let mut locks = self.inner.version_locks.lock();
            if let Some(&lock) = locks.get(&version_id) {
                return Err(version_locked(version_id, lock));
            }
            locks.insert(version_id, VersionLock::Task(task_id));
        }

        let slot = Arc::new(TaskSlot::new(
            progress,
            Box::new(work),
            self.inner.store.clone(),
            self.inner.config.progress_ttl,
        ));
        // initial mirror so other processes see the pending task
        slot.mutate(|_| true);
        self.inner.tasks.write().insert(task_id, slot);

        tracing::info!(task_id = %task_id, "Task created");
        Ok(task_id)
    }

    /// Move a pending task to running and queue it on the job pool.
    /// Returns immediately.
    pub fn start_task(&self, task_id: Uuid) -> Result<()> {
        let slot = self.inner.slot(task_id)?;
        let cannot_start = |slot: &TaskSlot| {
            DatasmithError::InvalidTransition(format!(
                "task {} cannot start from {}",
                task_id,
                slot.snapshot().status
            ))
        };

        let queue = self
            .queue
            .as_ref()
            .ok_or_else(|| DatasmithError::JobFailure("job manager is shut down".into()))?;
        let Some(work) = slot.work.lock().take() else {
            return Err(cannot_start(&*slot));
        };
        if !slot.advance(TaskEvent::Start, None) {
            // cancelled concurrently; the work will never run
            self.inner.release_version_lock(&slot);
            slot.mark_done();
            return Err(cannot_start(&*slot));
        }

        if queue.send((slot.clone(), work)).is_err() {
            slot.advance(TaskEvent::Fail, Some("job pool unavailable".into()));
            self.inner.release_version_lock(&slot);
            slot.mark_done();
            return Err(DatasmithError::JobFailure("job pool unavailable".into()));
        }

        tracing::info!(task_id = %task_id, "Task started");
        Ok(())
    }

    /// Run `f` with `version_id` reserved: `create_task` on that version
    /// fails with `Conflict` until `f` returns. Fails with `Conflict` up front
    /// if an unfinished task already holds the version.
    pub fn with_version_lock<T>(&self, version_id: Uuid, f: impl FnOnce() -> Result<T>) -> Result<T> {
        {
            let mut locks = self.inner.version_locks.lock();
            if let Some(&lock) = locks.get(&version_id) {
                return Err(version_locked(version_id, lock));
            }
            locks.insert(version_id, VersionLock::Exclusive);
        }
        let _reservation = Reservation {
            locks: &self.inner.version_locks,
            version_id,
        };
        f()
    }

    /// Create and immediately start a task
    pub fn submit<F>(&self, spec: TaskSpec, work: F) -> Result<Uuid>
    where
        F: FnOnce(&TaskContext) -> Result<()> + Send + 'static,
    {
        let task_id = self.create_task(spec, work)?;
        self.start_task(task_id)?;
        Ok(task_id)
    }

    /// Partial progress update; a no-op once the task is terminal
    pub fn update_progress(&self, task_id: Uuid, update: ProgressUpdate) -> Result<()> {
        self.inner.slot(task_id)?.update(&update);
        Ok(())
    }

    /// Request cooperative cancellation. Returns `false` if the task was
    /// already terminal.
    pub fn cancel_task(&self, task_id: Uuid) -> Result<bool> {
        let slot = self.inner.slot(task_id)?;
        if !slot.advance(TaskEvent::Cancel, None) {
            return Ok(false);
        }
        slot.cancel.cancel();

        // never queued: nothing will run, finish here
        if slot.work.lock().take().is_some() {
            self.inner.release_version_lock(&slot);
            slot.mark_done();
        }

        tracing::info!(task_id = %task_id, "Task cancelled");
        Ok(true)
    }

    /// Local snapshot, falling back to the durable store for tasks owned by
    /// another process
    pub fn get_task_progress(&self, task_id: Uuid) -> Result<TaskProgress> {
        if let Ok(slot) = self.inner.slot(task_id) {
            return Ok(TaskProgress::clone(&slot.snapshot()));
        }
        load_task(self.inner.store.as_ref(), task_id)?
            .ok_or_else(|| DatasmithError::not_found("task", task_id))
    }

    /// Tasks in this process, oldest first
    pub fn list_tasks(&self) -> Vec<TaskProgress> {
        self.inner.sweep();
        let mut tasks: Vec<TaskProgress> = self
            .inner
            .tasks
            .read()
            .values()
            .map(|slot| TaskProgress::clone(&slot.snapshot()))
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        tasks
    }

    /// Forget a finished task and its mirrored snapshot
    pub fn cleanup_task(&self, task_id: Uuid) -> Result<()> {
        let slot = self.inner.slot(task_id)?;
        if !slot.snapshot().is_terminal() || !slot.is_done() {
            return Err(DatasmithError::conflict(format!("task {} is still active", task_id)));
        }
        self.inner.tasks.write().remove(&task_id);
        if let Err(e) = self.inner.store.delete(&task_key(task_id)) {
            tracing::warn!(task_id = %task_id, "Failed to delete mirrored progress: {}", e);
        }
        Ok(())
    }

    /// Block until the task's work has returned or `timeout` elapses, then
    /// return the current snapshot
    pub fn wait(&self, task_id: Uuid, timeout: Duration) -> Result<TaskProgress> {
        let slot = self.inner.slot(task_id)?;
        slot.wait_done(timeout);
        Ok(TaskProgress::clone(&slot.snapshot()))
    }

    /// Snapshots of one task as they are published, ending at a terminal status
    pub fn subscribe(&self, task_id: Uuid) -> Result<ProgressStream> {
        Ok(self.inner.slot(task_id)?.subscribe())
    }

    pub fn progress_store(&self) -> &Arc<dyn ProgressStore> {
        &self.inner.store
    }

    /// Close the queue and join job threads; queued jobs still run
    pub fn shutdown(&mut self) {
        self.queue.take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::warn!("Job worker exited with a panic");
            }
        }
    }
}

impl VersionReferences for JobManager {
    fn references(&self, version_id: Uuid) -> Vec<String> {
        self.inner
            .tasks
            .read()
            .values()
            .filter(|slot| !slot.is_done())
            .map(|slot| slot.snapshot())
            .filter(|p| p.version_id == Some(version_id))
            .map(|p| format!("task {} ({})", p.id, p.label))
            .collect()
    }

    fn exclusive(&self, version_id: Uuid, f: &mut dyn FnMut() -> Result<()>) -> Result<()> {
        self.with_version_lock(version_id, || f())
    }
}

impl Drop for JobManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datasmith_core::TaskStatus;
    use datasmith_storage::MokaProgressStore;

    fn manager(jobs: usize) -> JobManager {
        JobManager::new(
            JobManagerConfig {
                max_concurrent_jobs: jobs,
                progress_ttl: Duration::from_secs(60),
                retention: Duration::from_secs(3600),
            },
            Arc::new(MokaProgressStore::default()),
        )
    }

    const WAIT: Duration = Duration::from_secs(10);

    #[test]
    fn test_completes_and_counts() {
        let jobs = manager(2);
        let id = jobs
            .submit(TaskSpec::new("count", 3), |ctx| {
                for i in 0..3 {
                    ctx.update(ProgressUpdate::new().item_done(i != 1).current_item(format!("f{}", i)));
                }
                Ok(())
            })
            .unwrap();
        let p = jobs.wait(id, WAIT).unwrap();
        assert_eq!(p.status, TaskStatus::Completed);
        assert_eq!((p.processed_items, p.success_items, p.failed_items), (3, 2, 1));
        assert!(p.started_at.is_some() && p.finished_at.is_some());
    }

    #[test]
    fn test_error_and_panic_fail_the_task() {
        let jobs = manager(1);
        let err = jobs
            .submit(TaskSpec::new("err", 1), |_| Err(DatasmithError::Storage("store down".into())))
            .unwrap();
        let boom = jobs
            .submit(TaskSpec::new("panic", 1), |_| panic!("kaboom"))
            .unwrap();

        let p = jobs.wait(err, WAIT).unwrap();
        assert_eq!(p.status, TaskStatus::Failed);
        assert!(p.error.unwrap().contains("store down"));

        let p = jobs.wait(boom, WAIT).unwrap();
        assert_eq!(p.status, TaskStatus::Failed);
        assert!(p.error.unwrap().contains("kaboom"));
    }

    #[test]
    fn test_pending_task_cancel() {
        let jobs = manager(1);
        let id = jobs.create_task(TaskSpec::new("never", 1), |_| Ok(())).unwrap();
        assert!(jobs.cancel_task(id).unwrap());
        assert!(!jobs.cancel_task(id).unwrap());
        assert!(jobs.start_task(id).is_err());
        assert_eq!(jobs.wait(id, WAIT).unwrap().status, TaskStatus::Cancelled);
    }

    #[test]
    fn test_version_lock_conflict_and_release() {
        let jobs = manager(2);
        let version = Uuid::new_v4();
        let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(0);

        let first = jobs
            .submit(TaskSpec::new("first", 1).for_version(version), move |_| {
                let _ = release_rx.recv();
                Ok(())
            })
            .unwrap();
        assert_eq!(jobs.references(version).len(), 1);

        let second = jobs.create_task(TaskSpec::new("second", 1).for_version(version), |_| Ok(()));
        assert!(second.unwrap_err().is_conflict());

        release_tx.send(()).unwrap();
        jobs.wait(first, WAIT).unwrap();
        assert!(jobs.references(version).is_empty());
        assert!(jobs
            .create_task(TaskSpec::new("third", 1).for_version(version), |_| Ok(()))
            .is_ok());
    }

    #[test]
    fn test_version_lock_blocks_new_tasks() {
        let jobs = manager(1);
        let version = Uuid::new_v4();

        let inside = jobs
            .with_version_lock(version, || {
                let blocked = jobs.create_task(TaskSpec::new("late", 1).for_version(version), |_| Ok(()));
                assert!(blocked.unwrap_err().is_conflict());
                // other versions are unaffected
                jobs.create_task(TaskSpec::new("other", 1).for_version(Uuid::new_v4()), |_| Ok(()))
            })
            .unwrap();
        assert!(jobs.cancel_task(inside).unwrap());

        // reservation is gone once the closure returns, even on error
        let failed: Result<()> =
            jobs.with_version_lock(version, || Err(DatasmithError::validation("boom")));
        assert!(failed.is_err());
        let id = jobs
            .create_task(TaskSpec::new("now", 1).for_version(version), |_| Ok(()))
            .unwrap();

        // and a pending task holds the version against exclusive sections
        let held = jobs.with_version_lock(version, || Ok(()));
        assert!(held.unwrap_err().is_conflict());
        jobs.cancel_task(id).unwrap();
        assert!(jobs.with_version_lock(version, || Ok(())).is_ok());
    }

    #[test]
    fn test_updates_ignored_after_terminal() {
        let jobs = manager(1);
        let id = jobs.submit(TaskSpec::new("quick", 1), |_| Ok(())).unwrap();
        jobs.wait(id, WAIT).unwrap();
        jobs.update_progress(id, ProgressUpdate::new().processed(99)).unwrap();
        assert_eq!(jobs.get_task_progress(id).unwrap().processed_items, 0);
    }

    #[test]
    fn test_cleanup_requires_terminal() {
        let jobs = manager(1);
        let id = jobs.create_task(TaskSpec::new("idle", 1), |_| Ok(())).unwrap();
        assert!(jobs.cleanup_task(id).unwrap_err().is_conflict());

        jobs.start_task(id).unwrap();
        jobs.wait(id, WAIT).unwrap();
        jobs.cleanup_task(id).unwrap();
        assert!(jobs.get_task_progress(id).unwrap_err().is_not_found());
        assert!(jobs.list_tasks().is_empty());
    }

    #[test]
    fn test_unknown_task() {
        let jobs = manager(1);
        let missing = Uuid::new_v4();
        assert!(jobs.start_task(missing).unwrap_err().is_not_found());
        assert!(jobs.cancel_task(missing).unwrap_err().is_not_found());
        assert!(jobs.subscribe(missing).is_err());
    }

    #[test]
    fn test_retention_sweep() {
        let jobs = JobManager::new(
            JobManagerConfig {
                max_concurrent_jobs: 1,
                progress_ttl: Duration::from_secs(60),
                retention: Duration::ZERO,
            },
            Arc::new(MokaProgressStore::default()),
        );
        let id = jobs.submit(TaskSpec::new("old", 0), |_| Ok(())).unwrap();
        jobs.wait(id, WAIT).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert!(jobs.list_tasks().is_empty());
        // still visible through the durable mirror
        assert_eq!(jobs.get_task_progress(id).unwrap().status, TaskStatus::Completed);
    }
}
