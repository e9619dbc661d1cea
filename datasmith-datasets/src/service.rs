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

//! Transformation jobs over a version's files.
//!
//! One job walks the files of a branch in order. Each file is loaded into
//! items, run through the engine and written back as a new blob; the entity
//! row is repointed and marked `done` in one transaction. Cancellation is
//! checked before every file and, through the engine, before every item.

use crate::graph::blob_leaf;
use crate::items::{encode_items, inline_items, inline_payload, parse_items};
use crate::status::StatusTracker;
use chrono::Utc;
use datasmith_core::{
    DataSetFile, DatasmithError, FileEvent, FilePayload, NestedProgress, Operation, ProgressUpdate,
    Result,
};
use datasmith_jobs::{JobManager, TaskContext, TaskSpec};
use datasmith_storage::{content_hash, BlobStore, EntityStore, EntityStoreExt};
use datasmith_transform::{ItemProgress, TransformEngine, TransformUnitSpec, UnitResolver};
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Run `operation` with `unit` over every file of a branch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformRequest {
    pub version_id: Uuid,
    pub operation: Operation,
    pub unit: TransformUnitSpec,
}

#[derive(Clone)]
pub struct TransformService {
    entities: Arc<dyn EntityStore>,
    blobs: Arc<dyn BlobStore>,
    jobs: Arc<JobManager>,
    tracker: StatusTracker,
    resolver: UnitResolver,
    item_workers: usize,
}

impl TransformService {
    pub fn new(
        entities: Arc<dyn EntityStore>,
        blobs: Arc<dyn BlobStore>,
        jobs: Arc<JobManager>,
        resolver: UnitResolver,
        item_workers: usize,
    ) -> Self {
        Self {
            tracker: StatusTracker::new(entities.clone()),
            entities,
            blobs,
            jobs,
            resolver,
            item_workers,
        }
    }

    /// Queue a transformation job and return its task id.
    ///
    /// Tags are immutable and rejected with `Validation`, as are units that
    /// can never resolve. A second job on the same version fails with
    /// `Conflict` while the first is unfinished, or while the version is
    /// being deleted.
    pub fn submit(&self, request: TransformRequest) -> Result<Uuid> {
        let (version, tenant) = self.entities.read(|t| {
            let version = t.version(request.version_id)?.clone();
            let tenant = t.dataset(version.dataset_id)?.tenant.clone();
            Ok::<_, DatasmithError>((version, tenant))
        })?;
        if version.is_tag() {
            return Err(DatasmithError::validation(format!(
                "version {} is a tag and cannot be transformed",
                version.version
            )));
        }
        self.resolver.check(&request.unit)?;

        let spec = TaskSpec::new(
            format!("{} {}", request.operation, version.version),
            version.file_ids.len() as u64,
        )
        .for_version(version.id);

        let request_version = version.id;
        let driver = TransformDriver {
            entities: self.entities.clone(),
            blobs: self.blobs.clone(),
            tracker: self.tracker.clone(),
            resolver: self.resolver.clone(),
            engine: TransformEngine::new(self.item_workers),
            storage_root: version.storage_root.clone(),
            tenant,
            request,
        };
        let task_id = self.jobs.create_task(spec, move |ctx| driver.run(ctx))?;
        // the version lock is held now; a delete that won the race has already committed
        if let Err(e) = self.entities.read(|t| t.version(request_version).map(|_| ())) {
            self.jobs.cancel_task(task_id)?;
            self.jobs.cleanup_task(task_id)?;
            return Err(e);
        }
        self.jobs.start_task(task_id)?;
        info!(task_id = %task_id, version_id = %version.id, "Transform job submitted");
        Ok(task_id)
    }

    pub fn jobs(&self) -> &Arc<JobManager> {
        &self.jobs
    }
}

/// New content for a file, written but not yet committed
struct Rewrite {
    payload: FilePayload,
    content_hash: String,
    size_bytes: u64,
}

struct TransformDriver {
    entities: Arc<dyn EntityStore>,
    blobs: Arc<dyn BlobStore>,
    tracker: StatusTracker,
    resolver: UnitResolver,
    engine: TransformEngine,
    storage_root: String,
    tenant: String,
    request: TransformRequest,
}

impl TransformDriver {
    /// Job entry point. Any error or panic escaping the per-file handling
    /// forces the version to `fail` before it reaches the job manager.
    fn run(self, ctx: &TaskContext) -> Result<()> {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.process_version(ctx)));
        if !matches!(outcome, Ok(Ok(()))) {
            if let Err(e) = self.tracker.force_fail(self.request.version_id) {
                warn!(task_id = %ctx.task_id(), error = %e, "Failed to mark version as failed");
            }
        }
        match outcome {
            Ok(result) => result,
            Err(panic) => panic::resume_unwind(panic),
        }
    }

    fn process_version(&self, ctx: &TaskContext) -> Result<()> {
        let version_id = self.request.version_id;
        let kind = self.request.operation.processing_kind();
        let file_ids = self
            .entities
            .read(|t| t.version(version_id).map(|v| v.file_ids.clone()))?;
        ctx.update(ProgressUpdate::new().total(file_ids.len() as u64));

        for file_id in file_ids {
            if ctx.is_cancelled() {
                info!(task_id = %ctx.task_id(), "Transform cancelled before next file");
                break;
            }
            let file = match self.entities.read(|t| t.file(file_id).cloned()) {
                Ok(file) => file,
                Err(e) if e.is_not_found() => {
                    warn!(task_id = %ctx.task_id(), file_id = %file_id, "File removed during transform");
                    ctx.update(ProgressUpdate::new().item_done(false));
                    continue;
                }
                Err(e) => return Err(e),
            };

            ctx.update(ProgressUpdate::new().current_item(file.name.clone()));
            self.tracker.start_processing(file.id, kind)?;

            match self.process_file(ctx, &file) {
                Ok(Some(rewrite)) => {
                    self.commit_rewrite(&file, rewrite)?;
                    ctx.update(ProgressUpdate::new().item_done(true));
                }
                Ok(None) => {
                    // stopped mid-file; content stays as it was
                    self.tracker.set_file_status(file.id, FileEvent::Fail)?;
                    info!(task_id = %ctx.task_id(), file = %file.name, "Transform cancelled mid-file");
                    break;
                }
                Err(e) => {
                    warn!(task_id = %ctx.task_id(), file = %file.name, error = %e, "File transform failed");
                    self.tracker.set_file_status(file.id, FileEvent::Fail)?;
                    ctx.update(
                        ProgressUpdate::new()
                            .item_done(false)
                            .message(format!("{}: {}", file.name, e)),
                    );
                }
            }
        }

        ctx.update(ProgressUpdate::new().nested(None));
        Ok(())
    }

    /// Transform one file's items. `None` means the run was cancelled.
    fn process_file(&self, ctx: &TaskContext, file: &DataSetFile) -> Result<Option<Rewrite>> {
        let format = file.format();
        let unit = self
            .resolver
            .resolve(&self.request.unit, self.request.operation, format)?;

        let items = match &file.payload {
            FilePayload::Inline { item } => inline_items(item),
            FilePayload::Stored { path } => {
                let format = format.ok_or_else(|| {
                    DatasmithError::validation(format!("unsupported file format: {}", file.name))
                })?;
                parse_items(format, &self.blobs.read(path)?)?
            }
        };

        let total = items.len() as u64;
        let step = (total / 100).max(1);
        let nested = |processed: u64| {
            ProgressUpdate::new().nested(Some(NestedProgress {
                label: file.name.clone(),
                total,
                processed,
            }))
        };
        ctx.update(nested(0));
        let on_progress = |p: ItemProgress| {
            let processed = p.processed as u64;
            if processed % step == 0 || processed == total {
                ctx.update(nested(processed));
            }
        };

        let report = self.engine.run(
            items,
            &unit,
            self.request.operation,
            ctx.cancellation_token(),
            &on_progress,
        );
        if report.cancelled {
            return Ok(None);
        }
        debug!(
            task_id = %ctx.task_id(),
            file = %file.name,
            transformed = report.transformed,
            kept = report.fallbacks,
            dropped = report.dropped,
            "File transformed"
        );

        let rewrite = match &file.payload {
            FilePayload::Inline { .. } => {
                let item = inline_payload(report.items);
                let bytes = serde_json::to_vec(&item)?;
                Rewrite {
                    payload: FilePayload::Inline { item },
                    content_hash: content_hash(&bytes),
                    size_bytes: bytes.len() as u64,
                }
            }
            FilePayload::Stored { .. } => {
                let format = format.ok_or_else(|| {
                    DatasmithError::validation(format!("unsupported file format: {}", file.name))
                })?;
                let bytes = encode_items(format, &report.items)?;
                let path = format!("{}/{}", self.storage_root, blob_leaf(&file.name));
                let info = self.blobs.write(&path, &bytes)?;
                Rewrite {
                    payload: FilePayload::Stored { path },
                    content_hash: info.content_hash,
                    size_bytes: info.size_bytes,
                }
            }
        };
        Ok(Some(rewrite))
    }

    /// Point the file at its new content and mark it `done`, then drop the
    /// old blob. The new blob is removed if the commit fails.
    fn commit_rewrite(&self, file: &DataSetFile, rewrite: Rewrite) -> Result<()> {
        let new_blob = rewrite.payload.stored_path().map(str::to_string);
        let committed = self.entities.transact(|t| {
            let row = t.file_mut(file.id)?;
            let old_size = row.size_bytes;
            row.status = row.status.transition(FileEvent::Succeed)?;
            row.payload = rewrite.payload;
            row.content_hash = rewrite.content_hash;
            row.size_bytes = rewrite.size_bytes;
            row.updated_at = Utc::now();
            let version_id = row.version_id;
            t.release_usage(&self.tenant, old_size);
            t.add_usage(&self.tenant, rewrite.size_bytes);
            t.refresh_version_status(version_id)?;
            Ok(())
        });

        match committed {
            Ok(()) => {
                if let Some(old) = file.payload.stored_path() {
                    if let Err(e) = self.blobs.remove(old) {
                        warn!(path = %old, error = %e, "Failed to remove replaced content");
                    }
                }
                Ok(())
            }
            Err(e) => {
                if let Some(path) = new_blob {
                    if let Err(cleanup) = self.blobs.remove(&path) {
                        warn!(path = %path, error = %cleanup, "Failed to remove uncommitted content");
                    }
                }
                Err(e)
            }
        }
    }
}
