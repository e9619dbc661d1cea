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

//! File status transitions and version status aggregation.

use chrono::Utc;
use datasmith_core::{FileEvent, FileStatus, ProcessingKind, Result, VersionStatus};
use datasmith_storage::{EntityStore, EntityStoreExt};
use std::sync::Arc;
use uuid::Uuid;

/// Applies file status events and keeps the owning version's status in step
#[derive(Clone)]
pub struct StatusTracker {
    entities: Arc<dyn EntityStore>,
}

impl StatusTracker {
    pub fn new(entities: Arc<dyn EntityStore>) -> Self {
        Self { entities }
    }

    /// Move one file through its state machine and refresh its version's
    /// status in the same transaction.
    pub fn set_file_status(&self, file_id: Uuid, event: FileEvent) -> Result<(FileStatus, VersionStatus)> {
        self.entities.transact(|t| {
            let file = t.file_mut(file_id)?;
            let next = file.status.transition(event)?;
            file.status = next;
            file.updated_at = Utc::now();
            let version_id = file.version_id;
            let version_status = t.refresh_version_status(version_id)?;
            tracing::debug!(file_id = %file_id, status = %next, version_status = %version_status, "File status changed");
            Ok((next, version_status))
        })
    }

    /// Enter a processing stage. A file at rest in `done` or `*_failed` is
    /// re-run first; both steps commit together.
    pub fn start_processing(&self, file_id: Uuid, kind: ProcessingKind) -> Result<FileStatus> {
        self.entities.transact(|t| {
            let file = t.file_mut(file_id)?;
            let mut status = file.status;
            if status.is_terminal() {
                status = status.transition(FileEvent::Rerun)?;
            }
            status = status.transition(FileEvent::Start(kind))?;
            file.status = status;
            file.updated_at = Utc::now();
            let version_id = file.version_id;
            t.refresh_version_status(version_id)?;
            Ok(status)
        })
    }

    /// Fail every in-flight file of a version and force the version to `fail`.
    ///
    /// Used when a job dies outside per-file error handling.
    pub fn force_fail(&self, version_id: Uuid) -> Result<()> {
        self.entities.transact(|t| {
            let active: Vec<Uuid> = t
                .files_of_version(version_id)?
                .into_iter()
                .filter(|f| f.status.is_active())
                .map(|f| f.id)
                .collect();
            let now = Utc::now();
            for id in &active {
                let file = t.file_mut(*id)?;
                file.status = file.status.transition(FileEvent::Fail)?;
                file.updated_at = now;
            }
            let version = t.version_mut(version_id)?;
            version.status = VersionStatus::Fail;
            version.updated_at = now;
            tracing::warn!(version_id = %version_id, failed_files = active.len(), "Version forced to fail");
            Ok(())
        })
    }

    pub fn file_status(&self, file_id: Uuid) -> Result<FileStatus> {
        self.entities.read(|t| t.file(file_id).map(|f| f.status))
    }

    pub fn version_status(&self, version_id: Uuid) -> Result<VersionStatus> {
        self.entities.read(|t| t.version(version_id).map(|v| v.status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datasmith_core::{
        DataKind, DataSet, DataSetFile, DataSetVersion, DataSource, FilePayload, NewDataSet,
        VersionNumber, VersionType,
    };
    use datasmith_storage::MemoryEntityStore;

    fn seed(files: usize) -> (StatusTracker, Uuid, Vec<Uuid>) {
        let store: Arc<dyn EntityStore> = Arc::new(MemoryEntityStore::new());
        let ds = DataSet::new(&NewDataSet::new("d", "o", "t", DataKind::Document, DataSource::Upload));
        let version = DataSetVersion::new(ds.id, "b", VersionNumber::branch(0), VersionType::Branch, None, "t/d/v");
        let vid = version.id;
        let ids = store
            .transact(|t| {
                t.insert_dataset(ds);
                t.insert_version(version);
                let mut ids = Vec::new();
                for i in 0..files {
                    let f = DataSetFile::new(
                        vid,
                        format!("f{}.jsonl", i),
                        FilePayload::Stored { path: format!("t/d/v/f{}", i) },
                        "h",
                        1,
                    );
                    ids.push(f.id);
                    t.attach_file(f)?;
                }
                Ok(ids)
            })
            .unwrap();
        (StatusTracker::new(store), vid, ids)
    }

    #[test]
    fn test_version_follows_files() {
        let (tracker, vid, ids) = seed(2);
        let start = FileEvent::Start(ProcessingKind::Cleaning);

        let (status, vs) = tracker.set_file_status(ids[0], start).unwrap();
        assert_eq!(status, FileStatus::Processing(ProcessingKind::Cleaning));
        assert_eq!(vs, VersionStatus::Doing);

        tracker.set_file_status(ids[0], FileEvent::Fail).unwrap();
        assert_eq!(tracker.version_status(vid).unwrap(), VersionStatus::Fail);

        tracker.set_file_status(ids[1], start).unwrap();
        assert_eq!(tracker.version_status(vid).unwrap(), VersionStatus::Doing);

        tracker.set_file_status(ids[1], FileEvent::Succeed).unwrap();
        tracker.set_file_status(ids[0], FileEvent::Rerun).unwrap();
        // a waiting file no longer drags the version into fail
        assert_eq!(tracker.version_status(vid).unwrap(), VersionStatus::Done);
    }

    #[test]
    fn test_invalid_event_leaves_state_untouched() {
        let (tracker, vid, ids) = seed(1);
        assert!(tracker.set_file_status(ids[0], FileEvent::Succeed).is_err());
        assert_eq!(tracker.file_status(ids[0]).unwrap(), FileStatus::Done);
        assert_eq!(tracker.version_status(vid).unwrap(), VersionStatus::Done);
    }

    #[test]
    fn test_start_processing_reruns_finished_files() {
        let (tracker, vid, ids) = seed(1);
        let status = tracker
            .start_processing(ids[0], ProcessingKind::Annotating)
            .unwrap();
        assert_eq!(status, FileStatus::Processing(ProcessingKind::Annotating));
        assert_eq!(tracker.version_status(vid).unwrap(), VersionStatus::Doing);
    }

    #[test]
    fn test_force_fail() {
        let (tracker, vid, ids) = seed(2);
        tracker
            .set_file_status(ids[0], FileEvent::Start(ProcessingKind::Denoising))
            .unwrap();
        tracker.force_fail(vid).unwrap();

        assert_eq!(
            tracker.file_status(ids[0]).unwrap(),
            FileStatus::Failed(ProcessingKind::Denoising)
        );
        assert_eq!(tracker.file_status(ids[1]).unwrap(), FileStatus::Done);
        assert_eq!(tracker.version_status(vid).unwrap(), VersionStatus::Fail);
    }
}
