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

//! Entity Store contract and the in-memory adapter.
//!
//! All entities live in one [`EntityTables`] value. Readers take an
//! `Arc` snapshot and never block writers; writers are serialised, mutate a
//! staged copy and commit by swapping the snapshot. An `Err` from the
//! transaction body discards the staged copy, which is the rollback.
//!
//! Staging clones every table, so a commit costs time proportional to the
//! whole store, not to the rows it touches. A transformation job commits
//! twice per file; over one version that is files times store size.

use chrono::Utc;
use datasmith_core::{
    aggregate_version_status, DataKind, DataSet, DataSetFile, DataSetVersion, DatasmithError,
    ReflowRecord, Result, VersionStatus,
};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// Every persisted entity, keyed by id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityTables {
    pub datasets: BTreeMap<Uuid, DataSet>,
    pub versions: BTreeMap<Uuid, DataSetVersion>,
    pub files: BTreeMap<Uuid, DataSetFile>,
    pub reflow_records: BTreeMap<Uuid, ReflowRecord>,
    /// Stored bytes per tenant
    pub tenant_usage: BTreeMap<String, u64>,
}

impl EntityTables {
    /// Live (not soft-deleted) dataset
    pub fn dataset(&self, id: Uuid) -> Result<&DataSet> {
        self.datasets
            .get(&id)
            .filter(|d| !d.deleted)
            .ok_or_else(|| DatasmithError::not_found("dataset", id))
    }

    pub fn dataset_mut(&mut self, id: Uuid) -> Result<&mut DataSet> {
        self.datasets
            .get_mut(&id)
            .filter(|d| !d.deleted)
            .ok_or_else(|| DatasmithError::not_found("dataset", id))
    }

    pub fn find_dataset(&self, tenant: &str, name: &str, kind: DataKind) -> Option<&DataSet> {
        self.datasets
            .values()
            .find(|d| !d.deleted && d.tenant == tenant && d.name == name && d.kind == kind)
    }

    pub fn datasets_of_tenant(&self, tenant: &str) -> Vec<&DataSet> {
        self.datasets
            .values()
            .filter(|d| !d.deleted && d.tenant == tenant)
            .collect()
    }

    pub fn insert_dataset(&mut self, dataset: DataSet) {
        self.datasets.insert(dataset.id, dataset);
    }

    pub fn version(&self, id: Uuid) -> Result<&DataSetVersion> {
        self.versions
            .get(&id)
            .ok_or_else(|| DatasmithError::not_found("version", id))
    }

    pub fn version_mut(&mut self, id: Uuid) -> Result<&mut DataSetVersion> {
        self.versions
            .get_mut(&id)
            .ok_or_else(|| DatasmithError::not_found("version", id))
    }

    /// Versions of a dataset, oldest first
    pub fn versions_of_dataset(&self, dataset_id: Uuid) -> Vec<&DataSetVersion> {
        let mut versions: Vec<_> = self
            .versions
            .values()
            .filter(|v| v.dataset_id == dataset_id)
            .collect();
        versions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.version.cmp(&b.version)));
        versions
    }

    pub fn insert_version(&mut self, version: DataSetVersion) {
        self.versions.insert(version.id, version);
    }

    /// Remove a version row. Its files must already be gone.
    pub fn remove_version(&mut self, id: Uuid) -> Result<DataSetVersion> {
        self.versions
            .remove(&id)
            .ok_or_else(|| DatasmithError::not_found("version", id))
    }

    pub fn file(&self, id: Uuid) -> Result<&DataSetFile> {
        self.files
            .get(&id)
            .ok_or_else(|| DatasmithError::not_found("file", id))
    }

    pub fn file_mut(&mut self, id: Uuid) -> Result<&mut DataSetFile> {
        self.files
            .get_mut(&id)
            .ok_or_else(|| DatasmithError::not_found("file", id))
    }

    /// Files of a version in item order
    pub fn files_of_version(&self, version_id: Uuid) -> Result<Vec<&DataSetFile>> {
        let version = self.version(version_id)?;
        version.file_ids.iter().map(|id| self.file(*id)).collect()
    }

    /// Insert a file and append it to its version's item order
    pub fn attach_file(&mut self, file: DataSetFile) -> Result<()> {
        let version = self.version_mut(file.version_id)?;
        version.file_ids.push(file.id);
        version.updated_at = Utc::now();
        self.files.insert(file.id, file);
        Ok(())
    }

    /// Bulk delete by ids. Unknown ids are ignored; returns the removed rows.
    pub fn delete_files(&mut self, ids: &[Uuid]) -> Vec<DataSetFile> {
        let mut removed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(file) = self.files.remove(id) {
                if let Some(version) = self.versions.get_mut(&file.version_id) {
                    version.file_ids.retain(|f| f != id);
                    version.updated_at = Utc::now();
                }
                removed.push(file);
            }
        }
        removed
    }

    /// Recompute a version's status from its current files.
    ///
    /// Must run in the same transaction as the file mutation that triggered it.
    pub fn refresh_version_status(&mut self, version_id: Uuid) -> Result<VersionStatus> {
        let status = {
            let files = self.files_of_version(version_id)?;
            aggregate_version_status(files.iter().map(|f| f.status))
        };
        let version = self.version_mut(version_id)?;
        if version.status != status {
            version.status = status;
            version.updated_at = Utc::now();
        }
        Ok(status)
    }

    pub fn reflow_record(&self, id: Uuid) -> Result<&ReflowRecord> {
        self.reflow_records
            .get(&id)
            .ok_or_else(|| DatasmithError::not_found("reflow record", id))
    }

    pub fn reflow_record_mut(&mut self, id: Uuid) -> Result<&mut ReflowRecord> {
        self.reflow_records
            .get_mut(&id)
            .ok_or_else(|| DatasmithError::not_found("reflow record", id))
    }

    pub fn insert_reflow_record(&mut self, record: ReflowRecord) {
        self.reflow_records.insert(record.id, record);
    }

    pub fn usage(&self, tenant: &str) -> u64 {
        self.tenant_usage.get(tenant).copied().unwrap_or(0)
    }

    pub fn add_usage(&mut self, tenant: &str, bytes: u64) {
        *self.tenant_usage.entry(tenant.to_string()).or_insert(0) += bytes;
    }

    pub fn release_usage(&mut self, tenant: &str, bytes: u64) {
        if let Some(used) = self.tenant_usage.get_mut(tenant) {
            *used = used.saturating_sub(bytes);
        }
    }
}

/// Ordered, transactional entity store.
pub trait EntityStore: Send + Sync {
    /// Consistent read-only view of the last committed state
    fn snapshot(&self) -> Arc<EntityTables>;

    /// Run `f` against a staged copy; commit on `Ok`, roll back on `Err`
    fn transaction(&self, f: &mut dyn FnMut(&mut EntityTables) -> Result<()>) -> Result<()>;
}

/// Typed helpers over any [`EntityStore`]
pub trait EntityStoreExt {
    /// Transaction whose body returns a value
    fn transact<T>(&self, f: impl FnOnce(&mut EntityTables) -> Result<T>) -> Result<T>;

    fn read<T>(&self, f: impl FnOnce(&EntityTables) -> T) -> T;
}

impl<S: EntityStore + ?Sized> EntityStoreExt for S {
    fn transact<T>(&self, f: impl FnOnce(&mut EntityTables) -> Result<T>) -> Result<T> {
        let mut body = Some(f);
        let mut output = None;
        self.transaction(&mut |tables| {
            let body = body
                .take()
                .ok_or_else(|| DatasmithError::Storage("transaction body ran twice".into()))?;
            output = Some(body(tables)?);
            Ok(())
        })?;
        output.ok_or_else(|| DatasmithError::Storage("transaction produced no result".into()))
    }

    fn read<T>(&self, f: impl FnOnce(&EntityTables) -> T) -> T {
        f(&self.snapshot())
    }
}

/// Snapshot-swap cell shared by the in-memory and file-backed stores
pub(crate) struct SnapshotCell {
    current: RwLock<Arc<EntityTables>>,
    writer: Mutex<()>,
}

impl SnapshotCell {
    pub(crate) fn new(tables: EntityTables) -> Self {
        Self {
            current: RwLock::new(Arc::new(tables)),
            writer: Mutex::new(()),
        }
    }

    pub(crate) fn snapshot(&self) -> Arc<EntityTables> {
        self.current.read().clone()
    }

    /// `persist` runs after the body succeeds and before the swap; its
    /// failure also rolls back.
    pub(crate) fn transaction(
        &self,
        f: &mut dyn FnMut(&mut EntityTables) -> Result<()>,
        persist: impl FnOnce(&EntityTables) -> Result<()>,
    ) -> Result<()> {
        let _writer = self.writer.lock();
        let mut staged = EntityTables::clone(&self.snapshot());
        f(&mut staged)?;
        persist(&staged)?;
        *self.current.write() = Arc::new(staged);
        Ok(())
    }
}

/// Volatile entity store for tests and single-process use
pub struct MemoryEntityStore {
    cell: SnapshotCell,
}

impl MemoryEntityStore {
    pub fn new() -> Self {
        Self {
            cell: SnapshotCell::new(EntityTables::default()),
        }
    }
}

impl Default for MemoryEntityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityStore for MemoryEntityStore {
    fn snapshot(&self) -> Arc<EntityTables> {
        self.cell.snapshot()
    }

    fn transaction(&self, f: &mut dyn FnMut(&mut EntityTables) -> Result<()>) -> Result<()> {
        self.cell.transaction(f, |_| Ok(()))
    }
}
