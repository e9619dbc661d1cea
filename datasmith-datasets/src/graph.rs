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

//! Version Graph Manager.
//!
//! Datasets own a DAG of versions linked by `previous_version_id`. Branches
//! are mutable and carry a `-dirty` version; tags are frozen copies. Every
//! branch or publish duplicates file content into the new version's own
//! storage root, so no two versions share a blob.
//!
//! Blob copies happen before the entity transaction and are removed again if
//! the transaction fails. The transaction re-checks that the source version's
//! file list did not change in the meantime and fails with `Conflict` if it did.

use chrono::Utc;
use datasmith_core::{
    DataKind, DataSet, DataSetFile, DataSetVersion, DataSource, DatasmithError, FileEvent, FilePayload,
    FileStatus, NewDataSet, NewFile, NewFileContent, ProcessingKind, ReflowRecord, Result,
    VersionNumber, VersionStatus, VersionType,
};
use datasmith_jobs::VersionReferences;
use datasmith_storage::{content_hash, BlobStore, EntityStore, EntityStoreExt, EntityTables};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Name given to the version created together with a dataset
pub const ORIGINAL_VERSION_NAME: &str = "original";

/// A version together with its dataset and files, read from one snapshot
#[derive(Debug, Clone)]
pub struct VersionView {
    pub dataset: DataSet,
    pub version: DataSetVersion,
    pub files: Vec<DataSetFile>,
}

/// Blobs written ahead of a transaction. Removed on drop unless committed.
struct StagedBlobs<'a> {
    blobs: &'a dyn BlobStore,
    root: Option<String>,
    paths: Vec<String>,
    committed: bool,
}

impl<'a> StagedBlobs<'a> {
    fn new(blobs: &'a dyn BlobStore) -> Self {
        Self {
            blobs,
            root: None,
            paths: Vec::new(),
            committed: false,
        }
    }

    /// Stage a whole root; rollback removes it entirely
    fn with_root(blobs: &'a dyn BlobStore, root: impl Into<String>) -> Self {
        let mut staged = Self::new(blobs);
        staged.root = Some(root.into());
        staged
    }

    fn push(&mut self, path: String) {
        self.paths.push(path);
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for StagedBlobs<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        for path in &self.paths {
            if let Err(e) = self.blobs.remove(path) {
                warn!(path = %path, error = %e, "Failed to roll back staged blob");
            }
        }
        if let Some(root) = &self.root {
            if let Err(e) = self.blobs.remove_root(root) {
                warn!(root = %root, error = %e, "Failed to roll back staged storage root");
            }
        }
    }
}

/// Blob file name for an uploaded file: unique prefix plus a sanitized leaf
pub(crate) fn blob_leaf(name: &str) -> String {
    let leaf = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let clean: String = leaf
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    format!("{}-{}", Uuid::new_v4().simple(), clean)
}

/// Status of a freshly uploaded file: `waiting -> uploading -> done`
fn uploaded_status() -> Result<FileStatus> {
    Ok(FileStatus::Waiting
        .transition(FileEvent::Start(ProcessingKind::Uploading))?
        .transition(FileEvent::Succeed)?)
}

/// Fail with `Conflict` if the version's file list moved since it was read
fn ensure_unchanged(t: &EntityTables, seen: &DataSetVersion) -> Result<()> {
    let current = t.version(seen.id)?;
    if current.file_ids != seen.file_ids {
        return Err(DatasmithError::conflict(format!(
            "version {} changed while it was being copied",
            seen.version
        )));
    }
    Ok(())
}

fn require_branch(version: &DataSetVersion) -> Result<()> {
    if version.is_tag() {
        return Err(DatasmithError::validation(format!(
            "version {} is a tag and cannot be modified",
            version.version
        )));
    }
    Ok(())
}

fn validate_new_dataset(spec: &NewDataSet) -> Result<()> {
    if spec.name.trim().is_empty() {
        return Err(DatasmithError::validation("dataset name must not be empty"));
    }
    if spec.owner.trim().is_empty() {
        return Err(DatasmithError::validation("dataset owner must not be empty"));
    }
    let tenant = spec.tenant.as_str();
    if tenant.is_empty() || tenant.contains(['/', '\\']) || tenant == "." || tenant == ".." {
        return Err(DatasmithError::validation(format!("invalid tenant: {:?}", tenant)));
    }
    Ok(())
}

/// Creates, branches, publishes and deletes dataset versions
pub struct VersionGraph {
    entities: Arc<dyn EntityStore>,
    blobs: Arc<dyn BlobStore>,
    references: Arc<dyn VersionReferences>,
}

impl VersionGraph {
    pub fn new(
        entities: Arc<dyn EntityStore>,
        blobs: Arc<dyn BlobStore>,
        references: Arc<dyn VersionReferences>,
    ) -> Self {
        Self {
            entities,
            blobs,
            references,
        }
    }

    /// Create a dataset and its original branch holding `spec.files`.
    ///
    /// Fails with `Conflict` if the tenant already has a live dataset with the
    /// same name and kind.
    pub fn create_dataset(&self, spec: NewDataSet) -> Result<DataSet> {
        validate_new_dataset(&spec)?;
        if self
            .entities
            .read(|t| t.find_dataset(&spec.tenant, &spec.name, spec.kind).is_some())
        {
            return Err(duplicate_dataset(&spec.tenant, &spec.name, spec.kind));
        }

        let mut dataset = DataSet::new(&spec);
        let number = dataset.next_branch_number();
        let mut original = DataSetVersion::new(
            dataset.id,
            ORIGINAL_VERSION_NAME,
            VersionNumber::branch(number),
            VersionType::Branch,
            None,
            String::new(),
        );
        original.storage_root = dataset.version_root(original.id);
        original.is_original = true;
        dataset.original_version_id = Some(original.id);

        let mut staged = StagedBlobs::with_root(self.blobs.as_ref(), dataset.storage_root.clone());
        self.blobs.allocate_root(&original.storage_root)?;
        let files = spec
            .files
            .into_iter()
            .map(|f| self.store_new_file(&original, f, &mut staged))
            .collect::<Result<Vec<_>>>()?;

        let original_id = original.id;
        let created = self.entities.transact(|t| {
            if t.find_dataset(&dataset.tenant, &dataset.name, dataset.kind).is_some() {
                return Err(duplicate_dataset(&dataset.tenant, &dataset.name, dataset.kind));
            }
            let usage: u64 = files.iter().map(|f| f.size_bytes).sum();
            t.add_usage(&dataset.tenant, usage);
            t.insert_dataset(dataset.clone());
            t.insert_version(original);
            for file in files {
                t.attach_file(file)?;
            }
            t.refresh_version_status(original_id)?;
            Ok(dataset)
        })?;
        staged.commit();

        info!(
            dataset_id = %created.id,
            tenant = %created.tenant,
            name = %created.name,
            "Dataset created"
        );
        Ok(created)
    }

    /// Cut a new branch from any version, duplicating its files
    pub fn branch(&self, version_id: Uuid, name: Option<String>) -> Result<DataSetVersion> {
        let source = self.version_view(version_id)?;
        let mut version = DataSetVersion::new(
            source.dataset.id,
            name.unwrap_or_default(),
            VersionNumber::branch(0),
            VersionType::Branch,
            Some(source.version.id),
            String::new(),
        );
        version.storage_root = source.dataset.version_root(version.id);

        let staged = StagedBlobs::with_root(self.blobs.as_ref(), version.storage_root.clone());
        let copies = self.copy_files(&source.files, &version)?;

        let created = self.entities.transact(|t| {
            ensure_unchanged(t, &source.version)?;
            let dataset = t.dataset_mut(source.dataset.id)?;
            version.version = VersionNumber::branch(dataset.next_branch_number());
            if version.name.is_empty() {
                version.name = version.version.to_string();
            }
            let tenant = dataset.tenant.clone();
            Self::commit_copy(t, &tenant, version, copies)
        })?;
        staged.commit();

        info!(
            dataset_id = %created.dataset_id,
            version_id = %created.id,
            version = %created.version,
            from = %source.version.version,
            "Branch created"
        );
        Ok(created)
    }

    /// Promote a branch to a tag: a frozen copy with the `-dirty` suffix
    /// stripped. If that version string was ever issued to a tag of the
    /// dataset, deleted or not, the tag is renumbered from the monotonic tag
    /// counter.
    pub fn publish(&self, version_id: Uuid, name: Option<String>) -> Result<DataSetVersion> {
        let source = self.version_view(version_id)?;
        if source.version.is_tag() {
            return Err(DatasmithError::validation(format!(
                "version {} is already a tag; only branches can be published",
                source.version.version
            )));
        }
        if source.version.status == VersionStatus::Doing {
            return Err(DatasmithError::conflict(format!(
                "version {} is being processed",
                source.version.version
            )));
        }

        let mut version = DataSetVersion::new(
            source.dataset.id,
            name.unwrap_or_default(),
            source.version.version.stripped(),
            VersionType::Tag,
            Some(source.version.id),
            String::new(),
        );
        version.storage_root = source.dataset.version_root(version.id);

        let staged = StagedBlobs::with_root(self.blobs.as_ref(), version.storage_root.clone());
        let copies = self.copy_files(&source.files, &version)?;

        let created = self.entities.transact(|t| {
            ensure_unchanged(t, &source.version)?;
            let taken: Vec<VersionNumber> = t
                .versions_of_dataset(source.dataset.id)
                .into_iter()
                .filter(|v| v.is_tag())
                .map(|v| v.version)
                .collect();
            let dataset = t.dataset_mut(source.dataset.id)?;
            while taken.contains(&version.version) || dataset.tag_issued(&version.version) {
                version.version = VersionNumber::tag(dataset.next_tag_number());
            }
            dataset.tag_added(version.version);
            if version.name.is_empty() {
                version.name = version.version.to_string();
            }
            let tenant = dataset.tenant.clone();
            Self::commit_copy(t, &tenant, version, copies)
        })?;
        staged.commit();

        info!(
            dataset_id = %created.dataset_id,
            version_id = %created.id,
            version = %created.version,
            from = %source.version.version,
            "Tag published"
        );
        Ok(created)
    }

    /// Delete a version, its files and its storage root.
    ///
    /// Fails with `Conflict` while any job or other holder references it. No
    /// new job can attach to the version between that check and the commit.
    /// When the last version of a dataset goes, the dataset is soft-deleted.
    pub fn delete(&self, version_id: Uuid) -> Result<()> {
        self.references.exclusive(version_id, &mut || {
            let holders = self.references.references(version_id);
            if !holders.is_empty() {
                return Err(DatasmithError::conflict(format!(
                    "version {} is in use by {}",
                    version_id,
                    holders.join(", ")
                )));
            }
            self.remove_version(version_id)
        })
    }

    fn remove_version(&self, version_id: Uuid) -> Result<()> {
        let (version, freed, dataset_deleted) = self.entities.transact(|t| {
            let version = t.version(version_id)?.clone();
            let removed = t.delete_files(&version.file_ids);
            let freed: u64 = removed.iter().map(|f| f.size_bytes).sum();
            t.remove_version(version_id)?;
            let remaining = t.versions_of_dataset(version.dataset_id).len();

            let dataset = t.dataset_mut(version.dataset_id)?;
            dataset.version_removed(version.is_tag());
            if dataset.original_version_id == Some(version_id) {
                dataset.original_version_id = None;
            }
            if remaining == 0 {
                dataset.soft_delete();
            }
            let tenant = dataset.tenant.clone();
            t.release_usage(&tenant, freed);
            Ok((version, freed, remaining == 0))
        })?;

        if let Err(e) = self.blobs.remove_root(&version.storage_root) {
            warn!(version_id = %version_id, error = %e, "Failed to remove version storage");
        }
        info!(
            dataset_id = %version.dataset_id,
            version_id = %version_id,
            version = %version.version,
            freed_bytes = freed,
            "Version deleted"
        );
        if dataset_deleted {
            info!(dataset_id = %version.dataset_id, "Dataset has no versions left, soft-deleted");
        }
        Ok(())
    }

    /// Append files to a branch
    pub fn add_files(&self, version_id: Uuid, files: Vec<NewFile>) -> Result<Vec<DataSetFile>> {
        let view = self.version_view(version_id)?;
        require_branch(&view.version)?;

        let mut staged = StagedBlobs::new(self.blobs.as_ref());
        let files = files
            .into_iter()
            .map(|f| self.store_new_file(&view.version, f, &mut staged))
            .collect::<Result<Vec<_>>>()?;

        let added = self.entities.transact(|t| {
            require_branch(t.version(version_id)?)?;
            let usage: u64 = files.iter().map(|f| f.size_bytes).sum();
            t.add_usage(&view.dataset.tenant, usage);
            for file in &files {
                t.attach_file(file.clone())?;
            }
            t.refresh_version_status(version_id)?;
            Ok(files)
        })?;
        staged.commit();

        info!(version_id = %version_id, count = added.len(), "Files added");
        Ok(added)
    }

    /// Bulk-delete files of a branch by id. Every id must belong to the version.
    pub fn remove_files(&self, version_id: Uuid, file_ids: &[Uuid]) -> Result<Vec<DataSetFile>> {
        let (removed, tenant) = self.entities.transact(|t| {
            let version = t.version(version_id)?;
            require_branch(version)?;
            if let Some(stranger) = file_ids.iter().find(|id| !version.file_ids.contains(*id)) {
                return Err(DatasmithError::not_found("file", stranger));
            }
            let tenant = t.dataset(version.dataset_id)?.tenant.clone();
            let removed = t.delete_files(file_ids);
            t.release_usage(&tenant, removed.iter().map(|f| f.size_bytes).sum());
            t.refresh_version_status(version_id)?;
            Ok((removed, tenant))
        })?;

        for path in removed.iter().filter_map(|f| f.payload.stored_path()) {
            if let Err(e) = self.blobs.remove(path) {
                warn!(path = %path, error = %e, "Failed to remove file content");
            }
        }
        info!(version_id = %version_id, tenant = %tenant, count = removed.len(), "Files removed");
        Ok(removed)
    }

    /// Store a captured traffic record for later ingestion
    pub fn record_reflow(
        &self,
        tenant: &str,
        source: &str,
        payload: serde_json::Value,
    ) -> Result<ReflowRecord> {
        let record = ReflowRecord::new(tenant, source, payload);
        let stored = record.clone();
        self.entities.transact(|t| {
            t.insert_reflow_record(record);
            Ok(())
        })?;
        Ok(stored)
    }

    /// Append reflow records to a branch of a reflow dataset as inline items.
    ///
    /// A record can be ingested once; a second attempt is a `Conflict`.
    pub fn ingest_reflow(&self, version_id: Uuid, record_ids: &[Uuid]) -> Result<Vec<DataSetFile>> {
        let status = uploaded_status()?;
        let files = self.entities.transact(|t| {
            let version = t.version(version_id)?;
            require_branch(version)?;
            let dataset = t.dataset(version.dataset_id)?;
            if dataset.source != DataSource::Reflow {
                return Err(DatasmithError::validation(format!(
                    "dataset {:?} is not a reflow dataset",
                    dataset.name
                )));
            }
            let tenant = dataset.tenant.clone();

            let mut files = Vec::with_capacity(record_ids.len());
            for id in record_ids {
                let record = t.reflow_record_mut(*id)?;
                if record.tenant != tenant {
                    return Err(DatasmithError::not_found("reflow record", id));
                }
                if let Some(consumer) = record.consumed_by {
                    return Err(DatasmithError::conflict(format!(
                        "reflow record {} was already ingested into version {}",
                        id, consumer
                    )));
                }
                record.consumed_by = Some(version_id);

                let bytes = serde_json::to_vec(&record.payload)?;
                let mut file = DataSetFile::new(
                    version_id,
                    format!("reflow-{}.json", id),
                    FilePayload::Inline {
                        item: record.payload.clone(),
                    },
                    content_hash(&bytes),
                    bytes.len() as u64,
                );
                file.status = status;
                files.push(file);
            }

            t.add_usage(&tenant, files.iter().map(|f| f.size_bytes).sum());
            for file in &files {
                t.attach_file(file.clone())?;
            }
            t.refresh_version_status(version_id)?;
            Ok(files)
        })?;

        info!(version_id = %version_id, count = files.len(), "Reflow records ingested");
        Ok(files)
    }

    pub fn get_dataset(&self, dataset_id: Uuid) -> Result<DataSet> {
        self.entities.read(|t| t.dataset(dataset_id).cloned())
    }

    pub fn find_dataset(&self, tenant: &str, name: &str, kind: DataKind) -> Option<DataSet> {
        self.entities.read(|t| t.find_dataset(tenant, name, kind).cloned())
    }

    pub fn list_datasets(&self, tenant: &str) -> Vec<DataSet> {
        self.entities
            .read(|t| t.datasets_of_tenant(tenant).into_iter().cloned().collect())
    }

    pub fn get_version(&self, version_id: Uuid) -> Result<DataSetVersion> {
        self.entities.read(|t| t.version(version_id).cloned())
    }

    /// Versions of a live dataset, oldest first
    pub fn list_versions(&self, dataset_id: Uuid) -> Result<Vec<DataSetVersion>> {
        self.entities.read(|t| {
            t.dataset(dataset_id)?;
            Ok(t.versions_of_dataset(dataset_id).into_iter().cloned().collect())
        })
    }

    /// Files of a version in item order
    pub fn files(&self, version_id: Uuid) -> Result<Vec<DataSetFile>> {
        self.entities
            .read(|t| Ok(t.files_of_version(version_id)?.into_iter().cloned().collect()))
    }

    /// The version followed by its ancestors, up to the first version of the
    /// dataset or the first deleted ancestor.
    pub fn lineage(&self, version_id: Uuid) -> Result<Vec<DataSetVersion>> {
        self.entities.read(|t| {
            let mut chain = vec![t.version(version_id)?.clone()];
            while let Some(parent) = chain.last().and_then(|v| v.previous_version_id) {
                match t.version(parent) {
                    // lineage is acyclic; the length bound guards corrupted data
                    Ok(v) if chain.len() <= t.versions.len() => chain.push(v.clone()),
                    _ => break,
                }
            }
            Ok(chain)
        })
    }

    pub fn version_view(&self, version_id: Uuid) -> Result<VersionView> {
        self.entities.read(|t| {
            let version = t.version(version_id)?.clone();
            let dataset = t.dataset(version.dataset_id)?.clone();
            let files = t.files_of_version(version_id)?.into_iter().cloned().collect();
            Ok(VersionView {
                dataset,
                version,
                files,
            })
        })
    }

    /// Bytes currently stored for a tenant
    pub fn tenant_usage(&self, tenant: &str) -> u64 {
        self.entities.read(|t| t.usage(tenant))
    }

    /// Raw content of a stored file
    pub fn read_file(&self, file: &DataSetFile) -> Result<Vec<u8>> {
        match &file.payload {
            FilePayload::Stored { path } => Ok(self.blobs.read(path)?),
            FilePayload::Inline { item } => Ok(serde_json::to_vec(item)?),
        }
    }

    fn store_new_file(
        &self,
        version: &DataSetVersion,
        file: NewFile,
        staged: &mut StagedBlobs<'_>,
    ) -> Result<DataSetFile> {
        if file.name.trim().is_empty() {
            return Err(DatasmithError::validation("file name must not be empty"));
        }
        let (payload, hash, size) = match file.content {
            NewFileContent::Bytes { data } => {
                let path = format!("{}/{}", version.storage_root, blob_leaf(&file.name));
                let info = self.blobs.write(&path, &data)?;
                staged.push(path.clone());
                (FilePayload::Stored { path }, info.content_hash, info.size_bytes)
            }
            NewFileContent::Inline { item } => {
                let bytes = serde_json::to_vec(&item)?;
                (FilePayload::Inline { item }, content_hash(&bytes), bytes.len() as u64)
            }
        };
        let mut stored = DataSetFile::new(version.id, file.name, payload, hash, size);
        stored.status = uploaded_status()?;
        Ok(stored)
    }

    /// Duplicate files into `target`'s storage root. Files caught mid-processing
    /// start over as `waiting` in the copy.
    fn copy_files(&self, files: &[DataSetFile], target: &DataSetVersion) -> Result<Vec<DataSetFile>> {
        self.blobs.allocate_root(&target.storage_root)?;
        files
            .iter()
            .map(|file| {
                let payload = match &file.payload {
                    FilePayload::Stored { path } => {
                        let leaf = path.rsplit('/').next().unwrap_or(path);
                        let to = format!("{}/{}", target.storage_root, leaf);
                        let info = self.blobs.copy(path, &to)?;
                        if info.content_hash != file.content_hash {
                            return Err(DatasmithError::Storage(format!(
                                "content of {} does not match its recorded hash",
                                path
                            )));
                        }
                        FilePayload::Stored { path: to }
                    }
                    FilePayload::Inline { item } => FilePayload::Inline { item: item.clone() },
                };
                let mut copy = file.duplicate_into(target.id, payload);
                if copy.status.is_active() {
                    copy.status = FileStatus::Waiting;
                }
                Ok(copy)
            })
            .collect()
    }

    fn commit_copy(
        t: &mut EntityTables,
        tenant: &str,
        mut version: DataSetVersion,
        copies: Vec<DataSetFile>,
    ) -> Result<DataSetVersion> {
        version.file_ids.clear();
        version.updated_at = Utc::now();
        let version_id = version.id;
        t.insert_version(version);
        t.add_usage(tenant, copies.iter().map(|f| f.size_bytes).sum());
        for copy in copies {
            t.attach_file(copy)?;
        }
        t.refresh_version_status(version_id)?;
        Ok(t.version(version_id)?.clone())
    }
}

fn duplicate_dataset(tenant: &str, name: &str, kind: DataKind) -> DatasmithError {
    DatasmithError::conflict(format!(
        "dataset {:?} ({}) already exists for tenant {}",
        name,
        kind.as_str(),
        tenant
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use datasmith_jobs::ReferenceRegistry;
    use datasmith_storage::{MemoryBlobStore, MemoryEntityStore};

    fn graph() -> (VersionGraph, Arc<MemoryBlobStore>, Arc<ReferenceRegistry>) {
        let blobs = Arc::new(MemoryBlobStore::new());
        let holders = Arc::new(ReferenceRegistry::new());
        let graph = VersionGraph::new(Arc::new(MemoryEntityStore::new()), blobs.clone(), holders.clone());
        (graph, blobs, holders)
    }

    fn upload(name: &str) -> NewDataSet {
        NewDataSet::new(name, "alice", "acme", DataKind::Document, DataSource::Upload)
    }

    #[test]
    fn test_blob_leaf_is_a_single_safe_segment() {
        let leaf = blob_leaf("../etc/pass wd.jsonl");
        assert!(leaf.ends_with("-pass_wd.jsonl"));
        assert!(!leaf.contains('/'));
        assert_ne!(blob_leaf("a.txt"), blob_leaf("a.txt"));
    }

    #[test]
    fn test_original_version() {
        let (graph, _, _) = graph();
        let ds = graph
            .create_dataset(upload("D").with_files(vec![NewFile::bytes("a.txt", "x\ny\n")]))
            .unwrap();
        let original = graph.get_version(ds.original_version_id.unwrap()).unwrap();
        assert!(original.is_original && original.is_branch());
        assert_eq!(original.version.to_string(), "v1.0.0-dirty");
        assert_eq!(original.name, ORIGINAL_VERSION_NAME);
        assert_eq!(graph.files(original.id).unwrap()[0].status, FileStatus::Done);
        assert_eq!(graph.tenant_usage("acme"), 4);
    }

    #[test]
    fn test_invalid_tenant_rejected() {
        let (graph, _, _) = graph();
        let spec = NewDataSet::new("D", "alice", "../x", DataKind::Document, DataSource::Upload);
        assert!(matches!(graph.create_dataset(spec), Err(DatasmithError::Validation(_))));
    }

    #[test]
    fn test_failed_create_leaves_no_blobs() {
        let (graph, blobs, _) = graph();
        graph.create_dataset(upload("D")).unwrap();
        let err = graph
            .create_dataset(upload("D").with_files(vec![NewFile::bytes("a.txt", "x")]))
            .unwrap_err();
        assert!(err.is_conflict());
        assert!(blobs.is_empty());
    }

    #[test]
    fn test_tags_reject_file_changes() {
        let (graph, _, _) = graph();
        let ds = graph
            .create_dataset(upload("D").with_files(vec![NewFile::bytes("a.txt", "x")]))
            .unwrap();
        let tag = graph.publish(ds.original_version_id.unwrap(), None).unwrap();
        assert_eq!(tag.version.to_string(), "v1.0.0");

        let add = graph.add_files(tag.id, vec![NewFile::bytes("b.txt", "y")]);
        assert!(matches!(add, Err(DatasmithError::Validation(_))));
        let remove = graph.remove_files(tag.id, &tag.file_ids);
        assert!(matches!(remove, Err(DatasmithError::Validation(_))));
        assert!(matches!(graph.publish(tag.id, None), Err(DatasmithError::Validation(_))));
    }

    #[test]
    fn test_held_version_cannot_be_deleted() {
        let (graph, _, holders) = graph();
        let ds = graph.create_dataset(upload("D")).unwrap();
        let vid = ds.original_version_id.unwrap();

        holders.hold(vid, "finetune-42");
        let err = graph.delete(vid).unwrap_err();
        assert!(err.is_conflict());
        assert!(err.to_string().contains("finetune-42"));

        holders.release(vid, "finetune-42");
        graph.delete(vid).unwrap();
        // last version gone: the dataset is soft-deleted
        assert!(graph.get_dataset(ds.id).unwrap_err().is_not_found());
        assert!(graph.create_dataset(upload("D")).is_ok());
    }

    #[test]
    fn test_remove_files_releases_usage() {
        let (graph, blobs, _) = graph();
        let ds = graph
            .create_dataset(upload("D").with_files(vec![
                NewFile::bytes("a.txt", "aaaa"),
                NewFile::bytes("b.txt", "bb"),
            ]))
            .unwrap();
        let vid = ds.original_version_id.unwrap();
        let files = graph.files(vid).unwrap();

        let removed = graph.remove_files(vid, &[files[0].id]).unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(graph.tenant_usage("acme"), 2);
        assert_eq!(blobs.len(), 1);
        assert_eq!(graph.files(vid).unwrap()[0].name, "b.txt");

        let stranger = Uuid::new_v4();
        assert!(graph.remove_files(vid, &[stranger]).unwrap_err().is_not_found());
    }

    #[test]
    fn test_reflow_ingest_once() {
        let (graph, _, _) = graph();
        let ds = graph
            .create_dataset(NewDataSet::new("R", "bob", "acme", DataKind::Document, DataSource::Reflow))
            .unwrap();
        let vid = ds.original_version_id.unwrap();
        let record = graph
            .record_reflow("acme", "chat-app", serde_json::json!({"q": "hi", "a": "hello"}))
            .unwrap();

        let files = graph.ingest_reflow(vid, &[record.id]).unwrap();
        assert_eq!(files.len(), 1);
        assert!(matches!(files[0].payload, FilePayload::Inline { .. }));
        assert!(graph.ingest_reflow(vid, &[record.id]).unwrap_err().is_conflict());

        // uploads cannot take reflow records
        let up = graph.create_dataset(upload("U")).unwrap();
        let other = graph.record_reflow("acme", "chat-app", serde_json::json!({})).unwrap();
        let err = graph.ingest_reflow(up.original_version_id.unwrap(), &[other.id]);
        assert!(matches!(err, Err(DatasmithError::Validation(_))));
    }

    #[test]
    fn test_lineage() {
        let (graph, _, _) = graph();
        let ds = graph.create_dataset(upload("D")).unwrap();
        let root = ds.original_version_id.unwrap();
        let b1 = graph.branch(root, None).unwrap();
        let b2 = graph.branch(b1.id, Some("experiment".into())).unwrap();

        let chain: Vec<Uuid> = graph.lineage(b2.id).unwrap().iter().map(|v| v.id).collect();
        assert_eq!(chain, vec![b2.id, b1.id, root]);
        assert_eq!(b2.name, "experiment");
        assert_eq!(b1.name, "v1.0.1-dirty");
    }
}
