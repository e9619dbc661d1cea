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

use crate::file::NewFile;
use crate::version::VersionNumber;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    Document,
    Image,
}

impl DataKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataKind::Document => "document",
            DataKind::Image => "image",
        }
    }
}

/// Where a dataset's items come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    Upload,
    /// Captured from live traffic
    Reflow,
}

/// A versioned collection of training data.
///
/// The live counters track existing branches and tags. The `default_*`
/// counters only ever grow and feed version numbering, so numbers stay unique
/// across deletions. `issued_tags` likewise keeps every tag version ever
/// handed out, deleted tags included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSet {
    pub id: Uuid,
    pub name: String,
    pub owner: String,
    pub tenant: String,
    pub kind: DataKind,
    pub source: DataSource,
    pub description: Option<String>,
    pub branch_count: u64,
    pub tag_count: u64,
    pub default_branch_count: u64,
    pub default_tag_count: u64,
    #[serde(default)]
    pub issued_tags: BTreeSet<VersionNumber>,
    /// `{tenant}/{dataset_id}`
    pub storage_root: String,
    pub original_version_id: Option<Uuid>,
    pub deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DataSet {
    pub fn new(spec: &NewDataSet) -> Self {
        let id = Uuid::new_v4();
        let now = Utc::now();
        Self {
            id,
            name: spec.name.clone(),
            owner: spec.owner.clone(),
            tenant: spec.tenant.clone(),
            kind: spec.kind,
            source: spec.source,
            description: spec.description.clone(),
            branch_count: 0,
            tag_count: 0,
            default_branch_count: 0,
            default_tag_count: 0,
            issued_tags: BTreeSet::new(),
            storage_root: format!("{}/{}", spec.tenant, id),
            original_version_id: None,
            deleted: false,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Storage root for one of this dataset's versions
    pub fn version_root(&self, version_id: Uuid) -> String {
        format!("{}/{}", self.storage_root, version_id)
    }

    /// Take the next branch number and bump both branch counters
    pub fn next_branch_number(&mut self) -> u64 {
        let n = self.default_branch_count;
        self.default_branch_count += 1;
        self.branch_count += 1;
        self.updated_at = Utc::now();
        n
    }

    /// Take the next number from the monotonic tag counter. Used to renumber
    /// a tag whose stripped branch version is already taken.
    pub fn next_tag_number(&mut self) -> u64 {
        let n = self.default_tag_count;
        self.default_tag_count += 1;
        self.updated_at = Utc::now();
        n
    }

    /// Whether `version` was ever issued to a tag of this dataset
    pub fn tag_issued(&self, version: &VersionNumber) -> bool {
        self.issued_tags.contains(version)
    }

    /// Record a new tag. Its version stays reserved after the tag is deleted.
    pub fn tag_added(&mut self, version: VersionNumber) {
        self.issued_tags.insert(version);
        self.tag_count += 1;
        self.updated_at = Utc::now();
    }

    /// Lower the live counter of the removed kind; `default_*` never shrink
    pub fn version_removed(&mut self, is_tag: bool) {
        if is_tag {
            self.tag_count = self.tag_count.saturating_sub(1);
        } else {
            self.branch_count = self.branch_count.saturating_sub(1);
        }
        self.updated_at = Utc::now();
    }

    pub fn soft_delete(&mut self) {
        let now = Utc::now();
        self.deleted = true;
        self.deleted_at = Some(now);
        self.updated_at = now;
    }
}

/// Request to create a dataset together with its original version
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDataSet {
    pub name: String,
    pub owner: String,
    pub tenant: String,
    pub kind: DataKind,
    pub source: DataSource,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub files: Vec<NewFile>,
}

impl NewDataSet {
    pub fn new(
        name: impl Into<String>,
        owner: impl Into<String>,
        tenant: impl Into<String>,
        kind: DataKind,
        source: DataSource,
    ) -> Self {
        Self {
            name: name.into(),
            owner: owner.into(),
            tenant: tenant.into(),
            kind,
            source,
            description: None,
            files: Vec::new(),
        }
    }

    pub fn with_files(mut self, files: Vec<NewFile>) -> Self {
        self.files = files;
        self
    }
}

/// A record captured from live application traffic, waiting to be ingested
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReflowRecord {
    pub id: Uuid,
    pub tenant: String,
    /// Originating application or endpoint
    pub source: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    /// Version that ingested this record, if any
    pub consumed_by: Option<Uuid>,
}

impl ReflowRecord {
    pub fn new(tenant: impl Into<String>, source: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant: tenant.into(),
            source: source.into(),
            payload,
            created_at: Utc::now(),
            consumed_by: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_monotonic() {
        let spec = NewDataSet::new("D", "alice", "acme", DataKind::Document, DataSource::Upload);
        let mut ds = DataSet::new(&spec);
        assert_eq!(ds.next_branch_number(), 0);
        assert_eq!(ds.next_branch_number(), 1);

        // deleting a branch only lowers the live counter
        ds.version_removed(false);
        assert_eq!(ds.next_branch_number(), 2);
        assert_eq!(ds.branch_count, 2);
        assert_eq!(ds.default_branch_count, 3);
    }

    #[test]
    fn test_issued_tags_survive_removal() {
        let spec = NewDataSet::new("D", "alice", "acme", DataKind::Document, DataSource::Upload);
        let mut ds = DataSet::new(&spec);
        ds.tag_added(VersionNumber::tag(0));
        ds.version_removed(true);
        assert_eq!(ds.tag_count, 0);
        assert!(ds.tag_issued(&VersionNumber::tag(0)));
        assert!(!ds.tag_issued(&VersionNumber::tag(1)));
    }

    #[test]
    fn test_snapshot_without_issued_tags_loads() {
        let spec = NewDataSet::new("D", "alice", "acme", DataKind::Document, DataSource::Upload);
        let mut json = serde_json::to_value(DataSet::new(&spec)).unwrap();
        json.as_object_mut().unwrap().remove("issued_tags");
        let ds: DataSet = serde_json::from_value(json).unwrap();
        assert!(ds.issued_tags.is_empty());
    }

    #[test]
    fn test_storage_roots() {
        let spec = NewDataSet::new("D", "alice", "acme", DataKind::Image, DataSource::Upload);
        let ds = DataSet::new(&spec);
        let v = Uuid::new_v4();
        assert_eq!(ds.version_root(v), format!("acme/{}/{}", ds.id, v));
    }
}
