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

//! File-backed entity store.
//!
//! Same snapshot-swap semantics as the in-memory store; every commit also
//! rewrites the snapshot file atomically, so each commit writes the
//! whole store to disk. On-disk layout:
//!
//! ```text
//! [crc32: u32 LE][tables: JSON]
//! ```

use crate::entity::{EntityStore, EntityTables, SnapshotCell};
use crate::error::StorageError;
use crate::fsutil::write_atomic;
use datasmith_core::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const SNAPSHOT_FILE: &str = "entities.json";

pub struct FileEntityStore {
    path: PathBuf,
    cell: SnapshotCell,
}

impl FileEntityStore {
    /// Open (or create) the store under `data_dir`
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        std::fs::create_dir_all(data_dir)?;
        let path = data_dir.join(SNAPSHOT_FILE);

        let tables = if path.exists() {
            let tables = Self::load(&path)?;
            tracing::info!(
                "Loaded entity snapshot from {:?}: {} datasets, {} versions, {} files",
                path,
                tables.datasets.len(),
                tables.versions.len(),
                tables.files.len()
            );
            tables
        } else {
            EntityTables::default()
        };

        Ok(Self {
            path,
            cell: SnapshotCell::new(tables),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(path: &Path) -> std::result::Result<EntityTables, StorageError> {
        let bytes = std::fs::read(path)?;
        if bytes.len() < 4 {
            return Err(StorageError::Corrupted(format!("{:?}: truncated header", path)));
        }
        let (crc_bytes, data) = bytes.split_at(4);
        let stored_crc = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        let computed_crc = crc32fast::hash(data);
        if stored_crc != computed_crc {
            return Err(StorageError::Corrupted(format!(
                "{:?}: checksum mismatch (stored {:08x}, computed {:08x})",
                path, stored_crc, computed_crc
            )));
        }
        Ok(serde_json::from_slice(data)?)
    }

    fn persist(path: &Path, tables: &EntityTables) -> std::result::Result<(), StorageError> {
        let data = serde_json::to_vec(tables)?;
        let crc = crc32fast::hash(&data);
        let mut out = Vec::with_capacity(data.len() + 4);
        out.extend_from_slice(&crc.to_le_bytes());
        out.extend_from_slice(&data);
        write_atomic(path, &out)?;
        Ok(())
    }
}

impl EntityStore for FileEntityStore {
    fn snapshot(&self) -> Arc<EntityTables> {
        self.cell.snapshot()
    }

    fn transaction(
        &self,
        f: &mut dyn FnMut(&mut EntityTables) -> Result<()>,
    ) -> Result<()> {
        let path = &self.path;
        self.cell
            .transaction(f, |tables| Self::persist(path, tables).map_err(Into::into))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityStoreExt;
    use datasmith_core::{DataKind, DataSet, DataSource, DatasmithError, NewDataSet};

    fn dataset(name: &str) -> DataSet {
        DataSet::new(&NewDataSet::new(
            name,
            "alice",
            "acme",
            DataKind::Document,
            DataSource::Upload,
        ))
    }

    #[test]
    fn test_reopen_sees_committed_state() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let store = FileEntityStore::open(dir.path()).unwrap();
            store
                .transact(|t| {
                    let ds = dataset("D");
                    let id = ds.id;
                    t.insert_dataset(ds);
                    t.add_usage("acme", 42);
                    Ok(id)
                })
                .unwrap()
        };

        let store = FileEntityStore::open(dir.path()).unwrap();
        let snap = store.snapshot();
        assert_eq!(snap.dataset(id).unwrap().name, "D");
        assert_eq!(snap.usage("acme"), 42);
    }

    #[test]
    fn test_failed_transaction_not_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileEntityStore::open(dir.path()).unwrap();
        let _ = store.transact(|t| -> Result<()> {
            t.insert_dataset(dataset("D"));
            Err(DatasmithError::conflict("nope"))
        });
        drop(store);

        let store = FileEntityStore::open(dir.path()).unwrap();
        assert!(store.snapshot().datasets.is_empty());
    }

    #[test]
    fn test_corrupted_snapshot_rejected() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileEntityStore::open(dir.path()).unwrap();
            store
                .transact(|t| {
                    t.insert_dataset(dataset("D"));
                    Ok(())
                })
                .unwrap();
        }
        let path = dir.path().join(SNAPSHOT_FILE);
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        std::fs::write(&path, bytes).unwrap();

        match FileEntityStore::open(dir.path()) {
            Err(DatasmithError::Storage(msg)) => assert!(msg.contains("checksum")),
            other => panic!("expected corruption error, got {:?}", other.map(|_| ())),
        }
    }
}
