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

//! Integration tests for the storage adapters

use datasmith_core::{
    DataKind, DataSet, DataSetFile, DataSetVersion, DataSource, FilePayload, NewDataSet,
    VersionNumber, VersionType,
};
use datasmith_storage::{
    BlobStore, EntityStore, EntityStoreExt, FileEntityStore, FsBlobStore, MemoryEntityStore,
};
use std::sync::Arc;
use std::thread;
use uuid::Uuid;

fn seed_version(store: &dyn EntityStore) -> Uuid {
    store
        .transact(|t| {
            let ds = DataSet::new(&NewDataSet::new(
                "concurrent",
                "bob",
                "acme",
                DataKind::Document,
                DataSource::Reflow,
            ));
            let v = DataSetVersion::new(
                ds.id,
                "main",
                VersionNumber::branch(0),
                VersionType::Branch,
                None,
                "acme/x/y",
            );
            let id = v.id;
            t.insert_dataset(ds);
            t.insert_version(v);
            Ok(id)
        })
        .unwrap()
}

fn hammer(store: Arc<dyn EntityStore>, version_id: Uuid, threads: usize, per_thread: usize) {
    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let store = store.clone();
            thread::spawn(move || {
                for i in 0..per_thread {
                    store
                        .transact(|tables| {
                            tables.attach_file(DataSetFile::new(
                                version_id,
                                format!("{}-{}.json", t, i),
                                FilePayload::Inline {
                                    item: serde_json::json!({ "t": t, "i": i }),
                                },
                                "h",
                                1,
                            ))?;
                            tables.add_usage("acme", 1);
                            Ok(())
                        })
                        .unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
}

/// Concurrent writers never lose a commit
#[test]
fn test_concurrent_transactions_all_commit() {
    let store: Arc<dyn EntityStore> = Arc::new(MemoryEntityStore::new());
    let version_id = seed_version(store.as_ref());

    hammer(store.clone(), version_id, 8, 25);

    let snap = store.snapshot();
    assert_eq!(snap.files.len(), 200);
    assert_eq!(snap.version(version_id).unwrap().file_ids.len(), 200);
    assert_eq!(snap.usage("acme"), 200);
}

/// Readers holding a snapshot see a consistent file list while writers commit
#[test]
fn test_snapshot_reads_are_consistent() {
    let store: Arc<dyn EntityStore> = Arc::new(MemoryEntityStore::new());
    let version_id = seed_version(store.as_ref());

    let writer = {
        let store = store.clone();
        thread::spawn(move || hammer(store, version_id, 2, 50))
    };

    for _ in 0..200 {
        let snap = store.snapshot();
        let version = snap.version(version_id).unwrap();
        // every listed id resolves within the same snapshot
        assert_eq!(snap.files_of_version(version_id).unwrap().len(), version.file_ids.len());
    }
    writer.join().unwrap();
}

/// File-backed store survives reopen after concurrent commits
#[test]
fn test_file_store_durable_after_concurrent_writes() {
    let dir = tempfile::tempdir().unwrap();
    let version_id = {
        let store: Arc<dyn EntityStore> = Arc::new(FileEntityStore::open(dir.path()).unwrap());
        let version_id = seed_version(store.as_ref());
        hammer(store, version_id, 4, 10);
        version_id
    };

    let reopened = FileEntityStore::open(dir.path()).unwrap();
    let snap = reopened.snapshot();
    assert_eq!(snap.files_of_version(version_id).unwrap().len(), 40);
}

/// Blob copies under distinct roots share no storage
#[test]
fn test_blob_roots_are_independent() {
    let dir = tempfile::tempdir().unwrap();
    let blobs = FsBlobStore::open(dir.path()).unwrap();

    blobs.write("acme/d/v1/a.txt", b"hello\nworld\n").unwrap();
    blobs.copy("acme/d/v1/a.txt", "acme/d/v2/a.txt").unwrap();

    let freed = blobs.remove_root("acme/d/v1").unwrap();
    assert_eq!(freed, 12);
    assert_eq!(blobs.read("acme/d/v2/a.txt").unwrap(), b"hello\nworld\n");
}
