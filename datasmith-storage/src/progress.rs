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

//! Durable progress store: a small key-value store with per-entry expiry,
//! used only to make task progress visible across processes.

use crate::error::StorageError;
use crate::fsutil::write_atomic;
use chrono::Utc;
use moka::sync::Cache;
use moka::Expiry;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

type Result<T> = std::result::Result<T, StorageError>;

pub trait ProgressStore: Send + Sync {
    /// Store a JSON snapshot under `key`, expiring after `ttl`
    fn set(&self, key: &str, json: &str, ttl: Duration) -> Result<()>;

    fn get(&self, key: &str) -> Result<Option<String>>;

    fn delete(&self, key: &str) -> Result<()>;

    /// Live keys starting with `prefix`
    fn keys(&self, prefix: &str) -> Result<Vec<String>>;
}

#[derive(Clone)]
struct Entry {
    json: String,
    ttl: Duration,
}

struct PerEntryTtl;

impl Expiry<String, Entry> for PerEntryTtl {
    fn expire_after_create(&self, _key: &String, value: &Entry, _created_at: Instant) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Entry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-process progress store backed by a moka cache
pub struct MokaProgressStore {
    cache: Cache<String, Entry>,
}

impl MokaProgressStore {
    pub fn new(max_entries: u64) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(max_entries)
                .expire_after(PerEntryTtl)
                .build(),
        }
    }
}

impl Default for MokaProgressStore {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl ProgressStore for MokaProgressStore {
    fn set(&self, key: &str, json: &str, ttl: Duration) -> Result<()> {
        self.cache.insert(
            key.to_string(),
            Entry {
                json: json.to_string(),
                ttl,
            },
        );
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.cache.get(key).map(|e| e.json))
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.cache.invalidate(key);
        Ok(())
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .cache
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.as_ref().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    key: String,
    expires_at_ms: i64,
    value: String,
}

/// Progress store on the local filesystem, one file per key.
///
/// Shared by every process pointed at the same data directory.
pub struct FsProgressStore {
    dir: PathBuf,
}

impl FsProgressStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn file_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", name))
    }

    fn read_envelope(path: &Path) -> Result<Option<Envelope>> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let envelope: Envelope = serde_json::from_slice(&bytes)?;
        if envelope.expires_at_ms <= Utc::now().timestamp_millis() {
            let _ = std::fs::remove_file(path);
            return Ok(None);
        }
        Ok(Some(envelope))
    }
}

impl ProgressStore for FsProgressStore {
    fn set(&self, key: &str, json: &str, ttl: Duration) -> Result<()> {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let envelope = Envelope {
            key: key.to_string(),
            expires_at_ms: Utc::now().timestamp_millis().saturating_add(ttl_ms),
            value: json.to_string(),
        };
        write_atomic(&self.file_for(key), &serde_json::to_vec(&envelope)?)?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(Self::read_envelope(&self.file_for(key))?
            .filter(|e| e.key == key)
            .map(|e| e.value))
    }

    fn delete(&self, key: &str) -> Result<()> {
        match std::fs::remove_file(self.file_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read_envelope(&path) {
                Ok(Some(envelope)) if envelope.key.starts_with(prefix) => keys.push(envelope.key),
                Ok(_) => {}
                Err(e) => tracing::warn!("Skipping unreadable progress entry {:?}: {}", path, e),
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(store: &dyn ProgressStore) {
        let ttl = Duration::from_secs(60);
        store.set("datasmith:task:1", r#"{"n":1}"#, ttl).unwrap();
        store.set("datasmith:task:2", r#"{"n":2}"#, ttl).unwrap();
        store.set("other:3", "{}", ttl).unwrap();

        assert_eq!(store.get("datasmith:task:1").unwrap().as_deref(), Some(r#"{"n":1}"#));
        assert_eq!(
            store.keys("datasmith:task:").unwrap(),
            vec!["datasmith:task:1".to_string(), "datasmith:task:2".to_string()]
        );

        // overwrite carries the full new snapshot
        store.set("datasmith:task:1", r#"{"n":10}"#, ttl).unwrap();
        assert_eq!(store.get("datasmith:task:1").unwrap().as_deref(), Some(r#"{"n":10}"#));

        store.delete("datasmith:task:1").unwrap();
        store.delete("datasmith:task:1").unwrap();
        assert_eq!(store.get("datasmith:task:1").unwrap(), None);
    }

    #[test]
    fn test_moka_progress_store() {
        exercise(&MokaProgressStore::default());
    }

    #[test]
    fn test_fs_progress_store() {
        let dir = tempfile::tempdir().unwrap();
        exercise(&FsProgressStore::open(dir.path()).unwrap());
    }

    #[test]
    fn test_entries_expire() {
        let dir = tempfile::tempdir().unwrap();
        let fs = FsProgressStore::open(dir.path()).unwrap();
        let moka = MokaProgressStore::default();
        for store in [&fs as &dyn ProgressStore, &moka] {
            store.set("k", "{}", Duration::from_millis(30)).unwrap();
            assert!(store.get("k").unwrap().is_some());
        }
        std::thread::sleep(Duration::from_millis(120));
        for store in [&fs as &dyn ProgressStore, &moka] {
            assert_eq!(store.get("k").unwrap(), None);
        }
    }

    #[test]
    fn test_fs_store_visible_to_second_handle() {
        let dir = tempfile::tempdir().unwrap();
        let writer = FsProgressStore::open(dir.path()).unwrap();
        let reader = FsProgressStore::open(dir.path()).unwrap();
        writer.set("datasmith:task:x", "{\"ok\":true}", Duration::from_secs(5)).unwrap();
        assert!(reader.get("datasmith:task:x").unwrap().is_some());
    }
}
