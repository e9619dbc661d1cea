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

//! Blob storage for file content.
//!
//! Paths are relative, `/`-separated and rooted at a version's storage root
//! (`{tenant}/{dataset_id}/{version_id}/...`). Copies are byte-for-byte, so
//! two versions never share a blob.

use crate::error::StorageError;
use crate::fsutil::{dir_size, write_atomic};
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

type Result<T> = std::result::Result<T, StorageError>;

/// Location and fingerprint of a stored blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobInfo {
    pub path: String,
    /// blake3 hex digest
    pub content_hash: String,
    pub size_bytes: u64,
}

/// blake3 hex digest of `data`
pub fn content_hash(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

/// Reject absolute paths, empty segments and `.`/`..` components
pub fn validate_path(path: &str) -> Result<()> {
    let invalid = path.is_empty()
        || path.contains('\\')
        || path
            .split('/')
            .any(|seg| seg.is_empty() || seg == "." || seg == "..");
    if invalid {
        return Err(StorageError::InvalidPath(path.to_string()));
    }
    Ok(())
}

pub trait BlobStore: Send + Sync {
    /// Prepare an empty storage root
    fn allocate_root(&self, root: &str) -> Result<()>;

    fn write(&self, path: &str, data: &[u8]) -> Result<BlobInfo>;

    fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Duplicate the bytes at `from` into `to`
    fn copy(&self, from: &str, to: &str) -> Result<BlobInfo> {
        let data = self.read(from)?;
        self.write(to, &data)
    }

    /// Remove one blob, returning the bytes freed (0 if absent)
    fn remove(&self, path: &str) -> Result<u64>;

    /// Remove everything below a storage root, returning the bytes freed
    fn remove_root(&self, root: &str) -> Result<u64>;

    fn exists(&self, path: &str) -> bool;
}

/// Blob store on the local filesystem
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        validate_path(path)?;
        Ok(self.root.join(path))
    }
}

impl BlobStore for FsBlobStore {
    fn allocate_root(&self, root: &str) -> Result<()> {
        std::fs::create_dir_all(self.resolve(root)?)?;
        Ok(())
    }

    fn write(&self, path: &str, data: &[u8]) -> Result<BlobInfo> {
        write_atomic(&self.resolve(path)?, data)?;
        Ok(BlobInfo {
            path: path.to_string(),
            content_hash: content_hash(data),
            size_bytes: data.len() as u64,
        })
    }

    fn read(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.resolve(path)?;
        match std::fs::read(&full) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn remove(&self, path: &str) -> Result<u64> {
        let full = self.resolve(path)?;
        match std::fs::metadata(&full) {
            Ok(meta) => {
                std::fs::remove_file(&full)?;
                Ok(meta.len())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn remove_root(&self, root: &str) -> Result<u64> {
        let full = self.resolve(root)?;
        if !full.exists() {
            return Ok(0);
        }
        let freed = dir_size(&full)?;
        std::fs::remove_dir_all(&full)?;
        Ok(freed)
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).map(|p| p.is_file()).unwrap_or(false)
    }
}

/// In-memory blob store for tests
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: DashMap<String, Arc<Vec<u8>>>,
    total_size: AtomicU64,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    pub fn total_size(&self) -> u64 {
        self.total_size.load(Ordering::Relaxed)
    }
}

impl BlobStore for MemoryBlobStore {
    fn allocate_root(&self, root: &str) -> Result<()> {
        validate_path(root)
    }

    fn write(&self, path: &str, data: &[u8]) -> Result<BlobInfo> {
        validate_path(path)?;
        let size = data.len() as u64;
        if let Some(old) = self.blobs.insert(path.to_string(), Arc::new(data.to_vec())) {
            self.total_size.fetch_sub(old.len() as u64, Ordering::Relaxed);
        }
        self.total_size.fetch_add(size, Ordering::Relaxed);
        Ok(BlobInfo {
            path: path.to_string(),
            content_hash: content_hash(data),
            size_bytes: size,
        })
    }

    fn read(&self, path: &str) -> Result<Vec<u8>> {
        validate_path(path)?;
        self.blobs
            .get(path)
            .map(|b| b.as_ref().clone())
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    fn remove(&self, path: &str) -> Result<u64> {
        validate_path(path)?;
        let freed = self
            .blobs
            .remove(path)
            .map(|(_, b)| b.len() as u64)
            .unwrap_or(0);
        self.total_size.fetch_sub(freed, Ordering::Relaxed);
        Ok(freed)
    }

    fn remove_root(&self, root: &str) -> Result<u64> {
        validate_path(root)?;
        let prefix = format!("{}/", root);
        let doomed: Vec<String> = self
            .blobs
            .iter()
            .filter(|e| e.key().starts_with(&prefix))
            .map(|e| e.key().clone())
            .collect();
        let mut freed = 0;
        for key in doomed {
            freed += self.remove(&key)?;
        }
        Ok(freed)
    }

    fn exists(&self, path: &str) -> bool {
        self.blobs.contains_key(path)
    }
}
