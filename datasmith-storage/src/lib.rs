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

//! Datasmith Storage
//!
//! Persistence adapters behind the core's collaborator contracts:
//!
//! - [`EntityStore`]: transactional store for datasets, versions, files and
//!   reflow records ([`MemoryEntityStore`], [`FileEntityStore`])
//! - [`BlobStore`]: file content ([`FsBlobStore`], [`MemoryBlobStore`])
//! - [`ProgressStore`]: expiring key-value mirror of task progress
//!   ([`MokaProgressStore`], [`FsProgressStore`])

pub mod blob;
pub mod entity;
pub mod error;
pub mod file_store;
mod fsutil;
pub mod progress;

pub use blob::{content_hash, validate_path, BlobInfo, BlobStore, FsBlobStore, MemoryBlobStore};
pub use entity::{EntityStore, EntityStoreExt, EntityTables, MemoryEntityStore};
pub use error::StorageError;
pub use file_store::FileEntityStore;
pub use progress::{FsProgressStore, MokaProgressStore, ProgressStore};
