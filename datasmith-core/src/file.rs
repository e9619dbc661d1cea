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

//! Dataset files (items) and their payloads.

use crate::status::FileStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where a file's content lives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FilePayload {
    /// Bytes in blob storage, path relative to the blob root
    Stored { path: String },
    /// Structured item stored inline (reflow records)
    Inline { item: serde_json::Value },
}

impl FilePayload {
    pub fn stored_path(&self) -> Option<&str> {
        match self {
            FilePayload::Stored { path } => Some(path),
            FilePayload::Inline { .. } => None,
        }
    }
}

/// One file of a version. Belongs to exactly one version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSetFile {
    pub id: Uuid,
    pub version_id: Uuid,
    pub name: String,
    pub payload: FilePayload,
    /// blake3 hex digest of the content
    pub content_hash: String,
    pub size_bytes: u64,
    pub status: FileStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DataSetFile {
    pub fn new(
        version_id: Uuid,
        name: impl Into<String>,
        payload: FilePayload,
        content_hash: impl Into<String>,
        size_bytes: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            version_id,
            name: name.into(),
            payload,
            content_hash: content_hash.into(),
            size_bytes,
            status: FileStatus::Done,
            created_at: now,
            updated_at: now,
        }
    }

    /// Copy of this file for another version: new id, same content metadata.
    /// The caller supplies the payload that points at the duplicated content.
    pub fn duplicate_into(&self, version_id: Uuid, payload: FilePayload) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            version_id,
            name: self.name.clone(),
            payload,
            content_hash: self.content_hash.clone(),
            size_bytes: self.size_bytes,
            status: self.status,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn format(&self) -> Option<ItemFormat> {
        ItemFormat::from_name(&self.name)
    }
}

/// Content of a file being added to a version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NewFileContent {
    Bytes { data: Vec<u8> },
    Inline { item: serde_json::Value },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFile {
    pub name: String,
    pub content: NewFileContent,
}

impl NewFile {
    pub fn bytes(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            content: NewFileContent::Bytes { data: data.into() },
        }
    }

    pub fn inline(name: impl Into<String>, item: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            content: NewFileContent::Inline { item },
        }
    }
}

/// On-disk item encoding, picked by file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemFormat {
    /// One JSON value per line
    Jsonl,
    /// A JSON array, or a single value
    Json,
    /// One string item per non-empty line
    Text,
}

impl ItemFormat {
    pub fn from_name(name: &str) -> Option<Self> {
        let ext = name.rsplit_once('.')?.1.to_ascii_lowercase();
        match ext.as_str() {
            "jsonl" => Some(ItemFormat::Jsonl),
            "json" => Some(ItemFormat::Json),
            "txt" => Some(ItemFormat::Text),
            _ => None,
        }
    }

    /// Data-format half of a `<format>_<method>` script name
    pub fn script_prefix(&self) -> &'static str {
        match self {
            ItemFormat::Jsonl | ItemFormat::Json => "json",
            ItemFormat::Text => "text",
        }
    }
}
