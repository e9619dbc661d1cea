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

use datasmith_core::DatasmithError;
use thiserror::Error;

/// Storage-layer errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Blob not found: {0}")]
    NotFound(String),

    /// Absolute path, `..` component or empty segment
    #[error("Invalid storage path: {0}")]
    InvalidPath(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Corrupted snapshot: {0}")]
    Corrupted(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

impl From<StorageError> for DatasmithError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(path) => DatasmithError::not_found("blob", path),
            StorageError::Io(io) => DatasmithError::Io(io),
            other => DatasmithError::Storage(other.to_string()),
        }
    }
}
