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

//! Error taxonomy shared by every Datasmith crate.

use thiserror::Error;

/// Result type for Datasmith operations
pub type Result<T> = std::result::Result<T, DatasmithError>;

/// Errors surfaced to callers of the version graph, status tracker and job manager
#[derive(Debug, Error)]
pub enum DatasmithError {
    /// Duplicate name, or the target is held by another subsystem
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Malformed input shape or unsupported data format
    #[error("Validation error: {0}")]
    Validation(String),

    /// A single item failed to transform. Never aborts a job.
    #[error("Transform failure: {0}")]
    TransformFailure(String),

    /// The job driver itself failed. Aborts the job.
    #[error("Job failure: {0}")]
    JobFailure(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl DatasmithError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<serde_json::Error> for DatasmithError {
    fn from(e: serde_json::Error) -> Self {
        DatasmithError::Serialization(e.to_string())
    }
}

impl From<crate::status::InvalidTransition> for DatasmithError {
    fn from(e: crate::status::InvalidTransition) -> Self {
        DatasmithError::InvalidTransition(e.to_string())
    }
}

impl From<crate::task::InvalidTaskTransition> for DatasmithError {
    fn from(e: crate::task::InvalidTaskTransition) -> Self {
        DatasmithError::InvalidTransition(e.to_string())
    }
}

impl From<toml::de::Error> for DatasmithError {
    fn from(e: toml::de::Error) -> Self {
        DatasmithError::Validation(format!("Invalid configuration: {}", e))
    }
}
