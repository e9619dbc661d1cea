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
use std::time::Duration;
use thiserror::Error;

/// Per-item transform errors. Caught by the engine, never abort a job.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("Script failed: {0}")]
    Script(String),

    #[error("Unknown script: {0}")]
    UnknownScript(String),

    #[error("Agent invocation failed: {0}")]
    Agent(String),

    #[error("Agent timeout after {0:?}")]
    Timeout(Duration),

    #[error("Agent returned invalid response: {0}")]
    InvalidResponse(String),

    #[error("Not configured: {0}")]
    NotConfigured(String),
}

impl TransformError {
    pub fn script(msg: impl Into<String>) -> Self {
        Self::Script(msg.into())
    }
}

impl From<TransformError> for DatasmithError {
    fn from(e: TransformError) -> Self {
        match e {
            TransformError::UnknownScript(_) | TransformError::NotConfigured(_) => {
                DatasmithError::Validation(e.to_string())
            }
            other => DatasmithError::TransformFailure(other.to_string()),
        }
    }
}
