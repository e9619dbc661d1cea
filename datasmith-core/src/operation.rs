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

use crate::status::ProcessingKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Bulk operation applied to every item of a version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Clean,
    Augment,
    Denoise,
    Annotate,
    AgentProcess,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Clean => "clean",
            Operation::Augment => "augment",
            Operation::Denoise => "denoise",
            Operation::Annotate => "annotate",
            Operation::AgentProcess => "agent_process",
        }
    }

    /// File status a file carries while this operation runs over it
    pub fn processing_kind(&self) -> ProcessingKind {
        match self {
            Operation::Clean => ProcessingKind::Cleaning,
            Operation::Augment => ProcessingKind::Enhancing,
            Operation::Denoise => ProcessingKind::Denoising,
            Operation::Annotate => ProcessingKind::Annotating,
            Operation::AgentProcess => ProcessingKind::AgentProcessing,
        }
    }

    /// Augmentation must never shrink the item set: an empty result keeps the original
    pub fn preserves_items(&self) -> bool {
        matches!(self, Operation::Augment)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "clean" => Ok(Operation::Clean),
            "augment" => Ok(Operation::Augment),
            "denoise" => Ok(Operation::Denoise),
            "annotate" => Ok(Operation::Annotate),
            "agent_process" | "agent" => Ok(Operation::AgentProcess),
            other => Err(format!("unknown operation: {}", other)),
        }
    }
}
