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

//! File and version status state machines.
//!
//! File status moves `waiting -> {kind}... -> done | {kind}_failed`. Version
//! status is never set directly: it is an aggregation over the current file set.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Kind of work a file is undergoing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingKind {
    Uploading,
    Parsing,
    Cleaning,
    Enhancing,
    Denoising,
    Annotating,
    AgentProcessing,
}

impl ProcessingKind {
    pub const ALL: [ProcessingKind; 7] = [
        ProcessingKind::Uploading,
        ProcessingKind::Parsing,
        ProcessingKind::Cleaning,
        ProcessingKind::Enhancing,
        ProcessingKind::Denoising,
        ProcessingKind::Annotating,
        ProcessingKind::AgentProcessing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingKind::Uploading => "uploading",
            ProcessingKind::Parsing => "parsing",
            ProcessingKind::Cleaning => "cleaning",
            ProcessingKind::Enhancing => "enhancing",
            ProcessingKind::Denoising => "denoising",
            ProcessingKind::Annotating => "annotating",
            ProcessingKind::AgentProcessing => "agent_processing",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

/// Per-file processing status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum FileStatus {
    Waiting,
    Processing(ProcessingKind),
    Failed(ProcessingKind),
    Done,
}

impl FileStatus {
    pub fn is_active(self) -> bool {
        matches!(self, FileStatus::Processing(_))
    }

    pub fn is_failed(self) -> bool {
        matches!(self, FileStatus::Failed(_))
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, FileStatus::Done | FileStatus::Failed(_))
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileStatus::Waiting => f.write_str("waiting"),
            FileStatus::Processing(kind) => f.write_str(kind.as_str()),
            FileStatus::Failed(kind) => write!(f, "{}_failed", kind.as_str()),
            FileStatus::Done => f.write_str("done"),
        }
    }
}

impl FromStr for FileStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(FileStatus::Waiting),
            "done" => Ok(FileStatus::Done),
            other => {
                if let Some(kind) = other.strip_suffix("_failed").and_then(ProcessingKind::parse) {
                    return Ok(FileStatus::Failed(kind));
                }
                ProcessingKind::parse(other)
                    .map(FileStatus::Processing)
                    .ok_or_else(|| format!("unknown file status: {}", other))
            }
        }
    }
}

impl From<FileStatus> for String {
    fn from(status: FileStatus) -> Self {
        status.to_string()
    }
}

impl TryFrom<String> for FileStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEvent {
    /// Enter (or advance to) a processing stage
    Start(ProcessingKind),
    Succeed,
    Fail,
    /// Explicit re-run; the only way out of a terminal state
    Rerun,
}

#[derive(Debug, Error)]
#[error("Invalid transition: {current} -> {event:?}")]
pub struct InvalidTransition {
    pub current: FileStatus,
    pub event: FileEvent,
}

impl FileStatus {
    pub fn transition(self, event: FileEvent) -> Result<FileStatus, InvalidTransition> {
        use FileEvent::*;
        use FileStatus::*;

        let next = match (self, event) {
            (Waiting, Start(kind)) => Processing(kind),
            (Processing(_), Start(kind)) => Processing(kind),
            (Processing(_), Succeed) => Done,
            (Processing(kind), Fail) => Failed(kind),
            (Done, Rerun) | (Failed(_), Rerun) => Waiting,
            _ => {
                return Err(InvalidTransition {
                    current: self,
                    event,
                })
            }
        };

        Ok(next)
    }
}

/// Version status, derived from file statuses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VersionStatus {
    Doing,
    #[default]
    Done,
    Fail,
}

impl VersionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VersionStatus::Doing => "doing",
            VersionStatus::Done => "done",
            VersionStatus::Fail => "fail",
        }
    }
}

impl fmt::Display for VersionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate file statuses into a version status.
///
/// Priority: any active file => `doing`, else any failed file => `fail`, else `done`.
/// An empty file set is `done`.
pub fn aggregate_version_status<I>(statuses: I) -> VersionStatus
where
    I: IntoIterator<Item = FileStatus>,
{
    let mut any_failed = false;
    for status in statuses {
        if status.is_active() {
            return VersionStatus::Doing;
        }
        any_failed |= status.is_failed();
    }
    if any_failed {
        VersionStatus::Fail
    } else {
        VersionStatus::Done
    }
}
