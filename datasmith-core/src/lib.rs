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

//! Datasmith Core
//!
//! Domain types for versioned training datasets: datasets, versions, files,
//! status state machines, task progress and configuration.

pub mod config;
pub mod dataset;
pub mod error;
pub mod file;
pub mod operation;
pub mod status;
pub mod task;
pub mod version;

pub use config::{AgentConfig, DatasmithConfig, JobsConfig, StorageConfig, MAX_ITEM_WORKERS};
pub use dataset::{DataKind, DataSet, DataSource, NewDataSet, ReflowRecord};
pub use error::{DatasmithError, Result};
pub use file::{DataSetFile, FilePayload, ItemFormat, NewFile, NewFileContent};
pub use operation::Operation;
pub use status::{
    aggregate_version_status, FileEvent, FileStatus, InvalidTransition, ProcessingKind,
    VersionStatus,
};
pub use task::{
    InvalidTaskTransition, NestedProgress, ProgressUpdate, TaskEvent, TaskProgress, TaskStatus,
};
pub use version::{DataSetVersion, VersionNumber, VersionType};
