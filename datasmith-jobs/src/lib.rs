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

//! Datasmith Jobs
//!
//! Cancellable, progress-reporting background tasks on a bounded pool of
//! OS threads, with progress mirrored to a durable store for pollers in
//! other processes.

pub mod manager;
pub mod mirror;
pub mod references;
pub mod task;

pub use manager::{JobManager, JobManagerConfig, TaskSpec};
pub use mirror::{load_all_tasks, load_task, task_key, TASK_KEY_PREFIX};
pub use references::{ReferenceRegistry, References, VersionReferences};
pub use task::{ProgressStream, TaskContext, WorkFn};
