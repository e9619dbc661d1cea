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

//! Task snapshots in the durable progress store.

use datasmith_core::{DatasmithError, Result, TaskProgress};
use datasmith_storage::ProgressStore;
use uuid::Uuid;

pub const TASK_KEY_PREFIX: &str = "datasmith:task:";

pub fn task_key(task_id: Uuid) -> String {
    format!("{}{}", TASK_KEY_PREFIX, task_id)
}

/// Read a task snapshot written by any process sharing the store
pub fn load_task(store: &dyn ProgressStore, task_id: Uuid) -> Result<Option<TaskProgress>> {
    match store.get(&task_key(task_id))? {
        Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}

/// Every live task snapshot in the store, oldest first
pub fn load_all_tasks(store: &dyn ProgressStore) -> Result<Vec<TaskProgress>> {
    let mut tasks = Vec::new();
    for key in store.keys(TASK_KEY_PREFIX)? {
        let id = key
            .strip_prefix(TASK_KEY_PREFIX)
            .and_then(|raw| Uuid::parse_str(raw).ok())
            .ok_or_else(|| DatasmithError::Storage(format!("malformed task key: {}", key)))?;
        if let Some(task) = load_task(store, id)? {
            tasks.push(task);
        }
    }
    tasks.sort_by_key(|t| t.created_at);
    Ok(tasks)
}
