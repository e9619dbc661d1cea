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

use crate::graph::VersionGraph;
use crate::service::{TransformRequest, TransformService};
use crate::status::StatusTracker;
use datasmith_core::{DatasmithConfig, Result, TaskProgress};
use datasmith_jobs::{JobManager, JobManagerConfig, ProgressStream, ReferenceRegistry, References};
use datasmith_storage::{
    BlobStore, EntityStore, FileEntityStore, FsBlobStore, FsProgressStore, MemoryBlobStore,
    MemoryEntityStore, MokaProgressStore, ProgressStore,
};
use datasmith_transform::{AgentEndpoint, ScriptRegistry, UnitResolver};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Every service wired over one set of stores
pub struct Datasmith {
    config: DatasmithConfig,
    entities: Arc<dyn EntityStore>,
    jobs: Arc<JobManager>,
    holders: Arc<ReferenceRegistry>,
    scripts: Arc<ScriptRegistry>,
    graph: VersionGraph,
    tracker: StatusTracker,
    transforms: TransformService,
}

impl Datasmith {
    /// Open the file-backed stores under `storage.data_dir`
    pub fn open(config: DatasmithConfig) -> Result<Self> {
        config.validate()?;
        let dir = config.storage.data_dir.clone();
        let entities = Arc::new(FileEntityStore::open(&dir)?);
        let blobs = Arc::new(FsBlobStore::open(dir.join("blobs"))?);
        let progress = Arc::new(FsProgressStore::open(dir.join("progress"))?);
        tracing::info!("Opened datasmith data directory {:?}", dir);
        Self::from_parts(config, entities, blobs, progress)
    }

    /// Volatile stores, for tests and dry runs
    pub fn in_memory(config: DatasmithConfig) -> Result<Self> {
        Self::from_parts(
            config,
            Arc::new(MemoryEntityStore::new()),
            Arc::new(MemoryBlobStore::new()),
            Arc::new(MokaProgressStore::default()),
        )
    }

    pub fn from_parts(
        config: DatasmithConfig,
        entities: Arc<dyn EntityStore>,
        blobs: Arc<dyn BlobStore>,
        progress: Arc<dyn ProgressStore>,
    ) -> Result<Self> {
        let jobs = Arc::new(JobManager::new(JobManagerConfig::from(&config.jobs), progress));
        let holders = Arc::new(ReferenceRegistry::new());
        let references = References::new().with(jobs.clone()).with(holders.clone());

        let scripts = Arc::new(ScriptRegistry::with_builtins());
        let agents = match config.agent.base_url {
            Some(_) => Some(AgentEndpoint::from_config(&config.agent)?),
            None => None,
        };
        let resolver = UnitResolver::new(scripts.clone(), agents);

        let graph = VersionGraph::new(entities.clone(), blobs.clone(), Arc::new(references));
        let tracker = StatusTracker::new(entities.clone());
        let transforms = TransformService::new(
            entities.clone(),
            blobs,
            jobs.clone(),
            resolver,
            config.jobs.item_workers,
        );

        Ok(Self {
            config,
            entities,
            jobs,
            holders,
            scripts,
            graph,
            tracker,
            transforms,
        })
    }

    pub fn config(&self) -> &DatasmithConfig {
        &self.config
    }

    pub fn graph(&self) -> &VersionGraph {
        &self.graph
    }

    pub fn status(&self) -> &StatusTracker {
        &self.tracker
    }

    pub fn jobs(&self) -> &Arc<JobManager> {
        &self.jobs
    }

    /// Registry for scripts callers add at startup
    pub fn scripts(&self) -> &Arc<ScriptRegistry> {
        &self.scripts
    }

    /// Long-lived holders of versions outside the job manager (e.g. a
    /// fine-tuning run). A held version cannot be deleted.
    pub fn holders(&self) -> &Arc<ReferenceRegistry> {
        &self.holders
    }

    pub fn entities(&self) -> &Arc<dyn EntityStore> {
        &self.entities
    }

    pub fn submit_transform(&self, request: TransformRequest) -> Result<Uuid> {
        self.transforms.submit(request)
    }

    pub fn task(&self, task_id: Uuid) -> Result<TaskProgress> {
        self.jobs.get_task_progress(task_id)
    }

    pub fn cancel(&self, task_id: Uuid) -> Result<bool> {
        self.jobs.cancel_task(task_id)
    }

    pub fn subscribe(&self, task_id: Uuid) -> Result<ProgressStream> {
        self.jobs.subscribe(task_id)
    }

    pub fn wait(&self, task_id: Uuid, timeout: Duration) -> Result<TaskProgress> {
        self.jobs.wait(task_id, timeout)
    }
}
