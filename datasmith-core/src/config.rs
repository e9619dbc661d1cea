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

use crate::error::{DatasmithError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Upper bound for the per-job item worker pool
pub const MAX_ITEM_WORKERS: usize = 16;

/// Datasmith Configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DatasmithConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub agent: AgentConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Root for entity snapshot, blobs and progress mirror
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JobsConfig {
    /// Outer pool: jobs running at once
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// Inner pool: items transformed in parallel within one job
    #[serde(default = "default_item_workers")]
    pub item_workers: usize,

    /// Expiry of mirrored progress snapshots in the durable store
    #[serde(default = "default_progress_ttl")]
    pub progress_ttl_secs: u64,

    /// How long terminal tasks stay in the in-memory registry
    #[serde(default = "default_retention")]
    pub retention_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AgentConfig {
    /// Remote agent service (e.g. "http://localhost:8600")
    pub base_url: Option<String>,

    pub api_key: Option<String>,

    /// Per-item request deadline
    #[serde(default = "default_agent_timeout")]
    pub timeout_secs: u64,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./datasmith-data")
}

fn default_max_concurrent_jobs() -> usize {
    4
}

pub fn default_item_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .min(MAX_ITEM_WORKERS)
}

fn default_progress_ttl() -> u64 {
    3600
}

fn default_retention() -> u64 {
    86_400
}

fn default_agent_timeout() -> u64 {
    60
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            item_workers: default_item_workers(),
            progress_ttl_secs: default_progress_ttl(),
            retention_secs: default_retention(),
        }
    }
}

const ENV_DATA_DIR: &str = "DATASMITH_DATA_DIR";
const ENV_MAX_CONCURRENT_JOBS: &str = "DATASMITH_MAX_CONCURRENT_JOBS";
const ENV_ITEM_WORKERS: &str = "DATASMITH_ITEM_WORKERS";
const ENV_PROGRESS_TTL: &str = "DATASMITH_PROGRESS_TTL_SECS";
const ENV_RETENTION: &str = "DATASMITH_RETENTION_SECS";
const ENV_AGENT_BASE_URL: &str = "DATASMITH_AGENT_BASE_URL";
const ENV_AGENT_API_KEY: &str = "DATASMITH_AGENT_API_KEY";
const ENV_AGENT_TIMEOUT: &str = "DATASMITH_AGENT_TIMEOUT_SECS";

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

impl DatasmithConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from environment variables
    ///
    /// Supported environment variables:
    /// - DATASMITH_DATA_DIR: Data directory (default: ./datasmith-data)
    /// - DATASMITH_MAX_CONCURRENT_JOBS: Jobs running at once (default: 4)
    /// - DATASMITH_ITEM_WORKERS: Per-job item workers (default: min(16, cores))
    /// - DATASMITH_PROGRESS_TTL_SECS: Progress snapshot expiry (default: 3600)
    /// - DATASMITH_RETENTION_SECS: Terminal task retention (default: 86400)
    /// - DATASMITH_AGENT_BASE_URL / DATASMITH_AGENT_API_KEY: Remote agent service
    /// - DATASMITH_AGENT_TIMEOUT_SECS: Per-item agent deadline (default: 60)
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Load configuration with priority: file > env > defaults
    pub fn load(config_file: Option<PathBuf>) -> Result<Self> {
        let mut config = if let Some(path) = config_file {
            if path.exists() {
                tracing::info!("Loading configuration from file: {:?}", path);
                Self::from_file(&path)?
            } else {
                tracing::warn!("Config file not found: {:?}, using defaults", path);
                Self::default()
            }
        } else {
            Self::default()
        };

        config.apply_env();
        Ok(config)
    }

    /// Override with environment variables that are explicitly set
    fn apply_env(&mut self) {
        if let Ok(dir) = std::env::var(ENV_DATA_DIR) {
            self.storage.data_dir = PathBuf::from(dir);
        }
        if let Some(v) = env_parse(ENV_MAX_CONCURRENT_JOBS) {
            self.jobs.max_concurrent_jobs = v;
        }
        if let Some(v) = env_parse(ENV_ITEM_WORKERS) {
            self.jobs.item_workers = v;
        }
        if let Some(v) = env_parse(ENV_PROGRESS_TTL) {
            self.jobs.progress_ttl_secs = v;
        }
        if let Some(v) = env_parse(ENV_RETENTION) {
            self.jobs.retention_secs = v;
        }
        if let Ok(url) = std::env::var(ENV_AGENT_BASE_URL) {
            self.agent.base_url = Some(url);
        }
        if let Ok(key) = std::env::var(ENV_AGENT_API_KEY) {
            self.agent.api_key = Some(key);
        }
        if let Some(v) = env_parse(ENV_AGENT_TIMEOUT) {
            self.agent.timeout_secs = v;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.jobs.max_concurrent_jobs == 0 {
            return Err(DatasmithError::validation("jobs.max_concurrent_jobs must be > 0"));
        }
        if self.jobs.item_workers == 0 || self.jobs.item_workers > MAX_ITEM_WORKERS {
            return Err(DatasmithError::validation(format!(
                "jobs.item_workers must be in 1..={}",
                MAX_ITEM_WORKERS
            )));
        }
        if self.agent.timeout_secs == 0 {
            return Err(DatasmithError::validation("agent.timeout_secs must be > 0"));
        }

        if !self.storage.data_dir.exists() {
            std::fs::create_dir_all(&self.storage.data_dir)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DatasmithConfig::default();
        assert_eq!(config.jobs.max_concurrent_jobs, 4);
        assert!(config.jobs.item_workers >= 1 && config.jobs.item_workers <= MAX_ITEM_WORKERS);
        assert_eq!(config.jobs.progress_ttl_secs, 3600);
        assert_eq!(config.agent.timeout_secs, 60);
        assert!(config.agent.base_url.is_none());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: DatasmithConfig = toml::from_str(
            r#"
            [jobs]
            max_concurrent_jobs = 2

            [agent]
            base_url = "http://agents.local"
            "#,
        )
        .unwrap();
        assert_eq!(config.jobs.max_concurrent_jobs, 2);
        assert_eq!(config.jobs.retention_secs, 86_400);
        assert_eq!(config.agent.base_url.as_deref(), Some("http://agents.local"));
        assert_eq!(config.agent.timeout_secs, 60);
    }

    #[test]
    fn test_validate_creates_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = DatasmithConfig::default();
        config.storage.data_dir = dir.path().join("nested/data");
        config.validate().unwrap();
        assert!(config.storage.data_dir.exists());

        config.jobs.item_workers = 17;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_env() {
        std::env::set_var("DATASMITH_MAX_CONCURRENT_JOBS", "7");
        std::env::set_var("DATASMITH_AGENT_API_KEY", "secret");

        let config = DatasmithConfig::from_env();
        assert_eq!(config.jobs.max_concurrent_jobs, 7);
        assert_eq!(config.agent.api_key.as_deref(), Some("secret"));

        std::env::remove_var("DATASMITH_MAX_CONCURRENT_JOBS");
        std::env::remove_var("DATASMITH_AGENT_API_KEY");
    }
}
