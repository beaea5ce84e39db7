use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::entry::JobEntry;
use crate::error::{ConfigError, JobError, Result};

/// Ordered list of jobs, persisted as TOML
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobQueue {
    #[serde(default)]
    jobs: Vec<JobEntry>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a saved queue; a file that does not exist yet is an empty queue
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!("No job list at {}, starting empty", path.display());
            return Ok(Self::new());
        }
        let content = std::fs::read_to_string(path)?;
        let queue: JobQueue = toml::from_str(&content).map_err(|_| JobError::ParseFailed {
            path: path.display().to_string(),
        })?;
        info!("Loaded {} jobs from {}", queue.len(), path.display());
        Ok(queue)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::InvalidValue {
            key: "jobs".to_string(),
            value: e.to_string(),
        })?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Append a job; labels must be unique
    pub fn add(&mut self, entry: JobEntry) -> Result<usize> {
        if self.jobs.iter().any(|job| job.label() == entry.label()) {
            return Err(JobError::Duplicate {
                label: entry.label().to_string(),
            }
            .into());
        }
        info!("Job added: {}", entry.label());
        self.jobs.push(entry);
        Ok(self.jobs.len() - 1)
    }

    pub fn remove(&mut self, index: usize) -> Result<JobEntry> {
        if index >= self.jobs.len() {
            return Err(JobError::NotFound { index }.into());
        }
        Ok(self.jobs.remove(index))
    }

    pub fn rerun(&mut self, index: usize) -> Result<()> {
        self.get_mut(index)?.rerun();
        Ok(())
    }

    pub fn get(&self, index: usize) -> Option<&JobEntry> {
        self.jobs.get(index)
    }

    pub(crate) fn mark_done(&mut self, index: usize) -> Result<()> {
        self.get_mut(index)?.mark_done();
        Ok(())
    }

    fn get_mut(&mut self, index: usize) -> Result<&mut JobEntry> {
        self.jobs
            .get_mut(index)
            .ok_or_else(|| JobError::NotFound { index }.into())
    }

    pub fn jobs(&self) -> &[JobEntry] {
        &self.jobs
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn pending(&self) -> usize {
        self.jobs.iter().filter(|job| !job.is_done()).count()
    }
}
