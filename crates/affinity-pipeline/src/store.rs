//! Job and protein persistence seams with in-memory implementations.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use affinity_common::{Result, ScreeningError};

use crate::job::{Job, JobId, JobSnapshot, JobUpdate};

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, job: Job) -> Result<()>;

    async fn get(&self, id: JobId) -> Result<Option<Job>>;

    /// Apply a guarded update and return the resulting snapshot.
    async fn update(&self, id: JobId, update: JobUpdate) -> Result<JobSnapshot>;

    async fn list_for_owner(&self, owner_id: Uuid) -> Result<Vec<JobSnapshot>>;

    /// The job, if it exists and belongs to `owner_id`. Someone else's job
    /// is reported as not found.
    async fn get_for_owner(&self, id: JobId, owner_id: Uuid) -> Result<Job> {
        match self.get(id).await? {
            Some(job) if job.owner_id == owner_id => Ok(job),
            _ => Err(ScreeningError::NotFound(format!("job {id}"))),
        }
    }
}

/// Job store held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: Job) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(ScreeningError::InvalidInput(format!("job {} already exists", job.id)));
        }
        jobs.insert(job.id, job);
        Ok(())
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn update(&self, id: JobId, update: JobUpdate) -> Result<JobSnapshot> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| ScreeningError::NotFound(format!("job {id}")))?;
        job.apply(update)
            .map_err(|e| ScreeningError::Pipeline(format!("job {id}: {e}")))?;
        debug!(job_id = %id, status = %job.status, progress = job.progress, "Job updated");
        Ok(job.snapshot())
    }

    async fn list_for_owner(&self, owner_id: Uuid) -> Result<Vec<JobSnapshot>> {
        let jobs = self.jobs.read().await;
        let mut owned: Vec<&Job> = jobs.values().filter(|j| j.owner_id == owner_id).collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(owned.into_iter().map(Job::snapshot).collect())
    }
}

/// An uploaded target structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Protein {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    /// Structure file (PDB, PDBQT or mmCIF).
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
}

impl Protein {
    pub fn new(owner_id: Uuid, name: &str, path: impl Into<PathBuf>) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id,
            name: name.to_string(),
            path: path.into(),
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait ProteinRepository: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<Protein>>;

    async fn insert(&self, protein: Protein) -> Result<Protein>;
}

#[derive(Debug, Default)]
pub struct InMemoryProteinRepository {
    proteins: RwLock<HashMap<Uuid, Protein>>,
}

impl InMemoryProteinRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProteinRepository for InMemoryProteinRepository {
    async fn get(&self, id: Uuid) -> Result<Option<Protein>> {
        Ok(self.proteins.read().await.get(&id).cloned())
    }

    async fn insert(&self, protein: Protein) -> Result<Protein> {
        self.proteins.write().await.insert(protein.id, protein.clone());
        Ok(protein)
    }
}
