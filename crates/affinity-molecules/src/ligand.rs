//! Candidate molecules and their storage.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use affinity_common::{Result, ScreeningError};

/// Where a candidate came from within the run that used it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateOrigin {
    /// Already stored for the owner before the run.
    Existing,
    /// Produced by the generator during the run.
    Generated,
}

/// A candidate molecule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub id: Uuid,
    pub smiles: String,
    /// Best docking affinity in kcal/mol. `None` until a docking run succeeds.
    pub score: Option<f64>,
    pub origin: CandidateOrigin,
    pub owner_id: Uuid,
    /// Protein the candidate was generated for, if any.
    pub protein_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Candidate {
    /// Create a new unscored candidate.
    pub fn new(smiles: &str, owner_id: Uuid, origin: CandidateOrigin) -> Self {
        Self {
            id: Uuid::new_v4(),
            smiles: smiles.to_string(),
            score: None,
            origin,
            owner_id,
            protein_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn for_protein(mut self, protein_id: Uuid) -> Self {
        self.protein_id = Some(protein_id);
        self
    }
}

#[async_trait]
pub trait CandidateRepository: Send + Sync {
    /// Up to `limit` of the owner's candidates, newest first.
    async fn list_recent_for_owner(&self, owner_id: Uuid, limit: usize) -> Result<Vec<Candidate>>;

    async fn get(&self, id: Uuid) -> Result<Option<Candidate>>;

    async fn insert(&self, candidate: Candidate) -> Result<Candidate>;

    /// Overwrite the candidate's docking score.
    async fn set_score(&self, id: Uuid, score: f64) -> Result<()>;
}

/// Candidate repository held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryCandidateRepository {
    // Insertion order.
    rows: RwLock<Vec<Candidate>>,
}

impl InMemoryCandidateRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CandidateRepository for InMemoryCandidateRepository {
    async fn list_recent_for_owner(&self, owner_id: Uuid, limit: usize) -> Result<Vec<Candidate>> {
        let rows = self.rows.read().await;
        let mut owned: Vec<Candidate> = rows
            .iter()
            .rev()
            .filter(|c| c.owner_id == owner_id)
            .cloned()
            .collect();
        // Stable: equal timestamps keep the later insert first.
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        owned.truncate(limit);
        Ok(owned)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Candidate>> {
        let rows = self.rows.read().await;
        Ok(rows.iter().find(|c| c.id == id).cloned())
    }

    async fn insert(&self, candidate: Candidate) -> Result<Candidate> {
        let mut rows = self.rows.write().await;
        if rows.iter().any(|c| c.id == candidate.id) {
            return Err(ScreeningError::InvalidInput(format!("candidate {} already exists", candidate.id)));
        }
        rows.push(candidate.clone());
        Ok(candidate)
    }

    async fn set_score(&self, id: Uuid, score: f64) -> Result<()> {
        let mut rows = self.rows.write().await;
        let row = rows
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| ScreeningError::NotFound(format!("candidate {id}")))?;
        row.score = Some(score);
        Ok(())
    }
}
