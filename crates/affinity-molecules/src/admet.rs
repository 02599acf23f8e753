//! ADMET prediction for molecules.
//!
//! The predictor is an external executable called with one SMILES argument
//! that prints a JSON record (or a one-element array of records) of property
//! columns. Column names vary between predictor versions, so each property
//! is looked up through a list of aliases.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use affinity_common::settings::SettingsProvider;
use affinity_common::tools::{self, resolve_tool, run_tool};
use affinity_common::ScreeningError;

pub const SOLUBILITY_COLUMNS: &[&str] = &["Solubility", "solubility", "ESOL"];
pub const TOXICITY_COLUMNS: &[&str] = &["Toxicity", "toxicity", "AMES"];
pub const CLEARANCE_COLUMNS: &[&str] = &["Clearance", "clearance", "CLint"];

/// Predicted properties. A field is `None` when the predictor did not report it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AdmetPrediction {
    pub solubility: Option<f64>,
    pub toxicity: Option<f64>,
    pub clearance: Option<f64>,
}

impl AdmetPrediction {
    /// Pick the known columns out of one predictor record.
    pub fn from_record(record: &Map<String, Value>) -> Self {
        Self {
            solubility: lookup(record, SOLUBILITY_COLUMNS),
            toxicity: lookup(record, TOXICITY_COLUMNS),
            clearance: lookup(record, CLEARANCE_COLUMNS),
        }
    }

    /// `(solubility, toxicity, clearance)` with missing values as 0.0.
    pub fn values_or_zero(&self) -> (f64, f64, f64) {
        (
            self.solubility.unwrap_or(0.0),
            self.toxicity.unwrap_or(0.0),
            self.clearance.unwrap_or(0.0),
        )
    }
}

/// The first alias present decides; an unreadable value there yields `None`.
fn lookup(record: &Map<String, Value>, aliases: &[&str]) -> Option<f64> {
    let value = aliases.iter().find_map(|k| record.get(*k))?;
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmetError {
    /// No predictor is installed or configured.
    #[error("admet-ai not available: {0}")]
    Unavailable(String),

    /// The predictor exists but did not produce a usable record.
    #[error("admet-ai prediction failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait AdmetPredictor: Send + Sync {
    async fn predict(&self, smiles: &str) -> Result<AdmetPrediction, AdmetError>;
}

/// Runs the configured `admet_predict` executable.
pub struct CommandAdmetPredictor {
    settings: Arc<dyn SettingsProvider>,
}

impl CommandAdmetPredictor {
    pub fn new(settings: Arc<dyn SettingsProvider>) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl AdmetPredictor for CommandAdmetPredictor {
    async fn predict(&self, smiles: &str) -> Result<AdmetPrediction, AdmetError> {
        let exe = resolve_tool(&tools::ADMET, self.settings.as_ref()).map_err(|e| AdmetError::Unavailable(e.to_string()))?;

        debug!("Predicting ADMET properties for {}", smiles);
        let output = run_tool(&exe, [smiles])
            .await
            .map_err(|e| AdmetError::Failed(e.to_string()))?
            .check("admet_predict")
            .map_err(|e| match e {
                ScreeningError::ToolExecutionFailed { detail, .. } => AdmetError::Failed(detail),
                other => AdmetError::Failed(other.to_string()),
            })?;

        parse_prediction(&output.stdout)
    }
}

/// Parse predictor stdout: a JSON object, or an array whose first element is one.
pub fn parse_prediction(stdout: &str) -> Result<AdmetPrediction, AdmetError> {
    let value: Value = serde_json::from_str(stdout.trim()).map_err(|e| AdmetError::Failed(format!("invalid JSON output: {e}")))?;
    let record = match &value {
        Value::Object(map) => Some(map),
        Value::Array(rows) => rows.first().and_then(Value::as_object),
        _ => None,
    };
    record
        .map(AdmetPrediction::from_record)
        .ok_or_else(|| AdmetError::Failed("output contained no prediction record".to_string()))
}

// ── Stored predictions ───────────────────────────────────────────────────────

/// A persisted prediction for one candidate. Unreported properties are stored as 0.0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdmetRecord {
    pub id: Uuid,
    pub candidate_id: Uuid,
    pub owner_id: Uuid,
    pub solubility: f64,
    pub toxicity: f64,
    pub clearance: f64,
    pub created_at: DateTime<Utc>,
}

impl AdmetRecord {
    pub fn new(candidate_id: Uuid, owner_id: Uuid, prediction: &AdmetPrediction) -> Self {
        let (solubility, toxicity, clearance) = prediction.values_or_zero();
        Self {
            id: Uuid::new_v4(),
            candidate_id,
            owner_id,
            solubility,
            toxicity,
            clearance,
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait AdmetResultRepository: Send + Sync {
    async fn insert(&self, record: AdmetRecord) -> affinity_common::Result<AdmetRecord>;

    /// Records stored for a candidate, oldest first.
    async fn list_for_candidate(&self, candidate_id: Uuid) -> affinity_common::Result<Vec<AdmetRecord>>;
}

#[derive(Debug, Default)]
pub struct InMemoryAdmetResultRepository {
    rows: RwLock<Vec<AdmetRecord>>,
}

impl InMemoryAdmetResultRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AdmetResultRepository for InMemoryAdmetResultRepository {
    async fn insert(&self, record: AdmetRecord) -> affinity_common::Result<AdmetRecord> {
        self.rows.write().await.push(record.clone());
        Ok(record)
    }

    async fn list_for_candidate(&self, candidate_id: Uuid) -> affinity_common::Result<Vec<AdmetRecord>> {
        let rows = self.rows.read().await;
        Ok(rows.iter().filter(|r| r.candidate_id == candidate_id).cloned().collect())
    }
}
