//! Pipeline job record and its guarded state machine.
//!
//! `queued → running → {completed | failed}`. Every mutation goes through
//! [`Job::apply`], which rejects status regressions, decreasing progress and
//! any change to a terminal job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

pub type JobId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    fn rank(self) -> u8 {
        match self {
            JobStatus::Queued => 0,
            JobStatus::Running => 1,
            JobStatus::Completed | JobStatus::Failed => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stage tags written to `current_step`.
pub mod steps {
    pub const POCKET_DETECTION: &str = "pocket_detection";
    pub const MOLECULE_SELECTION: &str = "molecule_selection";
    pub const DOCKING: &str = "docking";
    pub const ADMET: &str = "admet";
    pub const COMPLETE: &str = "complete";
}

/// `strategy` value when the caller supplied the pocket.
pub const STRATEGY_POCKET_PROVIDED: &str = "pocket_provided";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransitionError {
    #[error("job is {0} and can no longer change")]
    Terminal(JobStatus),

    #[error("status cannot move from {from} to {to}")]
    StatusRegression { from: JobStatus, to: JobStatus },

    #[error("job is {0} and must be running before it completes")]
    CompletedWithoutRunning(JobStatus),

    #[error("progress cannot decrease from {from} to {to}")]
    ProgressRegression { from: f64, to: f64 },

    #[error("progress {0} is outside [0, 1]")]
    ProgressOutOfRange(f64),

    #[error("results may only be attached on completion")]
    ResultsBeforeCompletion,
}

/// A partial change to a job. Unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub current_step: Option<String>,
    pub strategy: Option<String>,
    pub progress: Option<f64>,
    pub message: Option<String>,
    pub results: Option<Value>,
}

impl JobUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transition to `failed` with `message`, leaving progress untouched.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::new().status(JobStatus::Failed).message(message)
    }

    pub fn status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn step(mut self, step: &str) -> Self {
        self.current_step = Some(step.to_string());
        self
    }

    pub fn strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy = Some(strategy.into());
        self
    }

    pub fn progress(mut self, progress: f64) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn results(mut self, results: Value) -> Self {
        self.results = Some(results);
        self
    }
}

/// Durable job record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub owner_id: Uuid,
    pub protein_id: Uuid,
    pub status: JobStatus,
    pub current_step: Option<String>,
    pub strategy: Option<String>,
    pub progress: f64,
    pub message: Option<String>,
    pub results: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(owner_id: Uuid, protein_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id,
            protein_id,
            status: JobStatus::Queued,
            current_step: None,
            strategy: None,
            progress: 0.0,
            message: None,
            results: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Validate `update` against the current state, then apply it whole.
    /// On error the job is unchanged.
    pub fn apply(&mut self, update: JobUpdate) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError::Terminal(self.status));
        }

        let next_status = update.status.unwrap_or(self.status);
        if next_status.rank() < self.status.rank() {
            return Err(TransitionError::StatusRegression { from: self.status, to: next_status });
        }
        if next_status == JobStatus::Completed && self.status != JobStatus::Running {
            return Err(TransitionError::CompletedWithoutRunning(self.status));
        }
        if let Some(p) = update.progress {
            if !(0.0..=1.0).contains(&p) {
                return Err(TransitionError::ProgressOutOfRange(p));
            }
            if p < self.progress {
                return Err(TransitionError::ProgressRegression { from: self.progress, to: p });
            }
        }
        if update.results.is_some() && next_status != JobStatus::Completed {
            return Err(TransitionError::ResultsBeforeCompletion);
        }

        self.status = next_status;
        if let Some(step) = update.current_step {
            self.current_step = Some(step);
        }
        if let Some(strategy) = update.strategy {
            self.strategy = Some(strategy);
        }
        if let Some(p) = update.progress {
            self.progress = p;
        }
        if let Some(message) = update.message {
            self.message = Some(message);
        }
        if let Some(results) = update.results {
            self.results = Some(results);
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id,
            status: self.status,
            current_step: self.current_step.clone(),
            strategy: self.strategy.clone(),
            progress: self.progress,
            message: self.message.clone(),
            results: self.results.clone(),
        }
    }
}

/// What clients see of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub status: JobStatus,
    pub current_step: Option<String>,
    pub strategy: Option<String>,
    pub progress: f64,
    pub message: Option<String>,
    pub results: Option<Value>,
}

impl JobSnapshot {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
