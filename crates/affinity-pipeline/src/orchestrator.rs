//! Screening pipeline orchestrator.
//!
//! Drives one job through its stages, strictly in order:
//!   1. Pocket detection (skipped when the caller supplies a pocket)
//!   2. Pocket feature analysis
//!   3. Candidate sourcing (stored + generated)
//!   4. Docking every candidate
//!   5. ADMET scoring of the best-docked candidates
//!   6. Summary
//!
//! The job record is updated after every step. Per-candidate failures are
//! recorded in the summary; only an empty pocket list, an empty candidate set
//! or a run where no candidate docked fail the job. [`Orchestrator::run`] is
//! the single failure boundary: anything else that goes wrong turns the job
//! `failed` with the error's message, and nothing is returned to the caller.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

use affinity_common::config::PipelineConfig;
use affinity_common::settings::SettingsProvider;
use affinity_common::{Config, Result};
use affinity_molecules::admet::{
    AdmetPredictor, AdmetRecord, AdmetResultRepository, CommandAdmetPredictor, InMemoryAdmetResultRepository,
};
use affinity_molecules::docking::{DockingEngine, SearchBox, VinaDockingEngine};
use affinity_molecules::features::{analyze, PocketFeatures};
use affinity_molecules::ligand::{CandidateRepository, InMemoryCandidateRepository};
use affinity_molecules::pocket::{FpocketDetector, Pocket, PocketDetector};
use affinity_molecules::scoring::{select_for_admet, DockOutcome, PropertyOutcome};
use affinity_molecules::sourcing::{MoleculeGenerator, MoleculeSourcer, SubstituentGenerator};
use affinity_molecules::structure::Structure;

use crate::job::{steps, JobId, JobStatus, JobUpdate, STRATEGY_POCKET_PROVIDED};
use crate::store::{InMemoryJobStore, InMemoryProteinRepository, JobStore, ProteinRepository};
use crate::summary::RunSummary;

pub const PROGRESS_STARTED: f64 = 0.05;
pub const PROGRESS_POCKET: f64 = 0.18;
pub const PROGRESS_SELECTION: f64 = 0.28;
pub const PROGRESS_DOCKING_END: f64 = 0.70;
pub const PROGRESS_ADMET_END: f64 = 0.90;
pub const PROGRESS_COMPLETE: f64 = 1.0;

const DOCKING_SPAN: f64 = 0.40;
const ADMET_SPAN: f64 = 0.20;

/// Progress after `done` of `total` candidates have been docked.
pub fn docking_progress(done: usize, total: usize) -> f64 {
    (PROGRESS_SELECTION + DOCKING_SPAN * done as f64 / total.max(1) as f64).min(PROGRESS_DOCKING_END)
}

/// Progress after `done` of `total` candidates have been property-scored.
pub fn admet_progress(done: usize, total: usize) -> f64 {
    (PROGRESS_DOCKING_END + ADMET_SPAN * done as f64 / total.max(1) as f64).min(PROGRESS_ADMET_END)
}

fn default_max_molecules() -> usize { 10 }

/// Per-run parameters chosen by the submitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRequest {
    #[serde(default = "default_max_molecules")]
    pub max_molecules: usize,
    /// Use this pocket instead of running detection.
    #[serde(default)]
    pub pocket: Option<Pocket>,
}

impl Default for PipelineRequest {
    fn default() -> Self {
        Self {
            max_molecules: default_max_molecules(),
            pocket: None,
        }
    }
}

/// Collaborators an orchestrator drives.
pub struct PipelineComponents {
    pub jobs: Arc<dyn JobStore>,
    pub proteins: Arc<dyn ProteinRepository>,
    pub candidates: Arc<dyn CandidateRepository>,
    pub detector: Arc<dyn PocketDetector>,
    pub generator: Arc<dyn MoleculeGenerator>,
    pub docking: Arc<dyn DockingEngine>,
    pub admet: Arc<dyn AdmetPredictor>,
    pub admet_results: Arc<dyn AdmetResultRepository>,
}

impl PipelineComponents {
    /// External-tool collaborators over in-memory stores.
    pub fn from_config(config: &Config, settings: Arc<dyn SettingsProvider>) -> Self {
        Self {
            jobs: Arc::new(InMemoryJobStore::new()),
            proteins: Arc::new(InMemoryProteinRepository::new()),
            candidates: Arc::new(InMemoryCandidateRepository::new()),
            detector: Arc::new(FpocketDetector::new(settings.clone())),
            generator: Arc::new(SubstituentGenerator),
            docking: Arc::new(VinaDockingEngine::from_config(config, settings.clone())),
            admet: Arc::new(CommandAdmetPredictor::new(settings)),
            admet_results: Arc::new(InMemoryAdmetResultRepository::new()),
        }
    }
}

pub struct Orchestrator {
    jobs: Arc<dyn JobStore>,
    proteins: Arc<dyn ProteinRepository>,
    candidates: Arc<dyn CandidateRepository>,
    detector: Arc<dyn PocketDetector>,
    sourcer: MoleculeSourcer,
    docking: Arc<dyn DockingEngine>,
    admet: Arc<dyn AdmetPredictor>,
    admet_results: Arc<dyn AdmetResultRepository>,
    admet_top_k: usize,
}

impl Orchestrator {
    pub fn new(components: PipelineComponents, config: &PipelineConfig) -> Self {
        let PipelineComponents { jobs, proteins, candidates, detector, generator, docking, admet, admet_results } =
            components;
        Self {
            sourcer: MoleculeSourcer::new(candidates.clone(), generator),
            jobs,
            proteins,
            candidates,
            detector,
            docking,
            admet,
            admet_results,
            admet_top_k: config.admet_top_k,
        }
    }

    pub fn jobs(&self) -> &Arc<dyn JobStore> {
        &self.jobs
    }

    /// Run one job to a terminal state.
    #[instrument(skip(self, request), fields(max_molecules = request.max_molecules))]
    pub async fn run(&self, job_id: JobId, request: PipelineRequest) {
        if let Err(e) = self.execute(job_id, &request).await {
            error!(job_id = %job_id, "Pipeline failed: {}", e);
            if let Err(mark_err) = self.jobs.update(job_id, JobUpdate::failed(e.to_string())).await {
                warn!(job_id = %job_id, "Could not mark job failed: {}", mark_err);
            }
        }
    }

    /// Mark the job failed with a fixed message. Used for the expected
    /// run-ending conditions.
    async fn fail(&self, job_id: JobId, message: &str) -> Result<()> {
        warn!(job_id = %job_id, "{}", message);
        self.jobs.update(job_id, JobUpdate::failed(message)).await?;
        Ok(())
    }

    async fn execute(&self, job_id: JobId, request: &PipelineRequest) -> Result<()> {
        let Some(job) = self.jobs.get(job_id).await? else {
            warn!(job_id = %job_id, "Job vanished before it started");
            return Ok(());
        };
        if job.status.is_terminal() {
            debug!(job_id = %job_id, status = %job.status, "Job already finished, not running it again");
            return Ok(());
        }
        info!(job_id = %job_id, protein_id = %job.protein_id, "Starting screening pipeline");
        self.jobs
            .update(
                job_id,
                JobUpdate::new()
                    .status(JobStatus::Running)
                    .progress(PROGRESS_STARTED)
                    .message("Starting pipeline"),
            )
            .await?;

        let Some(protein) = self.proteins.get(job.protein_id).await? else {
            return self.fail(job_id, "Protein not found").await;
        };

        // ── 1. Pocket ────────────────────────────────────────────────────────
        let (pockets, strategy) = match &request.pocket {
            Some(pocket) => (vec![pocket.clone()], STRATEGY_POCKET_PROVIDED.to_string()),
            None => {
                let pockets = self.detector.detect(&protein.path).await?;
                let strategy = pockets.first().map(|p| p.method.clone()).unwrap_or_default();
                (pockets, strategy)
            }
        };
        let Some(mut pocket) = pockets.into_iter().next() else {
            return self.fail(job_id, "No pockets detected").await;
        };

        // ── 2. Features ──────────────────────────────────────────────────────
        if let Some(features) = pocket_features(protein.path.clone(), pocket.clone()).await {
            pocket = pocket.with_features(features);
        }
        self.jobs
            .update(
                job_id,
                JobUpdate::new()
                    .step(steps::POCKET_DETECTION)
                    .strategy(strategy)
                    .progress(PROGRESS_POCKET)
                    .message("Pocket detected"),
            )
            .await?;

        // ── 3. Candidates ────────────────────────────────────────────────────
        let candidates = self
            .sourcer
            .source(job.owner_id, protein.id, request.max_molecules, Some(&pocket))
            .await?;
        if candidates.is_empty() {
            return self.fail(job_id, "No molecules available").await;
        }
        let total = candidates.len();
        self.jobs
            .update(
                job_id,
                JobUpdate::new()
                    .step(steps::MOLECULE_SELECTION)
                    .progress(PROGRESS_SELECTION)
                    .message(format!("{total} molecules ready for docking")),
            )
            .await?;

        // ── 4. Docking ───────────────────────────────────────────────────────
        let search_box = SearchBox::from_pocket(&pocket);
        let mut dock_results: Vec<DockOutcome> = Vec::with_capacity(total);

        for (idx, candidate) in candidates.iter().enumerate() {
            match self.docking.dock(&candidate.smiles, &protein.path, Some(&search_box)).await {
                Ok(pose) => {
                    if let Err(e) = self.candidates.set_score(candidate.id, pose.score).await {
                        warn!(candidate = %candidate.id, "Failed to store docking score: {}", e);
                    }
                    debug!(candidate = %candidate.id, score = pose.score, "Docked");
                    dock_results.push(DockOutcome::docked(candidate, pose));
                }
                Err(e) => {
                    warn!(candidate = %candidate.id, "Docking failed: {}", e);
                    dock_results.push(DockOutcome::failed(candidate, e));
                }
            }
            self.jobs
                .update(
                    job_id,
                    JobUpdate::new()
                        .step(steps::DOCKING)
                        .progress(docking_progress(idx + 1, total))
                        .message(format!("Docked {}/{}", idx + 1, total)),
                )
                .await?;
        }

        let top = select_for_admet(&dock_results, self.admet_top_k);
        if top.is_empty() {
            return self.fail(job_id, "Docking failed for all molecules").await;
        }
        info!(job_id = %job_id, docked = top.len(), total, "Docking finished");

        // ── 5. ADMET ─────────────────────────────────────────────────────────
        let mut admet_results: Vec<PropertyOutcome> = Vec::with_capacity(top.len());
        for (idx, ranked) in top.iter().enumerate() {
            let prediction = self.admet.predict(&ranked.smiles).await;
            match &prediction {
                Ok(p) => {
                    let record = AdmetRecord::new(ranked.candidate_id, job.owner_id, p);
                    if let Err(e) = self.admet_results.insert(record).await {
                        warn!(candidate = %ranked.candidate_id, "Failed to store ADMET prediction: {}", e);
                    }
                }
                Err(e) => warn!(candidate = %ranked.candidate_id, "ADMET prediction failed: {}", e),
            }
            admet_results.push(PropertyOutcome::from_prediction(ranked, prediction));
            self.jobs
                .update(
                    job_id,
                    JobUpdate::new()
                        .step(steps::ADMET)
                        .progress(admet_progress(idx + 1, top.len()))
                        .message(format!("ADMET {}/{}", idx + 1, top.len())),
                )
                .await?;
        }

        // ── 6. Summary ───────────────────────────────────────────────────────
        let summary = RunSummary::new(pocket, dock_results, admet_results);
        let results = serde_json::to_value(&summary)?;
        self.jobs
            .update(
                job_id,
                JobUpdate::new()
                    .status(JobStatus::Completed)
                    .step(steps::COMPLETE)
                    .progress(PROGRESS_COMPLETE)
                    .message("Pipeline finished")
                    .results(results),
            )
            .await?;
        info!(job_id = %job_id, docked = summary.docked_count(), "Pipeline finished");
        Ok(())
    }
}

/// Features for `pocket`, or `None` when the structure cannot be read or the
/// pocket is malformed. Parsing runs on the blocking pool.
async fn pocket_features(path: PathBuf, pocket: Pocket) -> Option<PocketFeatures> {
    let joined = tokio::task::spawn_blocking(move || {
        let structure = Structure::read(&path)?;
        Ok::<_, affinity_common::ScreeningError>(analyze(&structure, &pocket))
    })
    .await;

    match joined {
        Ok(Ok(features)) => features,
        Ok(Err(e)) => {
            debug!("Pocket feature analysis skipped: {}", e);
            None
        }
        Err(e) => {
            warn!("Pocket feature analysis panicked: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_docking_progress_band() {
        assert_eq!(docking_progress(0, 5), PROGRESS_SELECTION);
        assert!((docking_progress(5, 5) - 0.68).abs() < 1e-12);
        assert!((docking_progress(1, 4) - 0.38).abs() < 1e-12);
        assert!(docking_progress(9, 5) <= PROGRESS_DOCKING_END);
        assert_eq!(docking_progress(0, 0), PROGRESS_SELECTION);
    }

    #[test]
    fn test_admet_progress_band() {
        assert!((admet_progress(1, 2) - 0.80).abs() < 1e-12);
        assert!((admet_progress(2, 2) - 0.90).abs() < 1e-12);
        assert!(admet_progress(3, 2) <= PROGRESS_ADMET_END);
    }

    #[test]
    fn test_progress_is_monotonic_across_stages() {
        let mut seq = vec![PROGRESS_STARTED, PROGRESS_POCKET, PROGRESS_SELECTION];
        seq.extend((1..=7).map(|i| docking_progress(i, 7)));
        seq.extend((1..=3).map(|i| admet_progress(i, 3)));
        seq.push(PROGRESS_COMPLETE);
        assert!(seq.windows(2).all(|w| w[0] <= w[1]), "{seq:?}");
    }

    #[test]
    fn test_components_from_config() {
        use affinity_common::settings::{CachedSettings, MemorySettings, SettingsSource};

        let mut config = Config::default();
        config.pipeline.admet_top_k = 2;
        let store: Arc<dyn SettingsSource> = Arc::new(MemorySettings::new());
        let settings: Arc<dyn SettingsProvider> = Arc::new(CachedSettings::new(vec![store]));

        let components = PipelineComponents::from_config(&config, settings);
        let orchestrator = Orchestrator::new(components, &config.pipeline);
        assert_eq!(orchestrator.admet_top_k, 2);
        assert_eq!(Arc::strong_count(orchestrator.jobs()), 1);
    }

    #[test]
    fn test_request_defaults() {
        let req: PipelineRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(req, PipelineRequest::default());
        assert_eq!(req.max_molecules, 10);
    }
}
