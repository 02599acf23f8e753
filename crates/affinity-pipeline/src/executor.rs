//! Background job execution: a bounded queue drained by a fixed worker pool.
//!
//! Each job runs in its own task, so a panicking stage fails that job and
//! leaves the worker free for the next one.

use std::any::Any;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use affinity_common::config::PipelineConfig;
use affinity_common::{Result, ScreeningError};

use crate::job::{Job, JobId, JobUpdate};
use crate::orchestrator::{Orchestrator, PipelineRequest};
use crate::store::JobStore;

#[derive(Debug)]
struct QueuedRun {
    job_id: JobId,
    request: PipelineRequest,
}

/// Accepts job submissions and runs them on background workers.
pub struct JobExecutor {
    jobs: Arc<dyn JobStore>,
    tx: StdMutex<Option<mpsc::Sender<QueuedRun>>>,
    workers: StdMutex<Vec<JoinHandle<()>>>,
}

impl JobExecutor {
    /// Spawn `config.workers` workers sharing one queue of `config.queue_capacity`.
    pub fn start(orchestrator: Arc<Orchestrator>, config: &PipelineConfig) -> Self {
        let (tx, rx) = mpsc::channel::<QueuedRun>(config.queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let jobs = orchestrator.jobs().clone();

        let workers = (0..config.workers.max(1))
            .map(|worker| {
                let rx = rx.clone();
                let orchestrator = orchestrator.clone();
                tokio::spawn(async move {
                    info!(worker, "Started pipeline worker");
                    loop {
                        let next = rx.lock().await.recv().await;
                        let Some(run) = next else { break };
                        run_isolated(&orchestrator, run).await;
                    }
                    info!(worker, "Pipeline worker stopped");
                })
            })
            .collect();

        Self {
            jobs,
            tx: StdMutex::new(Some(tx)),
            workers: StdMutex::new(workers),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Create a queued job and hand it to the workers. Returns as soon as the
    /// job is enqueued; waits only while the queue is full.
    pub async fn submit(&self, owner_id: Uuid, protein_id: Uuid, request: PipelineRequest) -> Result<JobId> {
        let job = Job::new(owner_id, protein_id);
        let job_id = job.id;
        self.jobs.insert(job).await?;

        let tx = self.tx.lock().unwrap_or_else(|e| e.into_inner()).clone();
        let sent = match tx {
            Some(tx) => tx.send(QueuedRun { job_id, request }).await.is_ok(),
            None => false,
        };
        if !sent {
            warn!(job_id = %job_id, "Executor is shut down; job will not run");
            self.jobs.update(job_id, JobUpdate::failed("Executor is shut down")).await?;
            return Err(ScreeningError::Pipeline("executor is shut down".to_string()));
        }
        info!(job_id = %job_id, "Job queued");
        Ok(job_id)
    }

    /// Stop accepting work, let queued jobs finish, then wait for the workers.
    /// Later calls return immediately.
    pub async fn shutdown(&self) {
        drop(self.tx.lock().unwrap_or_else(|e| e.into_inner()).take());
        let workers = std::mem::take(&mut *self.workers.lock().unwrap_or_else(|e| e.into_inner()));
        for worker in workers {
            if let Err(e) = worker.await {
                warn!("Pipeline worker ended abnormally: {}", e);
            }
        }
    }
}

/// Run one job in its own task. A panic marks the job failed.
async fn run_isolated(orchestrator: &Arc<Orchestrator>, run: QueuedRun) {
    let QueuedRun { job_id, request } = run;
    let task = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.run(job_id, request).await })
    };
    let Err(e) = task.await else { return };

    let message = if e.is_panic() {
        format!("Pipeline failed: {}", panic_message(e.into_panic()))
    } else {
        format!("Pipeline failed: {e}")
    };
    error!(job_id = %job_id, "{}", message);
    if let Err(mark_err) = orchestrator.jobs().update(job_id, JobUpdate::failed(message)).await {
        warn!(job_id = %job_id, "Could not mark job failed: {}", mark_err);
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(s) => *s,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(s) => s.to_string(),
            Err(_) => "panic with non-string payload".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Barrier;

    use affinity_molecules::admet::{AdmetError, AdmetPrediction, AdmetPredictor, InMemoryAdmetResultRepository};
    use affinity_molecules::docking::{DockedPose, DockingEngine, SearchBox};
    use affinity_molecules::ligand::InMemoryCandidateRepository;
    use affinity_molecules::pocket::{Pocket, PocketDetector};
    use affinity_molecules::sourcing::MoleculeGenerator;

    use crate::job::JobStatus;
    use crate::orchestrator::PipelineComponents;
    use crate::store::{InMemoryJobStore, InMemoryProteinRepository, Protein, ProteinRepository};

    struct NoDetection;

    #[async_trait]
    impl PocketDetector for NoDetection {
        async fn detect(&self, _structure_path: &Path) -> Result<Vec<Pocket>> {
            Ok(vec![])
        }
    }

    struct Ethanol;

    #[async_trait]
    impl MoleculeGenerator for Ethanol {
        async fn generate(&self, _target: Option<&str>, count: usize, _pocket: Option<&Pocket>) -> Result<Vec<String>> {
            Ok(vec!["CCO".to_string(); count.min(1)])
        }
    }

    /// Panics on the first docking call, succeeds afterwards.
    #[derive(Default)]
    struct PanicOnce(std::sync::atomic::AtomicBool);

    #[async_trait]
    impl DockingEngine for PanicOnce {
        async fn dock(&self, _smiles: &str, _path: &Path, _box: Option<&SearchBox>) -> Result<DockedPose> {
            if !self.0.swap(true, std::sync::atomic::Ordering::SeqCst) {
                panic!("receptor grid exploded");
            }
            Ok(pose())
        }
    }

    /// Every call waits until `parties` calls are in flight at once.
    struct Rendezvous(Barrier);

    #[async_trait]
    impl DockingEngine for Rendezvous {
        async fn dock(&self, _smiles: &str, _path: &Path, _box: Option<&SearchBox>) -> Result<DockedPose> {
            tokio::time::timeout(Duration::from_secs(5), self.0.wait())
                .await
                .map_err(|_| ScreeningError::Pipeline("jobs did not run concurrently".to_string()))?;
            Ok(pose())
        }
    }

    struct Slow;

    #[async_trait]
    impl DockingEngine for Slow {
        async fn dock(&self, _smiles: &str, _path: &Path, _box: Option<&SearchBox>) -> Result<DockedPose> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(pose())
        }
    }

    struct NoAdmet;

    #[async_trait]
    impl AdmetPredictor for NoAdmet {
        async fn predict(&self, _smiles: &str) -> std::result::Result<AdmetPrediction, AdmetError> {
            Err(AdmetError::Unavailable("not installed".to_string()))
        }
    }

    fn pose() -> DockedPose {
        DockedPose {
            pose_path: PathBuf::from("pose.pdbqt"),
            score: -6.5,
            log_path: PathBuf::from("vina.log"),
        }
    }

    fn request() -> PipelineRequest {
        PipelineRequest {
            max_molecules: 1,
            pocket: Some(Pocket::new([0.0, 0.0, 0.0], [20.0, 20.0, 20.0], "manual")),
        }
    }

    struct Setup {
        jobs: Arc<dyn JobStore>,
        owner: Uuid,
        protein_id: Uuid,
        executor: JobExecutor,
    }

    async fn setup(docking: Arc<dyn DockingEngine>, workers: usize) -> Setup {
        let owner = Uuid::new_v4();
        let proteins = Arc::new(InMemoryProteinRepository::new());
        let protein = proteins
            .insert(Protein::new(owner, "KRAS", "missing.pdb"))
            .await
            .unwrap();
        let jobs: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
        let config = PipelineConfig { workers, queue_capacity: 8, ..PipelineConfig::default() };
        let orchestrator = Arc::new(Orchestrator::new(
            PipelineComponents {
                jobs: jobs.clone(),
                proteins,
                candidates: Arc::new(InMemoryCandidateRepository::new()),
                detector: Arc::new(NoDetection),
                generator: Arc::new(Ethanol),
                docking,
                admet: Arc::new(NoAdmet),
                admet_results: Arc::new(InMemoryAdmetResultRepository::new()),
            },
            &config,
        ));
        Setup {
            jobs,
            owner,
            protein_id: protein.id,
            executor: JobExecutor::start(orchestrator, &config),
        }
    }

    async fn status_of(jobs: &Arc<dyn JobStore>, id: JobId) -> (JobStatus, Option<String>) {
        let job = jobs.get(id).await.unwrap().unwrap();
        (job.status, job.message)
    }

    #[tokio::test]
    async fn test_panicking_stage_fails_only_its_job() {
        let s = setup(Arc::new(PanicOnce::default()), 1).await;
        let first = s.executor.submit(s.owner, s.protein_id, request()).await.unwrap();
        let second = s.executor.submit(s.owner, s.protein_id, request()).await.unwrap();
        s.executor.shutdown().await;

        let (status, message) = status_of(&s.jobs, first).await;
        assert_eq!(status, JobStatus::Failed);
        assert_eq!(message.as_deref(), Some("Pipeline failed: receptor grid exploded"));

        let (status, _) = status_of(&s.jobs, second).await;
        assert_eq!(status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_workers_run_jobs_concurrently() {
        let s = setup(Arc::new(Rendezvous(Barrier::new(2))), 2).await;
        assert_eq!(s.executor.worker_count(), 2);

        let a = s.executor.submit(s.owner, s.protein_id, request()).await.unwrap();
        let b = s.executor.submit(s.owner, s.protein_id, request()).await.unwrap();
        s.executor.shutdown().await;

        for id in [a, b] {
            let (status, message) = status_of(&s.jobs, id).await;
            assert_eq!(status, JobStatus::Completed, "{message:?}");
        }
    }

    #[tokio::test]
    async fn test_zero_workers_still_starts_one() {
        let s = setup(Arc::new(Slow), 0).await;
        assert_eq!(s.executor.worker_count(), 1);
        s.executor.shutdown().await;
        assert_eq!(s.executor.worker_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_finishes_queued_jobs() {
        let s = setup(Arc::new(Slow), 1).await;
        let mut ids = Vec::new();
        for _ in 0..4 {
            ids.push(s.executor.submit(s.owner, s.protein_id, request()).await.unwrap());
        }
        s.executor.shutdown().await;

        for id in ids {
            assert_eq!(status_of(&s.jobs, id).await.0, JobStatus::Completed);
        }
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_fails_the_job() {
        let s = setup(Arc::new(Slow), 1).await;
        s.executor.shutdown().await;

        let err = s.executor.submit(s.owner, s.protein_id, request()).await.unwrap_err();
        assert!(matches!(err, ScreeningError::Pipeline(_)));

        let listed = s.jobs.list_for_owner(s.owner).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, JobStatus::Failed);
        assert_eq!(listed[0].message.as_deref(), Some("Executor is shut down"));
    }
}
