//! affinity-pipeline — Screening job lifecycle: the job state machine, the
//! stage orchestrator, background execution and progress streaming.

pub mod executor;
pub mod job;
pub mod orchestrator;
pub mod store;
pub mod stream;
pub mod summary;

pub use executor::JobExecutor;
pub use job::{Job, JobId, JobSnapshot, JobStatus, JobUpdate};
pub use orchestrator::{Orchestrator, PipelineComponents, PipelineRequest};
pub use store::{InMemoryJobStore, InMemoryProteinRepository, JobStore, Protein, ProteinRepository};
pub use stream::{sse_frame, watch_job, watch_owned_job};
pub use summary::RunSummary;
