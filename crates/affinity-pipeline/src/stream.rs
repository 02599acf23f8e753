//! Polling progress stream for a single job.
//!
//! Snapshots are emitted every `interval` until the job reaches a terminal
//! state; the terminal snapshot is always the last item. [`sse_frame`] turns a
//! snapshot into a Server-Sent Events `data:` frame for HTTP layers.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, Stream};
use tracing::debug;
use uuid::Uuid;

use affinity_common::{Result, ScreeningError};

use crate::job::{JobId, JobSnapshot};
use crate::store::JobStore;

enum Poll {
    First,
    Next,
    Done,
}

/// Watch `job_id` until it finishes. A missing job yields one `NotFound`
/// error and ends the stream.
pub fn watch_job(
    jobs: Arc<dyn JobStore>,
    job_id: JobId,
    interval: Duration,
) -> impl Stream<Item = Result<JobSnapshot>> + Send {
    watch(jobs, job_id, None, interval)
}

/// Like [`watch_job`], but a job that does not belong to `owner_id` is
/// reported as not found.
pub fn watch_owned_job(
    jobs: Arc<dyn JobStore>,
    job_id: JobId,
    owner_id: Uuid,
    interval: Duration,
) -> impl Stream<Item = Result<JobSnapshot>> + Send {
    watch(jobs, job_id, Some(owner_id), interval)
}

fn watch(
    jobs: Arc<dyn JobStore>,
    job_id: JobId,
    owner_id: Option<Uuid>,
    interval: Duration,
) -> impl Stream<Item = Result<JobSnapshot>> + Send {
    stream::unfold(Poll::First, move |state| {
        let jobs = jobs.clone();
        async move {
            match state {
                Poll::Done => return None,
                Poll::Next => tokio::time::sleep(interval).await,
                Poll::First => {}
            }

            let fetched = match owner_id {
                Some(owner) => jobs.get_for_owner(job_id, owner).await.map(Some),
                None => jobs.get(job_id).await,
            };
            let item = match fetched {
                Ok(Some(job)) => Ok(job.snapshot()),
                Ok(None) => Err(ScreeningError::NotFound(format!("job {job_id}"))),
                Err(e) => Err(e),
            };

            let next = match &item {
                Ok(snapshot) if !snapshot.is_terminal() => Poll::Next,
                Ok(snapshot) => {
                    debug!(job_id = %job_id, status = %snapshot.status, "Job stream finished");
                    Poll::Done
                }
                Err(_) => Poll::Done,
            };
            Some((item, next))
        }
    })
}

/// Encode a snapshot as one SSE frame: `data: <json>\n\n`.
pub fn sse_frame(snapshot: &JobSnapshot) -> Result<String> {
    Ok(format!("data: {}\n\n", serde_json::to_string(snapshot)?))
}
