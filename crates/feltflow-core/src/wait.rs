//! Polling a batch of started compute jobs until they are terminal.

use crate::error::{FlowError, FlowResult};
use crate::job::{ComputeJob, JobState, JobSummary};
use crate::progress::{ProgressEvent, ProgressSink};
use feltflow_abstraction::WalletSigner;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// How long and how often to poll. Without a deadline or cancellation token
/// polling continues until every job is terminal.
#[derive(Debug, Clone)]
pub struct PollOptions {
    pub interval: Duration,
    pub deadline: Option<Duration>,
    pub cancel: Option<CancellationToken>,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self { interval: DEFAULT_POLL_INTERVAL, deadline: None, cancel: None }
    }
}

impl PollOptions {
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Polls `jobs` in sequence until all are finished.
///
/// Returns `RemoteJobFailure` as soon as one poll round sees a failed job,
/// without waiting for the others. A transport error while polling counts as
/// "still running" for that round.
pub async fn wait_for_jobs(
    jobs: &mut [ComputeJob],
    payer: &dyn WalletSigner,
    options: &PollOptions,
    progress: &dyn ProgressSink,
) -> FlowResult<()> {
    let started = Instant::now();

    loop {
        let mut states = Vec::with_capacity(jobs.len());
        for job in jobs.iter_mut() {
            let state = match job.check_status(payer).await {
                Ok(state) => state,
                Err(FlowError::Client(err)) => {
                    warn!(did = %job.did(), job_id = ?job.job_id(), error = %err, "Polling compute job failed");
                    job.state()
                }
                Err(err) => return Err(err),
            };
            states.push(state);
        }
        progress.on_event(ProgressEvent::JobStatus { jobs: summaries(jobs) });

        if states.contains(&JobState::Failed) {
            return Err(FlowError::RemoteJobFailure { jobs: summaries(jobs) });
        }
        if states.iter().all(|state| *state == JobState::Finished) {
            return Ok(());
        }

        let mut pause = options.interval;
        if let Some(deadline) = options.deadline {
            let waited = started.elapsed();
            if waited >= deadline {
                return Err(FlowError::PollTimeout { waited, jobs: summaries(jobs) });
            }
            pause = pause.min(deadline - waited);
        }
        debug!(pause_ms = pause.as_millis(), "Compute jobs still running");

        match &options.cancel {
            Some(cancel) => {
                tokio::select! {
                    () = cancel.cancelled() => return Err(FlowError::Cancelled),
                    () = tokio::time::sleep(pause) => {}
                }
            }
            None => tokio::time::sleep(pause).await,
        }
    }
}

fn summaries(jobs: &[ComputeJob]) -> Vec<JobSummary> {
    jobs.iter().map(ComputeJob::summary).collect()
}
