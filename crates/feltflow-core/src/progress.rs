use crate::job::JobSummary;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    RoundStarted { round: usize, datasets: usize },
    JobStarted { round: usize, job: JobSummary },
    /// States of a batch of jobs after one poll.
    JobStatus { jobs: Vec<JobSummary> },
    RoundFinished { round: usize, final_job: JobSummary, outputs: Vec<String> },
}

pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: ProgressEvent);
}

/// Reports progress through `tracing`.
#[derive(Debug, Default)]
pub struct LogProgressSink;

impl ProgressSink for LogProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::RoundStarted { round, datasets } => {
                info!(round, datasets, "Training round started");
            }
            ProgressEvent::JobStarted { round, job } => {
                info!(round, did = %job.did, job_id = ?job.job_id, "Compute job submitted");
            }
            ProgressEvent::JobStatus { jobs } => {
                let states: Vec<String> = jobs.iter().map(ToString::to_string).collect();
                info!(states = ?states, "Compute job status");
            }
            ProgressEvent::RoundFinished { round, final_job, outputs } => {
                info!(round, final_job = %final_job, outputs = ?outputs, "Training round finished");
            }
        }
    }
}
