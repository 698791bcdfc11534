use crate::job::{JobState, JobSummary};
use feltflow_abstraction::{ClientError, TokenAmount};
use std::time::Duration;
use thiserror::Error;

pub type FlowResult<T> = std::result::Result<T, FlowError>;

#[derive(Debug, Error)]
pub enum FlowError {
    /// A dataset, algorithm or compute environment could not be resolved.
    #[error("couldn't resolve asset {did}: {reason}")]
    AssetResolution { did: String, reason: String },

    #[error("unsupported access details for datatoken {datatoken}: {reason}")]
    UnsupportedAccess { datatoken: String, reason: String },

    #[error(
        "your token balance {available} {symbol} is not sufficient to execute the requested \
         service; it requires {required} {symbol} (short by {shortfall})"
    )]
    InsufficientBalance {
        token: String,
        symbol: String,
        required: TokenAmount,
        available: TokenAmount,
        shortfall: TokenAmount,
    },

    #[error("compute job must be {required}, but it is {actual}")]
    InvalidJobState { required: &'static str, actual: JobState },

    #[error("some compute job failed: {}", format_summaries(.jobs))]
    RemoteJobFailure { jobs: Vec<JobSummary> },

    /// The job store rejected a write. Payments made before it stand.
    #[error("failed to store '{field}' in job store: {source}")]
    StorageWrite {
        field: String,
        #[source]
        source: ClientError,
    },

    #[error("compute jobs still not finished after {waited:?}: {}", format_summaries(.jobs))]
    PollTimeout { waited: Duration, jobs: Vec<JobSummary> },

    #[error("waiting for compute jobs was cancelled")]
    Cancelled,

    #[error("compute job {job_id} has no result file named '{filename}'")]
    ResultNotFound { job_id: String, filename: String },

    #[error("compute input {did} has no transfer transaction")]
    UnpaidInput { did: String },

    #[error("invalid training configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

fn format_summaries(jobs: &[JobSummary]) -> String {
    jobs.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}
