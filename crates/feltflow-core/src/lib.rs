//! Feltflow Core
//!
//! Federated training over payment-gated compute-to-data jobs:
//! - Deriving access details from the marketplace subgraph (`access`)
//! - Paying for compute inputs with batched token approvals (`payment`)
//! - The compute job lifecycle (`ComputeJob`)
//! - Polling batches of jobs (`wait_for_jobs`)
//! - Sequencing local training and aggregation rounds (`FederatedTraining`)

pub mod access;
pub mod approvals;
pub mod error;
pub mod job;
pub mod payment;
pub mod progress;
pub mod training;
pub mod wait;

#[cfg(test)]
mod testing;

pub use access::{fetch_access_details, AccessDetails, AccessType};
pub use approvals::{ensure_balance, ApprovalLedger};
pub use error::{FlowError, FlowResult};
pub use job::{valid_until, ComputeContext, ComputeJob, JobState, JobSummary, StartedJob, DEFAULT_VALIDITY_SECS};
pub use payment::{PaymentOutcome, PaymentRequest, PaymentResolver, ONE_DATATOKEN};
pub use progress::{LogProgressSink, ProgressEvent, ProgressSink};
pub use training::{FederatedTraining, TrainingMode, TrainingRound, TrainingSetup, MODEL_FILE, SOLO_SEED};
pub use wait::{wait_for_jobs, PollOptions, DEFAULT_POLL_INTERVAL};
