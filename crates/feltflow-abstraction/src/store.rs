//! Durable record of a training run, kept by the job store backend.

use crate::ClientResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Algorithm DIDs used by a federated run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlgorithmAssets {
    /// Local training algorithm, run once per dataset and round.
    pub training: String,
    /// Aggregation algorithm, run once per multi-dataset round.
    pub aggregation: String,
    /// Placeholder dataset the aggregation job is attached to.
    pub empty_dataset: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlgorithmConfig {
    pub assets: AlgorithmAssets,
}

/// The job store document of one launch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    #[serde(default)]
    pub launch_token: Option<String>,
    /// Set once a run has started; a second launch must be refused.
    #[serde(default)]
    pub job_id: Option<String>,
    pub name: String,
    pub chain_id: u64,
    #[serde(rename = "dataDIDs")]
    pub data_dids: Vec<String>,
    pub algo_config: AlgorithmConfig,
    #[serde(default)]
    pub algo_custom_data: Value,
    /// Public key auth tokens are sealed for.
    #[serde(default)]
    pub public_key: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

impl JobRecord {
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.job_id.is_some()
    }
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Stores a new record under `launch_token`.
    async fn create(&self, launch_token: &str, record: &JobRecord) -> ClientResult<()>;

    /// Sets `field_path` (dot separated) of the record to `value`.
    async fn update(&self, launch_token: &str, field_path: &str, value: Value) -> ClientResult<()>;

    async fn get(&self, launch_token: &str) -> ClientResult<JobRecord>;
}
