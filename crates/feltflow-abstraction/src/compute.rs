//! Compute provider interface and its wire types.

use crate::amount::{self, TokenAmount};
use crate::market::WalletSigner;
use crate::nonce::Nonce;
use crate::ClientResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Provider status code reported once a job has finished and published results.
pub const JOB_STATUS_FINISHED: i64 = 70;

/// A compute environment advertised by a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputeEnvironment {
    pub id: String,
    /// Maximum job duration in seconds, zero meaning unbounded.
    #[serde(default)]
    pub max_job_duration: u64,
    /// Address the provider expects orders to be placed for.
    #[serde(default)]
    pub consumer_address: String,
    /// Whether the environment is free of charge.
    #[serde(default)]
    pub free: bool,
}

/// Fee charged by the compute provider, as returned by `initialize`.
///
/// Signature fields (`v`, `r`, `s`, `providerData`, `validUntil`) are opaque to
/// the core and kept in `extra` so they can be passed back on-chain unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderFee {
    pub provider_fee_address: String,
    pub provider_fee_token: String,
    #[serde(with = "amount::as_string")]
    pub provider_fee_amount: TokenAmount,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProviderFee {
    /// Whether anything has to be paid for this fee.
    #[must_use]
    pub fn is_due(&self) -> bool {
        self.provider_fee_amount > 0
    }
}

/// Per-input answer of the provider's initialize call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeItem {
    #[serde(default)]
    pub provider_fee: Option<ProviderFee>,
    /// Transaction id of a prior order that still grants access.
    #[serde(default)]
    pub valid_order: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InitializeResponse {
    #[serde(default)]
    pub datasets: Vec<InitializeItem>,
    #[serde(default)]
    pub algorithm: Option<InitializeItem>,
}

/// A dataset or algorithm input of a compute job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputeInput {
    #[serde(rename = "documentId")]
    pub did: String,
    pub service_id: String,
    /// Order transaction authorizing this input; must be set before submission.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_tx_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub userdata: Option<Value>,
}

impl ComputeInput {
    #[must_use]
    pub fn new(did: impl Into<String>, service_id: impl Into<String>) -> Self {
        Self { did: did.into(), service_id: service_id.into(), transfer_tx_id: None, userdata: None }
    }

    #[must_use]
    pub fn is_paid(&self) -> bool {
        self.transfer_tx_id.as_deref().is_some_and(|tx| !tx.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InitializeRequest {
    pub datasets: Vec<ComputeInput>,
    pub algorithm: ComputeInput,
    pub consumer_address: String,
    pub environment: String,
    /// Unix timestamp (seconds) until which the provider fee must stay valid.
    pub valid_until: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComputeSubmission {
    pub consumer_address: String,
    pub dataset: ComputeInput,
    pub additional_datasets: Vec<ComputeInput>,
    pub algorithm: ComputeInput,
    pub algocustomdata: Option<Value>,
    pub environment: String,
    pub nonce: Nonce,
}

/// Job description returned by the provider on submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobInfo {
    pub job_id: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultFile {
    pub filename: String,
    #[serde(rename = "type", default)]
    pub file_type: String,
}

/// Poll answer for a submitted job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusReport {
    /// False when the provider reports the job as failed or unknown.
    pub ok: bool,
    #[serde(default)]
    pub status: i64,
    #[serde(default)]
    pub status_text: String,
    #[serde(default)]
    pub results: Vec<ResultFile>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultUrlRequest<'a> {
    pub job_id: &'a str,
    pub index: usize,
    pub consumer_address: &'a str,
    pub signature: &'a str,
    pub nonce: Nonce,
}

/// A compute-to-data provider.
///
/// Every call takes the provider's service endpoint since datasets of one
/// training run may live on different providers.
#[async_trait]
pub trait ComputeProvider: Send + Sync {
    async fn environments(&self, endpoint: &str, chain_id: u64) -> ClientResult<Vec<ComputeEnvironment>>;

    async fn initialize(&self, endpoint: &str, request: &InitializeRequest) -> ClientResult<InitializeResponse>;

    /// Obtains an auth token for `payer`, later stored (sealed) with the job.
    async fn create_auth_token(&self, endpoint: &str, payer: &dyn WalletSigner) -> ClientResult<String>;

    async fn submit(
        &self,
        endpoint: &str,
        auth_token: &str,
        submission: &ComputeSubmission,
    ) -> ClientResult<JobInfo>;

    async fn status(&self, endpoint: &str, payer: &dyn WalletSigner, job_id: &str) -> ClientResult<JobStatusReport>;

    async fn result(
        &self,
        endpoint: &str,
        payer: &dyn WalletSigner,
        job_id: &str,
        index: usize,
    ) -> ClientResult<Vec<u8>>;

    /// Builds a pre-signed URL for one result file.
    fn result_url(&self, endpoint: &str, request: &ResultUrlRequest<'_>) -> ClientResult<String>;
}
