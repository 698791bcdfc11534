//! Compute-to-data provider client.
//!
//! Every call takes the provider's service endpoint, since datasets of one
//! run may be hosted by different providers. Requests that act on behalf of
//! the payer are signed through the `WalletSigner`.

use crate::http::{check_status, fetch_json, json, send, trim_base};
use async_trait::async_trait;
use feltflow_abstraction::{
    ClientError, ClientResult, ComputeEnvironment, ComputeInput, ComputeProvider, ComputeSubmission,
    InitializeRequest, InitializeResponse, JobInfo, JobStatusReport, Nonce, ResultFile, ResultUrlRequest,
    WalletSigner,
};
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Lifetime of auth tokens; they are kept with the job record to fetch results later.
pub const AUTH_TOKEN_LIFETIME_SECS: u64 = 3600 * 24 * 5000;

const SERVICES_PATH: &str = "/api/services";

#[derive(Deserialize)]
#[serde(untagged)]
enum Environments {
    List(Vec<ComputeEnvironment>),
    ByChain(BTreeMap<String, Vec<ComputeEnvironment>>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    fn first(self, what: &str) -> ClientResult<T> {
        match self {
            Self::One(item) => Ok(item),
            Self::Many(items) => items
                .into_iter()
                .next()
                .ok_or_else(|| ClientError::SerializationError(format!("{what}: empty response list"))),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProviderJobStatus {
    #[serde(default)]
    status: i64,
    #[serde(default)]
    status_text: String,
    #[serde(default)]
    results: Vec<ResultFile>,
}

#[derive(Deserialize)]
struct AuthTokenResponse {
    token: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AuthTokenRequest<'a> {
    address: &'a str,
    expiration: String,
    signature: String,
    nonce: Nonce,
}

#[derive(Debug, Clone)]
pub struct HttpComputeProvider {
    client: Client,
}

impl Default for HttpComputeProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpComputeProvider {
    pub fn new() -> Self {
        Self::with_client(Client::new())
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn url(endpoint: &str, name: &str) -> String {
        format!("{}{SERVICES_PATH}/{name}", trim_base(endpoint))
    }

    /// Provider payload for one input: `{documentId, serviceId, transferTxId, userdata}`.
    fn input_payload(input: &ComputeInput) -> ClientResult<Map<String, Value>> {
        match serde_json::to_value(input)? {
            Value::Object(map) => Ok(map),
            other => Err(ClientError::SerializationError(format!("compute input encoded as {other}"))),
        }
    }

    fn submission_payload(submission: &ComputeSubmission) -> ClientResult<Value> {
        let mut algorithm = Self::input_payload(&submission.algorithm)?;
        if let Some(custom) = &submission.algocustomdata {
            algorithm.insert("algocustomdata".to_string(), custom.clone());
        }
        let additional = submission
            .additional_datasets
            .iter()
            .filter(|input| input.did != submission.dataset.did)
            .map(Self::input_payload)
            .collect::<ClientResult<Vec<_>>>()?;

        Ok(json!({
            "dataset": Self::input_payload(&submission.dataset)?,
            "algorithm": algorithm,
            "environment": submission.environment,
            "nonce": submission.nonce,
            "consumerAddress": submission.consumer_address,
            "additionalInputs": additional,
        }))
    }

    async fn signed_query(
        payer: &dyn WalletSigner,
        job_id: &str,
        suffix: &str,
    ) -> ClientResult<Vec<(&'static str, String)>> {
        let nonce = Nonce::now();
        let consumer = payer.address();
        let signature = payer.sign(&format!("{consumer}{job_id}{suffix}"), nonce).await?;
        Ok(vec![
            ("consumerAddress", consumer.to_string()),
            ("jobId", job_id.to_string()),
            ("nonce", nonce.to_string()),
            ("signature", signature),
        ])
    }
}

#[async_trait]
impl ComputeProvider for HttpComputeProvider {
    async fn environments(&self, endpoint: &str, chain_id: u64) -> ClientResult<Vec<ComputeEnvironment>> {
        let url = Self::url(endpoint, "computeEnvironments");
        let request = self.client.get(&url).query(&[("chainId", chain_id)]);
        let environments: Environments = fetch_json(request, "compute environments").await?;
        Ok(match environments {
            Environments::List(list) => list,
            Environments::ByChain(mut by_chain) => by_chain.remove(&chain_id.to_string()).unwrap_or_default(),
        })
    }

    async fn initialize(&self, endpoint: &str, request: &InitializeRequest) -> ClientResult<InitializeResponse> {
        let datasets = request.datasets.iter().map(Self::input_payload).collect::<ClientResult<Vec<_>>>()?;
        let payload = json!({
            "datasets": datasets,
            "algorithm": Self::input_payload(&request.algorithm)?,
            "compute": {"env": request.environment, "validUntil": request.valid_until},
            "consumerAddress": request.consumer_address,
        });
        debug!(endpoint = %endpoint, datasets = request.datasets.len(), valid_until = request.valid_until, "Initializing compute");

        let url = Self::url(endpoint, "initializeCompute");
        fetch_json(self.client.post(&url).json(&payload), "initialize compute").await
    }

    async fn create_auth_token(&self, endpoint: &str, payer: &dyn WalletSigner) -> ClientResult<String> {
        let nonce = Nonce::now();
        let address = payer.address();
        let signature = payer.sign(address, nonce).await?;
        let body = AuthTokenRequest {
            address,
            expiration: (nonce.0 / 1000 + AUTH_TOKEN_LIFETIME_SECS).to_string(),
            signature,
            nonce,
        };

        let url = Self::url(endpoint, "createAuthToken");
        let response: AuthTokenResponse = fetch_json(self.client.get(&url).json(&body), "create auth token").await?;
        Ok(response.token)
    }

    async fn submit(&self, endpoint: &str, auth_token: &str, submission: &ComputeSubmission) -> ClientResult<JobInfo> {
        let payload = Self::submission_payload(submission)?;
        let url = Self::url(endpoint, "compute");
        let request = self.client.post(&url).header("AuthToken", auth_token).json(&payload);

        let jobs: OneOrMany<JobInfo> = fetch_json(request, "start compute").await?;
        let info = jobs.first("start compute")?;
        info!(endpoint = %endpoint, job_id = %info.job_id, did = %submission.dataset.did, "Compute job submitted");
        Ok(info)
    }

    async fn status(&self, endpoint: &str, payer: &dyn WalletSigner, job_id: &str) -> ClientResult<JobStatusReport> {
        let query = Self::signed_query(payer, job_id, "").await?;
        let url = Self::url(endpoint, "compute");
        let response = send(self.client.get(&url).query(&query), "compute status").await?;

        // The provider no longer knows or accepts the job. Other statuses
        // (throttling, timeouts) are left to the poll loop to retry.
        if matches!(response.status(), StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND) {
            let status_text = response.text().await.unwrap_or_default();
            return Ok(JobStatusReport { ok: false, status: 0, status_text, results: Vec::new() });
        }
        let response = check_status(response, "compute status").await?;
        let jobs: OneOrMany<ProviderJobStatus> = json(response, "compute status").await?;
        let job = jobs.first("compute status")?;
        Ok(JobStatusReport { ok: true, status: job.status, status_text: job.status_text, results: job.results })
    }

    async fn result(
        &self,
        endpoint: &str,
        payer: &dyn WalletSigner,
        job_id: &str,
        index: usize,
    ) -> ClientResult<Vec<u8>> {
        let mut query = Self::signed_query(payer, job_id, &index.to_string()).await?;
        query.push(("index", index.to_string()));
        let url = Self::url(endpoint, "computeResult");

        let response = check_status(send(self.client.get(&url).query(&query), "compute result").await?, "compute result").await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ClientError::RequestError(format!("compute result: failed to read body: {e}")))?;
        Ok(bytes.to_vec())
    }

    fn result_url(&self, endpoint: &str, request: &ResultUrlRequest<'_>) -> ClientResult<String> {
        let base = Self::url(endpoint, "computeResult");
        let url = Url::parse_with_params(
            &base,
            &[
                ("signature", request.signature.to_string()),
                ("nonce", request.nonce.to_string()),
                ("jobId", request.job_id.to_string()),
                ("index", request.index.to_string()),
                ("consumerAddress", request.consumer_address.to_string()),
            ],
        )
        .map_err(|e| ClientError::RequestError(format!("invalid provider endpoint '{endpoint}': {e}")))?;
        Ok(url.into())
    }
}
