//! One remote compute-to-data execution and its lifecycle.

use crate::access::{ensure_supported, fetch_access_details};
use crate::approvals::ApprovalLedger;
use crate::error::{FlowError, FlowResult};
use crate::payment::{PaymentRequest, PaymentResolver};
use chrono::Utc;
use feltflow_abstraction::{
    Asset, AssetResolver, ComputeEnvironment, ComputeInput, ComputeProvider, ComputeSubmission,
    ClientError, InitializeItem, InitializeRequest, JobInfo, Marketplace, Nonce, ResultFile,
    ResultUrlRequest, Service, SubgraphClient, TokenFee, WalletSigner, COMPUTE_SERVICE_TYPE,
    JOB_STATUS_FINISHED,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Validity horizon used when neither the environment nor the services bound it.
pub const DEFAULT_VALIDITY_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Init,
    Running,
    Finished,
    Failed,
}

impl JobState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Identity and state of a job, as reported in errors and progress events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub did: String,
    pub job_id: Option<String>,
    pub state: JobState,
}

impl fmt::Display for JobSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.did, self.job_id.as_deref().unwrap_or("-"), self.state)
    }
}

/// Collaborators shared by every job of a training run.
#[derive(Clone)]
pub struct ComputeContext {
    pub chain_id: u64,
    pub assets: Arc<dyn AssetResolver>,
    pub provider: Arc<dyn ComputeProvider>,
    pub market: Arc<dyn Marketplace>,
    pub subgraph: Arc<dyn SubgraphClient>,
    /// Consume-market fee charged on orders; a zero fee to the payer when unset.
    pub consume_market_fee: Option<TokenFee>,
}

impl fmt::Debug for ComputeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputeContext")
            .field("chain_id", &self.chain_id)
            .field("consume_market_fee", &self.consume_market_fee)
            .finish_non_exhaustive()
    }
}

/// What `start` hands back: the provider's job description, the auth token
/// used to submit it and the submission nonce.
#[derive(Debug, Clone)]
pub struct StartedJob {
    pub info: JobInfo,
    pub auth_token: String,
    pub nonce: Nonce,
}

/// A compute job: `init → running → {finished, failed}`.
///
/// Jobs on several datasets run on the provider of the first dataset.
pub struct ComputeJob {
    ctx: ComputeContext,
    datasets: Vec<Asset>,
    algorithm: Asset,
    algocustomdata: Value,
    environment: ComputeEnvironment,
    state: JobState,
    job_id: Option<String>,
    results: Vec<ResultFile>,
}

impl fmt::Debug for ComputeJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputeJob")
            .field("did", &self.did())
            .field("algorithm", &self.algorithm.id)
            .field("environment", &self.environment.id)
            .field("state", &self.state)
            .field("job_id", &self.job_id)
            .finish_non_exhaustive()
    }
}

impl ComputeJob {
    /// Resolves the datasets and the algorithm, checks that each can be paid
    /// for and picks a compute environment.
    ///
    /// Nothing is paid or submitted here.
    pub async fn new(
        ctx: ComputeContext,
        dataset_dids: &[String],
        algorithm_did: &str,
        algocustomdata: Value,
    ) -> FlowResult<Self> {
        if dataset_dids.is_empty() {
            return Err(FlowError::InvalidConfig("a compute job needs at least one dataset".to_string()));
        }

        let mut datasets = Vec::with_capacity(dataset_dids.len());
        for did in dataset_dids {
            let asset = resolve_asset(ctx.assets.as_ref(), did).await?;
            let service = first_service(&asset)?;
            if service.service_type != COMPUTE_SERVICE_TYPE {
                return Err(FlowError::AssetResolution {
                    did: did.clone(),
                    reason: format!("service '{}' is not a compute service", service.id),
                });
            }
            datasets.push(asset);
        }
        let algorithm = resolve_asset(ctx.assets.as_ref(), algorithm_did).await?;
        first_service(&algorithm)?;

        let now = Utc::now().timestamp();
        for asset in datasets.iter().chain(std::iter::once(&algorithm)) {
            ensure_supported(ctx.subgraph.as_ref(), first_service(asset)?, now).await?;
        }

        let endpoint = first_service(&datasets[0])?.service_endpoint.clone();
        let environments = ctx.provider.environments(&endpoint, ctx.chain_id).await?;
        let free = environments.iter().position(|env| env.free);
        let environment = match free {
            Some(index) => environments.into_iter().nth(index),
            None => environments.into_iter().next(),
        }
        .ok_or_else(|| FlowError::AssetResolution {
            did: datasets[0].id.clone(),
            reason: format!("provider {endpoint} offers no compute environment"),
        })?;

        debug!(
            did = %datasets[0].id,
            algorithm = %algorithm.id,
            environment = %environment.id,
            free = environment.free,
            "Compute job prepared"
        );

        Ok(Self {
            ctx,
            datasets,
            algorithm,
            algocustomdata,
            environment,
            state: JobState::Init,
            job_id: None,
            results: Vec::new(),
        })
    }

    /// DID of the first dataset.
    #[must_use]
    pub fn did(&self) -> &str {
        &self.datasets[0].id
    }

    #[must_use]
    pub fn dataset_dids(&self) -> Vec<&str> {
        self.datasets.iter().map(|asset| asset.id.as_str()).collect()
    }

    #[must_use]
    pub fn algorithm_did(&self) -> &str {
        &self.algorithm.id
    }

    #[must_use]
    pub fn algocustomdata(&self) -> &Value {
        &self.algocustomdata
    }

    #[must_use]
    pub fn environment(&self) -> &ComputeEnvironment {
        &self.environment
    }

    #[must_use]
    pub fn state(&self) -> JobState {
        self.state
    }

    /// Provider-assigned id, set once started.
    #[must_use]
    pub fn job_id(&self) -> Option<&str> {
        self.job_id.as_deref()
    }

    #[must_use]
    pub fn summary(&self) -> JobSummary {
        JobSummary { did: self.did().to_string(), job_id: self.job_id.clone(), state: self.state }
    }

    /// Pays for every input and submits the job. Only valid in `init`.
    pub async fn start(&mut self, payer: &dyn WalletSigner, nonce: Option<Nonce>) -> FlowResult<StartedJob> {
        if self.state != JobState::Init {
            return Err(FlowError::InvalidJobState { required: "init", actual: self.state });
        }

        let account = payer.address();
        let endpoint = self.endpoint().to_string();
        let now = Utc::now().timestamp();

        let mut requests = Vec::with_capacity(self.datasets.len() + 1);
        for asset in self.datasets.iter().chain(std::iter::once(&self.algorithm)) {
            requests.push(self.payment_request(asset, account, now).await?);
        }

        let algorithm_service = first_service(&self.algorithm)?;
        let dataset_timeout = first_service(&self.datasets[0])?.timeout;
        let valid_until = valid_until(
            now,
            [self.environment.max_job_duration, dataset_timeout, algorithm_service.timeout],
        );

        let (dataset_requests, algorithm_request) = requests.split_at(self.datasets.len());
        let initialize = InitializeRequest {
            datasets: dataset_requests.iter().map(|r| r.input.clone()).collect(),
            algorithm: algorithm_request[0].input.clone(),
            consumer_address: account.to_string(),
            environment: self.environment.id.clone(),
            valid_until,
        };
        let response = self.ctx.provider.initialize(&endpoint, &initialize).await?;
        if response.datasets.len() != self.datasets.len() {
            return Err(ClientError::Other(format!(
                "initialize returned {} dataset items for {} datasets",
                response.datasets.len(),
                self.datasets.len()
            ))
            .into());
        }
        let items = response
            .datasets
            .into_iter()
            .chain(std::iter::once(response.algorithm.unwrap_or_default()));
        for (request, item) in requests.iter_mut().zip(items) {
            request.item = item;
        }

        let consumer = if self.environment.consumer_address.is_empty() {
            account.to_string()
        } else {
            self.environment.consumer_address.clone()
        };
        let resolver = PaymentResolver::new(self.ctx.market.as_ref(), account, &consumer);
        let outcome = resolver.resolve(requests, ApprovalLedger::new()).await?;

        let mut inputs = outcome.inputs;
        if let Some(unpaid) = inputs.iter().find(|input| !input.is_paid()) {
            return Err(FlowError::UnpaidInput { did: unpaid.did.clone() });
        }
        let algorithm = inputs.pop().ok_or_else(|| FlowError::UnpaidInput { did: self.algorithm.id.clone() })?;
        let mut inputs = inputs.into_iter();
        let dataset = inputs.next().ok_or_else(|| FlowError::UnpaidInput { did: self.did().to_string() })?;

        let auth_token = self.ctx.provider.create_auth_token(&endpoint, payer).await?;
        let nonce = nonce.unwrap_or_else(Nonce::now);
        let submission = ComputeSubmission {
            consumer_address: account.to_string(),
            dataset,
            additional_datasets: inputs.collect(),
            algorithm,
            algocustomdata: Some(self.algocustomdata.clone()),
            environment: self.environment.id.clone(),
            nonce,
        };
        let info = self.ctx.provider.submit(&endpoint, &auth_token, &submission).await?;

        self.job_id = Some(info.job_id.clone());
        self.state = JobState::Running;
        info!(
            did = %self.did(),
            job_id = %info.job_id,
            transactions = outcome.transactions.len(),
            approvals = outcome.approvals_sent,
            "Compute job started"
        );

        Ok(StartedJob { info, auth_token, nonce })
    }

    /// Polls the provider once. Terminal states are returned as they are.
    pub async fn check_status(&mut self, payer: &dyn WalletSigner) -> FlowResult<JobState> {
        let job_id = match self.state {
            JobState::Init => {
                return Err(FlowError::InvalidJobState { required: "started", actual: self.state });
            }
            JobState::Finished | JobState::Failed => return Ok(self.state),
            JobState::Running => self.started_job_id()?.to_string(),
        };

        let report = self.ctx.provider.status(self.endpoint(), payer, &job_id).await?;
        if !report.ok {
            self.state = JobState::Failed;
        } else if report.status == JOB_STATUS_FINISHED {
            self.state = JobState::Finished;
            self.results = report.results;
        }
        debug!(job_id = %job_id, status = report.status, status_text = %report.status_text, state = %self.state, "Compute job polled");

        Ok(self.state)
    }

    /// Result files in provider order; a file's position is its result index.
    pub fn outputs(&self) -> FlowResult<&[ResultFile]> {
        self.require_finished()?;
        Ok(&self.results)
    }

    /// Signed URL of one result file, valid for anyone holding it.
    pub async fn file_url(&self, filename: &str, payer: &dyn WalletSigner, nonce: Option<Nonce>) -> FlowResult<String> {
        let index = self.result_index(filename)?;
        let job_id = self.started_job_id()?;
        let nonce = nonce.unwrap_or_else(Nonce::now);
        let consumer = payer.address();

        let signature = payer.sign(&format!("{consumer}{job_id}{index}"), nonce).await?;
        let url = self.ctx.provider.result_url(
            self.endpoint(),
            &ResultUrlRequest { job_id, index, consumer_address: consumer, signature: &signature, nonce },
        )?;
        Ok(url)
    }

    /// Downloads one result file.
    pub async fn file(&self, filename: &str, payer: &dyn WalletSigner) -> FlowResult<Vec<u8>> {
        let index = self.result_index(filename)?;
        let job_id = self.started_job_id()?;
        Ok(self.ctx.provider.result(self.endpoint(), payer, job_id, index).await?)
    }

    fn result_index(&self, filename: &str) -> FlowResult<usize> {
        self.require_finished()?;
        self.results.iter().position(|file| file.filename == filename).ok_or_else(|| {
            FlowError::ResultNotFound {
                job_id: self.job_id.clone().unwrap_or_default(),
                filename: filename.to_string(),
            }
        })
    }

    fn require_finished(&self) -> FlowResult<()> {
        if self.state == JobState::Finished {
            Ok(())
        } else {
            Err(FlowError::InvalidJobState { required: "finished", actual: self.state })
        }
    }

    fn started_job_id(&self) -> FlowResult<&str> {
        self.job_id
            .as_deref()
            .ok_or(FlowError::InvalidJobState { required: "started", actual: self.state })
    }

    fn endpoint(&self) -> &str {
        self.datasets[0].services.first().map_or("", |service| service.service_endpoint.as_str())
    }

    async fn payment_request(&self, asset: &Asset, account: &str, now: i64) -> FlowResult<PaymentRequest> {
        let service = first_service(asset)?;
        let access = fetch_access_details(self.ctx.subgraph.as_ref(), service, account, now).await?;

        let mut input = ComputeInput::new(asset.id.clone(), service.id.clone());
        input.transfer_tx_id = access.reusable_order().map(str::to_string);

        Ok(PaymentRequest {
            input,
            datatoken: service.datatoken.clone(),
            service_index: asset.service_index(&service.id).unwrap_or(0),
            access,
            item: InitializeItem::default(),
            consume_market_fee: self
                .ctx
                .consume_market_fee
                .clone()
                .unwrap_or_else(|| TokenFee::none(account)),
        })
    }
}

/// Unix time until which provider fees must stay valid.
///
/// `durations` are the environment's maximum job duration and the dataset and
/// algorithm service timeouts; zero entries are unbounded. The smallest one is
/// added as minutes.
#[must_use]
pub fn valid_until(now: i64, durations: [u64; 3]) -> i64 {
    let horizon = durations
        .into_iter()
        .filter(|d| *d > 0)
        .min()
        .map_or(DEFAULT_VALIDITY_SECS, |minutes| minutes.saturating_mul(60));
    now.saturating_add(i64::try_from(horizon).unwrap_or(i64::MAX))
}

async fn resolve_asset(assets: &dyn AssetResolver, did: &str) -> FlowResult<Asset> {
    assets.resolve(did).await?.ok_or_else(|| FlowError::AssetResolution {
        did: did.to_string(),
        reason: "not found in metadata cache".to_string(),
    })
}

fn first_service(asset: &Asset) -> FlowResult<&Service> {
    asset.primary_service().ok_or_else(|| FlowError::AssetResolution {
        did: asset.id.clone(),
        reason: "asset has no services".to_string(),
    })
}
