//! In-memory collaborators for unit tests.

use crate::access::{AccessDetails, AccessType};
use crate::job::ComputeContext;
use crate::progress::{ProgressEvent, ProgressSink};
use async_trait::async_trait;
use feltflow_abstraction::{
    Asset, AssetResolver, ClientError, ClientResult, ComputeEnvironment, ComputeProvider, ComputeSubmission,
    DatatokenRef, Dispenser, FixedRateExchange, InitializeItem, InitializeRequest, InitializeResponse, JobInfo,
    JobRecord, JobStatusReport, JobStore, Marketplace, Nonce, OrderParams, ProviderFee, ResultFile,
    ResultUrlRequest, Service, SubgraphClient, TokenAmount, TokenOrder, TokenPrice, TokenSealer, WalletSigner,
    COMPUTE_SERVICE_TYPE, JOB_STATUS_FINISHED,
};
use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

pub const ENDPOINT: &str = "https://provider.test";
pub const PAYER: &str = "0xpayer";

/// Datatoken of a test asset: `did:op:a` is gated by `0xdt-a`.
pub fn datatoken_of(did: &str) -> String {
    format!("0xdt-{}", did.trim_start_matches("did:op:"))
}

pub fn compute_asset(did: &str) -> Asset {
    Asset {
        id: did.to_string(),
        chain_id: 80001,
        services: vec![Service {
            id: format!("svc-{did}"),
            service_type: COMPUTE_SERVICE_TYPE.to_string(),
            datatoken: datatoken_of(did),
            service_endpoint: ENDPOINT.to_string(),
            timeout: 0,
        }],
    }
}

pub fn fee(token: &str, amount: TokenAmount) -> ProviderFee {
    ProviderFee {
        provider_fee_address: "0xprovider".to_string(),
        provider_fee_token: token.to_string(),
        provider_fee_amount: amount,
        extra: Map::new(),
    }
}

pub fn fixed_access() -> AccessDetails {
    AccessDetails { access_type: AccessType::Fixed, price: "1".to_string(), is_purchasable: true, ..AccessDetails::unsupported() }
}

pub fn free_access() -> AccessDetails {
    AccessDetails { access_type: AccessType::Free, price: "0".to_string(), is_purchasable: true, ..AccessDetails::unsupported() }
}

pub fn order(tx: &str, created_timestamp: i64) -> TokenOrder {
    TokenOrder { tx: tx.to_string(), service_index: 0, created_timestamp, reuses: Vec::new() }
}

/// A subgraph record for a datatoken with an active dispenser.
pub fn free_price() -> TokenPrice {
    TokenPrice {
        template_id: 1,
        dispensers: vec![Dispenser {
            id: "0xdispenser".to_string(),
            active: true,
            is_minter: true,
            max_balance: "1".to_string(),
            token: DatatokenRef { address: "0xdt".to_string(), name: "DT".to_string(), symbol: "DT".to_string() },
        }],
        ..TokenPrice::default()
    }
}

fn report(ok: bool, status: i64, results: Vec<ResultFile>) -> JobStatusReport {
    JobStatusReport { ok, status, status_text: String::new(), results }
}

pub fn running_report() -> JobStatusReport {
    report(true, 40, Vec::new())
}

pub fn finished_report() -> JobStatusReport {
    report(
        true,
        JOB_STATUS_FINISHED,
        vec![
            ResultFile { filename: "model".to_string(), file_type: "output".to_string() },
            ResultFile { filename: "logs".to_string(), file_type: "algorithmLog".to_string() },
        ],
    )
}

pub fn failed_report() -> JobStatusReport {
    report(false, 0, Vec::new())
}

/// Asset resolver knowing datasets `did:op:a..c`, the training and aggregation
/// algorithms and the empty dataset.
pub struct FakeAssets {
    assets: HashMap<String, Asset>,
}

impl Default for FakeAssets {
    fn default() -> Self {
        let assets = ["did:op:a", "did:op:b", "did:op:c", "did:op:train", "did:op:agg", "did:op:empty"]
            .into_iter()
            .map(|did| (did.to_string(), compute_asset(did)))
            .collect();
        Self { assets }
    }
}

#[async_trait]
impl AssetResolver for FakeAssets {
    async fn resolve(&self, did: &str) -> ClientResult<Option<Asset>> {
        Ok(self.assets.get(did).cloned())
    }
}

#[derive(Default)]
struct ProviderState {
    environments: Option<Vec<ComputeEnvironment>>,
    items: HashMap<String, InitializeItem>,
    initialize_requests: Vec<InitializeRequest>,
    submissions: Vec<ComputeSubmission>,
    job_dids: HashMap<String, String>,
    scripts: HashMap<String, VecDeque<JobStatusReport>>,
    models: HashMap<String, Vec<u8>>,
    status_calls: usize,
    fail_next_status: bool,
}

/// Compute provider whose job outcomes are scripted per dataset DID.
///
/// Jobs without a script finish on their first poll with a `model` result.
#[derive(Default)]
pub struct FakeProvider {
    state: Mutex<ProviderState>,
}

impl FakeProvider {
    fn state(&self) -> std::sync::MutexGuard<'_, ProviderState> {
        self.state.lock().unwrap()
    }

    pub fn set_environments(&self, environments: Vec<ComputeEnvironment>) {
        self.state().environments = Some(environments);
    }

    /// Initialize answer for the input with `did`.
    pub fn set_item(&self, did: &str, item: InitializeItem) {
        self.state().items.insert(did.to_string(), item);
    }

    /// Status reports for jobs on `did`; the last one repeats.
    pub fn script(&self, did: &str, reports: Vec<JobStatusReport>) {
        self.state().scripts.insert(did.to_string(), reports.into());
    }

    pub fn set_model(&self, did: &str, bytes: Vec<u8>) {
        self.state().models.insert(did.to_string(), bytes);
    }

    pub fn fail_next_status(&self) {
        self.state().fail_next_status = true;
    }

    pub fn submissions(&self) -> Vec<ComputeSubmission> {
        self.state().submissions.clone()
    }

    pub fn initialize_requests(&self) -> Vec<InitializeRequest> {
        self.state().initialize_requests.clone()
    }

    pub fn status_calls(&self) -> usize {
        self.state().status_calls
    }

    fn did_of(&self, job_id: &str) -> ClientResult<String> {
        self.state().job_dids.get(job_id).cloned().ok_or_else(|| ClientError::NotFound(job_id.to_string()))
    }
}

#[async_trait]
impl ComputeProvider for FakeProvider {
    async fn environments(&self, _endpoint: &str, _chain_id: u64) -> ClientResult<Vec<ComputeEnvironment>> {
        let configured = self.state().environments.clone();
        Ok(configured.unwrap_or_else(|| {
            vec![ComputeEnvironment {
                id: "env-free".to_string(),
                max_job_duration: 3600,
                consumer_address: "0xconsumer".to_string(),
                free: true,
            }]
        }))
    }

    async fn initialize(&self, _endpoint: &str, request: &InitializeRequest) -> ClientResult<InitializeResponse> {
        let mut state = self.state();
        state.initialize_requests.push(request.clone());
        let item = |did: &str| state.items.get(did).cloned().unwrap_or_default();
        Ok(InitializeResponse {
            datasets: request.datasets.iter().map(|input| item(&input.did)).collect(),
            algorithm: Some(item(&request.algorithm.did)),
        })
    }

    async fn create_auth_token(&self, _endpoint: &str, _payer: &dyn WalletSigner) -> ClientResult<String> {
        Ok("auth-token".to_string())
    }

    async fn submit(&self, _endpoint: &str, _auth_token: &str, submission: &ComputeSubmission) -> ClientResult<JobInfo> {
        let mut state = self.state();
        state.submissions.push(submission.clone());
        let job_id = format!("job-{}", state.submissions.len());
        state.job_dids.insert(job_id.clone(), submission.dataset.did.clone());
        Ok(JobInfo { job_id, extra: Map::new() })
    }

    async fn status(&self, _endpoint: &str, _payer: &dyn WalletSigner, job_id: &str) -> ClientResult<JobStatusReport> {
        let did = self.did_of(job_id)?;
        let mut state = self.state();
        state.status_calls += 1;
        if std::mem::take(&mut state.fail_next_status) {
            return Err(ClientError::RequestError("connection reset".to_string()));
        }
        let report = match state.scripts.get_mut(&did) {
            Some(script) if script.len() > 1 => script.pop_front(),
            Some(script) => script.front().cloned(),
            None => None,
        };
        Ok(report.unwrap_or_else(finished_report))
    }

    async fn result(&self, _endpoint: &str, _payer: &dyn WalletSigner, job_id: &str, _index: usize) -> ClientResult<Vec<u8>> {
        let did = self.did_of(job_id)?;
        let model = self.state().models.get(&did).cloned();
        Ok(model.unwrap_or_else(|| format!(r#"{{"trained_on": "{did}"}}"#).into_bytes()))
    }

    fn result_url(&self, endpoint: &str, request: &ResultUrlRequest<'_>) -> ClientResult<String> {
        Ok(format!(
            "{endpoint}/api/services/computeResult?jobId={}&index={}&nonce={}&consumerAddress={}&signature={}",
            request.job_id, request.index, request.nonce, request.consumer_address, request.signature
        ))
    }
}

/// Transactions recorded by [`FakeMarket`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarketTx {
    ReuseOrder { datatoken: String, order_tx: String },
    BuyAndOrder { datatoken: String, ceiling: Option<TokenAmount> },
    DispenseAndOrder { datatoken: String, consumer: String },
}

#[derive(Default)]
struct MarketState {
    approvals: Vec<(String, String, TokenAmount)>,
    transactions: Vec<MarketTx>,
}

/// Marketplace with fixed balances and exchanges that records every call.
///
/// Token symbols are derived from addresses: `0xocean` is `OCEAN`.
#[derive(Default)]
pub struct FakeMarket {
    balances: HashMap<String, TokenAmount>,
    templates: HashMap<String, u32>,
    exchanges: HashMap<String, (FixedRateExchange, TokenAmount)>,
    state: Mutex<MarketState>,
}

impl FakeMarket {
    #[must_use]
    pub fn with_balance(mut self, token: &str, amount: TokenAmount) -> Self {
        self.balances.insert(token.to_lowercase(), amount);
        self
    }

    #[must_use]
    pub fn with_template(mut self, datatoken: &str, template: u32) -> Self {
        self.templates.insert(datatoken.to_lowercase(), template);
        self
    }

    /// A fixed-rate exchange selling `datatoken` for `needed` units of `base_token`.
    #[must_use]
    pub fn with_exchange(mut self, datatoken: &str, base_token: &str, needed: TokenAmount) -> Self {
        let exchange = FixedRateExchange {
            exchange_id: format!("ex-{datatoken}"),
            address: format!("0xexchange-{datatoken}"),
            base_token: base_token.to_string(),
        };
        self.exchanges.insert(datatoken.to_lowercase(), (exchange, needed));
        self
    }

    pub fn approvals(&self) -> Vec<(String, String, TokenAmount)> {
        self.state.lock().unwrap().approvals.clone()
    }

    pub fn transactions(&self) -> Vec<MarketTx> {
        self.state.lock().unwrap().transactions.clone()
    }

    fn record(&self, tx: MarketTx) -> String {
        let mut state = self.state.lock().unwrap();
        state.transactions.push(tx);
        format!("0xtx-{}", state.transactions.len())
    }
}

#[async_trait]
impl Marketplace for FakeMarket {
    async fn balance_of(&self, token: &str, _owner: &str) -> ClientResult<TokenAmount> {
        Ok(self.balances.get(&token.to_lowercase()).copied().unwrap_or(0))
    }

    async fn symbol(&self, token: &str) -> ClientResult<String> {
        Ok(token.trim_start_matches("0x").to_uppercase())
    }

    async fn approve(&self, token: &str, spender: &str, amount: TokenAmount) -> ClientResult<String> {
        let mut state = self.state.lock().unwrap();
        state.approvals.push((token.to_string(), spender.to_string(), amount));
        Ok(format!("0xapprove-{}", state.approvals.len()))
    }

    async fn datatoken_template(&self, datatoken: &str) -> ClientResult<u32> {
        Ok(self.templates.get(&datatoken.to_lowercase()).copied().unwrap_or(1))
    }

    async fn exchange(&self, datatoken: &str) -> ClientResult<Option<FixedRateExchange>> {
        Ok(self.exchanges.get(&datatoken.to_lowercase()).map(|(exchange, _)| exchange.clone()))
    }

    async fn base_token_needed(
        &self,
        exchange: &FixedRateExchange,
        _datatoken_amount: TokenAmount,
        consume_market_fee: TokenAmount,
    ) -> ClientResult<TokenAmount> {
        let needed = self
            .exchanges
            .values()
            .find(|(candidate, _)| candidate == exchange)
            .map(|(_, needed)| *needed)
            .ok_or_else(|| ClientError::NotFound(exchange.exchange_id.clone()))?;
        Ok(needed + consume_market_fee)
    }

    async fn reuse_order(&self, datatoken: &str, order_tx: &str, _provider_fee: &ProviderFee) -> ClientResult<String> {
        Ok(self.record(MarketTx::ReuseOrder { datatoken: datatoken.to_string(), order_tx: order_tx.to_string() }))
    }

    async fn buy_and_order(
        &self,
        datatoken: &str,
        _exchange: &FixedRateExchange,
        _params: &OrderParams,
        max_base_token_amount: Option<TokenAmount>,
    ) -> ClientResult<String> {
        Ok(self.record(MarketTx::BuyAndOrder { datatoken: datatoken.to_string(), ceiling: max_base_token_amount }))
    }

    async fn dispense_and_order(&self, datatoken: &str, params: &OrderParams) -> ClientResult<String> {
        Ok(self.record(MarketTx::DispenseAndOrder {
            datatoken: datatoken.to_string(),
            consumer: params.consumer.clone(),
        }))
    }
}

/// Subgraph answering with a free (dispenser) record unless told otherwise.
#[derive(Default)]
pub struct FakeSubgraph {
    prices: Mutex<HashMap<String, TokenPrice>>,
}

impl FakeSubgraph {
    pub fn set_price(&self, datatoken: &str, price: TokenPrice) {
        self.prices.lock().unwrap().insert(datatoken.to_lowercase(), price);
    }
}

#[async_trait]
impl SubgraphClient for FakeSubgraph {
    async fn token_price(&self, datatoken: &str, _account: &str) -> ClientResult<Option<TokenPrice>> {
        let price = self.prices.lock().unwrap().get(datatoken).cloned();
        Ok(Some(price.unwrap_or_else(|| TokenPrice { id: datatoken.to_string(), ..free_price() })))
    }
}

/// Job store recording updates, optionally rejecting one field.
#[derive(Default)]
pub struct FakeStore {
    records: Mutex<HashMap<String, JobRecord>>,
    updates: Mutex<Vec<(String, String, Value)>>,
    failing_field: Option<String>,
}

impl FakeStore {
    #[must_use]
    pub fn failing_on(mut self, field: &str) -> Self {
        self.failing_field = Some(field.to_string());
        self
    }

    pub fn updates(&self) -> Vec<(String, String, Value)> {
        self.updates.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobStore for FakeStore {
    async fn create(&self, launch_token: &str, record: &JobRecord) -> ClientResult<()> {
        self.records.lock().unwrap().insert(launch_token.to_string(), record.clone());
        Ok(())
    }

    async fn update(&self, launch_token: &str, field_path: &str, value: Value) -> ClientResult<()> {
        if self.failing_field.as_deref() == Some(field_path) {
            return Err(ClientError::ResponseError { status: 500, body: "storage down".to_string() });
        }
        self.updates.lock().unwrap().push((launch_token.to_string(), field_path.to_string(), value));
        Ok(())
    }

    async fn get(&self, launch_token: &str) -> ClientResult<JobRecord> {
        self.records
            .lock()
            .unwrap()
            .get(launch_token)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(launch_token.to_string()))
    }
}

/// Signs by echoing: `sig(message|nonce)`.
pub struct FakeSigner;

#[async_trait]
impl WalletSigner for FakeSigner {
    fn address(&self) -> &str {
        PAYER
    }

    async fn sign(&self, message: &str, nonce: Nonce) -> ClientResult<String> {
        Ok(format!("sig({message}|{nonce})"))
    }
}

pub struct FakeSealer;

#[async_trait]
impl TokenSealer for FakeSealer {
    async fn seal(&self, plaintext: &str, _recipient_public_key: &str) -> ClientResult<String> {
        Ok(format!("sealed({plaintext})"))
    }
}

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl ProgressSink for RecordingSink {
    fn on_event(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// The fakes behind one [`ComputeContext`].
#[derive(Default)]
pub struct Harness {
    pub assets: Arc<FakeAssets>,
    pub provider: Arc<FakeProvider>,
    pub market: Arc<FakeMarket>,
    pub subgraph: Arc<FakeSubgraph>,
}

impl Harness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn context(&self) -> ComputeContext {
        ComputeContext {
            chain_id: 80001,
            assets: self.assets.clone(),
            provider: self.provider.clone(),
            market: self.market.clone(),
            subgraph: self.subgraph.clone(),
            consume_market_fee: None,
        }
    }
}
