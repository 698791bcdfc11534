//! Multi-round federated training over compute jobs.
//!
//! Each round runs one local training job per dataset. With more than one
//! dataset an aggregation job then combines the local models through signed
//! result URLs. The final job of a round provides the model the next round
//! starts from.

use crate::error::{FlowError, FlowResult};
use crate::job::{ComputeContext, ComputeJob, StartedJob};
use crate::progress::{LogProgressSink, ProgressEvent, ProgressSink};
use crate::wait::{wait_for_jobs, PollOptions};
use feltflow_abstraction::{AlgorithmAssets, JobRecord, JobStore, Nonce, TokenSealer, WalletSigner};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Result file holding the trained model.
pub const MODEL_FILE: &str = "model";

/// Seed used when a single dataset trains alone.
pub const SOLO_SEED: u8 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrainingMode {
    /// One dataset; its local job is the final job of every round.
    Solo,
    /// Several datasets combined by an aggregation job.
    Multi,
}

/// What to train and where to record it.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSetup {
    pub launch_token: String,
    pub name: String,
    pub dataset_dids: Vec<String>,
    pub algorithms: AlgorithmAssets,
    /// Initial algorithm parameters; must be a JSON object (or null).
    pub algocustomdata: Value,
    /// Key auth tokens are sealed for before being stored.
    pub public_key: Option<String>,
}

impl TrainingSetup {
    #[must_use]
    pub fn from_record(launch_token: impl Into<String>, record: &JobRecord) -> Self {
        Self {
            launch_token: launch_token.into(),
            name: record.name.clone(),
            dataset_dids: record.data_dids.clone(),
            algorithms: record.algo_config.assets.clone(),
            algocustomdata: record.algo_custom_data.clone(),
            public_key: record.public_key.clone(),
        }
    }
}

/// One completed round.
#[derive(Debug)]
pub struct TrainingRound {
    pub index: usize,
    pub local_jobs: Vec<ComputeJob>,
    /// Seeds given to the local jobs, in dataset order.
    pub seeds: Vec<u8>,
    pub aggregation: Option<ComputeJob>,
}

impl TrainingRound {
    /// The job whose model result is the round's output.
    #[must_use]
    pub fn final_job(&self) -> Option<&ComputeJob> {
        match (&self.aggregation, self.local_jobs.as_slice()) {
            (Some(aggregation), _) => Some(aggregation),
            (None, [solo]) => Some(solo),
            (None, _) => None,
        }
    }
}

pub struct FederatedTraining {
    ctx: ComputeContext,
    store: Arc<dyn JobStore>,
    sealer: Arc<dyn TokenSealer>,
    setup: TrainingSetup,
    mode: TrainingMode,
    rounds: Vec<TrainingRound>,
    poll: PollOptions,
    progress: Arc<dyn ProgressSink>,
}

impl fmt::Debug for FederatedTraining {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FederatedTraining")
            .field("setup", &self.setup)
            .field("mode", &self.mode)
            .field("rounds", &self.rounds.len())
            .field("poll", &self.poll)
            .finish_non_exhaustive()
    }
}

impl FederatedTraining {
    /// Validates the setup and builds (without starting) one local job per
    /// dataset, plus the aggregation job of multi-dataset runs, so incompatible
    /// or unpurchasable assets fail before any payment.
    pub async fn new(
        ctx: ComputeContext,
        store: Arc<dyn JobStore>,
        sealer: Arc<dyn TokenSealer>,
        mut setup: TrainingSetup,
    ) -> FlowResult<Self> {
        if setup.dataset_dids.is_empty() {
            return Err(FlowError::InvalidConfig("no datasets provided for training".to_string()));
        }
        match &setup.algocustomdata {
            Value::Object(_) => {}
            Value::Null => setup.algocustomdata = Value::Object(Map::new()),
            other => {
                return Err(FlowError::InvalidConfig(format!(
                    "algorithm parameters must be a JSON object, got {other}"
                )));
            }
        }

        let mode = if setup.dataset_dids.len() == 1 { TrainingMode::Solo } else { TrainingMode::Multi };
        let training = Self {
            ctx,
            store,
            sealer,
            setup,
            mode,
            rounds: Vec::new(),
            poll: PollOptions::default(),
            progress: Arc::new(LogProgressSink),
        };
        let initial = training.setup.algocustomdata.clone();
        training.local_jobs(&initial).await?;
        if mode == TrainingMode::Multi {
            let algorithms = &training.setup.algorithms;
            ComputeJob::new(
                training.ctx.clone(),
                std::slice::from_ref(&algorithms.empty_dataset),
                &algorithms.aggregation,
                Value::Object(Map::new()),
            )
            .await?;
        }

        info!(name = %training.setup.name, datasets = training.setup.dataset_dids.len(), mode = ?mode, "Federated training prepared");
        Ok(training)
    }

    #[must_use]
    pub fn with_poll_options(mut self, poll: PollOptions) -> Self {
        self.poll = poll;
        self
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    #[must_use]
    pub fn mode(&self) -> TrainingMode {
        self.mode
    }

    #[must_use]
    pub fn setup(&self) -> &TrainingSetup {
        &self.setup
    }

    /// Completed rounds, oldest first.
    #[must_use]
    pub fn rounds(&self) -> &[TrainingRound] {
        &self.rounds
    }

    /// The model of the last completed round, or the initial parameters.
    ///
    /// In multi-dataset runs the model is annotated with the round's seeds.
    pub async fn latest_model(&self, payer: &dyn WalletSigner) -> FlowResult<Value> {
        let Some(round) = self.rounds.last() else {
            return Ok(self.setup.algocustomdata.clone());
        };
        let job = round.final_job().ok_or_else(|| {
            FlowError::InvalidConfig(format!("round {} has no final job", round.index))
        })?;

        let bytes = job.file(MODEL_FILE, payer).await?;
        let mut model: Value = serde_json::from_slice(&bytes)?;
        if self.mode == TrainingMode::Multi {
            if let Value::Object(fields) = &mut model {
                fields.insert("seeds".to_string(), json!(round.seeds));
            }
        }
        Ok(model)
    }

    /// Runs `iterations` rounds and records the run in the job store.
    ///
    /// The record is marked running first and finished at the end. On error
    /// it is marked failed where the store allows, and the original error is
    /// returned.
    pub async fn run(&mut self, payer: &dyn WalletSigner, iterations: usize) -> FlowResult<()> {
        if iterations == 0 {
            return Err(FlowError::InvalidConfig("iterations must be at least 1".to_string()));
        }

        let launch_token = self.setup.launch_token.clone();
        self.persist("jobId", json!(launch_token)).await?;
        self.persist("status", json!("running")).await?;

        match self.run_rounds(payer, iterations).await {
            Ok(()) => {
                self.persist("status", json!("finished")).await?;
                info!(name = %self.setup.name, rounds = self.rounds.len(), "Federated training finished");
                Ok(())
            }
            Err(err) => {
                if let Err(store_err) = self.store.update(&launch_token, "status", json!("failed")).await {
                    warn!(error = %store_err, "Couldn't mark training as failed");
                }
                Err(err)
            }
        }
    }

    async fn run_rounds(&mut self, payer: &dyn WalletSigner, iterations: usize) -> FlowResult<()> {
        for _ in 0..iterations {
            let index = self.rounds.len();
            self.progress.on_event(ProgressEvent::RoundStarted { round: index, datasets: self.setup.dataset_dids.len() });

            let model = self.latest_model(payer).await?;
            let (mut local_jobs, seeds) = self.local_jobs(&model).await?;

            for (position, (job, seed)) in local_jobs.iter_mut().zip(&seeds).enumerate() {
                let started = job.start(payer, None).await?;
                let mut entry = self.job_entry(&started, job.dataset_dids()).await?;
                entry.insert("seed".to_string(), json!(seed));
                self.persist(&format!("iterations.{index}.localTraining.{position}"), Value::Object(entry)).await?;
                self.progress.on_event(ProgressEvent::JobStarted { round: index, job: job.summary() });
            }

            wait_for_jobs(&mut local_jobs, payer, &self.poll, self.progress.as_ref()).await?;

            let aggregation = match self.mode {
                TrainingMode::Solo => None,
                TrainingMode::Multi => {
                    let mut aggregation = [self.run_aggregation(index, &local_jobs, payer).await?];
                    wait_for_jobs(&mut aggregation, payer, &self.poll, self.progress.as_ref()).await?;
                    let [aggregation] = aggregation;
                    Some(aggregation)
                }
            };

            let round = TrainingRound { index, local_jobs, seeds, aggregation };
            if let Some(final_job) = round.final_job() {
                let outputs = final_job.outputs()?.iter().map(|file| file.filename.clone()).collect();
                self.progress.on_event(ProgressEvent::RoundFinished {
                    round: index,
                    final_job: final_job.summary(),
                    outputs,
                });
            }
            self.rounds.push(round);
        }
        Ok(())
    }

    /// Starts an aggregation job over the models of `local_jobs`.
    ///
    /// Model URLs are signed with a nonce above the submission nonce, so the
    /// provider still accepts them when the aggregation job fetches them.
    pub async fn run_aggregation(
        &self,
        round: usize,
        local_jobs: &[ComputeJob],
        payer: &dyn WalletSigner,
    ) -> FlowResult<ComputeJob> {
        let nonce = Nonce::now();
        let url_nonce = Nonce::after(nonce);

        let mut model_urls = Vec::with_capacity(local_jobs.len());
        for job in local_jobs {
            model_urls.push(job.file_url(MODEL_FILE, payer, Some(url_nonce)).await?);
        }

        let mut aggregation = ComputeJob::new(
            self.ctx.clone(),
            std::slice::from_ref(&self.setup.algorithms.empty_dataset),
            &self.setup.algorithms.aggregation,
            json!({ "model_urls": model_urls }),
        )
        .await?;
        let started = aggregation.start(payer, Some(nonce)).await?;

        let local_dids: Vec<&str> = local_jobs.iter().map(ComputeJob::did).collect();
        let entry = self.job_entry(&started, local_dids).await?;
        self.persist(&format!("iterations.{round}.aggregation"), Value::Object(entry)).await?;
        self.progress.on_event(ProgressEvent::JobStarted { round, job: aggregation.summary() });

        Ok(aggregation)
    }

    /// One local training job per dataset, each with its own seed.
    async fn local_jobs(&self, model: &Value) -> FlowResult<(Vec<ComputeJob>, Vec<u8>)> {
        let mut jobs = Vec::with_capacity(self.setup.dataset_dids.len());
        let mut seeds = Vec::with_capacity(self.setup.dataset_dids.len());

        for did in &self.setup.dataset_dids {
            let seed = self.seed();
            let mut params = match model {
                Value::Object(fields) => fields.clone(),
                _ => Map::new(),
            };
            params.insert("seed".to_string(), json!(seed));

            let job = ComputeJob::new(
                self.ctx.clone(),
                std::slice::from_ref(did),
                &self.setup.algorithms.training,
                Value::Object(params),
            )
            .await?;
            jobs.push(job);
            seeds.push(seed);
        }
        Ok((jobs, seeds))
    }

    fn seed(&self) -> u8 {
        match self.mode {
            TrainingMode::Solo => SOLO_SEED,
            TrainingMode::Multi => rand::random(),
        }
    }

    /// Job store entry for a started job: its sealed auth token, data DIDs and job info.
    async fn job_entry(&self, started: &StartedJob, data_dids: Vec<&str>) -> FlowResult<Map<String, Value>> {
        let mut entry = Map::new();
        if let Some(public_key) = &self.setup.public_key {
            let sealed = self.sealer.seal(&started.auth_token, public_key).await?;
            entry.insert("authToken".to_string(), json!(sealed));
        }
        entry.insert("dataDIDs".to_string(), json!(data_dids));
        entry.insert("jobInfo".to_string(), serde_json::to_value(&started.info)?);
        Ok(entry)
    }

    async fn persist(&self, field: &str, value: Value) -> FlowResult<()> {
        self.store
            .update(&self.setup.launch_token, field, value)
            .await
            .map_err(|source| FlowError::StorageWrite { field: field.to_string(), source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobState;
    use crate::testing::{
        failed_report, finished_report, running_report, FakeSealer, FakeSigner, FakeStore, Harness, RecordingSink,
    };
    use feltflow_abstraction::TokenPrice;
    use std::time::Duration;

    fn setup(dids: &[&str]) -> TrainingSetup {
        TrainingSetup {
            launch_token: "launch-1".to_string(),
            name: "demo".to_string(),
            dataset_dids: dids.iter().map(ToString::to_string).collect(),
            algorithms: AlgorithmAssets {
                training: "did:op:train".to_string(),
                aggregation: "did:op:agg".to_string(),
                empty_dataset: "did:op:empty".to_string(),
            },
            algocustomdata: json!({"model": "linear"}),
            public_key: Some("pk".to_string()),
        }
    }

    async fn training(harness: &Harness, store: &Arc<FakeStore>, dids: &[&str]) -> FederatedTraining {
        FederatedTraining::new(harness.context(), store.clone(), Arc::new(FakeSealer), setup(dids))
            .await
            .unwrap()
            .with_poll_options(PollOptions::default().with_interval(Duration::from_millis(1)))
    }

    #[tokio::test]
    async fn test_constructor_fails_fast_on_bad_dataset() {
        let harness = Harness::new();
        let store = Arc::new(FakeStore::default());
        let err = FederatedTraining::new(harness.context(), store.clone(), Arc::new(FakeSealer), setup(&["did:op:a", "did:op:missing"]))
            .await
            .unwrap_err();

        assert!(matches!(err, FlowError::AssetResolution { ref did, .. } if did == "did:op:missing"));
        assert!(harness.market.transactions().is_empty());
        assert!(store.updates().is_empty());
    }

    #[tokio::test]
    async fn test_constructor_rejects_unsupported_access_before_paying() {
        let harness = Harness::new();
        harness.subgraph.set_price("0xdt-b", TokenPrice::default());
        let store = Arc::new(FakeStore::default());

        let err = FederatedTraining::new(harness.context(), store.clone(), Arc::new(FakeSealer), setup(&["did:op:a", "did:op:b"]))
            .await
            .unwrap_err();

        assert!(matches!(err, FlowError::UnsupportedAccess { ref datatoken, .. } if datatoken == "0xdt-b"));
        assert!(harness.market.transactions().is_empty());
        assert!(store.updates().is_empty());
    }

    #[tokio::test]
    async fn test_constructor_checks_aggregation_assets_of_multi_runs() {
        let harness = Harness::new();
        harness.subgraph.set_price("0xdt-agg", TokenPrice::default());
        let store = Arc::new(FakeStore::default());

        let err = FederatedTraining::new(harness.context(), store.clone(), Arc::new(FakeSealer), setup(&["did:op:a", "did:op:b"]))
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::UnsupportedAccess { ref datatoken, .. } if datatoken == "0xdt-agg"));
        assert!(harness.market.transactions().is_empty());

        // Solo runs never aggregate, so the aggregation algorithm is not consulted.
        assert!(FederatedTraining::new(harness.context(), store, Arc::new(FakeSealer), setup(&["did:op:a"])).await.is_ok());
    }

    #[tokio::test]
    async fn test_constructor_rejects_empty_and_non_object_setup() {
        let harness = Harness::new();
        let store: Arc<dyn JobStore> = Arc::new(FakeStore::default());

        let err = FederatedTraining::new(harness.context(), store.clone(), Arc::new(FakeSealer), setup(&[]))
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::InvalidConfig(_)));

        let mut bad = setup(&["did:op:a"]);
        bad.algocustomdata = json!([1, 2]);
        let err = FederatedTraining::new(harness.context(), store, Arc::new(FakeSealer), bad).await.unwrap_err();
        assert!(matches!(err, FlowError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_latest_model_before_any_round_is_initial() {
        let harness = Harness::new();
        let store = Arc::new(FakeStore::default());
        let flow = training(&harness, &store, &["did:op:a"]).await;

        assert_eq!(flow.latest_model(&FakeSigner).await.unwrap(), json!({"model": "linear"}));
        assert_eq!(flow.mode(), TrainingMode::Solo);
    }

    #[tokio::test]
    async fn test_solo_round_has_no_aggregation() {
        let harness = Harness::new();
        harness.provider.set_model("did:op:a", br#"{"weights": [0.5]}"#.to_vec());
        let store = Arc::new(FakeStore::default());
        let mut flow = training(&harness, &store, &["did:op:a"]).await;

        flow.run(&FakeSigner, 1).await.unwrap();

        let round = &flow.rounds()[0];
        assert!(round.aggregation.is_none());
        assert_eq!(round.seeds, vec![SOLO_SEED]);
        let final_job = round.final_job().unwrap();
        assert_eq!(final_job.job_id(), round.local_jobs[0].job_id());
        assert_eq!(final_job.state(), JobState::Finished);

        let submissions = harness.provider.submissions();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].algocustomdata, Some(json!({"model": "linear", "seed": 0})));

        // Solo models carry no seeds annotation.
        assert_eq!(flow.latest_model(&FakeSigner).await.unwrap(), json!({"weights": [0.5]}));
    }

    #[tokio::test]
    async fn test_multi_round_aggregates_signed_model_urls() {
        let harness = Harness::new();
        harness.provider.set_model("did:op:empty", br#"{"weights": [1.5]}"#.to_vec());
        let store = Arc::new(FakeStore::default());
        let mut flow = training(&harness, &store, &["did:op:a", "did:op:b"]).await;

        flow.run(&FakeSigner, 1).await.unwrap();

        let round = &flow.rounds()[0];
        assert_eq!(round.seeds.len(), 2);
        let aggregation = round.aggregation.as_ref().unwrap();
        assert_eq!(aggregation.state(), JobState::Finished);
        assert_eq!(aggregation.did(), "did:op:empty");
        assert_eq!(aggregation.algorithm_did(), "did:op:agg");

        let submissions = harness.provider.submissions();
        assert_eq!(submissions.len(), 3);
        for (submission, seed) in submissions.iter().zip(&round.seeds) {
            assert_eq!(submission.algocustomdata.as_ref().unwrap()["seed"], json!(seed));
        }

        // Aggregation inputs are exactly the signed URLs of the local models,
        // each signed with a nonce above the aggregation's submission nonce.
        let aggregation_submission = &submissions[2];
        let urls = aggregation_submission.algocustomdata.as_ref().unwrap()["model_urls"].as_array().unwrap().clone();
        assert_eq!(urls.len(), 2);
        for (url, job) in urls.iter().zip(&round.local_jobs) {
            let url = url.as_str().unwrap();
            let job_id = job.job_id().unwrap();
            assert!(url.contains(&format!("jobId={job_id}")));
            let nonce: u64 = url.split("nonce=").nth(1).unwrap().split('&').next().unwrap().parse().unwrap();
            assert!(nonce > aggregation_submission.nonce.0);
        }

        let model = flow.latest_model(&FakeSigner).await.unwrap();
        assert_eq!(model["weights"], json!([1.5]));
        assert_eq!(model["seeds"], json!(round.seeds));
    }

    #[tokio::test]
    async fn test_round_feeds_model_into_next_round() {
        let harness = Harness::new();
        harness.provider.set_model("did:op:a", br#"{"weights": [2.0]}"#.to_vec());
        let store = Arc::new(FakeStore::default());
        let mut flow = training(&harness, &store, &["did:op:a"]).await;

        flow.run(&FakeSigner, 2).await.unwrap();

        assert_eq!(flow.rounds().len(), 2);
        let submissions = harness.provider.submissions();
        assert_eq!(submissions[1].algocustomdata, Some(json!({"weights": [2.0], "seed": 0})));
    }

    #[tokio::test]
    async fn test_run_records_lifecycle_and_jobs() {
        let harness = Harness::new();
        let store = Arc::new(FakeStore::default());
        let mut flow = training(&harness, &store, &["did:op:a", "did:op:b"]).await;

        flow.run(&FakeSigner, 1).await.unwrap();

        let fields: Vec<String> = store.updates().into_iter().map(|(token, field, _)| {
            assert_eq!(token, "launch-1");
            field
        }).collect();
        assert_eq!(
            fields,
            vec![
                "jobId",
                "status",
                "iterations.0.localTraining.0",
                "iterations.0.localTraining.1",
                "iterations.0.aggregation",
                "status",
            ]
        );

        let updates = store.updates();
        assert_eq!(updates[1].2, json!("running"));
        assert_eq!(updates[5].2, json!("finished"));
        let local = &updates[2].2;
        assert_eq!(local["authToken"], json!("sealed(auth-token)"));
        assert_eq!(local["dataDIDs"], json!(["did:op:a"]));
        assert!(local["jobInfo"]["jobId"].is_string());
        assert!(local["seed"].is_u64());
        assert_eq!(updates[4].2["dataDIDs"], json!(["did:op:a", "did:op:b"]));
    }

    #[tokio::test]
    async fn test_failed_local_job_aborts_and_marks_failed() {
        let harness = Harness::new();
        harness.provider.script("did:op:a", vec![failed_report()]);
        harness.provider.script("did:op:b", vec![running_report(), finished_report()]);
        let store = Arc::new(FakeStore::default());
        let sink = Arc::new(RecordingSink::default());
        let mut flow = training(&harness, &store, &["did:op:a", "did:op:b"]).await.with_progress(sink.clone());

        let err = flow.run(&FakeSigner, 1).await.unwrap_err();

        match err {
            FlowError::RemoteJobFailure { jobs } => {
                assert_eq!(jobs.len(), 2);
                assert_eq!(jobs[0].state, JobState::Failed);
                assert_eq!(jobs[1].state, JobState::Running);
            }
            other => panic!("Expected RemoteJobFailure, got {other:?}"),
        }
        assert!(flow.rounds().is_empty());
        assert_eq!(harness.provider.status_calls(), 2);
        assert_eq!(harness.provider.submissions().len(), 2);
        let last = store.updates().pop().unwrap();
        assert_eq!((last.1.as_str(), last.2), ("status", json!("failed")));
        assert!(!sink.events().iter().any(|event| matches!(event, ProgressEvent::RoundFinished { .. })));
    }

    #[tokio::test]
    async fn test_store_failure_surfaces_as_storage_write() {
        let harness = Harness::new();
        let store = Arc::new(FakeStore::default().failing_on("iterations.0.localTraining.0"));
        let mut flow = training(&harness, &store, &["did:op:a"]).await;

        let err = flow.run(&FakeSigner, 1).await.unwrap_err();

        assert!(matches!(err, FlowError::StorageWrite { ref field, .. } if field == "iterations.0.localTraining.0"));
        // The payment and submission stand.
        assert_eq!(harness.provider.submissions().len(), 1);
        assert_eq!(harness.market.transactions().len(), 2);
    }

    #[tokio::test]
    async fn test_zero_iterations_is_rejected() {
        let harness = Harness::new();
        let store = Arc::new(FakeStore::default());
        let mut flow = training(&harness, &store, &["did:op:a"]).await;

        assert!(matches!(flow.run(&FakeSigner, 0).await, Err(FlowError::InvalidConfig(_))));
        assert!(store.updates().is_empty());
    }

    #[test]
    fn test_setup_from_record() {
        let record: JobRecord = serde_json::from_value(json!({
            "jobId": null,
            "name": "demo",
            "chainId": 80001,
            "dataDIDs": ["did:op:a"],
            "algoConfig": {"assets": {"training": "t", "aggregation": "a", "emptyDataset": "e"}},
            "algoCustomData": {"k": 1},
            "publicKey": "pk"
        }))
        .unwrap();
        let setup = TrainingSetup::from_record("launch-1", &record);
        assert_eq!(setup.launch_token, "launch-1");
        assert_eq!(setup.algorithms.empty_dataset, "e");
        assert_eq!(setup.public_key.as_deref(), Some("pk"));
    }
}
