//! Job store backend client.

use crate::http::{check_status, fetch_json, send, trim_base};
use async_trait::async_trait;
use feltflow_abstraction::{ClientResult, JobRecord, JobStore};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

/// Path of the jobs resource below the backend URL.
pub const JOBS_PATH: &str = "/api/python-flow/jobs";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateJob<'a> {
    launch_token: &'a str,
    job: &'a JobRecord,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateJob<'a> {
    launch_token: &'a str,
    update_field: &'a str,
    update_value: Value,
}

/// Stores job records keyed by launch token.
#[derive(Debug, Clone)]
pub struct HttpJobStore {
    endpoint: String,
    client: Client,
}

impl HttpJobStore {
    /// `api_base_url` is the backend root, e.g. `https://app.feltlabs.ai`.
    pub fn new(api_base_url: &str) -> Self {
        Self::with_client(api_base_url, Client::new())
    }

    pub fn with_client(api_base_url: &str, client: Client) -> Self {
        Self { endpoint: format!("{}{JOBS_PATH}", trim_base(api_base_url)), client }
    }
}

#[async_trait]
impl JobStore for HttpJobStore {
    async fn create(&self, launch_token: &str, record: &JobRecord) -> ClientResult<()> {
        debug!(launch_token = %launch_token, name = %record.name, "Creating job record");
        let request = self.client.post(&self.endpoint).json(&CreateJob { launch_token, job: record });
        check_status(send(request, "create job").await?, "create job").await?;
        Ok(())
    }

    async fn update(&self, launch_token: &str, field_path: &str, value: Value) -> ClientResult<()> {
        debug!(launch_token = %launch_token, field = %field_path, "Updating job record");
        let body = UpdateJob { launch_token, update_field: field_path, update_value: value };
        let request = self.client.patch(&self.endpoint).json(&body);
        check_status(send(request, "update job").await?, "update job").await?;
        Ok(())
    }

    async fn get(&self, launch_token: &str) -> ClientResult<JobRecord> {
        let request = self.client.get(&self.endpoint).query(&[("launchToken", launch_token)]);
        fetch_json(request, "get job").await
    }
}
