//! Asset resolution through the metadata cache.

use crate::http::{check_status, json, send, trim_base};
use async_trait::async_trait;
use feltflow_abstraction::{Asset, AssetResolver, ClientError, ClientResult};
use reqwest::Client;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct HttpAssetResolver {
    base_url: String,
    client: Client,
}

impl HttpAssetResolver {
    pub fn new(base_url: &str) -> Self {
        Self::with_client(base_url, Client::new())
    }

    pub fn with_client(base_url: &str, client: Client) -> Self {
        Self { base_url: trim_base(base_url), client }
    }
}

#[async_trait]
impl AssetResolver for HttpAssetResolver {
    async fn resolve(&self, did: &str) -> ClientResult<Option<Asset>> {
        let url = format!("{}/api/aquarius/assets/ddo/{did}", self.base_url);
        debug!(did = %did, url = %url, "Resolving asset");

        let response = send(self.client.get(&url), "resolve asset").await?;
        match check_status(response, "resolve asset").await {
            Ok(response) => Ok(Some(json(response, "resolve asset").await?)),
            Err(ClientError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }
}
