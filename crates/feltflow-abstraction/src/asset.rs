//! Marketplace assets (datasets and algorithms) and their resolution.

use crate::ClientResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Service type of a compute-to-data service.
pub const COMPUTE_SERVICE_TYPE: &str = "compute";

/// A service offered by an asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    /// Service identifier within the asset.
    pub id: String,
    /// Service type ("compute", "access").
    #[serde(rename = "type")]
    pub service_type: String,
    /// Datatoken gating access to this service.
    #[serde(rename = "datatokenAddress")]
    pub datatoken: String,
    /// Base URL of the provider hosting the service.
    pub service_endpoint: String,
    /// Service timeout in seconds, zero meaning no timeout.
    #[serde(default)]
    pub timeout: u64,
}

/// A resolved asset document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    /// Decentralized identifier of the asset.
    pub id: String,
    #[serde(default)]
    pub chain_id: u64,
    #[serde(default)]
    pub services: Vec<Service>,
}

impl Asset {
    /// The service used for compute jobs (first listed service).
    #[must_use]
    pub fn primary_service(&self) -> Option<&Service> {
        self.services.first()
    }

    /// Index of a service in the asset document, as expected by order calls.
    #[must_use]
    pub fn service_index(&self, service_id: &str) -> Option<usize> {
        self.services.iter().position(|s| s.id == service_id)
    }
}

/// Resolves DIDs to asset documents.
#[async_trait]
pub trait AssetResolver: Send + Sync {
    /// Returns `None` when the DID is unknown to the metadata cache.
    async fn resolve(&self, did: &str) -> ClientResult<Option<Asset>>;
}
