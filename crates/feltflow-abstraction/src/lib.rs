//! Collaborator abstraction layer for feltflow.
//!
//! This crate defines the traits and wire types the training core consumes:
//! asset resolution, the compute provider, on-chain marketplace operations,
//! the wallet gateway, the subgraph and the job store. Implementations live in
//! `feltflow-clients`; tests in `feltflow-core` use in-memory fakes.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod amount;
pub mod asset;
pub mod compute;
pub mod market;
pub mod nonce;
pub mod store;
pub mod subgraph;

pub use amount::TokenAmount;
pub use asset::{Asset, AssetResolver, Service, COMPUTE_SERVICE_TYPE};
pub use compute::{
    ComputeEnvironment, ComputeInput, ComputeProvider, ComputeSubmission, InitializeItem,
    InitializeRequest, InitializeResponse, JobInfo, JobStatusReport, ProviderFee, ResultFile,
    ResultUrlRequest, JOB_STATUS_FINISHED,
};
pub use market::{
    FixedRateExchange, Marketplace, OrderParams, TokenFee, TokenSealer, WalletSigner,
    ENTERPRISE_TEMPLATE_ID,
};
pub use nonce::{Nonce, RESULT_URL_NONCE_OFFSET};
pub use store::{AlgorithmAssets, AlgorithmConfig, JobRecord, JobStore};
pub use subgraph::{
    BaseTokenRef, DatatokenRef, Dispenser, FixedRate, OrderReuse, SubgraphClient, TokenOrder,
    TokenPrice,
};

/// Represents an error that can occur when talking to an external collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientError {
    /// The request could not be sent (network issues, invalid URL).
    #[error("Request Error: {0}")]
    RequestError(String),

    /// The remote service answered with a non-success status.
    #[error("Response Error ({status}): {body}")]
    ResponseError {
        /// HTTP status code.
        status: u16,
        /// Response body, as text.
        body: String,
    },

    /// An error occurred during serialization or deserialization.
    #[error("Serialization Error: {0}")]
    SerializationError(String),

    /// The requested record does not exist on the remote side.
    #[error("Not Found: {0}")]
    NotFound(String),

    /// Other unexpected errors.
    #[error("Other Client Error: {0}")]
    Other(String),
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

/// Result type for collaborator calls.
pub type ClientResult<T> = std::result::Result<T, ClientError>;
