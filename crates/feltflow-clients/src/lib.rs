//! HTTP implementations of the feltflow collaborator traits.
//!
//! - [`HttpAssetResolver`]: metadata cache DDO lookup
//! - [`HttpComputeProvider`]: compute-to-data provider API
//! - [`HttpWalletGateway`]: marketplace transactions, signing and sealing
//! - [`HttpSubgraphClient`]: datatoken price and order history
//! - [`HttpJobStore`]: job records keyed by launch token

mod http;

pub mod gateway;
pub mod metadata;
pub mod provider;
pub mod store;
pub mod subgraph;

pub use gateway::HttpWalletGateway;
pub use metadata::HttpAssetResolver;
pub use provider::{HttpComputeProvider, AUTH_TOKEN_LIFETIME_SECS};
pub use store::{HttpJobStore, JOBS_PATH};
pub use subgraph::{HttpSubgraphClient, SUBGRAPH_PATH};
