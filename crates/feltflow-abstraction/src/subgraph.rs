//! Token price and order history as served by the marketplace subgraph.

use crate::ClientResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPrice {
    pub id: String,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub template_id: u32,
    #[serde(default)]
    pub publish_market_fee_address: Option<String>,
    #[serde(default)]
    pub publish_market_fee_token: Option<String>,
    #[serde(default)]
    pub publish_market_fee_amount: Option<String>,
    /// Orders paid by the queried account, newest first.
    #[serde(default)]
    pub orders: Vec<TokenOrder>,
    #[serde(default)]
    pub dispensers: Vec<Dispenser>,
    #[serde(default)]
    pub fixed_rate_exchanges: Vec<FixedRate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenOrder {
    pub tx: String,
    #[serde(default)]
    pub service_index: u32,
    /// Unix timestamp in seconds.
    #[serde(default)]
    pub created_timestamp: i64,
    /// Reuses of this order, newest first.
    #[serde(default)]
    pub reuses: Vec<OrderReuse>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderReuse {
    pub id: String,
    #[serde(default)]
    pub caller: String,
    #[serde(default)]
    pub created_timestamp: i64,
    pub tx: String,
    #[serde(default)]
    pub block: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dispenser {
    pub id: String,
    pub active: bool,
    #[serde(default)]
    pub is_minter: bool,
    #[serde(default)]
    pub max_balance: String,
    pub token: DatatokenRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixedRate {
    pub id: String,
    pub exchange_id: String,
    pub price: String,
    #[serde(default)]
    pub publish_market_swap_fee: Option<String>,
    pub base_token: BaseTokenRef,
    pub datatoken: DatatokenRef,
    pub active: bool,
}

/// Datatoken descriptor; dispensers report the address as `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatatokenRef {
    #[serde(alias = "id")]
    pub address: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub symbol: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseTokenRef {
    pub address: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub decimals: u32,
}

/// Read-only price/order query service.
#[async_trait]
pub trait SubgraphClient: Send + Sync {
    /// Price record of `datatoken` with orders filtered to `account`;
    /// `None` when the subgraph does not index the token.
    async fn token_price(&self, datatoken: &str, account: &str) -> ClientResult<Option<TokenPrice>>;
}
