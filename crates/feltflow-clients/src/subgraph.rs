//! GraphQL client for the marketplace subgraph.

use crate::http::{fetch_json, trim_base};
use async_trait::async_trait;
use feltflow_abstraction::{ClientError, ClientResult, SubgraphClient, TokenPrice};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

/// Path of the marketplace subgraph below the graph node URL.
pub const SUBGRAPH_PATH: &str = "/subgraphs/name/oceanprotocol/ocean-subgraph";

const TOKEN_PRICE_QUERY: &str = r"
query TokenPriceQuery($datatokenId: ID!, $account: String) {
  token(id: $datatokenId) {
    id
    symbol
    name
    templateId
    publishMarketFeeAddress
    publishMarketFeeToken
    publishMarketFeeAmount
    orders(where: { payer: $account }, orderBy: createdTimestamp, orderDirection: desc) {
      tx
      serviceIndex
      createdTimestamp
      reuses(orderBy: createdTimestamp, orderDirection: desc) {
        id
        caller
        createdTimestamp
        tx
        block
      }
    }
    dispensers {
      id
      active
      isMinter
      maxBalance
      token { id name symbol }
    }
    fixedRateExchanges {
      id
      exchangeId
      price
      publishMarketSwapFee
      baseToken { symbol name address decimals }
      datatoken { symbol name address }
      active
    }
  }
}
";

#[derive(Serialize)]
struct GraphQlRequest<'a> {
    query: &'a str,
    variables: Value,
}

#[derive(Deserialize)]
struct GraphQlResponse {
    data: Option<TokenData>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Deserialize)]
struct TokenData {
    token: Option<TokenPrice>,
}

#[derive(Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Clone)]
pub struct HttpSubgraphClient {
    base_url: String,
    client: Client,
}

impl HttpSubgraphClient {
    /// `base_url` is the graph node URL, without the subgraph path.
    pub fn new(base_url: &str) -> Self {
        Self::with_client(base_url, Client::new())
    }

    pub fn with_client(base_url: &str, client: Client) -> Self {
        Self { base_url: trim_base(base_url), client }
    }
}

#[async_trait]
impl SubgraphClient for HttpSubgraphClient {
    async fn token_price(&self, datatoken: &str, account: &str) -> ClientResult<Option<TokenPrice>> {
        debug!(datatoken = %datatoken, account = %account, "Querying token price");

        let url = format!("{}{SUBGRAPH_PATH}", self.base_url);
        let body = GraphQlRequest {
            query: TOKEN_PRICE_QUERY,
            variables: json!({
                "datatokenId": datatoken.to_lowercase(),
                "account": account.to_lowercase(),
            }),
        };
        let response: GraphQlResponse = fetch_json(self.client.post(&url).json(&body), "subgraph token price").await?;

        if let Some(first) = response.errors.first() {
            return Err(ClientError::ResponseError { status: 200, body: first.message.clone() });
        }
        Ok(response.data.and_then(|data| data.token))
    }
}
