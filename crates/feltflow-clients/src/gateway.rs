//! Wallet gateway client.
//!
//! The gateway holds the payer's key. It signs provider messages, seals auth
//! tokens and submits token/datatoken transactions, answering with the
//! transaction id once mined.

use crate::http::{check_status, fetch_json, json, send, trim_base};
use async_trait::async_trait;
use feltflow_abstraction::amount::as_string;
use feltflow_abstraction::{
    ClientError, ClientResult, FixedRateExchange, Marketplace, Nonce, OrderParams, ProviderFee, TokenAmount,
    TokenSealer, WalletSigner,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Deserialize)]
struct Account {
    address: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Transaction {
    tx_id: String,
}

#[derive(Deserialize)]
struct Balance {
    #[serde(with = "as_string")]
    balance: TokenAmount,
}

#[derive(Deserialize)]
struct Symbol {
    symbol: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Template {
    template_id: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Quote {
    #[serde(with = "as_string")]
    base_token_amount: TokenAmount,
}

#[derive(Deserialize)]
struct Signature {
    signature: String,
}

#[derive(Deserialize)]
struct Sealed {
    sealed: String,
}

#[derive(Serialize)]
struct ApproveRequest<'a> {
    spender: &'a str,
    #[serde(with = "as_string")]
    amount: TokenAmount,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QuoteRequest<'a> {
    exchange: &'a FixedRateExchange,
    #[serde(with = "as_string")]
    datatoken_amount: TokenAmount,
    #[serde(with = "as_string")]
    consume_market_fee: TokenAmount,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReuseRequest<'a> {
    order_tx: &'a str,
    provider_fee: &'a ProviderFee,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BuyRequest<'a> {
    exchange: &'a FixedRateExchange,
    order: &'a OrderParams,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_base_token_amount: Option<String>,
}

#[derive(Serialize)]
struct DispenseRequest<'a> {
    order: &'a OrderParams,
}

#[derive(Serialize)]
struct SignRequest<'a> {
    message: &'a str,
    nonce: Nonce,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SealRequest<'a> {
    plaintext: &'a str,
    public_key: &'a str,
}

/// HTTP client for the wallet gateway, acting as one payer account.
#[derive(Debug, Clone)]
pub struct HttpWalletGateway {
    base_url: String,
    address: String,
    client: Client,
}

impl HttpWalletGateway {
    /// Connects to the gateway and asks which account it signs for.
    pub async fn connect(base_url: &str) -> ClientResult<Self> {
        let client = Client::new();
        let base_url = trim_base(base_url);
        let account: Account = fetch_json(client.get(format!("{base_url}/account")), "gateway account").await?;
        info!(address = %account.address, gateway = %base_url, "Connected to wallet gateway");
        Ok(Self { base_url, address: account.address, client })
    }

    /// Uses a known payer address without asking the gateway.
    pub fn with_address(base_url: &str, address: impl Into<String>) -> Self {
        Self { base_url: trim_base(base_url), address: address.into(), client: Client::new() }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn transact<B: Serialize + Sync>(&self, path: &str, body: &B, what: &str) -> ClientResult<String> {
        debug!(path = %path, payer = %self.address, "Submitting transaction");
        let tx: Transaction = fetch_json(self.client.post(self.url(path)).json(body), what).await?;
        info!(tx_id = %tx.tx_id, request = what, "Transaction mined");
        Ok(tx.tx_id)
    }
}

#[async_trait]
impl Marketplace for HttpWalletGateway {
    async fn balance_of(&self, token: &str, owner: &str) -> ClientResult<TokenAmount> {
        let request = self.client.get(self.url(&format!("/tokens/{token}/balance"))).query(&[("owner", owner)]);
        let balance: Balance = fetch_json(request, "token balance").await?;
        Ok(balance.balance)
    }

    async fn symbol(&self, token: &str) -> ClientResult<String> {
        let symbol: Symbol = fetch_json(self.client.get(self.url(&format!("/tokens/{token}/symbol"))), "token symbol").await?;
        Ok(symbol.symbol)
    }

    async fn approve(&self, token: &str, spender: &str, amount: TokenAmount) -> ClientResult<String> {
        self.transact(&format!("/tokens/{token}/approve"), &ApproveRequest { spender, amount }, "approve").await
    }

    async fn datatoken_template(&self, datatoken: &str) -> ClientResult<u32> {
        let request = self.client.get(self.url(&format!("/datatokens/{datatoken}/template")));
        let template: Template = fetch_json(request, "datatoken template").await?;
        Ok(template.template_id)
    }

    async fn exchange(&self, datatoken: &str) -> ClientResult<Option<FixedRateExchange>> {
        let request = self.client.get(self.url(&format!("/datatokens/{datatoken}/exchange")));
        let response = send(request, "fixed rate exchange").await?;
        match check_status(response, "fixed rate exchange").await {
            Ok(response) => Ok(Some(json(response, "fixed rate exchange").await?)),
            Err(ClientError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn base_token_needed(
        &self,
        exchange: &FixedRateExchange,
        datatoken_amount: TokenAmount,
        consume_market_fee: TokenAmount,
    ) -> ClientResult<TokenAmount> {
        let body = QuoteRequest { exchange, datatoken_amount, consume_market_fee };
        let quote: Quote = fetch_json(self.client.post(self.url("/exchanges/quote")).json(&body), "exchange quote").await?;
        Ok(quote.base_token_amount)
    }

    async fn reuse_order(&self, datatoken: &str, order_tx: &str, provider_fee: &ProviderFee) -> ClientResult<String> {
        let body = ReuseRequest { order_tx, provider_fee };
        self.transact(&format!("/datatokens/{datatoken}/reuse-order"), &body, "reuse order").await
    }

    async fn buy_and_order(
        &self,
        datatoken: &str,
        exchange: &FixedRateExchange,
        params: &OrderParams,
        max_base_token_amount: Option<TokenAmount>,
    ) -> ClientResult<String> {
        let body = BuyRequest {
            exchange,
            order: params,
            max_base_token_amount: max_base_token_amount.map(|amount| amount.to_string()),
        };
        self.transact(&format!("/datatokens/{datatoken}/buy-and-order"), &body, "buy and order").await
    }

    async fn dispense_and_order(&self, datatoken: &str, params: &OrderParams) -> ClientResult<String> {
        let body = DispenseRequest { order: params };
        self.transact(&format!("/datatokens/{datatoken}/dispense-and-order"), &body, "dispense and order").await
    }
}

#[async_trait]
impl WalletSigner for HttpWalletGateway {
    fn address(&self) -> &str {
        &self.address
    }

    async fn sign(&self, message: &str, nonce: Nonce) -> ClientResult<String> {
        let body = SignRequest { message, nonce };
        let signature: Signature = fetch_json(self.client.post(self.url("/sign")).json(&body), "sign").await?;
        Ok(signature.signature)
    }
}

#[async_trait]
impl TokenSealer for HttpWalletGateway {
    async fn seal(&self, plaintext: &str, recipient_public_key: &str) -> ClientResult<String> {
        let body = SealRequest { plaintext, public_key: recipient_public_key };
        let sealed: Sealed = fetch_json(self.client.post(self.url("/seal")).json(&body), "seal").await?;
        Ok(sealed.sealed)
    }
}
