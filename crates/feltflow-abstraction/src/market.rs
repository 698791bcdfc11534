//! On-chain marketplace operations and the wallet that pays for them.
//!
//! Keys never live in this process. Transactions are submitted and messages
//! signed by a wallet gateway on behalf of the payer; the traits here describe
//! what the training core needs from it.

use crate::amount::{self, TokenAmount};
use crate::compute::ProviderFee;
use crate::nonce::Nonce;
use crate::ClientResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Datatoken template that routes purchases through the datatoken contract.
pub const ENTERPRISE_TEMPLATE_ID: u32 = 2;

/// A fee paid to a marketplace (consume-market fee).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenFee {
    pub address: String,
    pub token: String,
    #[serde(with = "amount::as_string")]
    pub amount: TokenAmount,
}

impl TokenFee {
    /// A zero fee collected by `address`.
    #[must_use]
    pub fn none(address: impl Into<String>) -> Self {
        Self { address: address.into(), token: String::new(), amount: 0 }
    }
}

/// Fixed-rate exchange selling a datatoken for a base token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixedRateExchange {
    pub exchange_id: String,
    /// Address of the exchange contract (spender for template 1 purchases).
    pub address: String,
    pub base_token: String,
}

/// Parameters shared by order-creating transactions.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderParams {
    pub consumer: String,
    pub service_index: usize,
    pub provider_fee: Option<ProviderFee>,
    pub consume_market_fee: TokenFee,
}

/// Token and datatoken contract calls. Methods returning `String` return the
/// transaction id.
#[async_trait]
pub trait Marketplace: Send + Sync {
    async fn balance_of(&self, token: &str, owner: &str) -> ClientResult<TokenAmount>;

    async fn symbol(&self, token: &str) -> ClientResult<String>;

    async fn approve(&self, token: &str, spender: &str, amount: TokenAmount) -> ClientResult<String>;

    async fn datatoken_template(&self, datatoken: &str) -> ClientResult<u32>;

    /// First fixed-rate exchange of `datatoken`, if any.
    async fn exchange(&self, datatoken: &str) -> ClientResult<Option<FixedRateExchange>>;

    /// Base-token amount needed to buy `datatoken_amount`, including the consume-market fee.
    async fn base_token_needed(
        &self,
        exchange: &FixedRateExchange,
        datatoken_amount: TokenAmount,
        consume_market_fee: TokenAmount,
    ) -> ClientResult<TokenAmount>;

    async fn reuse_order(
        &self,
        datatoken: &str,
        order_tx: &str,
        provider_fee: &ProviderFee,
    ) -> ClientResult<String>;

    async fn buy_and_order(
        &self,
        datatoken: &str,
        exchange: &FixedRateExchange,
        params: &OrderParams,
        max_base_token_amount: Option<TokenAmount>,
    ) -> ClientResult<String>;

    async fn dispense_and_order(&self, datatoken: &str, params: &OrderParams) -> ClientResult<String>;
}

/// The payer identity: an address plus the ability to sign provider messages.
#[async_trait]
pub trait WalletSigner: Send + Sync {
    fn address(&self) -> &str;

    /// Signs `message ++ nonce` and returns the hex signature.
    async fn sign(&self, message: &str, nonce: Nonce) -> ClientResult<String>;
}

/// Seals auth tokens for a recipient before they leave the process.
#[async_trait]
pub trait TokenSealer: Send + Sync {
    async fn seal(&self, plaintext: &str, recipient_public_key: &str) -> ClientResult<String>;
}
