//! Access details of a datatoken-gated service, derived from the subgraph.
//!
//! Details are read fresh before every job start: prices and orders change
//! between rounds, so nothing here is cached.

use crate::error::{FlowError, FlowResult};
use feltflow_abstraction::{BaseTokenRef, DatatokenRef, Service, SubgraphClient, TokenPrice};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// How access to a service is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessType {
    /// Datatokens come from a dispenser.
    Free,
    /// Datatokens are bought on a fixed-rate exchange.
    Fixed,
    /// Neither a dispenser nor an exchange is available.
    Unsupported,
}

impl std::fmt::Display for AccessType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Free => "free",
            Self::Fixed => "fixed",
            Self::Unsupported => "unsupported",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessDetails {
    pub access_type: AccessType,
    /// Price in base-token units as reported by the subgraph ("0" when free).
    pub price: String,
    pub template_id: u32,
    pub publisher_market_order_fee: Option<String>,
    /// Newest order (or order reuse) paid by the account.
    pub valid_order_tx: Option<String>,
    /// Whether `valid_order_tx` is still within the service timeout.
    pub is_owned: bool,
    /// Dispenser token or exchange id.
    pub address_or_id: Option<String>,
    pub is_purchasable: bool,
    pub datatoken: Option<DatatokenRef>,
    pub base_token: Option<BaseTokenRef>,
}

impl AccessDetails {
    #[must_use]
    pub fn unsupported() -> Self {
        Self {
            access_type: AccessType::Unsupported,
            price: String::new(),
            template_id: 0,
            publisher_market_order_fee: None,
            valid_order_tx: None,
            is_owned: false,
            address_or_id: None,
            is_purchasable: false,
            datatoken: None,
            base_token: None,
        }
    }

    /// Derives access details from a subgraph token record.
    ///
    /// `timeout` is the service timeout in seconds (zero: orders never expire)
    /// and `now` the current unix time in seconds.
    #[must_use]
    pub fn from_token_price(price: &TokenPrice, timeout: u64, now: i64) -> Self {
        if price.dispensers.is_empty() && price.fixed_rate_exchanges.is_empty() {
            return Self::unsupported();
        }

        let mut details = Self {
            template_id: price.template_id,
            publisher_market_order_fee: price.publish_market_fee_amount.clone(),
            ..Self::unsupported()
        };

        if let Some(order) = price.orders.first() {
            let age = now.saturating_sub(order.created_timestamp);
            details.is_owned = timeout == 0 || age < i64::try_from(timeout).unwrap_or(i64::MAX);
            details.valid_order_tx =
                Some(order.reuses.first().map_or_else(|| order.tx.clone(), |reuse| reuse.tx.clone()));
        }

        if let Some(dispenser) = price.dispensers.first() {
            details.access_type = AccessType::Free;
            details.address_or_id = Some(dispenser.token.address.clone());
            details.price = "0".to_string();
            details.is_purchasable = dispenser.active;
            details.datatoken = Some(dispenser.token.clone());
        } else if let Some(fixed) = price.fixed_rate_exchanges.first() {
            details.access_type = AccessType::Fixed;
            details.address_or_id = Some(fixed.exchange_id.clone());
            details.price = fixed.price.clone();
            details.is_purchasable = fixed.active;
            details.base_token = Some(fixed.base_token.clone());
            details.datatoken = Some(fixed.datatoken.clone());
        }

        details
    }

    /// The prior order worth handing to the provider, if it is still owned.
    #[must_use]
    pub fn reusable_order(&self) -> Option<&str> {
        self.valid_order_tx.as_deref().filter(|_| self.is_owned)
    }
}

/// Queries the subgraph for the current access details of `service`.
pub async fn fetch_access_details(
    subgraph: &dyn SubgraphClient,
    service: &Service,
    account: &str,
    now: i64,
) -> FlowResult<AccessDetails> {
    let price = subgraph
        .token_price(&service.datatoken.to_lowercase(), &account.to_lowercase())
        .await?;

    let details = match price {
        Some(price) => AccessDetails::from_token_price(&price, service.timeout, now),
        None => AccessDetails::unsupported(),
    };
    debug!(
        datatoken = %service.datatoken,
        access_type = %details.access_type,
        valid_order = ?details.valid_order_tx,
        "Resolved access details"
    );
    Ok(details)
}

/// Fails with `UnsupportedAccess` when `service` can be neither dispensed nor bought.
///
/// Orders don't affect the access type, so no payer account is involved.
pub async fn ensure_supported(subgraph: &dyn SubgraphClient, service: &Service, now: i64) -> FlowResult<()> {
    let details = fetch_access_details(subgraph, service, "", now).await?;
    if details.access_type == AccessType::Unsupported {
        return Err(FlowError::UnsupportedAccess {
            datatoken: service.datatoken.clone(),
            reason: "no dispenser or fixed-rate exchange".to_string(),
        });
    }
    Ok(())
}
