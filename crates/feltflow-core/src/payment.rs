//! Pay-then-compute authorization.
//!
//! A payment pass runs in three phases over every input of one compute job:
//! plan (decide the on-chain action, check balances, queue approvals), one
//! flush of the shared approval ledger, then execute (send the order
//! transactions and record their ids on the inputs).

use crate::access::{AccessDetails, AccessType};
use crate::approvals::{ensure_balance, ApprovalLedger};
use crate::error::{FlowError, FlowResult};
use feltflow_abstraction::{
    ComputeInput, FixedRateExchange, InitializeItem, Marketplace, OrderParams, ProviderFee,
    TokenAmount, TokenFee, ENTERPRISE_TEMPLATE_ID,
};
use tracing::{debug, info};

/// One datatoken, in base units.
pub const ONE_DATATOKEN: TokenAmount = 1_000_000_000_000_000_000;

/// Everything needed to authorize one compute input.
#[derive(Debug, Clone)]
pub struct PaymentRequest {
    pub input: ComputeInput,
    pub datatoken: String,
    pub service_index: usize,
    pub access: AccessDetails,
    /// The provider's initialize answer for this input.
    pub item: InitializeItem,
    pub consume_market_fee: TokenFee,
}

/// Result of a payment pass.
#[derive(Debug, Clone)]
pub struct PaymentOutcome {
    /// Inputs in request order, each with its transfer transaction set.
    pub inputs: Vec<ComputeInput>,
    pub ledger: ApprovalLedger,
    pub approvals_sent: usize,
    /// Order transactions sent in this pass (reused orders excluded).
    pub transactions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
enum PaymentPlan {
    Reuse { order_tx: String },
    ReuseWithFee { order_tx: String, fee: ProviderFee },
    BuyAndOrder { exchange: FixedRateExchange, params: OrderParams, ceiling_spender: Option<String> },
    DispenseAndOrder { params: OrderParams },
}

/// Decides and executes the minimal on-chain action per input.
pub struct PaymentResolver<'a> {
    market: &'a dyn Marketplace,
    payer: &'a str,
    consumer: &'a str,
}

impl<'a> PaymentResolver<'a> {
    /// `payer` funds approvals; `consumer` is the address orders are placed for.
    #[must_use]
    pub fn new(market: &'a dyn Marketplace, payer: &'a str, consumer: &'a str) -> Self {
        Self { market, payer, consumer }
    }

    /// Runs one payment pass over `requests`, queuing approvals into `ledger`.
    pub async fn resolve(
        &self,
        requests: Vec<PaymentRequest>,
        mut ledger: ApprovalLedger,
    ) -> FlowResult<PaymentOutcome> {
        let mut plans = Vec::with_capacity(requests.len());
        for request in &requests {
            plans.push(self.plan(request, &mut ledger).await?);
        }

        let approvals_sent = ledger.flush(self.market, self.payer).await?;

        let mut inputs = Vec::with_capacity(requests.len());
        let mut transactions = Vec::new();
        for (request, plan) in requests.into_iter().zip(plans) {
            let (tx, sent) = self.execute(&request, plan, &ledger).await?;
            info!(did = %request.input.did, tx = %tx, new_order = sent, "Compute input authorized");
            if sent {
                transactions.push(tx.clone());
            }
            let mut input = request.input;
            input.transfer_tx_id = Some(tx);
            inputs.push(input);
        }

        Ok(PaymentOutcome { inputs, ledger, approvals_sent, transactions })
    }

    async fn plan(&self, request: &PaymentRequest, ledger: &mut ApprovalLedger) -> FlowResult<PaymentPlan> {
        let datatoken = request.datatoken.as_str();
        let fee = request.item.provider_fee.clone().filter(ProviderFee::is_due);
        let valid_order = request.item.valid_order.clone().filter(|tx| !tx.is_empty());

        match (valid_order, fee) {
            (Some(order_tx), None) => return Ok(PaymentPlan::Reuse { order_tx }),
            (Some(order_tx), Some(fee)) => {
                self.queue(ledger, &fee.provider_fee_token, datatoken, fee.provider_fee_amount).await?;
                return Ok(PaymentPlan::ReuseWithFee { order_tx, fee });
            }
            (None, _) => {}
        }

        let params = OrderParams {
            consumer: self.consumer.to_string(),
            service_index: request.service_index,
            provider_fee: request.item.provider_fee.clone(),
            consume_market_fee: request.consume_market_fee.clone(),
        };
        let fee = params.provider_fee.clone().filter(ProviderFee::is_due);

        match request.access.access_type {
            AccessType::Fixed => {
                let exchange = self.market.exchange(datatoken).await?.ok_or_else(|| {
                    FlowError::UnsupportedAccess {
                        datatoken: datatoken.to_string(),
                        reason: "fixed-rate access without an exchange".to_string(),
                    }
                })?;
                let mut needed = self
                    .market
                    .base_token_needed(&exchange, ONE_DATATOKEN, request.consume_market_fee.amount)
                    .await?;
                let template = self.market.datatoken_template(datatoken).await?;
                debug!(datatoken = %datatoken, template, needed = %needed, "Planning datatoken purchase");

                if template == ENTERPRISE_TEMPLATE_ID {
                    if let Some(fee) = &fee {
                        if fee.provider_fee_token.eq_ignore_ascii_case(&exchange.base_token) {
                            needed = needed.saturating_add(fee.provider_fee_amount);
                        } else {
                            self.queue(ledger, &fee.provider_fee_token, datatoken, fee.provider_fee_amount)
                                .await?;
                        }
                    }
                    self.queue(ledger, &exchange.base_token, datatoken, needed).await?;
                    Ok(PaymentPlan::BuyAndOrder {
                        exchange,
                        params,
                        ceiling_spender: Some(datatoken.to_string()),
                    })
                } else {
                    if let Some(fee) = &fee {
                        self.queue(ledger, &fee.provider_fee_token, datatoken, fee.provider_fee_amount).await?;
                    }
                    let spender = exchange.address.clone();
                    self.queue(ledger, &exchange.base_token, &spender, needed).await?;
                    Ok(PaymentPlan::BuyAndOrder { exchange, params, ceiling_spender: None })
                }
            }
            AccessType::Free => {
                if let Some(fee) = &fee {
                    self.queue(ledger, &fee.provider_fee_token, datatoken, fee.provider_fee_amount).await?;
                }
                Ok(PaymentPlan::DispenseAndOrder { params })
            }
            AccessType::Unsupported => Err(FlowError::UnsupportedAccess {
                datatoken: datatoken.to_string(),
                reason: format!("access type '{}'", request.access.access_type),
            }),
        }
    }

    /// Checks the balance covers everything queued for `token` plus `amount`, then queues it.
    async fn queue(
        &self,
        ledger: &mut ApprovalLedger,
        token: &str,
        spender: &str,
        amount: TokenAmount,
    ) -> FlowResult<()> {
        let required = ledger.token_total(token).saturating_add(amount);
        ensure_balance(self.market, token, self.payer, required).await?;
        ledger.add(token, spender, amount);
        Ok(())
    }

    /// Returns the transfer transaction and whether a new transaction was sent.
    async fn execute(
        &self,
        request: &PaymentRequest,
        plan: PaymentPlan,
        ledger: &ApprovalLedger,
    ) -> FlowResult<(String, bool)> {
        let datatoken = request.datatoken.as_str();
        let tx = match plan {
            PaymentPlan::Reuse { order_tx } => return Ok((order_tx, false)),
            PaymentPlan::ReuseWithFee { order_tx, fee } => {
                self.market.reuse_order(datatoken, &order_tx, &fee).await?
            }
            PaymentPlan::BuyAndOrder { exchange, params, ceiling_spender } => {
                let ceiling = ceiling_spender.map(|spender| ledger.amount(&exchange.base_token, &spender));
                self.market.buy_and_order(datatoken, &exchange, &params, ceiling).await?
            }
            PaymentPlan::DispenseAndOrder { params } => {
                self.market.dispense_and_order(datatoken, &params).await?
            }
        };
        Ok((tx, true))
    }
}
