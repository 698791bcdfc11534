//! Batched ERC20 approvals for one payment pass.

use crate::error::{FlowError, FlowResult};
use feltflow_abstraction::{Marketplace, TokenAmount};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// Cumulative amounts to approve, keyed by `(token, spender)`.
///
/// Amounts for the same pair add up across every input of a pass. An approve
/// call sets the allowance, so flushing a pair approves its full cumulative
/// amount; pairs without new additions since the last flush are skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApprovalLedger {
    amounts: BTreeMap<(String, String), TokenAmount>,
    pending: BTreeSet<(String, String)>,
}

impl ApprovalLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `amount` of `token` to be approved for `spender`.
    pub fn add(&mut self, token: &str, spender: &str, amount: TokenAmount) {
        let key = (token.to_lowercase(), spender.to_lowercase());
        let entry = self.amounts.entry(key.clone()).or_insert(0);
        *entry = entry.saturating_add(amount);
        self.pending.insert(key);
    }

    /// Cumulative amount for a pair, or zero.
    #[must_use]
    pub fn amount(&self, token: &str, spender: &str) -> TokenAmount {
        self.amounts
            .get(&(token.to_lowercase(), spender.to_lowercase()))
            .copied()
            .unwrap_or(0)
    }

    /// Sum of everything queued for `token` across spenders.
    #[must_use]
    pub fn token_total(&self, token: &str) -> TokenAmount {
        let token = token.to_lowercase();
        self.amounts
            .iter()
            .filter(|((t, _), _)| *t == token)
            .fold(0, |acc, (_, amount)| acc.saturating_add(*amount))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.amounts.is_empty()
    }

    /// Number of distinct `(token, spender)` pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.amounts.len()
    }

    /// Iterates `((token, spender), amount)` in a stable order.
    pub fn iter(&self) -> impl Iterator<Item = (&(String, String), &TokenAmount)> {
        self.amounts.iter()
    }

    /// Issues one approve call per pending pair and returns how many were sent.
    ///
    /// Every token's balance is checked against its cumulative amount before
    /// the first call goes out.
    pub async fn flush(&mut self, market: &dyn Marketplace, payer: &str) -> FlowResult<usize> {
        let to_send: Vec<((String, String), TokenAmount)> = self
            .pending
            .iter()
            .filter_map(|key| self.amounts.get(key).map(|amount| (key.clone(), *amount)))
            .filter(|(_, amount)| *amount > 0)
            .collect();

        let tokens: BTreeSet<&str> = to_send.iter().map(|((token, _), _)| token.as_str()).collect();
        for token in tokens {
            ensure_balance(market, token, payer, self.token_total(token)).await?;
        }

        for ((token, spender), amount) in &to_send {
            let tx = market.approve(token, spender, *amount).await?;
            debug!(token = %token, spender = %spender, amount = %amount, tx = %tx, "Approved token spend");
        }

        self.pending.clear();
        if !to_send.is_empty() {
            info!(approvals = to_send.len(), "Flushed token approvals");
        }
        Ok(to_send.len())
    }
}

/// Fails with `InsufficientBalance` unless `payer` holds at least `required` of `token`.
pub async fn ensure_balance(
    market: &dyn Marketplace,
    token: &str,
    payer: &str,
    required: TokenAmount,
) -> FlowResult<()> {
    if required == 0 {
        return Ok(());
    }
    let available = market.balance_of(token, payer).await?;
    if available >= required {
        return Ok(());
    }
    let symbol = market.symbol(token).await?;
    Err(FlowError::InsufficientBalance {
        token: token.to_string(),
        symbol,
        required,
        available,
        shortfall: required - available,
    })
}
