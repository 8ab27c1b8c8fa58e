use super::decision::{RiskDecision, Veto};
use super::validate::validate;
use crate::config::RiskConfig;
use crate::domain::{MarketSnapshot, PortfolioContext, TradeAction, TradeProposal};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Append-only sink for risk decisions.
///
/// Implementations must commit each record independently of any transaction
/// the caller may hold, so a later failure never erases what was decided.
#[async_trait]
pub trait DecisionAudit: Send + Sync {
    async fn record(&self, proposal: &TradeProposal, decision: &RiskDecision) -> Result<()>;
}

/// Audited entry point to the risk engine.
///
/// Every call to [`RiskController::evaluate`] writes exactly one audit record.
#[derive(Clone)]
pub struct RiskController {
    config: RiskConfig,
    audit: Arc<dyn DecisionAudit>,
}

impl RiskController {
    #[must_use]
    pub fn new(config: RiskConfig, audit: Arc<dyn DecisionAudit>) -> Self {
        Self { config, audit }
    }

    #[must_use]
    pub const fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Validates a proposal and appends the decision to the audit log.
    ///
    /// BUY and SELL proposals against a snapshot older than the configured TTL
    /// are vetoed without sizing.
    ///
    /// # Errors
    /// Returns error if the audit record cannot be written. The decision is not
    /// returned unaudited.
    pub async fn evaluate(
        &self,
        proposal: &TradeProposal,
        context: &PortfolioContext,
        market: &MarketSnapshot,
        as_of: DateTime<Utc>,
    ) -> Result<RiskDecision> {
        let ttl = self.config.market_data_ttl();
        let decision = if proposal.action != TradeAction::Hold && market.is_stale(as_of, ttl) {
            RiskDecision::Vetoed(Veto::StaleMarketData {
                symbol: proposal.symbol.clone(),
                age_hours: market.age(as_of).num_hours(),
                ttl_hours: self.config.market_data_ttl_hours,
            })
        } else {
            validate(proposal, context, market, &self.config)
        };

        if decision.is_approved() {
            tracing::info!(
                "Risk approved {} {}: {}",
                proposal.action,
                proposal.symbol,
                decision.reason()
            );
        } else {
            tracing::info!(
                "Risk vetoed {} {}: {}",
                proposal.action,
                proposal.symbol,
                decision.reason()
            );
        }

        self.audit
            .record(proposal, &decision)
            .await
            .with_context(|| format!("Failed to audit risk decision for {}", proposal.symbol))?;

        Ok(decision)
    }
}
