use super::{from_timestamp, parse_decimal, Database};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tradepilot_core::risk::Approval;
use tradepilot_core::{DecisionAudit, RiskDecision, TradeProposal};

/// One row of the risk audit log.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionRow {
    pub symbol: String,
    pub action: String,
    pub approved: bool,
    pub reason: String,
    pub approved_shares: Decimal,
    pub approved_cost: Decimal,
    pub timestamp: DateTime<Utc>,
}

#[async_trait]
impl DecisionAudit for Database {
    /// Appends the decision on a pooled connection in autocommit mode.
    async fn record(&self, proposal: &TradeProposal, decision: &RiskDecision) -> Result<()> {
        let (stop_loss, position_pct) = match decision {
            RiskDecision::Approved(Approval::Buy(buy)) => (
                Some(buy.stop_loss.to_string()),
                Some(buy.position_pct.to_string()),
            ),
            _ => (None, None),
        };
        let decision_json = serde_json::to_string(decision)?;

        sqlx::query(
            r"
            INSERT INTO risk_decisions
                (symbol, action, approved, reason, approved_shares, approved_cost,
                 stop_loss, position_pct, decision_json, timestamp)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ",
        )
        .bind(&proposal.symbol)
        .bind(proposal.action.as_str())
        .bind(decision.is_approved())
        .bind(decision.reason())
        .bind(decision.approved_shares().to_string())
        .bind(decision.approved_cost().to_string())
        .bind(stop_loss)
        .bind(position_pct)
        .bind(decision_json)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

impl Database {
    /// Audit rows with `from <= timestamp < to`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails or a stored value is corrupt.
    pub async fn decisions_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<DecisionRow>> {
        let rows = sqlx::query_as::<_, (String, String, bool, String, String, String, i64)>(
            r"
            SELECT symbol, action, approved, reason, approved_shares, approved_cost, timestamp
            FROM risk_decisions
            WHERE timestamp >= ?1 AND timestamp < ?2
            ORDER BY id ASC
            ",
        )
        .bind(from.timestamp())
        .bind(to.timestamp())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(
                |(symbol, action, approved, reason, shares, cost, timestamp)| {
                    Ok(DecisionRow {
                        symbol,
                        action,
                        approved,
                        reason,
                        approved_shares: parse_decimal(&shares)?,
                        approved_cost: parse_decimal(&cost)?,
                        timestamp: from_timestamp(timestamp),
                    })
                },
            )
            .collect()
    }

    /// Total number of audit rows.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn decision_count(&self) -> Result<i64> {
        let (count,) = sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM risk_decisions")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
