use super::{from_timestamp, parse_optional_decimal, Database};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use tradepilot_core::{TradeAction, TradeProposal};

/// A recommendation as persisted, with the price it was made at.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredRecommendation {
    pub id: i64,
    pub proposal: TradeProposal,
    pub price_at_recommendation: Option<Decimal>,
    pub source: String,
    pub created_at: DateTime<Utc>,
}

/// Quality grade assigned to a past recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Excellent,
    Good,
    Neutral,
    Poor,
    Bad,
}

impl Outcome {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::Neutral => "neutral",
            Self::Poor => "poor",
            Self::Bad => "bad",
        }
    }

    /// Counts toward the hit rate.
    #[must_use]
    pub const fn is_hit(&self) -> bool {
        matches!(self, Self::Excellent | Self::Good)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type RecommendationRow = (
    i64,
    String,
    String,
    f64,
    Option<String>,
    Option<String>,
    Option<String>,
    String,
    String,
    i64,
);

impl Database {
    /// Stores a recommendation together with the price it was made at.
    ///
    /// # Errors
    ///
    /// Returns error if the database operation fails.
    pub async fn insert_recommendation(
        &self,
        proposal: &TradeProposal,
        price: Option<Decimal>,
        source: &str,
    ) -> Result<i64> {
        let id = sqlx::query(
            r"
            INSERT INTO recommendations
                (symbol, action, confidence, price_at_recommendation, stop_loss, target_price,
                 reasoning, source, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ",
        )
        .bind(&proposal.symbol)
        .bind(proposal.action.as_str())
        .bind(proposal.confidence)
        .bind(price.map(|p| p.to_string()))
        .bind(proposal.stop_loss.map(|p| p.to_string()))
        .bind(proposal.target_price.map(|p| p.to_string()))
        .bind(&proposal.reasoning)
        .bind(source)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(id)
    }

    /// Latest recommendation per symbol created in `[from, to)`.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails or a stored value is corrupt.
    pub async fn recommendations_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<StoredRecommendation>> {
        let rows = sqlx::query_as::<_, RecommendationRow>(
            r"
            SELECT r.id, r.symbol, r.action, r.confidence, r.price_at_recommendation,
                   r.stop_loss, r.target_price, r.reasoning, r.source, r.created_at
            FROM recommendations r
            WHERE r.created_at >= ?1 AND r.created_at < ?2
              AND r.id = (
                  SELECT r2.id FROM recommendations r2
                  WHERE r2.symbol = r.symbol AND r2.created_at >= ?1 AND r2.created_at < ?2
                  ORDER BY r2.created_at DESC, r2.id DESC
                  LIMIT 1
              )
            ORDER BY r.symbol ASC
            ",
        )
        .bind(from.timestamp())
        .bind(to.timestamp())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(into_stored).collect()
    }

    /// Unevaluated BUY/SELL recommendations aged between `min_age` and
    /// `max_age`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails or a stored value is corrupt.
    pub async fn recommendations_due(
        &self,
        now: DateTime<Utc>,
        min_age: chrono::Duration,
        max_age: chrono::Duration,
        limit: u32,
    ) -> Result<Vec<StoredRecommendation>> {
        let rows = sqlx::query_as::<_, RecommendationRow>(
            r"
            SELECT r.id, r.symbol, r.action, r.confidence, r.price_at_recommendation,
                   r.stop_loss, r.target_price, r.reasoning, r.source, r.created_at
            FROM recommendations r
            LEFT JOIN recommendation_outcomes o ON o.recommendation_id = r.id
            WHERE o.recommendation_id IS NULL
              AND r.action IN ('BUY', 'SELL')
              AND r.price_at_recommendation IS NOT NULL
              AND r.created_at <= ?1 AND r.created_at >= ?2
            ORDER BY r.created_at ASC
            LIMIT ?3
            ",
        )
        .bind((now - min_age).timestamp())
        .bind((now - max_age).timestamp())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(into_stored).collect()
    }

    /// Records the graded outcome of a recommendation.
    ///
    /// # Errors
    ///
    /// Returns error if the database operation fails.
    pub async fn record_outcome(
        &self,
        recommendation_id: i64,
        evaluated_price: Decimal,
        return_pct: Decimal,
        outcome: Outcome,
    ) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO recommendation_outcomes
                (recommendation_id, evaluated_price, return_pct, outcome, evaluated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(recommendation_id) DO UPDATE SET
                evaluated_price = excluded.evaluated_price,
                return_pct = excluded.return_pct,
                outcome = excluded.outcome,
                evaluated_at = excluded.evaluated_at
            ",
        )
        .bind(recommendation_id)
        .bind(evaluated_price.to_string())
        .bind(return_pct.to_string())
        .bind(outcome.as_str())
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn into_stored(row: RecommendationRow) -> Result<StoredRecommendation> {
    let (id, symbol, action, confidence, price, stop_loss, target_price, reasoning, source, created_at) =
        row;
    let action: TradeAction = action.parse().map_err(|e: String| anyhow!(e))?;

    let mut proposal = TradeProposal::new(symbol, action, confidence).with_reasoning(reasoning);
    proposal.stop_loss = parse_optional_decimal(stop_loss.as_deref())?;
    proposal.target_price = parse_optional_decimal(target_price.as_deref())?;

    Ok(StoredRecommendation {
        id,
        proposal,
        price_at_recommendation: parse_optional_decimal(price.as_deref())?,
        source,
        created_at: from_timestamp(created_at),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    async fn backdate(db: &Database, id: i64, days: i64) {
        sqlx::query("UPDATE recommendations SET created_at = ?1 WHERE id = ?2")
            .bind((Utc::now() - chrono::Duration::days(days)).timestamp())
            .bind(id)
            .execute(db.pool())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_due_window_and_outcomes() {
        let db = Database::in_memory().await.unwrap();
        let buy = TradeProposal::new("AAPL", TradeAction::Buy, 0.7).with_target_price(dec!(120));
        let hold = TradeProposal::new("MSFT", TradeAction::Hold, 0.3);

        let fresh = db.insert_recommendation(&buy, Some(dec!(100)), "ai").await.unwrap();
        let due = db.insert_recommendation(&buy, Some(dec!(100)), "ai").await.unwrap();
        let ancient = db.insert_recommendation(&buy, Some(dec!(100)), "ai").await.unwrap();
        let held = db.insert_recommendation(&hold, Some(dec!(300)), "rules").await.unwrap();
        backdate(&db, fresh, 1).await;
        backdate(&db, due, 5).await;
        backdate(&db, ancient, 60).await;
        backdate(&db, held, 5).await;

        let now = Utc::now();
        let list = db
            .recommendations_due(now, chrono::Duration::days(3), chrono::Duration::days(30), 20)
            .await
            .unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id, due);
        assert_eq!(list[0].proposal.target_price, Some(dec!(120)));
        assert_eq!(list[0].price_at_recommendation, Some(dec!(100)));

        db.record_outcome(due, dec!(108), dec!(8), Outcome::Good).await.unwrap();
        let list = db
            .recommendations_due(now, chrono::Duration::days(3), chrono::Duration::days(30), 20)
            .await
            .unwrap();
        assert!(list.is_empty());
    }

    #[tokio::test]
    async fn test_latest_per_symbol_for_day() {
        let db = Database::in_memory().await.unwrap();
        db.insert_recommendation(&TradeProposal::new("AAPL", TradeAction::Hold, 0.3), None, "rules")
            .await
            .unwrap();
        db.insert_recommendation(&TradeProposal::new("AAPL", TradeAction::Buy, 0.8), None, "ai")
            .await
            .unwrap();

        let now = Utc::now();
        let recs = db
            .recommendations_between(now - chrono::Duration::hours(1), now + chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].proposal.action, TradeAction::Buy);
    }
}
