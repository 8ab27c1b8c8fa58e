//! Grades past recommendations against the prices observed since.

use crate::store::{Database, Outcome, StoredRecommendation};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tradepilot_core::{EvaluationConfig, TradeAction};

const GOOD_MOVE_PCT: Decimal = Decimal::from_parts(5, 0, 0, false, 0);
const NEUTRAL_BAND_PCT: Decimal = Decimal::from_parts(2, 0, 0, false, 0);

/// Aggregate result of one evaluation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvaluationSummary {
    pub evaluated: usize,
    /// Recommendations graded excellent or good.
    pub hits: usize,
    /// Skipped for lack of a current price.
    pub unpriced: usize,
    /// Mean price change across evaluated recommendations, in percent.
    pub average_return_pct: Decimal,
}

impl EvaluationSummary {
    /// Share of evaluated recommendations that were hits, in percent.
    #[must_use]
    pub fn hit_rate_pct(&self) -> Decimal {
        if self.evaluated == 0 {
            return Decimal::ZERO;
        }
        (Decimal::from(self.hits) / Decimal::from(self.evaluated) * Decimal::ONE_HUNDRED).round_dp(1)
    }
}

/// Grades one recommendation.
///
/// For a BUY: target reached → excellent, ≥ +5% → good, ≥ −2% → neutral,
/// ≥ −5% without the stop being hit → poor, otherwise bad. SELL mirrors this
/// with the sign of the move flipped.
///
/// # Arguments
/// * `action` - BUY or SELL; HOLD is always neutral
/// * `change_pct` - Price change since the recommendation, in percent
/// * `target_hit` - Whether the price reached the target
/// * `stop_hit` - Whether the price crossed the stop loss
#[must_use]
pub fn score(action: TradeAction, change_pct: Decimal, target_hit: bool, stop_hit: bool) -> Outcome {
    let favorable = match action {
        TradeAction::Buy => change_pct,
        TradeAction::Sell => -change_pct,
        TradeAction::Hold => return Outcome::Neutral,
    };

    if target_hit {
        Outcome::Excellent
    } else if favorable >= GOOD_MOVE_PCT {
        Outcome::Good
    } else if favorable >= -NEUTRAL_BAND_PCT {
        Outcome::Neutral
    } else if favorable >= -GOOD_MOVE_PCT && !stop_hit {
        Outcome::Poor
    } else {
        Outcome::Bad
    }
}

fn levels_hit(recommendation: &StoredRecommendation, price: Decimal) -> (bool, bool) {
    let proposal = &recommendation.proposal;
    match proposal.action {
        TradeAction::Buy => (
            proposal.target_price.is_some_and(|t| price >= t),
            proposal.stop_loss.is_some_and(|s| price <= s),
        ),
        TradeAction::Sell => (
            proposal.target_price.is_some_and(|t| price <= t),
            proposal.stop_loss.is_some_and(|s| price >= s),
        ),
        TradeAction::Hold => (false, false),
    }
}

/// Scores every recommendation that has aged into the evaluation window and
/// has not been graded yet.
///
/// # Errors
/// Returns error if the store cannot be read or an outcome cannot be written.
pub async fn evaluate_due(
    db: &Database,
    config: &EvaluationConfig,
    now: DateTime<Utc>,
) -> Result<EvaluationSummary> {
    let due = db
        .recommendations_due(
            now,
            chrono::Duration::days(config.min_age_days),
            chrono::Duration::days(config.max_age_days),
            config.top_n,
        )
        .await
        .context("Failed to load recommendations for evaluation")?;

    if due.is_empty() {
        tracing::info!("No eligible recommendations to evaluate");
        return Ok(EvaluationSummary::default());
    }

    tracing::info!("Evaluating {} past recommendations", due.len());

    let mut summary = EvaluationSummary::default();
    let mut total_return = Decimal::ZERO;

    for recommendation in &due {
        let symbol = &recommendation.proposal.symbol;
        let Some(entry) = recommendation
            .price_at_recommendation
            .filter(|p| *p > Decimal::ZERO)
        else {
            continue;
        };
        let Some(current) = db.price_at(symbol, now).await? else {
            tracing::warn!("No current price for {}, skipping evaluation", symbol);
            summary.unpriced += 1;
            continue;
        };

        let change_pct = ((current - entry) / entry * Decimal::ONE_HUNDRED).round_dp(2);
        let (target_hit, stop_hit) = levels_hit(recommendation, current);
        let outcome = score(recommendation.proposal.action, change_pct, target_hit, stop_hit);

        db.record_outcome(recommendation.id, current, change_pct, outcome)
            .await
            .with_context(|| format!("Failed to record outcome for {symbol}"))?;

        tracing::info!(
            "{} {} -> {} ({:+}%)",
            symbol,
            recommendation.proposal.action,
            outcome,
            change_pct
        );

        summary.evaluated += 1;
        if outcome.is_hit() {
            summary.hits += 1;
        }
        total_return += change_pct;
    }

    if summary.evaluated > 0 {
        summary.average_return_pct = (total_return / Decimal::from(summary.evaluated)).round_dp(2);
    }

    tracing::info!(
        "Evaluation complete: {} graded, hit rate {}%, average return {}%",
        summary.evaluated,
        summary.hit_rate_pct(),
        summary.average_return_pct
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tradepilot_core::{MarketSnapshot, TradeProposal};

    // =========================================================================
    // Scoring thresholds
    // =========================================================================

    #[test]
    fn test_buy_scoring() {
        assert_eq!(score(TradeAction::Buy, dec!(1), true, false), Outcome::Excellent);
        assert_eq!(score(TradeAction::Buy, dec!(5), false, false), Outcome::Good);
        assert_eq!(score(TradeAction::Buy, dec!(-2), false, false), Outcome::Neutral);
        assert_eq!(score(TradeAction::Buy, dec!(-4), false, false), Outcome::Poor);
        assert_eq!(score(TradeAction::Buy, dec!(-4), false, true), Outcome::Bad);
        assert_eq!(score(TradeAction::Buy, dec!(-8), false, false), Outcome::Bad);
    }

    #[test]
    fn test_sell_scoring_mirrors_buy() {
        assert_eq!(score(TradeAction::Sell, dec!(-6), false, false), Outcome::Good);
        assert_eq!(score(TradeAction::Sell, dec!(2), false, false), Outcome::Neutral);
        assert_eq!(score(TradeAction::Sell, dec!(4.5), false, false), Outcome::Poor);
        assert_eq!(score(TradeAction::Sell, dec!(7), false, false), Outcome::Bad);
    }

    // =========================================================================
    // Evaluation pass
    // =========================================================================

    async fn seed_price(db: &Database, symbol: &str, price: Decimal, at: DateTime<Utc>) {
        db.record_market_snapshot(&MarketSnapshot {
            symbol: symbol.to_string(),
            price,
            atr: dec!(1),
            sma_50: None,
            avg_volume: None,
            source: "test".to_string(),
            observed_at: at,
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_evaluate_due_grades_and_records() {
        let db = Database::in_memory().await.unwrap();
        let buy = TradeProposal::new("AAPL", TradeAction::Buy, 0.8).with_target_price(dec!(120));
        let sell = TradeProposal::new("TSLA", TradeAction::Sell, 0.6);
        db.insert_recommendation(&buy, Some(dec!(100)), "ai").await.unwrap();
        db.insert_recommendation(&sell, Some(dec!(200)), "rules").await.unwrap();

        // Evaluate a week after the recommendations were stored.
        let later = Utc::now() + chrono::Duration::days(7);
        seed_price(&db, "AAPL", dec!(106), later).await;
        seed_price(&db, "TSLA", dec!(220), later).await;

        let summary = evaluate_due(&db, &EvaluationConfig::default(), later).await.unwrap();
        assert_eq!(summary.evaluated, 2);
        assert_eq!(summary.hits, 1);
        assert_eq!(summary.hit_rate_pct(), dec!(50.0));
        assert_eq!(summary.average_return_pct, dec!(8));

        let again = evaluate_due(&db, &EvaluationConfig::default(), later).await.unwrap();
        assert_eq!(again.evaluated, 0, "graded recommendations are not re-evaluated");
    }

    #[tokio::test]
    async fn test_too_recent_recommendations_wait() {
        let db = Database::in_memory().await.unwrap();
        let buy = TradeProposal::new("AAPL", TradeAction::Buy, 0.8);
        db.insert_recommendation(&buy, Some(dec!(100)), "ai").await.unwrap();

        let summary = evaluate_due(&db, &EvaluationConfig::default(), Utc::now()).await.unwrap();
        assert_eq!(summary, EvaluationSummary::default());
    }
}
