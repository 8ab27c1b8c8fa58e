//! Collaborators that read what external fetchers have persisted.

use crate::collaborators::{MarketDataSource, NewsSource, PortfolioSource};
use crate::store::Database;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tradepilot_core::{MarketSnapshot, NewsSignal, PortfolioContext};

/// Serves market data, metadata and news from the database.
#[derive(Clone)]
pub struct StoredMarketData {
    db: Database,
}

impl StoredMarketData {
    #[must_use]
    pub const fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MarketDataSource for StoredMarketData {
    async fn refresh_metadata(&self, symbols: &[String]) -> Result<()> {
        let missing = self.db.symbols_missing_metadata(symbols).await?;
        if !missing.is_empty() {
            tracing::warn!(
                "No sector metadata for {}; sector limits treat them as Unknown",
                missing.join(", ")
            );
        }
        Ok(())
    }

    async fn fetch(&self, symbol: &str) -> Result<Option<MarketSnapshot>> {
        self.db.latest_market_snapshot(symbol).await
    }
}

#[async_trait]
impl NewsSource for StoredMarketData {
    async fn analyze(&self, symbols: &[String], since: DateTime<Utc>) -> Result<Vec<NewsSignal>> {
        let news = self.db.news_since(since, None).await?;
        Ok(news
            .into_iter()
            .filter(|n| symbols.iter().any(|s| s == &n.symbol))
            .collect())
    }
}

/// Latest imported portfolio snapshot.
#[derive(Clone)]
pub struct StoredPortfolio {
    db: Database,
}

impl StoredPortfolio {
    #[must_use]
    pub const fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl PortfolioSource for StoredPortfolio {
    async fn snapshot(&self) -> Result<PortfolioContext> {
        match self.db.latest_portfolio().await? {
            Some(portfolio) => Ok(portfolio),
            None => {
                tracing::warn!("No portfolio imported yet, assuming default equity and cash");
                Ok(PortfolioContext::default())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tradepilot_core::{TradeAction, Urgency};

    #[tokio::test]
    async fn test_portfolio_defaults_before_import() {
        let db = Database::in_memory().await.unwrap();
        let snapshot = StoredPortfolio::new(db).snapshot().await.unwrap();
        assert_eq!(snapshot.equity, dec!(10000));
        assert_eq!(snapshot.cash, dec!(10000));
    }

    #[tokio::test]
    async fn test_news_limited_to_requested_symbols() {
        let db = Database::in_memory().await.unwrap();
        let now = Utc::now();
        for symbol in ["AAPL", "TSLA"] {
            db.record_news(&NewsSignal {
                symbol: symbol.to_string(),
                headline: "earnings".to_string(),
                sentiment: -0.6,
                confidence: 0.9,
                implied_action: TradeAction::Sell,
                urgency: Urgency::High,
                published_at: now,
            })
            .await
            .unwrap();
        }

        let source = StoredMarketData::new(db);
        let news = source
            .analyze(&["AAPL".to_string()], now - chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(news.len(), 1);
        assert_eq!(news[0].symbol, "AAPL");
    }
}
