use super::{from_timestamp, parse_decimal, parse_optional_decimal, Database};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tradepilot_core::{MarketSnapshot, NewsSignal, TradeAction, Urgency};

impl Database {
    /// Records or replaces the sector for a symbol.
    ///
    /// # Errors
    ///
    /// Returns error if the database operation fails.
    pub async fn upsert_sector(&self, symbol: &str, sector: &str) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO stock_metadata (symbol, sector, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(symbol) DO UPDATE SET
                sector = excluded.sector,
                updated_at = excluded.updated_at
            ",
        )
        .bind(symbol)
        .bind(sector)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Symbols that have no stored sector yet.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn symbols_missing_metadata(&self, symbols: &[String]) -> Result<Vec<String>> {
        let known = self.sectors().await?;
        Ok(symbols
            .iter()
            .filter(|s| !known.contains_key(s.as_str()))
            .cloned()
            .collect())
    }

    /// Appends a market observation.
    ///
    /// # Errors
    ///
    /// Returns error if the database operation fails.
    pub async fn record_market_snapshot(&self, snapshot: &MarketSnapshot) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO market_data (symbol, price, atr, sma_50, avg_volume, source, observed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ",
        )
        .bind(&snapshot.symbol)
        .bind(snapshot.price.to_string())
        .bind(snapshot.atr.to_string())
        .bind(snapshot.sma_50.map(|v| v.to_string()))
        .bind(snapshot.avg_volume)
        .bind(&snapshot.source)
        .bind(snapshot.observed_at.timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Most recent observation for `symbol`, however old.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails or a stored value is corrupt.
    pub async fn latest_market_snapshot(&self, symbol: &str) -> Result<Option<MarketSnapshot>> {
        let row = sqlx::query_as::<_, (String, String, String, Option<String>, Option<i64>, String, i64)>(
            r"
            SELECT symbol, price, atr, sma_50, avg_volume, source, observed_at
            FROM market_data
            WHERE symbol = ?1
            ORDER BY observed_at DESC, id DESC
            LIMIT 1
            ",
        )
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;

        row.map(
            |(symbol, price, atr, sma_50, avg_volume, source, observed_at)| {
                Ok(MarketSnapshot {
                    symbol,
                    price: parse_decimal(&price)?,
                    atr: parse_decimal(&atr)?,
                    sma_50: parse_optional_decimal(sma_50.as_deref())?,
                    avg_volume,
                    source,
                    observed_at: from_timestamp(observed_at),
                })
            },
        )
        .transpose()
    }

    /// Last observed price at or before `at`, used to evaluate past recommendations.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails or a stored value is corrupt.
    pub async fn price_at(&self, symbol: &str, at: DateTime<Utc>) -> Result<Option<Decimal>> {
        let row = sqlx::query_as::<_, (String,)>(
            r"
            SELECT price FROM market_data
            WHERE symbol = ?1 AND observed_at <= ?2
            ORDER BY observed_at DESC, id DESC
            LIMIT 1
            ",
        )
        .bind(symbol)
        .bind(at.timestamp())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(price,)| parse_decimal(&price)).transpose()
    }

    /// Appends an analysed news item.
    ///
    /// # Errors
    ///
    /// Returns error if the database operation fails.
    pub async fn record_news(&self, signal: &NewsSignal) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO news_signals
                (symbol, headline, sentiment, confidence, implied_action, urgency, published_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ",
        )
        .bind(&signal.symbol)
        .bind(&signal.headline)
        .bind(signal.sentiment)
        .bind(signal.confidence)
        .bind(signal.implied_action.as_str())
        .bind(urgency_str(signal.urgency))
        .bind(signal.published_at.timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// News published since `since`, newest first, optionally for one symbol.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails or a stored value is corrupt.
    pub async fn news_since(
        &self,
        since: DateTime<Utc>,
        symbol: Option<&str>,
    ) -> Result<Vec<NewsSignal>> {
        let rows = sqlx::query_as::<_, (String, String, f64, f64, String, String, i64)>(
            r"
            SELECT symbol, headline, sentiment, confidence, implied_action, urgency, published_at
            FROM news_signals
            WHERE published_at >= ?1 AND (?2 IS NULL OR symbol = ?2)
            ORDER BY published_at DESC, id DESC
            ",
        )
        .bind(since.timestamp())
        .bind(symbol)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(
                |(symbol, headline, sentiment, confidence, action, urgency, published_at)| {
                    Ok(NewsSignal {
                        symbol,
                        headline,
                        sentiment,
                        confidence,
                        implied_action: action.parse::<TradeAction>().map_err(|e| anyhow!(e))?,
                        urgency: parse_urgency(&urgency)?,
                        published_at: from_timestamp(published_at),
                    })
                },
            )
            .collect()
    }
}

const fn urgency_str(urgency: Urgency) -> &'static str {
    match urgency {
        Urgency::Low => "low",
        Urgency::Medium => "medium",
        Urgency::High => "high",
    }
}

fn parse_urgency(value: &str) -> Result<Urgency> {
    match value {
        "low" => Ok(Urgency::Low),
        "medium" => Ok(Urgency::Medium),
        "high" => Ok(Urgency::High),
        other => Err(anyhow!("Corrupt urgency value '{other}'")),
    }
}
