//! Domain types shared by the risk engine, the pipeline, and the API.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Sector reported for symbols without metadata. Never counts toward exposure.
pub const UNKNOWN_SECTOR: &str = "Unknown";

/// Equity and cash assumed before any portfolio has been imported.
pub const DEFAULT_EQUITY: Decimal = Decimal::from_parts(10_000, 0, 0, false, 0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeAction {
    Buy,
    Sell,
    Hold,
}

impl TradeAction {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
            Self::Hold => "HOLD",
        }
    }
}

impl fmt::Display for TradeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TradeAction {
    type Err = String;

    /// `SKIP` (no new entry) is treated as `HOLD`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" => Ok(Self::Buy),
            "SELL" => Ok(Self::Sell),
            "HOLD" | "SKIP" => Ok(Self::Hold),
            other => Err(format!("unknown trade action: {other}")),
        }
    }
}

/// A trade suggestion as produced by the recommender. Never mutated by the risk engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeProposal {
    pub symbol: String,
    pub action: TradeAction,
    /// Clamped to `[0, 1]`.
    pub confidence: f64,
    pub stop_loss: Option<Decimal>,
    pub target_price: Option<Decimal>,
    #[serde(default)]
    pub reasoning: String,
}

impl TradeProposal {
    #[must_use]
    pub fn new(symbol: impl Into<String>, action: TradeAction, confidence: f64) -> Self {
        Self {
            symbol: symbol.into().to_ascii_uppercase(),
            action,
            confidence: clamp_confidence(confidence),
            stop_loss: None,
            target_price: None,
            reasoning: String::new(),
        }
    }

    #[must_use]
    pub const fn with_stop_loss(mut self, stop_loss: Decimal) -> Self {
        self.stop_loss = Some(stop_loss);
        self
    }

    #[must_use]
    pub const fn with_target_price(mut self, target_price: Decimal) -> Self {
        self.target_price = Some(target_price);
        self
    }

    #[must_use]
    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = reasoning.into();
        self
    }
}

fn clamp_confidence(confidence: f64) -> f64 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}

/// Latest price and volatility observation for a symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub price: Decimal,
    /// Average true range, same unit as `price`.
    pub atr: Decimal,
    pub sma_50: Option<Decimal>,
    pub avg_volume: Option<i64>,
    pub source: String,
    pub observed_at: DateTime<Utc>,
}

impl MarketSnapshot {
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.observed_at
    }

    #[must_use]
    pub fn is_stale(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        self.age(now) > ttl
    }

    /// ATR as a fraction of price; `None` when the price is not positive.
    #[must_use]
    pub fn atr_ratio(&self) -> Option<Decimal> {
        (self.price > Decimal::ZERO).then(|| self.atr / self.price)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub quantity: Decimal,
    pub cost_basis: Decimal,
    pub current_value: Decimal,
}

/// Immutable portfolio view used for one risk check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioContext {
    pub equity: Decimal,
    pub cash: Decimal,
    pub positions: BTreeMap<String, Position>,
    pub sectors: BTreeMap<String, String>,
}

impl Default for PortfolioContext {
    fn default() -> Self {
        Self::new(DEFAULT_EQUITY, DEFAULT_EQUITY)
    }
}

impl PortfolioContext {
    #[must_use]
    pub const fn new(equity: Decimal, cash: Decimal) -> Self {
        Self {
            equity,
            cash,
            positions: BTreeMap::new(),
            sectors: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_position(mut self, symbol: &str, position: Position) -> Self {
        self.positions.insert(symbol.to_ascii_uppercase(), position);
        self
    }

    #[must_use]
    pub fn with_sector(mut self, symbol: &str, sector: &str) -> Self {
        self.sectors
            .insert(symbol.to_ascii_uppercase(), sector.to_string());
        self
    }

    #[must_use]
    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    #[must_use]
    pub fn held_quantity(&self, symbol: &str) -> Decimal {
        self.position(symbol).map_or(Decimal::ZERO, |p| p.quantity)
    }

    #[must_use]
    pub fn position_value(&self, symbol: &str) -> Decimal {
        self.position(symbol)
            .map_or(Decimal::ZERO, |p| p.current_value)
    }

    #[must_use]
    pub fn sector_of(&self, symbol: &str) -> &str {
        self.sectors
            .get(symbol)
            .map_or(UNKNOWN_SECTOR, String::as_str)
    }

    /// Sum of `current_value` over held positions in `sector`.
    #[must_use]
    pub fn sector_exposure(&self, sector: &str) -> Decimal {
        if sector == UNKNOWN_SECTOR {
            return Decimal::ZERO;
        }
        self.positions
            .iter()
            .filter(|(symbol, _)| self.sector_of(symbol) == sector)
            .map(|(_, p)| p.current_value)
            .sum()
    }

    /// Symbols with a positive quantity.
    pub fn holdings(&self) -> impl Iterator<Item = (&str, &Position)> {
        self.positions
            .iter()
            .filter(|(_, p)| p.quantity > Decimal::ZERO)
            .map(|(s, p)| (s.as_str(), p))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    Medium,
    High,
}

/// One analysed news item for a symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsSignal {
    pub symbol: String,
    pub headline: String,
    /// -1.0 (bearish) to 1.0 (bullish).
    pub sentiment: f64,
    pub confidence: f64,
    pub implied_action: TradeAction,
    pub urgency: Urgency,
    pub published_at: DateTime<Utc>,
}

/// Pipeline routine selected for an orchestration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Premarket,
    Market,
    Postmarket,
    Review,
    Evaluate,
}

impl Mode {
    pub const ALL: [Self; 5] = [
        Self::Premarket,
        Self::Market,
        Self::Postmarket,
        Self::Review,
        Self::Evaluate,
    ];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Premarket => "premarket",
            Self::Market => "market",
            Self::Postmarket => "postmarket",
            Self::Review => "review",
            Self::Evaluate => "evaluate",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                format!("Invalid mode '{s}'. Must be one of: premarket, market, postmarket, review, evaluate")
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl JobStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggeredBy {
    Manual,
    Scheduled,
}

impl TriggeredBy {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Scheduled => "scheduled",
        }
    }
}

impl FromStr for TriggeredBy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(Self::Manual),
            "scheduled" => Ok(Self::Scheduled),
            other => Err(format!("unknown trigger: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn position(quantity: Decimal, value: Decimal) -> Position {
        Position {
            quantity,
            cost_basis: value,
            current_value: value,
        }
    }

    #[test]
    fn test_skip_parses_as_hold() {
        assert_eq!("skip".parse::<TradeAction>().unwrap(), TradeAction::Hold);
        assert_eq!(" Buy ".parse::<TradeAction>().unwrap(), TradeAction::Buy);
        assert!("short".parse::<TradeAction>().is_err());
    }

    #[test]
    fn test_confidence_is_clamped() {
        assert!((TradeProposal::new("aapl", TradeAction::Buy, 1.7).confidence - 1.0).abs() < f64::EPSILON);
        assert!(TradeProposal::new("aapl", TradeAction::Buy, f64::NAN).confidence.abs() < f64::EPSILON);
        assert_eq!(TradeProposal::new("aapl", TradeAction::Buy, 0.5).symbol, "AAPL");
    }

    #[test]
    fn test_sector_exposure_sums_held_values() {
        let ctx = PortfolioContext::new(dec!(10000), dec!(2000))
            .with_position("AAPL", position(dec!(10), dec!(1800)))
            .with_position("MSFT", position(dec!(5), dec!(2000)))
            .with_position("XOM", position(dec!(20), dec!(1200)))
            .with_sector("AAPL", "Technology")
            .with_sector("MSFT", "Technology")
            .with_sector("XOM", "Energy");

        assert_eq!(ctx.sector_exposure("Technology"), dec!(3800));
        assert_eq!(ctx.sector_exposure("Energy"), dec!(1200));
        assert_eq!(ctx.sector_exposure("Health Care"), Decimal::ZERO);
    }

    #[test]
    fn test_unknown_sector_has_no_exposure() {
        let ctx = PortfolioContext::default().with_position("ZZZ", position(dec!(1), dec!(500)));
        assert_eq!(ctx.sector_of("ZZZ"), UNKNOWN_SECTOR);
        assert_eq!(ctx.sector_exposure(UNKNOWN_SECTOR), Decimal::ZERO);
    }

    #[test]
    fn test_default_context_assumes_ten_thousand() {
        let ctx = PortfolioContext::default();
        assert_eq!(ctx.equity, dec!(10000));
        assert_eq!(ctx.cash, dec!(10000));
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("PostMarket".parse::<Mode>().unwrap(), Mode::Postmarket);
        assert!("closed".parse::<Mode>().is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Skipped.is_terminal());
    }

    #[test]
    fn test_staleness() {
        let now = Utc::now();
        let snapshot = MarketSnapshot {
            symbol: "AAPL".to_string(),
            price: dec!(100),
            atr: dec!(4),
            sma_50: None,
            avg_volume: None,
            source: "test".to_string(),
            observed_at: now - chrono::Duration::hours(25),
        };
        assert!(snapshot.is_stale(now, chrono::Duration::hours(24)));
        assert!(!snapshot.is_stale(now, chrono::Duration::hours(26)));
        assert_eq!(snapshot.atr_ratio(), Some(dec!(0.04)));
    }
}
