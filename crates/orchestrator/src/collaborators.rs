//! Interfaces to the outside world consumed by the pipeline.
//!
//! Fetchers, the model and delivery channels live behind these traits so a
//! run can be exercised end to end with in-memory fakes.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tradepilot_core::{AiError, MarketSnapshot, NewsSignal, PortfolioContext, TradeProposal};

#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Ensures sector metadata exists for the given symbols.
    async fn refresh_metadata(&self, symbols: &[String]) -> Result<()>;

    /// Latest snapshot for `symbol`, or `None` if unavailable.
    async fn fetch(&self, symbol: &str) -> Result<Option<MarketSnapshot>>;
}

#[async_trait]
pub trait NewsSource: Send + Sync {
    /// Analysed news for `symbols` published since `since`.
    async fn analyze(&self, symbols: &[String], since: DateTime<Utc>) -> Result<Vec<NewsSignal>>;
}

#[async_trait]
pub trait PortfolioSource: Send + Sync {
    /// Current holdings and cash. Implementations fall back to
    /// [`PortfolioContext::default`] when nothing has been imported.
    async fn snapshot(&self) -> Result<PortfolioContext>;
}

/// Optional source of extra symbols to evaluate on a run.
#[async_trait]
pub trait Screener: Send + Sync {
    async fn candidates(&self) -> Result<Vec<String>>;
}

/// What a recommendation is asked to decide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecommendationFocus {
    /// Open, add to, or exit a position.
    Entry,
    /// Existing holding: look for reasons to sell or rebalance.
    Exit,
}

/// Everything the recommender sees about one symbol.
#[derive(Debug, Clone)]
pub struct RecommendationRequest {
    pub symbol: String,
    pub market: MarketSnapshot,
    pub news: Vec<NewsSignal>,
    pub portfolio: PortfolioContext,
    pub focus: RecommendationFocus,
}

/// A proposal together with the engine that produced it (`ai`, `rules`, ...).
#[derive(Debug, Clone)]
pub struct Recommendation {
    pub proposal: TradeProposal,
    pub source: String,
}

impl Recommendation {
    #[must_use]
    pub fn new(proposal: TradeProposal, source: impl Into<String>) -> Self {
        Self {
            proposal,
            source: source.into(),
        }
    }
}

#[async_trait]
pub trait Recommender: Send + Sync {
    /// A proposal for the symbol, or `None` when no opinion could be formed.
    async fn recommend(&self, request: &RecommendationRequest) -> Result<Option<Recommendation>>;
}

/// Raw text generation. Implementations classify failures at the boundary.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, AiError>;
}

/// One delivery path for user-facing messages.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &str;

    /// Whether quiet hours apply to this channel.
    fn interrupts(&self) -> bool {
        true
    }

    async fn send(&self, subject: &str, body: &str) -> Result<()>;
}
