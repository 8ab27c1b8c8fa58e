//! Trade recommendations from the generative model, with a rule-based fallback.

use crate::collaborators::{
    ModelClient, Recommendation, RecommendationFocus, RecommendationRequest, Recommender,
};
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::fmt::Write as _;
use std::sync::Arc;
use tradepilot_core::{AiError, CallPacer, RetryPolicy, TradeAction, TradeProposal};

/// ATR above this fraction of price marks a symbol as volatile.
const VOLATILE_ATR_RATIO: Decimal = Decimal::from_parts(5, 0, 0, false, 2);

/// Price/SMA rules used whenever the model gives no usable answer.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleBasedRecommender;

impl RuleBasedRecommender {
    /// - holding: HOLD, or SELL when price is below the 50-day SMA
    /// - flat: SKIP, or BUY when price is above the 50-day SMA
    /// - flat without SMA data: BUY at 0.4 when volatility is manageable
    #[must_use]
    pub fn propose(&self, request: &RecommendationRequest) -> TradeProposal {
        let market = &request.market;
        let price = market.price;
        let held = request.portfolio.held_quantity(&request.symbol) > Decimal::ZERO;
        let volatile = market
            .atr_ratio()
            .is_some_and(|ratio| ratio > VOLATILE_ATR_RATIO);

        let (action, confidence, reasoning) = match market.sma_50 {
            Some(sma) if price > Decimal::ZERO && price > sma && !held => (
                TradeAction::Buy,
                0.3,
                format!("Price ${price:.2} above 50-day SMA ${sma:.2}, no current position"),
            ),
            Some(sma) if price > Decimal::ZERO && price < sma && held => (
                TradeAction::Sell,
                0.3,
                format!("Price ${price:.2} below 50-day SMA ${sma:.2}, consider taking profits"),
            ),
            None if price > Decimal::ZERO && !held && !volatile => (
                TradeAction::Buy,
                0.4,
                format!("Screened stock at ${price:.2} with manageable volatility - potential entry"),
            ),
            _ if held => (
                TradeAction::Hold,
                0.3,
                "Maintaining current position pending further analysis".to_string(),
            ),
            _ => (
                TradeAction::Hold,
                0.3,
                "Insufficient data - not recommended for new entry".to_string(),
            ),
        };

        TradeProposal::new(&request.symbol, action, confidence)
            .with_reasoning(format!("Rule-based: {reasoning}"))
    }
}

#[async_trait]
impl Recommender for RuleBasedRecommender {
    async fn recommend(&self, request: &RecommendationRequest) -> Result<Option<Recommendation>> {
        Ok(Some(Recommendation::new(self.propose(request), "rules")))
    }
}

/// Asks the model for a structured opinion through the shared pacer.
///
/// Exhausted retries, fatal model errors and unparseable replies all fall
/// back to [`RuleBasedRecommender`]; the run never aborts on model trouble.
pub struct AiRecommender {
    client: Arc<dyn ModelClient>,
    pacer: CallPacer,
    policy: RetryPolicy,
    fallback: RuleBasedRecommender,
}

impl AiRecommender {
    #[must_use]
    pub fn new(client: Arc<dyn ModelClient>, pacer: CallPacer, policy: RetryPolicy) -> Self {
        Self {
            client,
            pacer,
            policy,
            fallback: RuleBasedRecommender,
        }
    }
}

#[async_trait]
impl Recommender for AiRecommender {
    async fn recommend(&self, request: &RecommendationRequest) -> Result<Option<Recommendation>> {
        let prompt = build_prompt(request);
        let client = self.client.clone();

        let reply = self
            .pacer
            .call_with_retry(&self.policy, &request.symbol, || {
                let client = client.clone();
                let prompt = prompt.clone();
                async move { client.generate(&prompt).await }
            })
            .await;

        let parsed = reply.and_then(|text| match parse_proposal(&request.symbol, &text) {
            Ok(proposal) => Some(proposal),
            Err(e) => {
                tracing::warn!("Unusable model reply for {}: {}", request.symbol, e);
                None
            }
        });

        let recommendation = match parsed {
            Some(proposal) => Recommendation::new(proposal, "ai"),
            None => {
                tracing::info!("Using rule-based recommendation for {}", request.symbol);
                Recommendation::new(self.fallback.propose(request), "rules")
            }
        };
        Ok(Some(recommendation))
    }
}

#[derive(Debug, Deserialize)]
struct ModelReply {
    action: String,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    target_price: Option<f64>,
    #[serde(default)]
    stop_loss: Option<f64>,
}

/// Extracts a proposal from model text.
///
/// Accepts bare JSON, a fenced code block, or the outermost `{...}` span
/// embedded in prose.
///
/// # Errors
/// Returns [`AiError::MalformedResponse`] if no JSON object with a valid
/// action can be found.
pub fn parse_proposal(symbol: &str, text: &str) -> Result<TradeProposal, AiError> {
    let reply = json_candidates(text)
        .into_iter()
        .find_map(|candidate| serde_json::from_str::<ModelReply>(candidate).ok())
        .ok_or_else(|| AiError::MalformedResponse(format!("no JSON object in reply for {symbol}")))?;

    let action: TradeAction = reply
        .action
        .parse()
        .map_err(AiError::MalformedResponse)?;

    let mut proposal = TradeProposal::new(symbol, action, reply.confidence.unwrap_or(0.5))
        .with_reasoning(reply.reasoning.unwrap_or_default());
    proposal.stop_loss = reply.stop_loss.and_then(positive_decimal);
    proposal.target_price = reply.target_price.and_then(positive_decimal);
    Ok(proposal)
}

fn json_candidates(text: &str) -> Vec<&str> {
    let trimmed = text.trim();
    let mut candidates = vec![trimmed];

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let body_start = after.find('\n').map_or(0, |i| i + 1);
        let body = &after[body_start..];
        if let Some(end) = body.find("```") {
            candidates.push(body[..end].trim());
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            candidates.push(&trimmed[start..=end]);
        }
    }

    candidates
}

fn positive_decimal(value: f64) -> Option<Decimal> {
    Decimal::try_from(value)
        .ok()
        .filter(|d| *d > Decimal::ZERO)
        .map(|d| d.round_dp(4))
}

/// Chain-of-thought prompt covering technicals, news and position context.
#[must_use]
pub fn build_prompt(request: &RecommendationRequest) -> String {
    let market = &request.market;
    let portfolio = &request.portfolio;
    let symbol = &request.symbol;
    let position = portfolio.position(symbol).filter(|p| p.quantity > Decimal::ZERO);

    let mut prompt = String::new();
    let _ = writeln!(prompt, "You are a Senior Financial Analyst evaluating a trade opportunity.\n");
    let _ = writeln!(prompt, "**Task:** Analyze {symbol} and decide on an action.\n");
    let _ = writeln!(prompt, "**Market Data:**");
    let _ = writeln!(prompt, "- Current Price: ${:.2}", market.price);
    match market.sma_50 {
        Some(sma) => {
            let _ = writeln!(prompt, "- 50-Day SMA: ${sma:.2}");
        }
        None => {
            let _ = writeln!(prompt, "- 50-Day SMA: N/A");
        }
    }
    let _ = writeln!(prompt, "- ATR (Volatility): ${:.2}", market.atr);
    let volatile = market
        .atr_ratio()
        .is_some_and(|ratio| ratio > VOLATILE_ATR_RATIO);
    let _ = writeln!(
        prompt,
        "- High Volatility Warning: {}\n",
        if volatile { "YES" } else { "NO" }
    );

    let _ = writeln!(prompt, "**Recent News Sentiment:**");
    if request.news.is_empty() {
        let _ = writeln!(prompt, "No recent news.");
    }
    for item in request.news.iter().take(5) {
        let _ = writeln!(
            prompt,
            "- {} (sentiment {:+.2}, confidence {:.0}%, implies {})",
            item.headline,
            item.sentiment,
            item.confidence * 100.0,
            item.implied_action
        );
    }

    let _ = writeln!(prompt, "\n**Portfolio Context:**");
    let _ = writeln!(prompt, "- Total Equity: ${:.2}", portfolio.equity);
    let _ = writeln!(prompt, "- Cash Available: ${:.2}\n", portfolio.cash);

    if let Some(position) = position {
        let pct = if portfolio.equity > Decimal::ZERO {
            (position.current_value / portfolio.equity * Decimal::ONE_HUNDRED)
                .to_f64()
                .unwrap_or_default()
        } else {
            0.0
        };
        let _ = writeln!(prompt, "**Current Position in {symbol}:**");
        let _ = writeln!(prompt, "- Shares Held: {}", position.quantity);
        let _ = writeln!(prompt, "- Cost Basis: ${:.2}", position.cost_basis);
        let _ = writeln!(prompt, "- Current Value: ${:.2}", position.current_value);
        let _ = writeln!(prompt, "- Position Size: {pct:.1}% of portfolio\n");
    } else {
        let _ = writeln!(prompt, "**Current Position in {symbol}:** None (considering new entry)\n");
    }

    if request.focus == RecommendationFocus::Exit {
        let _ = writeln!(
            prompt,
            "**Focus:** This is a review of an existing holding. Look for reasons to SELL \
             or rebalance; only HOLD if the position is still justified.\n"
        );
    }

    let _ = writeln!(prompt, "**Instructions:** Reason step by step:");
    let _ = writeln!(prompt, "1. Technical analysis: trend versus the SMA, momentum.");
    let _ = writeln!(prompt, "2. Sentiment analysis: catalysts and consensus in the news.");
    let _ = writeln!(prompt, "3. Portfolio risk: is the position overweight?");
    let _ = writeln!(prompt, "4. Final recommendation.\n");

    let actions = if position.is_some() {
        "BUY | SELL | HOLD"
    } else {
        "BUY | SKIP"
    };
    let _ = writeln!(prompt, "**Output Format (JSON ONLY, no preamble):**");
    let _ = write!(
        prompt,
        r#"{{"step1_technical": "...", "step2_sentiment": "...", "step3_risk": "...", "action": "{actions}", "confidence": 0.0-1.0, "reasoning": "Final justification in 30 words", "target_price": null or number, "stop_loss": null or number}}"#
    );

    prompt
}
