//! Multi-channel delivery of trade alerts and daily summaries.

use crate::collaborators::NotificationChannel;
use crate::store::{Database, StoredRecommendation};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use chrono_tz::Tz;
use reqwest::Client;
use rust_decimal::Decimal;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tradepilot_core::{Clock, QuietHours, RiskDecision, TradeAction, TradeProposal};

const RULE: &str = "-----------------------------";

/// Writes messages to the process log. Never interrupts, so it is not
/// affected by quiet hours.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogChannel;

#[async_trait]
impl NotificationChannel for LogChannel {
    fn name(&self) -> &str {
        "log"
    }

    fn interrupts(&self) -> bool {
        false
    }

    async fn send(&self, subject: &str, body: &str) -> Result<()> {
        tracing::info!("{}\n{}", subject, body);
        Ok(())
    }
}

/// Posts `{"subject": ..., "text": ...}` to a JSON webhook.
#[derive(Debug, Clone)]
pub struct WebhookChannel {
    http: Client,
    url: String,
}

impl WebhookChannel {
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build webhook HTTP client")?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, subject: &str, body: &str) -> Result<()> {
        let response = self
            .http
            .post(&self.url)
            .json(&serde_json::json!({ "subject": subject, "text": body }))
            .send()
            .await
            .context("Webhook request failed")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Webhook returned {}", status);
        }
        Ok(())
    }
}

/// An approved trade ready to be announced.
#[derive(Debug, Clone)]
pub struct TradeAlert {
    pub proposal: TradeProposal,
    pub decision: RiskDecision,
}

/// Inputs for the end-of-day report.
#[derive(Debug, Clone)]
pub struct DailySummary {
    pub date: NaiveDate,
    pub equity: Decimal,
    pub previous_equity: Decimal,
    pub cash: Decimal,
    /// `(symbol, quantity, current value)`
    pub holdings: Vec<(String, Decimal, Decimal)>,
    pub recommendations: Vec<StoredRecommendation>,
}

/// Fans a message out to every configured channel.
///
/// Every attempt is written to `notification_log`. A message counts as
/// delivered when at least one channel accepts it.
pub struct Dispatcher {
    channels: Vec<Arc<dyn NotificationChannel>>,
    db: Database,
    clock: Arc<dyn Clock>,
    timezone: Tz,
    quiet_hours: QuietHours,
    truncation: usize,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        channels: Vec<Arc<dyn NotificationChannel>>,
        db: Database,
        clock: Arc<dyn Clock>,
        timezone: Tz,
        quiet_hours: QuietHours,
        truncation: usize,
    ) -> Self {
        Self {
            channels,
            db,
            clock,
            timezone,
            quiet_hours,
            truncation,
        }
    }

    fn local_now(&self) -> DateTime<Tz> {
        self.clock.utc_now().with_timezone(&self.timezone)
    }

    /// Whether interrupting channels are currently held back.
    #[must_use]
    pub fn in_quiet_hours(&self) -> bool {
        self.quiet_hours.contains(self.local_now().time())
    }

    /// Delivers to all channels, skipping interrupting ones during quiet hours.
    ///
    /// # Errors
    /// Returns error only if the notification log cannot be written.
    pub async fn send(&self, subject: &str, body: &str) -> Result<bool> {
        self.deliver(subject, body, false).await
    }

    /// Delivers to all channels regardless of quiet hours.
    ///
    /// # Errors
    /// Returns error only if the notification log cannot be written.
    pub async fn send_critical(&self, message: &str) -> Result<bool> {
        self.deliver("CRITICAL: Trading System Alert", message, true)
            .await
    }

    /// Announces approved trades as one combined message.
    ///
    /// # Returns
    /// `false` when there is nothing to send or every channel failed.
    ///
    /// # Errors
    /// Returns error only if the notification log cannot be written.
    pub async fn send_batch(&self, alerts: &[TradeAlert]) -> Result<bool> {
        if alerts.is_empty() {
            tracing::info!("No trades to send");
            return Ok(false);
        }
        let message = format_batch_message(alerts, self.local_now());
        let subject = format!("Trading Alert: {} Recommendations", alerts.len());
        self.send(&subject, &message).await
    }

    /// # Errors
    /// Returns error only if the notification log cannot be written.
    pub async fn send_daily_summary(&self, summary: &DailySummary) -> Result<bool> {
        let subject = format!("Daily Market Summary - {}", summary.date.format("%B %d, %Y"));
        self.send(&subject, &format_daily_summary(summary)).await
    }

    async fn deliver(&self, subject: &str, body: &str, critical: bool) -> Result<bool> {
        let quiet = !critical && self.in_quiet_hours();
        let content = format!("{subject}\n{body}");
        let mut delivered = false;

        for channel in &self.channels {
            let status = if quiet && channel.interrupts() {
                tracing::debug!("Quiet hours, holding back {}", channel.name());
                "suppressed".to_string()
            } else {
                match channel.send(subject, body).await {
                    Ok(()) => {
                        delivered = true;
                        "sent".to_string()
                    }
                    Err(e) => {
                        tracing::error!("{} delivery failed: {:#}", channel.name(), e);
                        let reason: String = format!("{e:#}").chars().take(50).collect();
                        format!("failed: {reason}")
                    }
                }
            };

            self.db
                .log_notification(channel.name(), &content, &status, self.truncation)
                .await?;
        }

        if !delivered {
            tracing::warn!("'{}' was not delivered on any channel", subject);
        }
        Ok(delivered)
    }
}

fn truncated(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

fn percent(confidence: f64) -> String {
    format!("{:.0}%", confidence * 100.0)
}

/// Combined alert: sells first, then buys, then totals.
#[must_use]
pub fn format_batch_message(alerts: &[TradeAlert], now: DateTime<Tz>) -> String {
    let sells: Vec<_> = alerts
        .iter()
        .filter(|a| a.proposal.action == TradeAction::Sell)
        .collect();
    let buys: Vec<_> = alerts
        .iter()
        .filter(|a| a.proposal.action == TradeAction::Buy)
        .collect();

    let mut out = String::new();
    let _ = writeln!(out, "TRADING RECOMMENDATIONS - {}", now.format("%b %d, %I:%M %p"));
    let _ = writeln!(out, "{RULE}\n");

    if !sells.is_empty() {
        let _ = writeln!(out, "SELL SIGNALS:");
        for alert in &sells {
            let _ = writeln!(
                out,
                "  - {}: {} shares ({})",
                alert.proposal.symbol,
                alert.decision.approved_shares(),
                percent(alert.proposal.confidence)
            );
            let _ = writeln!(out, "    {}...", truncated(&alert.proposal.reasoning, 60));
        }
        out.push('\n');
    }

    if !buys.is_empty() {
        let _ = writeln!(out, "BUY SIGNALS:");
        for alert in &buys {
            let _ = writeln!(
                out,
                "  - {}: {} shares @ ${:.0} ({})",
                alert.proposal.symbol,
                alert.decision.approved_shares(),
                alert.decision.approved_cost(),
                percent(alert.proposal.confidence)
            );
            let _ = writeln!(out, "    {}...", truncated(&alert.proposal.reasoning, 60));
        }
        out.push('\n');
    }

    let _ = writeln!(out, "{RULE}");
    let _ = writeln!(out, "Total: {} sells, {} buys", sells.len(), buys.len());
    let _ = write!(out, "Reply with actions taken or questions.");
    out
}

/// Plain-text end-of-day report.
#[must_use]
pub fn format_daily_summary(summary: &DailySummary) -> String {
    let change = summary.equity - summary.previous_equity;
    let change_pct = if summary.previous_equity > Decimal::ZERO {
        change / summary.previous_equity * Decimal::ONE_HUNDRED
    } else {
        Decimal::ZERO
    };
    let sign = if change >= Decimal::ZERO { "+" } else { "-" };

    let mut out = String::new();
    let _ = writeln!(out, "DAILY TRADING SUMMARY - {}", summary.date.format("%A, %B %d, %Y"));
    let _ = writeln!(out, "{RULE}\n");
    let _ = writeln!(out, "Portfolio Performance");
    let _ = writeln!(out, "  Current Equity: ${:.2}", summary.equity);
    let _ = writeln!(
        out,
        "  Daily Change:   {sign}${:.2} ({sign}{:.2}%)",
        change.abs(),
        change_pct.abs()
    );
    let _ = writeln!(out, "  Cash Available: ${:.2}\n", summary.cash);

    let _ = writeln!(out, "Current Holdings");
    if summary.holdings.is_empty() {
        let _ = writeln!(out, "  None");
    }
    for (symbol, quantity, value) in &summary.holdings {
        let _ = writeln!(out, "  {symbol:<6} {:>8} shares  ${value:.2}", quantity.round_dp(0));
    }
    out.push('\n');

    let _ = writeln!(out, "Today's Recommendations");
    if summary.recommendations.is_empty() {
        let _ = writeln!(out, "  No recommendations generated today.");
    }
    for rec in &summary.recommendations {
        let _ = writeln!(
            out,
            "  {:<6} {:<4} {:>4}  {}...",
            rec.proposal.symbol,
            rec.proposal.action,
            percent(rec.proposal.confidence),
            truncated(&rec.proposal.reasoning, 50)
        );
    }
    out
}
