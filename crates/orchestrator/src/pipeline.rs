//! Mode routines executed by an admitted job.

use crate::collaborators::{
    MarketDataSource, NewsSource, NotificationChannel, PortfolioSource, RecommendationFocus,
    RecommendationRequest, Recommender, Screener,
};
use crate::evaluator;
use crate::ledger::{JobId, JobStore};
use crate::notifications::{DailySummary, Dispatcher, TradeAlert};
use crate::store::Database;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::watch;
use tradepilot_core::risk::risk_summary;
use tradepilot_core::{
    AppConfig, Clock, MarketSnapshot, Mode, NewsSignal, PortfolioContext, QuietHours,
    RiskController, RiskDecision, Schedule, TradeAction, Urgency,
};

/// Window of news considered "recent" for premarket alerts.
const PREMARKET_NEWS_HOURS: i64 = 12;
/// Window of news handed to the recommender.
const RECOMMENDATION_NEWS_HOURS: i64 = 24;

/// How a run ended, when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed(String),
    /// Nothing to do; the reason is kept on the job.
    Skipped(String),
}

/// External collaborators a pipeline run talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub market: Arc<dyn MarketDataSource>,
    pub news: Arc<dyn NewsSource>,
    pub portfolio: Arc<dyn PortfolioSource>,
    pub screener: Option<Arc<dyn Screener>>,
    pub recommender: Arc<dyn Recommender>,
    pub channels: Vec<Arc<dyn NotificationChannel>>,
}

/// Per-run state: the job, the configuration snapshot and the run's clock reading.
struct RunContext {
    job: JobId,
    config: AppConfig,
    schedule: Schedule,
    now: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct AdviceTally {
    considered: usize,
    no_data: usize,
    holds: usize,
    approved: usize,
    vetoed: usize,
}

/// Executes one mode end to end against the collaborators.
///
/// Configuration is read from the watch channel once per run, so reloads
/// apply from the next run on.
pub struct Pipeline {
    collaborators: Collaborators,
    db: Database,
    jobs: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
    config: watch::Receiver<AppConfig>,
}

impl Pipeline {
    #[must_use]
    pub fn new(
        collaborators: Collaborators,
        db: Database,
        jobs: Arc<dyn JobStore>,
        clock: Arc<dyn Clock>,
        config: watch::Receiver<AppConfig>,
    ) -> Self {
        Self {
            collaborators,
            db,
            jobs,
            clock,
            config,
        }
    }

    /// Latest published configuration.
    #[must_use]
    pub fn config(&self) -> AppConfig {
        self.config.borrow().clone()
    }

    #[must_use]
    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    /// Runs `mode` on behalf of job `job`.
    ///
    /// # Errors
    /// Returns error on any fatal failure: store errors, collaborator errors
    /// other than the screener, or an unreadable schedule configuration.
    pub async fn run(&self, job: JobId, mode: Mode) -> Result<RunOutcome> {
        let config = self.config();
        let schedule = Schedule::from_config(&config.schedule)?;
        let ctx = RunContext {
            job,
            config,
            schedule,
            now: self.clock.utc_now(),
        };

        self.log(&ctx, &format!("Starting {mode} run")).await?;
        let outcome = match mode {
            Mode::Premarket => self.premarket(&ctx).await,
            Mode::Market => self.market(&ctx).await,
            Mode::Postmarket => self.postmarket(&ctx).await,
            Mode::Review => self.review(&ctx).await,
            Mode::Evaluate => self.evaluate(&ctx).await,
        }
        .with_context(|| format!("{mode} run failed"))?;

        match &outcome {
            RunOutcome::Completed(summary) => self.log(&ctx, summary).await?,
            RunOutcome::Skipped(reason) => self.log(&ctx, &format!("Skipped: {reason}")).await?,
        }
        Ok(outcome)
    }

    /// Sends a critical alert for a failed job, bypassing quiet hours.
    ///
    /// Falls back to UTC for the message timestamp when the schedule
    /// configuration is what broke the run.
    ///
    /// # Errors
    /// Returns error if quiet hours are misconfigured or the notification
    /// log cannot be written.
    pub async fn alert_failure(&self, job: JobId, mode: Mode, error: &str) -> Result<bool> {
        let config = self.config();
        let timezone = Schedule::from_config(&config.schedule)
            .map_or(Tz::UTC, |schedule| schedule.timezone());
        let message = format!("Job {job} ({mode}) failed: {error}");
        self.dispatcher_for(&config, timezone)?
            .send_critical(&message)
            .await
    }

    async fn log(&self, ctx: &RunContext, line: &str) -> Result<()> {
        tracing::info!("[job {}] {}", ctx.job, line);
        self.jobs.append_log(ctx.job, line).await
    }

    fn dispatcher(&self, ctx: &RunContext) -> Result<Dispatcher> {
        self.dispatcher_for(&ctx.config, ctx.schedule.timezone())
    }

    fn dispatcher_for(&self, config: &AppConfig, timezone: Tz) -> Result<Dispatcher> {
        let notifications = &config.notifications;
        Ok(Dispatcher::new(
            self.collaborators.channels.clone(),
            self.db.clone(),
            self.clock.clone(),
            timezone,
            QuietHours::from_config(notifications)?,
            notifications.log_truncation,
        ))
    }

    /// Watchlist, holdings and screener candidates, upper-cased and sorted.
    async fn monitored_symbols(
        &self,
        ctx: &RunContext,
        portfolio: &PortfolioContext,
    ) -> Vec<String> {
        let mut symbols: BTreeSet<String> = ctx
            .config
            .watchlist
            .iter()
            .map(|s| s.trim().to_ascii_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
        symbols.extend(portfolio.holdings().map(|(s, _)| s.to_ascii_uppercase()));

        if let Some(screener) = &self.collaborators.screener {
            match screener.candidates().await {
                Ok(candidates) => symbols.extend(
                    candidates
                        .into_iter()
                        .map(|s| s.trim().to_ascii_uppercase())
                        .filter(|s| !s.is_empty()),
                ),
                Err(e) => tracing::warn!("Screener failed, continuing without candidates: {:#}", e),
            }
        }

        symbols.into_iter().collect()
    }

    /// Fresh market data for `symbol`, or `None` if missing or past the TTL.
    async fn fresh_market(&self, ctx: &RunContext, symbol: &str) -> Result<Option<MarketSnapshot>> {
        let Some(snapshot) = self.collaborators.market.fetch(symbol).await? else {
            tracing::warn!("No market data for {}", symbol);
            return Ok(None);
        };
        if snapshot.is_stale(ctx.now, ctx.config.risk.market_data_ttl()) {
            tracing::warn!(
                "Market data for {} is {}h old, skipping",
                symbol,
                snapshot.age(ctx.now).num_hours()
            );
            return Ok(None);
        }
        Ok(Some(snapshot))
    }

    async fn premarket(&self, ctx: &RunContext) -> Result<RunOutcome> {
        let portfolio = self.collaborators.portfolio.snapshot().await?;
        let symbols = self.monitored_symbols(ctx, &portfolio).await;
        self.collaborators.market.refresh_metadata(&symbols).await?;

        let mut fresh = 0;
        for symbol in &symbols {
            if self.fresh_market(ctx, symbol).await?.is_some() {
                fresh += 1;
            }
        }

        let since = ctx.now - chrono::Duration::hours(PREMARKET_NEWS_HOURS);
        let news = self.collaborators.news.analyze(&symbols, since).await?;
        let urgent: Vec<&NewsSignal> = news.iter().filter(|n| n.urgency == Urgency::High).collect();
        for item in &urgent {
            tracing::warn!(
                "High-urgency news for {}: {} (implies {})",
                item.symbol,
                item.headline,
                item.implied_action
            );
            self.log(ctx, &format!("Urgent: {} - {}", item.symbol, item.headline))
                .await?;
        }

        Ok(RunOutcome::Completed(format!(
            "Premarket: {} symbols, {} with fresh market data, {} news items ({} urgent)",
            symbols.len(),
            fresh,
            news.len(),
            urgent.len()
        )))
    }

    async fn market(&self, ctx: &RunContext) -> Result<RunOutcome> {
        let portfolio = self.collaborators.portfolio.snapshot().await?;
        let symbols = self.monitored_symbols(ctx, &portfolio).await;
        self.collaborators.market.refresh_metadata(&symbols).await?;

        let tally = self
            .advise(ctx, &portfolio, &symbols, RecommendationFocus::Entry)
            .await?;
        Ok(RunOutcome::Completed(format!(
            "Market: {} symbols, {} without data, {} holds, {} approved, {} vetoed",
            tally.considered, tally.no_data, tally.holds, tally.approved, tally.vetoed
        )))
    }

    async fn review(&self, ctx: &RunContext) -> Result<RunOutcome> {
        let portfolio = self.collaborators.portfolio.snapshot().await?;
        let holdings: Vec<String> = portfolio.holdings().map(|(s, _)| s.to_string()).collect();
        if holdings.is_empty() {
            return Ok(RunOutcome::Completed("Review: no holdings to review".to_string()));
        }

        let tally = self
            .advise(ctx, &portfolio, &holdings, RecommendationFocus::Exit)
            .await?;
        Ok(RunOutcome::Completed(format!(
            "Review: {} holdings, {} without data, {} holds, {} approved, {} vetoed",
            tally.considered, tally.no_data, tally.holds, tally.approved, tally.vetoed
        )))
    }

    /// Recommend, risk-check and announce for each symbol.
    ///
    /// HOLD proposals are stored and logged but never reach the risk engine.
    async fn advise(
        &self,
        ctx: &RunContext,
        portfolio: &PortfolioContext,
        symbols: &[String],
        focus: RecommendationFocus,
    ) -> Result<AdviceTally> {
        let controller = RiskController::new(ctx.config.risk.clone(), Arc::new(self.db.clone()));
        let since = ctx.now - chrono::Duration::hours(RECOMMENDATION_NEWS_HOURS);
        let news = self.collaborators.news.analyze(symbols, since).await?;

        let mut tally = AdviceTally::default();
        let mut alerts = Vec::new();

        for symbol in symbols {
            tally.considered += 1;
            let Some(market) = self.fresh_market(ctx, symbol).await? else {
                tally.no_data += 1;
                continue;
            };

            let request = RecommendationRequest {
                symbol: symbol.clone(),
                market: market.clone(),
                news: news.iter().filter(|n| &n.symbol == symbol).cloned().collect(),
                portfolio: portfolio.clone(),
                focus,
            };
            let Some(recommendation) = self.collaborators.recommender.recommend(&request).await?
            else {
                tracing::info!("No recommendation for {}", symbol);
                continue;
            };
            let proposal = recommendation.proposal;

            self.db
                .insert_recommendation(&proposal, Some(market.price), &recommendation.source)
                .await?;

            if proposal.action == TradeAction::Hold {
                tally.holds += 1;
                self.log(ctx, &format!("{symbol}: HOLD ({})", proposal.reasoning))
                    .await?;
                continue;
            }

            let decision = controller
                .evaluate(&proposal, portfolio, &market, ctx.now)
                .await?;
            self.log(
                ctx,
                &format!("{symbol}: {} -> {}", proposal.action, decision.reason()),
            )
            .await?;

            match decision {
                RiskDecision::Approved(_) => {
                    tally.approved += 1;
                    alerts.push(TradeAlert { proposal, decision });
                }
                RiskDecision::Vetoed(_) => tally.vetoed += 1,
            }
        }

        if !alerts.is_empty() {
            let delivered = self.dispatcher(ctx)?.send_batch(&alerts).await?;
            if !delivered {
                self.log(ctx, "Trade alert could not be delivered on any channel")
                    .await?;
            }
        }
        Ok(tally)
    }

    async fn postmarket(&self, ctx: &RunContext) -> Result<RunOutcome> {
        let (day_start, day_end) = ctx.schedule.day_bounds(ctx.now);
        if self
            .jobs
            .completed_between(Mode::Postmarket, day_start, day_end)
            .await?
        {
            return Ok(RunOutcome::Skipped(
                "Postmarket already completed today".to_string(),
            ));
        }

        let portfolio = self.collaborators.portfolio.snapshot().await?;
        let equity_history = self.db.equity_history(2).await?;
        let previous_equity = equity_history.get(1).copied().unwrap_or(portfolio.equity);
        let recommendations = self.db.recommendations_between(day_start, day_end).await?;
        let decisions = self.db.decisions_between(day_start, day_end).await?;

        let summary = DailySummary {
            date: ctx.schedule.local_date(ctx.now),
            equity: portfolio.equity,
            previous_equity,
            cash: portfolio.cash,
            holdings: portfolio
                .holdings()
                .map(|(s, p)| (s.to_string(), p.quantity, p.current_value))
                .collect(),
            recommendations,
        };
        let delivered = self.dispatcher(ctx)?.send_daily_summary(&summary).await?;

        let risk = risk_summary(&portfolio, &ctx.config.risk);
        tracing::info!(
            "Risk summary: equity ${:.2}, cash {}%, {} positions, largest {} at {}% (limit {}%)",
            risk.total_equity,
            risk.cash_pct,
            risk.num_positions,
            risk.largest_position.as_deref().unwrap_or("-"),
            risk.largest_position_pct,
            risk.max_position_pct
        );

        let approved = decisions.iter().filter(|d| d.approved).count();
        Ok(RunOutcome::Completed(format!(
            "Postmarket: {} decisions today ({} approved), summary {}",
            decisions.len(),
            approved,
            if delivered { "sent" } else { "not delivered" }
        )))
    }

    async fn evaluate(&self, ctx: &RunContext) -> Result<RunOutcome> {
        let summary = evaluator::evaluate_due(&self.db, &ctx.config.evaluation, ctx.now).await?;
        Ok(RunOutcome::Completed(format!(
            "Evaluate: {} graded, hit rate {}%, average return {}%",
            summary.evaluated,
            summary.hit_rate_pct(),
            summary.average_return_pct
        )))
    }
}
