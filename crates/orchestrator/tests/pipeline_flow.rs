//! End-to-end runs through admission, pipeline and ledger with in-memory
//! collaborators.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tradepilot_core::{
    AppConfig, Clock, JobStatus, ManualClock, MarketSnapshot, Mode, NewsSignal, PortfolioContext,
    Position, TradeAction, TradeProposal, TriggeredBy,
};
use tradepilot_orchestrator::{
    Admission, Collaborators, Database, JobStore, MarketDataSource, NewsSource,
    NotificationChannel, Orchestrator, Pipeline, PortfolioSource, Recommendation,
    RecommendationFocus, RecommendationRequest, Recommender, RunOutcome, RunReport, Screener,
    SqliteJobStore,
};

// ============================================================================
// Fakes
// ============================================================================

struct FakeMarket {
    snapshots: HashMap<String, MarketSnapshot>,
}

impl FakeMarket {
    fn new(at: DateTime<Utc>, quotes: &[(&str, rust_decimal::Decimal, rust_decimal::Decimal)]) -> Self {
        let snapshots = quotes
            .iter()
            .map(|(symbol, price, atr)| {
                (
                    (*symbol).to_string(),
                    MarketSnapshot {
                        symbol: (*symbol).to_string(),
                        price: *price,
                        atr: *atr,
                        sma_50: None,
                        avg_volume: None,
                        source: "fake".to_string(),
                        observed_at: at,
                    },
                )
            })
            .collect();
        Self { snapshots }
    }
}

#[async_trait]
impl MarketDataSource for FakeMarket {
    async fn refresh_metadata(&self, _symbols: &[String]) -> Result<()> {
        Ok(())
    }

    async fn fetch(&self, symbol: &str) -> Result<Option<MarketSnapshot>> {
        Ok(self.snapshots.get(symbol).cloned())
    }
}

#[async_trait]
impl NewsSource for FakeMarket {
    async fn analyze(&self, _symbols: &[String], _since: DateTime<Utc>) -> Result<Vec<NewsSignal>> {
        Ok(Vec::new())
    }
}

#[derive(Default)]
struct FakePortfolio {
    context: PortfolioContext,
    calls: AtomicUsize,
    gate: Option<Arc<Notify>>,
    fail: bool,
    panics: bool,
}

#[async_trait]
impl PortfolioSource for FakePortfolio {
    async fn snapshot(&self) -> Result<PortfolioContext> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.fail {
            anyhow::bail!("brokerage export unreadable");
        }
        assert!(!self.panics, "portfolio feed exploded");
        Ok(self.context.clone())
    }
}

struct ScriptedRecommender {
    proposals: HashMap<String, TradeProposal>,
    focuses: Mutex<Vec<RecommendationFocus>>,
}

impl ScriptedRecommender {
    fn new(proposals: Vec<TradeProposal>) -> Self {
        Self {
            proposals: proposals.into_iter().map(|p| (p.symbol.clone(), p)).collect(),
            focuses: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Recommender for ScriptedRecommender {
    async fn recommend(&self, request: &RecommendationRequest) -> Result<Option<Recommendation>> {
        self.focuses.lock().push(request.focus);
        Ok(self
            .proposals
            .get(&request.symbol)
            .cloned()
            .map(|p| Recommendation::new(p, "scripted")))
    }
}

struct FailingScreener;

#[async_trait]
impl Screener for FailingScreener {
    async fn candidates(&self) -> Result<Vec<String>> {
        anyhow::bail!("screener offline")
    }
}

#[derive(Default)]
struct RecordingChannel {
    sent: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    fn name(&self) -> &str {
        "recording"
    }

    fn interrupts(&self) -> bool {
        false
    }

    async fn send(&self, subject: &str, body: &str) -> Result<()> {
        self.sent.lock().push((subject.to_string(), body.to_string()));
        Ok(())
    }
}

struct Harness {
    db: Database,
    jobs: Arc<SqliteJobStore>,
    orchestrator: Orchestrator,
    portfolio: Arc<FakePortfolio>,
    recommender: Arc<ScriptedRecommender>,
    channel: Arc<RecordingChannel>,
}

async fn harness(
    clock: Arc<dyn Clock>,
    config: AppConfig,
    market: FakeMarket,
    portfolio: FakePortfolio,
    proposals: Vec<TradeProposal>,
) -> Harness {
    let db = Database::in_memory().await.unwrap();
    let jobs = Arc::new(SqliteJobStore::new(db.clone()).with_clock(clock.clone()));
    let market = Arc::new(market);
    let portfolio = Arc::new(portfolio);
    let recommender = Arc::new(ScriptedRecommender::new(proposals));
    let channel = Arc::new(RecordingChannel::default());

    let collaborators = Collaborators {
        market: market.clone(),
        news: market,
        portfolio: portfolio.clone(),
        screener: Some(Arc::new(FailingScreener)),
        recommender: recommender.clone(),
        channels: vec![channel.clone()],
    };
    let (_tx, rx) = watch::channel(config);
    let pipeline = Pipeline::new(collaborators, db.clone(), jobs.clone(), clock, rx);

    Harness {
        orchestrator: Orchestrator::new(jobs.clone(), Arc::new(pipeline)),
        db,
        jobs,
        portfolio,
        recommender,
        channel,
    }
}

/// Wednesday 2025-03-12, 10:00 Pacific.
fn trading_day() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 12, 17, 0, 0).unwrap()
}

fn watchlist(symbols: &[&str]) -> AppConfig {
    AppConfig {
        watchlist: symbols.iter().map(|s| (*s).to_string()).collect(),
        ..AppConfig::default()
    }
}

// ============================================================================
// Market mode
// ============================================================================

#[tokio::test]
async fn test_market_run_sizes_and_announces_approved_buy() {
    let now = trading_day();
    let h = harness(
        Arc::new(ManualClock::new(now)),
        watchlist(&["aapl", "MSFT"]),
        FakeMarket::new(now, &[("AAPL", dec!(100), dec!(2))]),
        FakePortfolio {
            context: PortfolioContext::new(dec!(10000), dec!(5000)),
            ..FakePortfolio::default()
        },
        vec![TradeProposal::new("AAPL", TradeAction::Buy, 0.8)
            .with_stop_loss(dec!(90))
            .with_reasoning("Breakout above resistance")],
    )
    .await;

    let report = h.orchestrator.run_sync(Mode::Market, TriggeredBy::Manual).await.unwrap();
    let RunReport::Finished { job_id, outcome } = report else {
        panic!("expected a finished run, got {report:?}");
    };
    assert!(matches!(outcome, RunOutcome::Completed(_)));

    let job = h.jobs.get(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.logs.contains("AAPL: BUY -> Approved: 15 shares"));

    let sent = h.channel.sent.lock().clone();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].1.contains("AAPL: 15 shares @ $1500"));

    assert_eq!(h.db.decision_count().await.unwrap(), 1);
    let stored = h
        .db
        .recommendations_between(now - chrono::Duration::days(3650), Utc::now() + chrono::Duration::days(1))
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].source, "scripted");
    assert_eq!(stored[0].price_at_recommendation, Some(dec!(100)));
}

#[tokio::test]
async fn test_volatile_buy_is_vetoed_and_not_announced() {
    let now = trading_day();
    let h = harness(
        Arc::new(ManualClock::new(now)),
        watchlist(&["TSLA"]),
        FakeMarket::new(now, &[("TSLA", dec!(100), dec!(12))]),
        FakePortfolio::default(),
        vec![TradeProposal::new("TSLA", TradeAction::Buy, 0.9)],
    )
    .await;

    h.orchestrator.run_sync(Mode::Market, TriggeredBy::Manual).await.unwrap();

    assert!(h.channel.sent.lock().is_empty());
    let decisions = h
        .db
        .decisions_between(now - chrono::Duration::days(3650), Utc::now() + chrono::Duration::days(1))
        .await
        .unwrap();
    assert_eq!(decisions.len(), 1);
    assert!(!decisions[0].approved);
    assert!(decisions[0].reason.starts_with("Excessive volatility"));
}

#[tokio::test]
async fn test_stale_market_data_skips_symbol() {
    let now = trading_day();
    let h = harness(
        Arc::new(ManualClock::new(now)),
        watchlist(&["AAPL"]),
        FakeMarket::new(now - chrono::Duration::hours(30), &[("AAPL", dec!(100), dec!(2))]),
        FakePortfolio::default(),
        vec![TradeProposal::new("AAPL", TradeAction::Buy, 0.8)],
    )
    .await;

    h.orchestrator.run_sync(Mode::Market, TriggeredBy::Manual).await.unwrap();

    assert!(h.recommender.focuses.lock().is_empty(), "no recommendation on stale data");
    assert_eq!(h.db.decision_count().await.unwrap(), 0);
}

// ============================================================================
// Review mode
// ============================================================================

#[tokio::test]
async fn test_review_holds_never_reach_risk() {
    let now = trading_day();
    let portfolio = PortfolioContext::new(dec!(10000), dec!(8000)).with_position(
        "AAPL",
        Position {
            quantity: dec!(20),
            cost_basis: dec!(1800),
            current_value: dec!(2000),
        },
    );
    let h = harness(
        Arc::new(ManualClock::new(now)),
        watchlist(&["MSFT"]),
        FakeMarket::new(now, &[("AAPL", dec!(100), dec!(2)), ("MSFT", dec!(300), dec!(5))]),
        FakePortfolio {
            context: portfolio,
            ..FakePortfolio::default()
        },
        vec![TradeProposal::new("AAPL", TradeAction::Hold, 0.6)],
    )
    .await;

    h.orchestrator.run_sync(Mode::Review, TriggeredBy::Manual).await.unwrap();

    assert_eq!(
        h.recommender.focuses.lock().clone(),
        vec![RecommendationFocus::Exit],
        "only holdings are reviewed"
    );
    assert_eq!(h.db.decision_count().await.unwrap(), 0);
    assert!(h.channel.sent.lock().is_empty());
}

// ============================================================================
// Postmarket idempotency
// ============================================================================

#[tokio::test]
async fn test_postmarket_twice_same_day_skips_second() {
    let clock = Arc::new(ManualClock::new(trading_day()));
    let h = harness(
        clock.clone(),
        AppConfig::default(),
        FakeMarket::new(trading_day(), &[]),
        FakePortfolio::default(),
        Vec::new(),
    )
    .await;

    let first = h.orchestrator.run_sync(Mode::Postmarket, TriggeredBy::Scheduled).await.unwrap();
    assert!(matches!(
        first,
        RunReport::Finished { outcome: RunOutcome::Completed(_), .. }
    ));
    let portfolio_calls = h.portfolio.calls.load(Ordering::SeqCst);
    let notifications = h.channel.sent.lock().len();
    assert_eq!(notifications, 1);

    clock.advance(Duration::from_secs(2 * 3600));
    let second = h.orchestrator.run_sync(Mode::Postmarket, TriggeredBy::Manual).await.unwrap();
    let RunReport::Finished { job_id, outcome } = second else {
        panic!("expected a finished run, got {second:?}");
    };
    assert!(matches!(outcome, RunOutcome::Skipped(_)));

    let job = h.jobs.get(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Skipped);
    assert_eq!(h.portfolio.calls.load(Ordering::SeqCst), portfolio_calls);
    assert_eq!(h.channel.sent.lock().len(), notifications);

    clock.advance(Duration::from_secs(24 * 3600));
    let next_day = h.orchestrator.run_sync(Mode::Postmarket, TriggeredBy::Scheduled).await.unwrap();
    assert!(
        matches!(next_day, RunReport::Finished { outcome: RunOutcome::Completed(_), .. }),
        "{next_day:?}"
    );
}

// ============================================================================
// Failure capture, conflicts and scheduling
// ============================================================================

#[tokio::test]
async fn test_failed_run_is_recorded_and_reraised() {
    let now = trading_day();
    let h = harness(
        Arc::new(ManualClock::new(now)),
        AppConfig::default(),
        FakeMarket::new(now, &[]),
        FakePortfolio {
            fail: true,
            ..FakePortfolio::default()
        },
        Vec::new(),
    )
    .await;

    let err = h
        .orchestrator
        .run_sync(Mode::Market, TriggeredBy::Manual)
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("brokerage export unreadable"));

    let history = h.jobs.history(1).await.unwrap();
    assert_eq!(history[0].status, JobStatus::Failed);
    assert!(history[0]
        .error_message
        .as_deref()
        .unwrap()
        .contains("brokerage export unreadable"));
    assert!(h.jobs.current().await.unwrap().is_none(), "slot is released");

    let sent = h.channel.sent.lock();
    let (subject, body) = sent.last().unwrap();
    assert_eq!(subject, "CRITICAL: Trading System Alert");
    assert!(body.starts_with(&format!("Job {} (market) failed:", history[0].id)), "{body}");
    assert!(body.contains("brokerage export unreadable"), "{body}");
}

#[tokio::test]
async fn test_panicking_run_fails_job_and_frees_slot() {
    let now = trading_day();
    let h = harness(
        Arc::new(ManualClock::new(now)),
        AppConfig::default(),
        FakeMarket::new(now, &[]),
        FakePortfolio {
            panics: true,
            ..FakePortfolio::default()
        },
        Vec::new(),
    )
    .await;

    let Admission::Admitted(id) = h.orchestrator.submit(Mode::Market, TriggeredBy::Manual).await.unwrap()
    else {
        panic!("first submit should be admitted");
    };
    let mut job = h.jobs.get(id).await.unwrap().unwrap();
    for _ in 0..200 {
        if job.status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        job = h.jobs.get(id).await.unwrap().unwrap();
    }
    assert_eq!(job.status, JobStatus::Failed);
    assert!(
        job.error_message.as_deref().unwrap().contains("Run panicked: portfolio feed exploded"),
        "{:?}",
        job.error_message
    );
    assert!(h
        .channel
        .sent
        .lock()
        .iter()
        .any(|(subject, body)| subject == "CRITICAL: Trading System Alert"
            && body.contains("portfolio feed exploded")));

    let err = h
        .orchestrator
        .run_sync(Mode::Market, TriggeredBy::Manual)
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("Run panicked"), "{err:#}");
    assert_eq!(h.jobs.history(10).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_submit_conflicts_while_job_active() {
    let gate = Arc::new(Notify::new());
    let now = trading_day();
    let h = harness(
        Arc::new(ManualClock::new(now)),
        AppConfig::default(),
        FakeMarket::new(now, &[]),
        FakePortfolio {
            gate: Some(gate.clone()),
            ..FakePortfolio::default()
        },
        Vec::new(),
    )
    .await;

    let first = h.orchestrator.submit(Mode::Market, TriggeredBy::Manual).await.unwrap();
    let Admission::Admitted(id) = first else {
        panic!("first submit should be admitted");
    };
    let second = h.orchestrator.submit(Mode::Premarket, TriggeredBy::Manual).await.unwrap();
    assert_eq!(second, Admission::Conflict { active: id });

    gate.notify_one();
    let mut status = JobStatus::Pending;
    for _ in 0..200 {
        status = h.jobs.get(id).await.unwrap().unwrap().status;
        if status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(status, JobStatus::Completed);
}

#[tokio::test]
async fn test_scheduled_run_on_weekend_is_skipped() {
    // Saturday 2025-03-15, 10:00 Pacific
    let saturday = Utc.with_ymd_and_hms(2025, 3, 15, 17, 0, 0).unwrap();
    let h = harness(
        Arc::new(ManualClock::new(saturday)),
        AppConfig::default(),
        FakeMarket::new(saturday, &[]),
        FakePortfolio::default(),
        Vec::new(),
    )
    .await;

    let report = h.orchestrator.run_scheduled(Mode::Market).await.unwrap();
    let RunReport::NotAdmitted { job_id, reason } = report else {
        panic!("expected weekend skip, got {report:?}");
    };
    assert_eq!(reason, "Market closed");

    let job = h.jobs.get(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Skipped);
    assert_eq!(job.triggered_by, TriggeredBy::Scheduled);
    assert_eq!(h.portfolio.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_resolve_mode_follows_schedule() {
    let h = harness(
        Arc::new(ManualClock::new(trading_day())),
        AppConfig::default(),
        FakeMarket::new(trading_day(), &[]),
        FakePortfolio::default(),
        Vec::new(),
    )
    .await;
    assert_eq!(h.orchestrator.resolve_mode().unwrap(), Some(Mode::Market));
}
