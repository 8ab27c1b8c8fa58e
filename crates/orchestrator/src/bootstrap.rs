//! Production wiring of collaborators from configuration.

use crate::collaborators::{NotificationChannel, Recommender};
use crate::gemini::GeminiClient;
use crate::ledger::SqliteJobStore;
use crate::notifications::{LogChannel, WebhookChannel};
use crate::pipeline::{Collaborators, Pipeline};
use crate::recommender::{AiRecommender, RuleBasedRecommender};
use crate::runner::Orchestrator;
use crate::sources::{StoredMarketData, StoredPortfolio};
use crate::store::Database;
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::watch;
use tradepilot_core::{AppConfig, CallPacer, Clock, RetryPolicy, SystemClock};

/// Builds the recommender: the model when enabled and keyed, rules otherwise.
///
/// One pacer is created here and shared by every run in the process.
#[must_use]
pub fn recommender(config: &AppConfig, clock: Arc<dyn Clock>) -> Arc<dyn Recommender> {
    if !config.ai.enabled {
        tracing::info!("AI recommendations disabled, using rule-based recommender");
        return Arc::new(RuleBasedRecommender);
    }

    match GeminiClient::from_config(&config.ai) {
        Ok(client) => {
            tracing::info!("Using {} for recommendations", client.model());
            Arc::new(AiRecommender::new(
                Arc::new(client),
                CallPacer::from_config(clock, &config.ai),
                RetryPolicy::from_config(&config.ai),
            ))
        }
        Err(e) => {
            tracing::warn!("{}, falling back to rule-based recommender", e);
            Arc::new(RuleBasedRecommender)
        }
    }
}

/// Log channel always, webhook when configured.
///
/// # Errors
/// Returns error if the webhook client cannot be built.
pub fn channels(config: &AppConfig) -> Result<Vec<Arc<dyn NotificationChannel>>> {
    let mut channels: Vec<Arc<dyn NotificationChannel>> = vec![Arc::new(LogChannel)];
    if let Some(url) = config.notifications.webhook_url.as_deref().filter(|u| !u.is_empty()) {
        channels.push(Arc::new(WebhookChannel::new(url)?));
    }
    Ok(channels)
}

/// Orchestrator over the SQLite ledger and the stored data sources.
///
/// # Errors
/// Returns error if a notification channel cannot be built.
pub fn orchestrator(db: Database, config: watch::Receiver<AppConfig>) -> Result<Orchestrator> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let snapshot = config.borrow().clone();
    let market = Arc::new(StoredMarketData::new(db.clone()));

    let collaborators = Collaborators {
        market: market.clone(),
        news: market,
        portfolio: Arc::new(StoredPortfolio::new(db.clone())),
        screener: None,
        recommender: recommender(&snapshot, clock.clone()),
        channels: channels(&snapshot)?,
    };

    let jobs = Arc::new(SqliteJobStore::new(db.clone()).with_clock(clock.clone()));
    let pipeline = Pipeline::new(collaborators, db, jobs.clone(), clock, config);
    Ok(Orchestrator::new(jobs, Arc::new(pipeline)))
}
