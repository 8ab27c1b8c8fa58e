pub mod bootstrap;
pub mod collaborators;
pub mod evaluator;
pub mod gemini;
pub mod import;
pub mod ledger;
pub mod notifications;
pub mod pipeline;
pub mod recommender;
pub mod runner;
pub mod sources;
pub mod store;

pub use collaborators::{
    MarketDataSource, ModelClient, NewsSource, NotificationChannel, PortfolioSource,
    Recommendation, RecommendationFocus, RecommendationRequest, Recommender, Screener,
};
pub use gemini::GeminiClient;
pub use ledger::{Admission, JobId, JobRecord, JobStore, LedgerError, MemoryJobStore, SqliteJobStore};
pub use notifications::{Dispatcher, LogChannel, WebhookChannel};
pub use pipeline::{Collaborators, Pipeline, RunOutcome};
pub use recommender::{AiRecommender, RuleBasedRecommender};
pub use runner::{Orchestrator, RunReport};
pub use sources::{StoredMarketData, StoredPortfolio};
pub use store::Database;
