pub mod ai_error;
pub mod clock;
pub mod config;
pub mod config_loader;
pub mod config_watcher;
pub mod domain;
pub mod pacing;
pub mod risk;
pub mod schedule;

pub use ai_error::AiError;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    AiConfig, AppConfig, DatabaseConfig, EvaluationConfig, NotificationConfig, RiskConfig,
    ScheduleConfig, ServerConfig,
};
pub use config_loader::ConfigLoader;
pub use config_watcher::ConfigWatcher;
pub use domain::{
    JobStatus, MarketSnapshot, Mode, NewsSignal, PortfolioContext, Position, TradeAction,
    TradeProposal, TriggeredBy, Urgency,
};
pub use pacing::{CallPacer, RetryPolicy};
pub use risk::{validate, DecisionAudit, RiskController, RiskDecision, Veto};
pub use schedule::{QuietHours, Schedule};
