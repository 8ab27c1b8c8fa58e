//! CLI commands for the trading assistant.

pub mod common;
pub mod daemon;
pub mod history;
pub mod import_portfolio;
pub mod run;
pub mod serve;
pub mod status;

pub use daemon::{run_daemon, DaemonArgs};
pub use history::{run_history, HistoryArgs};
pub use import_portfolio::{run_import_portfolio, ImportPortfolioArgs};
pub use run::{run_run, run_scheduled, RunArgs, ScheduledArgs};
pub use serve::{run_serve, ServeArgs};
pub use status::{run_status, StatusArgs};
