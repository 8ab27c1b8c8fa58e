//! Recent jobs command.

use super::common::{open_database, CommonArgs};
use anyhow::Result;
use clap::Args;
use tradepilot_core::ConfigLoader;
use tradepilot_orchestrator::{JobStore, SqliteJobStore};

/// Arguments for the history command.
#[derive(Args, Debug, Clone)]
pub struct HistoryArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Number of jobs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: u32,
}

/// # Errors
/// Returns an error if the ledger cannot be read.
pub async fn run_history(args: HistoryArgs) -> Result<()> {
    let config = ConfigLoader::load_from(&args.common.config)?;
    let db = open_database(&config.database).await?;
    let jobs = SqliteJobStore::new(db).history(args.limit).await?;

    if jobs.is_empty() {
        println!("No jobs recorded");
        return Ok(());
    }

    println!("{}", "=".repeat(90));
    println!(
        "{:>6} {:<11} {:<10} {:<10} {:<20} {}",
        "Job", "Mode", "Status", "Trigger", "Created (UTC)", "Message"
    );
    println!("{}", "-".repeat(90));
    for job in &jobs {
        println!(
            "{:>6} {:<11} {:<10} {:<10} {:<20} {}",
            job.id,
            job.mode.as_str(),
            job.status.as_str(),
            job.triggered_by.as_str(),
            job.created_at.format("%Y-%m-%d %H:%M:%S"),
            job.error_message.as_deref().unwrap_or("")
        );
    }
    println!("{}", "=".repeat(90));

    Ok(())
}
