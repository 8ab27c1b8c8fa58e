//! Job detail command.

use super::common::{open_database, CommonArgs};
use anyhow::{anyhow, Result};
use clap::Args;
use tradepilot_core::ConfigLoader;
use tradepilot_orchestrator::{JobId, JobStore, SqliteJobStore};

/// Arguments for the status command.
#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Job id
    pub job_id: JobId,
}

/// # Errors
/// Returns an error if the job does not exist or the ledger cannot be read.
pub async fn run_status(args: StatusArgs) -> Result<()> {
    let config = ConfigLoader::load_from(&args.common.config)?;
    let db = open_database(&config.database).await?;
    let jobs = SqliteJobStore::new(db);

    let job = jobs
        .get(args.job_id)
        .await?
        .ok_or_else(|| anyhow!("Job {} not found", args.job_id))?;

    println!("Job {}", job.id);
    println!("  Mode:         {}", job.mode);
    println!("  Status:       {}", job.status);
    println!("  Triggered by: {}", job.triggered_by.as_str());
    println!("  Created:      {}", job.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    if let Some(started) = job.started_at {
        println!("  Started:      {}", started.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    if let Some(completed) = job.completed_at {
        println!("  Completed:    {}", completed.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    if let Some(error) = &job.error_message {
        println!("  Message:      {error}");
    }
    if !job.logs.is_empty() {
        println!("\nLogs:");
        for line in job.logs.lines() {
            println!("  {line}");
        }
    }

    Ok(())
}
