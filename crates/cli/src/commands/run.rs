//! One-shot pipeline runs.
//!
//! `run` behaves like a manual trigger; `scheduled` goes through the same
//! weekend check the daemon uses.

use super::common::{describe_report, AppContext, CommonArgs};
use anyhow::Result;
use clap::Args;
use tradepilot_core::{Mode, TriggeredBy};

/// Arguments for the run command.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Mode to run (premarket, market, postmarket, review, evaluate).
    /// Resolved from the time of day when omitted.
    #[arg(short, long)]
    pub mode: Option<Mode>,
}

/// Arguments for the scheduled command.
#[derive(Args, Debug, Clone)]
pub struct ScheduledArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Mode to run
    pub mode: Mode,
}

/// Runs one mode to completion on the current task.
///
/// # Errors
/// Returns the run's error after it has been recorded on the job, so the
/// process exits non-zero.
pub async fn run_run(args: RunArgs) -> Result<()> {
    let ctx = AppContext::load(&args.common).await?;

    let mode = match args.mode {
        Some(mode) => mode,
        None => match ctx.orchestrator.resolve_mode()? {
            Some(mode) => {
                tracing::info!("Resolved mode from schedule: {}", mode);
                mode
            }
            None => {
                println!("Market closed; no mode to run");
                return Ok(());
            }
        },
    };

    let report = ctx.orchestrator.run_sync(mode, TriggeredBy::Manual).await?;
    println!("{}", describe_report(&report));
    Ok(())
}

/// # Errors
/// Same as [`run_run`].
pub async fn run_scheduled(args: ScheduledArgs) -> Result<()> {
    let ctx = AppContext::load(&args.common).await?;
    let report = ctx.orchestrator.run_scheduled(args.mode).await?;
    println!("{}", describe_report(&report));
    Ok(())
}
