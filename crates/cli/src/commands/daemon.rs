//! Cron-driven daemon running premarket, market and postmarket.

use super::common::{describe_report, shutdown_signal, AppContext, CommonArgs};
use anyhow::{Context, Result};
use clap::Args;
use tokio_cron_scheduler::{Job, JobScheduler};
use tradepilot_core::{Mode, Schedule};
use tradepilot_orchestrator::{Orchestrator, RunReport};
use tradepilot_web_api::ApiServer;

/// Arguments for the daemon command.
#[derive(Args, Debug, Clone)]
pub struct DaemonArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Also serve the web API from this process
    #[arg(long)]
    pub with_api: bool,
}

/// Runs scheduled modes until Ctrl+C.
///
/// Cron expressions and their timezone are read once at startup. Everything
/// else is picked up from the reloaded configuration at the start of each run.
///
/// # Errors
/// Returns an error if a cron expression is invalid or the scheduler fails to
/// start.
pub async fn run_daemon(args: DaemonArgs) -> Result<()> {
    let ctx = AppContext::load(&args.common).await?;
    ctx.spawn_config_watch();

    let timezone = Schedule::from_config(&ctx.config.schedule)?.timezone();
    let mut scheduler = JobScheduler::new().await?;

    let entries = [
        (Mode::Premarket, ctx.config.schedule.premarket_cron.clone()),
        (Mode::Market, ctx.config.schedule.market_cron.clone()),
        (Mode::Postmarket, ctx.config.schedule.postmarket_cron.clone()),
    ];

    for (mode, cron) in entries {
        let orchestrator = ctx.orchestrator.clone();
        let job = Job::new_async_tz(cron.as_str(), timezone, move |_uuid, _lock| {
            let orchestrator = orchestrator.clone();
            Box::pin(async move { run_job(&orchestrator, mode).await })
        })
        .with_context(|| format!("Invalid {mode} cron expression '{cron}'"))?;
        scheduler.add(job).await?;
        tracing::info!("Scheduled {} at '{}' ({})", mode, cron, timezone);
    }

    scheduler.start().await?;

    if args.with_api {
        let addr = ctx.config.server.addr();
        let server = ApiServer::new(ctx.orchestrator.clone(), ctx.config.server.api_key.clone());
        tokio::spawn(async move {
            if let Err(e) = server.serve(&addr).await {
                tracing::error!("Server error: {:#}", e);
            }
        });
    }

    tracing::info!("Daemon started. Press Ctrl+C to stop");
    shutdown_signal().await;

    scheduler.shutdown().await?;
    tracing::info!("Daemon stopped");
    Ok(())
}

async fn run_job(orchestrator: &Orchestrator, mode: Mode) {
    match orchestrator.run_scheduled(mode).await {
        Ok(report @ RunReport::Busy { .. }) => tracing::info!("{}", describe_report(&report)),
        Ok(report) => tracing::info!("Scheduled {}: {}", mode, describe_report(&report)),
        Err(e) => tracing::error!("Scheduled {} run failed: {:#}", mode, e),
    }
}
