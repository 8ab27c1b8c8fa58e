use clap::{Parser, Subcommand};

mod commands;

use commands::{
    DaemonArgs, HistoryArgs, ImportPortfolioArgs, RunArgs, ScheduledArgs, ServeArgs, StatusArgs,
};

#[derive(Parser)]
#[command(name = "tradepilot")]
#[command(about = "Trading assistant orchestrator", long_about = None)]
struct Cli {
    /// Optional log file path (logs to file instead of stderr)
    #[arg(long, global = true)]
    log_file: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the web API server
    Serve(ServeArgs),
    /// Run one pipeline mode now and wait for it to finish
    Run(RunArgs),
    /// Run a mode the way the scheduler does (skipped on weekends)
    Scheduled(ScheduledArgs),
    /// Run premarket, market and postmarket on their cron schedules
    Daemon(DaemonArgs),
    /// Import a brokerage CSV export as the latest portfolio snapshot
    ImportPortfolio(ImportPortfolioArgs),
    /// Show one job with its logs
    Status(StatusArgs),
    /// List recent jobs
    History(HistoryArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if let Some(path) = &cli.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    match cli.command {
        Commands::Serve(args) => commands::run_serve(args).await?,
        Commands::Run(args) => commands::run_run(args).await?,
        Commands::Scheduled(args) => commands::run_scheduled(args).await?,
        Commands::Daemon(args) => commands::run_daemon(args).await?,
        Commands::ImportPortfolio(args) => commands::run_import_portfolio(args).await?,
        Commands::Status(args) => commands::run_status(args).await?,
        Commands::History(args) => commands::run_history(args).await?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tradepilot_core::Mode;

    #[test]
    fn test_run_mode_is_optional() {
        let cli = Cli::try_parse_from(["tradepilot", "run"]).unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert!(args.mode.is_none());

        let cli = Cli::try_parse_from(["tradepilot", "run", "--mode", "review"]).unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.mode, Some(Mode::Review));
    }

    #[test]
    fn test_unknown_mode_is_rejected() {
        let err = Cli::try_parse_from(["tradepilot", "scheduled", "lunch"])
            .err()
            .unwrap();
        assert!(err.to_string().contains("Invalid mode 'lunch'"));
    }

    #[test]
    fn test_global_log_file_and_history_default() {
        let cli =
            Cli::try_parse_from(["tradepilot", "history", "--log-file", "/tmp/tp.log"]).unwrap();
        assert_eq!(cli.log_file.as_deref(), Some("/tmp/tp.log"));
        let Commands::History(args) = cli.command else {
            panic!("expected history");
        };
        assert_eq!(args.limit, 10);
        assert_eq!(args.common.config, "config/Config.toml");
    }
}
