//! Wiring shared by every command: configuration, database and orchestrator.

use anyhow::{Context, Result};
use clap::Args;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tradepilot_core::config_loader::DEFAULT_CONFIG_PATH;
use tradepilot_core::{AppConfig, ConfigLoader, ConfigWatcher, DatabaseConfig};
use tradepilot_orchestrator::{bootstrap, Database, Orchestrator, RunOutcome, RunReport};

#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// Config file path
    #[arg(short, long, env = "TRADEPILOT_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config: String,
}

/// Everything a command needs to talk to the ledger and the pipeline.
pub struct AppContext {
    pub config: AppConfig,
    pub config_path: String,
    pub watcher: Arc<ConfigWatcher>,
    pub db: Database,
    pub orchestrator: Orchestrator,
}

impl AppContext {
    /// Loads configuration, opens the database and builds the orchestrator.
    ///
    /// # Errors
    /// Returns an error if the configuration cannot be parsed or the database
    /// cannot be opened.
    pub async fn load(args: &CommonArgs) -> Result<Self> {
        let config = ConfigLoader::load_from(&args.config)?;
        let db = open_database(&config.database).await?;
        let (watcher, rx) = ConfigWatcher::new(config.clone());
        let orchestrator = build_orchestrator(db.clone(), rx)?;

        Ok(Self {
            config,
            config_path: args.config.clone(),
            watcher: Arc::new(watcher),
            db,
            orchestrator,
        })
    }

    /// Reloads configuration on file changes for the life of the process.
    pub fn spawn_config_watch(&self) {
        let watcher = self.watcher.clone();
        let path = self.config_path.clone();
        tokio::spawn(async move {
            if let Err(e) = watcher.watch(path).await {
                tracing::warn!("Config hot reload disabled: {:#}", e);
            }
        });
    }
}

fn build_orchestrator(db: Database, rx: watch::Receiver<AppConfig>) -> Result<Orchestrator> {
    bootstrap::orchestrator(db, rx).context("Failed to build orchestrator")
}

/// Opens the configured `SQLite` database, creating its directory if needed.
///
/// # Errors
/// Returns an error if the directory cannot be created or the connection fails.
pub async fn open_database(config: &DatabaseConfig) -> Result<Database> {
    if let Some(file_path) = config.url.strip_prefix("sqlite://") {
        let file_path = file_path.split('?').next().unwrap_or(file_path);
        let path = Path::new(file_path);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create database directory {}", parent.display())
                })?;
            }
        }
    }

    tracing::info!("Opening database at {}", config.url);
    Database::connect(config).await
}

/// Resolves on Ctrl+C.
pub async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C, shutting down"),
        Err(e) => tracing::error!("Failed to listen for shutdown signal: {}", e),
    }
}

#[must_use]
pub fn describe_report(report: &RunReport) -> String {
    match report {
        RunReport::Finished {
            job_id,
            outcome: RunOutcome::Completed(summary),
        } => format!("Job {job_id} completed: {summary}"),
        RunReport::Finished {
            job_id,
            outcome: RunOutcome::Skipped(reason),
        } => format!("Job {job_id} skipped: {reason}"),
        RunReport::Busy { active } => {
            format!("An orchestrator run is already in progress (job {active})")
        }
        RunReport::NotAdmitted { job_id, reason } => {
            format!("Job {job_id} not run: {reason}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_report() {
        let done = RunReport::Finished {
            job_id: 3,
            outcome: RunOutcome::Completed("2 approved".to_string()),
        };
        assert_eq!(describe_report(&done), "Job 3 completed: 2 approved");

        let busy = RunReport::Busy { active: 7 };
        assert!(describe_report(&busy).contains("(job 7)"));

        let closed = RunReport::NotAdmitted {
            job_id: 9,
            reason: "Market closed".to_string(),
        };
        assert_eq!(describe_report(&closed), "Job 9 not run: Market closed");
    }

    #[tokio::test]
    async fn test_open_database_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested/state/tradepilot.db");
        let config = DatabaseConfig {
            url: format!("sqlite://{}?mode=rwc", db_path.display()),
            ..DatabaseConfig::default()
        };

        open_database(&config).await.unwrap();
        assert!(db_path.parent().unwrap().is_dir());
    }
}
