//! Admission plus execution: the entry point shared by HTTP, CLI and daemon.

use crate::ledger::{Admission, JobId, JobStore};
use crate::pipeline::{Pipeline, RunOutcome};
use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use tradepilot_core::{Mode, Schedule, TriggeredBy};

/// Result of a synchronous run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunReport {
    Finished { job_id: JobId, outcome: RunOutcome },
    /// Admission refused because another job is active.
    Busy { active: JobId },
    /// Refused before admission, e.g. on a weekend.
    NotAdmitted { job_id: JobId, reason: String },
}

#[derive(Clone)]
pub struct Orchestrator {
    jobs: Arc<dyn JobStore>,
    pipeline: Arc<Pipeline>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(jobs: Arc<dyn JobStore>, pipeline: Arc<Pipeline>) -> Self {
        Self { jobs, pipeline }
    }

    #[must_use]
    pub fn jobs(&self) -> &Arc<dyn JobStore> {
        &self.jobs
    }

    /// Mode for the current time of day, or `None` when the market is closed.
    ///
    /// # Errors
    /// Returns error if the schedule configuration is invalid.
    pub fn resolve_mode(&self) -> Result<Option<Mode>> {
        let schedule = Schedule::from_config(&self.pipeline.config().schedule)?;
        Ok(schedule.resolve(self.pipeline.clock().utc_now()))
    }

    /// Admits a job and runs it in the background.
    ///
    /// Returns as soon as admission is decided. A `Conflict` is a normal
    /// outcome and is logged at info level.
    ///
    /// # Errors
    /// Returns error if the ledger cannot be reached, including
    /// [`crate::ledger::LedgerError::Busy`].
    pub async fn submit(&self, mode: Mode, triggered_by: TriggeredBy) -> Result<Admission> {
        let admission = self.jobs.try_admit(mode, triggered_by).await?;
        match admission {
            Admission::Admitted(id) => {
                let this = self.clone();
                tokio::spawn(async move {
                    if let Err(e) = this.execute(id, mode).await {
                        tracing::error!("Job {} failed: {:#}", id, e);
                    }
                });
            }
            Admission::Conflict { active } => {
                tracing::info!("{} run not started: job {} is still active", mode, active);
            }
        }
        Ok(admission)
    }

    /// Admits and runs a job on the caller's task.
    ///
    /// # Errors
    /// Returns the run's error after the job has been marked failed.
    pub async fn run_sync(&self, mode: Mode, triggered_by: TriggeredBy) -> Result<RunReport> {
        match self.jobs.try_admit(mode, triggered_by).await? {
            Admission::Admitted(id) => {
                let outcome = self.execute(id, mode).await?;
                Ok(RunReport::Finished { job_id: id, outcome })
            }
            Admission::Conflict { active } => {
                tracing::info!("{} run not started: job {} is still active", mode, active);
                Ok(RunReport::Busy { active })
            }
        }
    }

    /// Scheduler entry point: weekends are recorded as skipped without
    /// admission.
    ///
    /// # Errors
    /// Same as [`Orchestrator::run_sync`].
    pub async fn run_scheduled(&self, mode: Mode) -> Result<RunReport> {
        let schedule = Schedule::from_config(&self.pipeline.config().schedule)?;
        if schedule.is_weekend(self.pipeline.clock().utc_now()) {
            let reason = "Market closed";
            let job_id = self
                .jobs
                .record_skipped(mode, TriggeredBy::Scheduled, reason)
                .await?;
            tracing::info!("Scheduled {} run skipped: {}", mode, reason);
            return Ok(RunReport::NotAdmitted {
                job_id,
                reason: reason.to_string(),
            });
        }
        self.run_sync(mode, TriggeredBy::Scheduled).await
    }

    /// Drives an admitted job to a terminal status.
    ///
    /// The pipeline runs on its own task, so a panic fails the job like any
    /// other error.
    async fn execute(&self, id: JobId, mode: Mode) -> Result<RunOutcome> {
        match self.jobs.mark_running(id).await {
            Ok(true) => {}
            Ok(false) => anyhow::bail!("Job {id} was not pending when its worker started"),
            Err(e) => {
                let e = e.context(format!("Failed to start job {id}"));
                self.fail(id, mode, &e).await;
                return Err(e);
            }
        }

        let pipeline = self.pipeline.clone();
        let result = match tokio::spawn(async move { pipeline.run(id, mode).await }).await {
            Ok(result) => result,
            Err(join) if join.is_panic() => Err(anyhow!("Run panicked: {}", panic_message(join))),
            Err(join) => Err(anyhow!("Run was cancelled: {join}")),
        };

        let result = match result {
            Ok(outcome) => self.finish(id, mode, &outcome).await.map(|()| outcome),
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            self.fail(id, mode, e).await;
        }
        result
    }

    async fn finish(&self, id: JobId, mode: Mode, outcome: &RunOutcome) -> Result<()> {
        match outcome {
            RunOutcome::Completed(_) => {
                self.jobs
                    .mark_completed(id)
                    .await
                    .context("Failed to record completion")?;
                tracing::info!("Job {} ({}) completed", id, mode);
            }
            RunOutcome::Skipped(reason) => {
                self.jobs
                    .mark_skipped(id, reason)
                    .await
                    .context("Failed to record skip")?;
                tracing::info!("Job {} ({}) skipped: {}", id, mode, reason);
            }
        }
        Ok(())
    }

    /// Marks the job failed and raises a critical alert. Neither step may
    /// mask the run's own error, so their failures are only logged.
    async fn fail(&self, id: JobId, mode: Mode, error: &anyhow::Error) {
        let message = format!("{error:#}");
        if let Err(e) = self.jobs.mark_failed(id, &message).await {
            tracing::error!("Failed to record failure of job {}: {:#}", id, e);
        }
        if let Err(e) = self.pipeline.alert_failure(id, mode, &message).await {
            tracing::error!("Failed to send failure alert for job {}: {:#}", id, e);
        }
    }
}

fn panic_message(join: tokio::task::JoinError) -> String {
    let payload = join.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
