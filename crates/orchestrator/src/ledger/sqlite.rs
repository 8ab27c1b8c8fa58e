use super::{Admission, JobId, JobRecord, JobStore, LedgerError};
use crate::store::{from_timestamp, Database};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteConnection;
use std::sync::Arc;
use tradepilot_core::{Clock, JobStatus, Mode, SystemClock, TriggeredBy};

type JobRow = (
    i64,
    String,
    String,
    String,
    i64,
    Option<i64>,
    Option<i64>,
    Option<String>,
    String,
);

const JOB_COLUMNS: &str =
    "id, mode, status, triggered_by, created_at, started_at, completed_at, error_message, logs";

/// Job ledger backed by the `orchestrator_jobs` table.
///
/// Admission runs inside `BEGIN IMMEDIATE`, which takes the database write
/// lock up front, so two processes sharing the file cannot both pass the
/// non-terminal check. The transaction is a guard: if the admitting future
/// is dropped mid-flight it rolls back instead of holding the lock.
#[derive(Clone)]
pub struct SqliteJobStore {
    db: Database,
    clock: Arc<dyn Clock>,
}

impl SqliteJobStore {
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self {
            db,
            clock: Arc::new(SystemClock),
        }
    }

    /// Stamps job timestamps from `clock` instead of the system time.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    async fn transition(
        &self,
        id: JobId,
        from: &[JobStatus],
        to: JobStatus,
        error_message: Option<&str>,
    ) -> Result<bool> {
        let now = self.clock.utc_now().timestamp();
        let allowed = from
            .iter()
            .map(|s| format!("'{}'", s.as_str()))
            .collect::<Vec<_>>()
            .join(", ");

        let sql = match to {
            JobStatus::Running => format!(
                "UPDATE orchestrator_jobs SET status = ?1, started_at = ?2 \
                 WHERE id = ?3 AND status IN ({allowed})"
            ),
            _ => format!(
                "UPDATE orchestrator_jobs SET status = ?1, completed_at = ?2, \
                 error_message = COALESCE(?4, error_message) \
                 WHERE id = ?3 AND status IN ({allowed})"
            ),
        };

        let mut query = sqlx::query(&sql).bind(to.as_str()).bind(now).bind(id);
        if to != JobStatus::Running {
            query = query.bind(error_message);
        }
        let result = query.execute(self.db.pool()).await?;

        let changed = result.rows_affected() > 0;
        if !changed {
            tracing::warn!("Job {} not moved to {}: not in {:?}", id, to, from);
        }
        Ok(changed)
    }
}

async fn admit_locked(
    conn: &mut SqliteConnection,
    mode: Mode,
    triggered_by: TriggeredBy,
    now: DateTime<Utc>,
) -> Result<Admission> {
    let active = sqlx::query_as::<_, (i64,)>(
        r"
        SELECT id FROM orchestrator_jobs
        WHERE status IN ('pending', 'running')
        ORDER BY id ASC
        LIMIT 1
        ",
    )
    .fetch_optional(&mut *conn)
    .await?;

    if let Some((active,)) = active {
        return Ok(Admission::Conflict { active });
    }

    let id = sqlx::query(
        r"
        INSERT INTO orchestrator_jobs (mode, status, triggered_by, created_at)
        VALUES (?1, 'pending', ?2, ?3)
        ",
    )
    .bind(mode.as_str())
    .bind(triggered_by.as_str())
    .bind(now.timestamp())
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    Ok(Admission::Admitted(id))
}

fn is_busy(error: &anyhow::Error) -> bool {
    error
        .downcast_ref::<sqlx::Error>()
        .and_then(sqlx::Error::as_database_error)
        .is_some_and(|db| {
            let code = db.code().unwrap_or_default();
            code == "5" || code == "6" || db.message().contains("database is locked")
        })
}

fn into_record(row: JobRow) -> Result<JobRecord> {
    let (id, mode, status, triggered_by, created_at, started_at, completed_at, error_message, logs) =
        row;
    Ok(JobRecord {
        id,
        mode: mode.parse().map_err(|e: String| anyhow!(e))?,
        status: status.parse().map_err(|e: String| anyhow!(e))?,
        triggered_by: triggered_by.parse().map_err(|e: String| anyhow!(e))?,
        created_at: from_timestamp(created_at),
        started_at: started_at.map(from_timestamp),
        completed_at: completed_at.map(from_timestamp),
        error_message,
        logs,
    })
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn try_admit(&self, mode: Mode, triggered_by: TriggeredBy) -> Result<Admission> {
        let mut tx = match self.db.pool().begin_with("BEGIN IMMEDIATE").await {
            Ok(tx) => tx,
            Err(e) => {
                let e = anyhow::Error::from(e);
                if is_busy(&e) {
                    return Err(LedgerError::Busy.into());
                }
                return Err(e.context("Failed to open admission transaction"));
            }
        };

        let admission = match admit_locked(&mut *tx, mode, triggered_by, self.clock.utc_now()).await
        {
            Ok(admission) => admission,
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::error!("Failed to roll back admission: {}", rollback);
                }
                if is_busy(&e) {
                    return Err(LedgerError::Busy.into());
                }
                return Err(e);
            }
        };

        match admission {
            Admission::Admitted(id) => {
                tx.commit()
                    .await
                    .context("Failed to commit admission")?;
                tracing::info!("Admitted {} job {}", mode, id);
            }
            Admission::Conflict { active } => {
                tx.rollback()
                    .await
                    .context("Failed to release admission transaction")?;
                tracing::info!("Refused {} run: job {} still in progress", mode, active);
            }
        }
        Ok(admission)
    }

    async fn mark_running(&self, id: JobId) -> Result<bool> {
        self.transition(id, &[JobStatus::Pending], JobStatus::Running, None)
            .await
    }

    async fn mark_completed(&self, id: JobId) -> Result<bool> {
        self.transition(id, &[JobStatus::Running], JobStatus::Completed, None)
            .await
    }

    async fn mark_skipped(&self, id: JobId, reason: &str) -> Result<bool> {
        self.transition(id, &[JobStatus::Running], JobStatus::Skipped, Some(reason))
            .await
    }

    async fn mark_failed(&self, id: JobId, error: &str) -> Result<bool> {
        self.transition(
            id,
            &[JobStatus::Pending, JobStatus::Running],
            JobStatus::Failed,
            Some(error),
        )
        .await
    }

    async fn append_log(&self, id: JobId, line: &str) -> Result<()> {
        sqlx::query(
            r"
            UPDATE orchestrator_jobs
            SET logs = CASE WHEN logs = '' THEN ?1 ELSE logs || char(10) || ?1 END
            WHERE id = ?2
            ",
        )
        .bind(line)
        .bind(id)
        .execute(self.db.pool())
        .await?;

        Ok(())
    }

    async fn get(&self, id: JobId) -> Result<Option<JobRecord>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM orchestrator_jobs WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(self.db.pool())
        .await?;

        row.map(into_record).transpose()
    }

    async fn current(&self) -> Result<Option<JobRecord>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM orchestrator_jobs \
             WHERE status IN ('pending', 'running') ORDER BY id DESC LIMIT 1"
        ))
        .fetch_optional(self.db.pool())
        .await?;

        row.map(into_record).transpose()
    }

    async fn history(&self, limit: u32) -> Result<Vec<JobRecord>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM orchestrator_jobs ORDER BY created_at DESC, id DESC LIMIT ?1"
        ))
        .bind(i64::from(limit))
        .fetch_all(self.db.pool())
        .await?;

        rows.into_iter().map(into_record).collect()
    }

    async fn completed_between(
        &self,
        mode: Mode,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<bool> {
        let (count,) = sqlx::query_as::<_, (i64,)>(
            r"
            SELECT COUNT(*) FROM orchestrator_jobs
            WHERE mode = ?1 AND status = 'completed'
              AND completed_at >= ?2 AND completed_at < ?3
            ",
        )
        .bind(mode.as_str())
        .bind(from.timestamp())
        .bind(to.timestamp())
        .fetch_one(self.db.pool())
        .await?;

        Ok(count > 0)
    }

    async fn record_skipped(
        &self,
        mode: Mode,
        triggered_by: TriggeredBy,
        reason: &str,
    ) -> Result<JobId> {
        let now = self.clock.utc_now().timestamp();
        let id = sqlx::query(
            r"
            INSERT INTO orchestrator_jobs
                (mode, status, triggered_by, created_at, started_at, completed_at, error_message)
            VALUES (?1, 'skipped', ?2, ?3, ?3, ?3, ?4)
            ",
        )
        .bind(mode.as_str())
        .bind(triggered_by.as_str())
        .bind(now)
        .bind(reason)
        .execute(self.db.pool())
        .await?
        .last_insert_rowid();

        tracing::info!("Recorded skipped {} job {}: {}", mode, id, reason);
        Ok(id)
    }
}
