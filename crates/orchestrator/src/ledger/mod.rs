//! Persistent record of orchestration runs with single-flight admission.
//!
//! At most one job is `pending` or `running` at any instant. [`JobStore::try_admit`]
//! performs the check and the insert as one atomic step; everything after
//! admission is owned by the admitted job's worker.

mod memory;
mod sqlite;

pub use memory::MemoryJobStore;
pub use sqlite::SqliteJobStore;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tradepilot_core::{JobStatus, Mode, TriggeredBy};

pub type JobId = i64;

/// Ledger failures callers are expected to handle specifically.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The store could not take its write lock in time. Safe to retry.
    #[error("Database busy, please retry")]
    Busy,
}

/// Outcome of an admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted(JobId),
    /// Another job is still pending or running. Not an error.
    Conflict { active: JobId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobRecord {
    pub id: JobId,
    pub mode: Mode,
    pub status: JobStatus,
    pub triggered_by: TriggeredBy,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub logs: String,
}

/// Transactional boundary for the job ledger.
///
/// Status transitions are guarded by the expected prior status, so a terminal
/// status can never be overwritten. Each `mark_*` returns `false` when the job
/// was not in the expected state.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Atomically checks for a non-terminal job and, if none exists, inserts a
    /// new `pending` job.
    async fn try_admit(&self, mode: Mode, triggered_by: TriggeredBy) -> Result<Admission>;

    /// `pending → running`.
    async fn mark_running(&self, id: JobId) -> Result<bool>;

    /// `running → completed`.
    async fn mark_completed(&self, id: JobId) -> Result<bool>;

    /// `running → skipped`, keeping `reason` in `error_message`.
    async fn mark_skipped(&self, id: JobId, reason: &str) -> Result<bool>;

    /// `pending|running → failed`.
    async fn mark_failed(&self, id: JobId, error: &str) -> Result<bool>;

    /// Appends one line to the job's log.
    async fn append_log(&self, id: JobId, line: &str) -> Result<()>;

    async fn get(&self, id: JobId) -> Result<Option<JobRecord>>;

    /// The pending or running job, if any.
    async fn current(&self) -> Result<Option<JobRecord>>;

    /// Most recent jobs, newest first.
    async fn history(&self, limit: u32) -> Result<Vec<JobRecord>>;

    /// Whether a job of `mode` completed within `[from, to)`.
    async fn completed_between(
        &self,
        mode: Mode,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<bool>;

    /// Inserts a job that is terminal from the start, for runs refused before
    /// admission (e.g. market closed).
    async fn record_skipped(
        &self,
        mode: Mode,
        triggered_by: TriggeredBy,
        reason: &str,
    ) -> Result<JobId>;
}

pub(crate) fn append_line(logs: &mut String, line: &str) {
    if !logs.is_empty() {
        logs.push('\n');
    }
    logs.push_str(line);
}
