use super::{append_line, Admission, JobId, JobRecord, JobStore};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tradepilot_core::{Clock, JobStatus, Mode, SystemClock, TriggeredBy};

/// In-process ledger for single-binary deployments and tests.
///
/// Admission is a compare-and-insert under one mutex, the same guarantee a
/// key-value backend gets from a conditional put on a lock key.
pub struct MemoryJobStore {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
}

#[derive(Default)]
struct Inner {
    next_id: JobId,
    jobs: BTreeMap<JobId, JobRecord>,
}

impl Inner {
    fn allocate(&mut self) -> JobId {
        self.next_id += 1;
        self.next_id
    }
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryJobStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            clock: Arc::new(SystemClock),
        }
    }

    /// Stamps job timestamps from `clock` instead of the system time.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn transition(
        &self,
        id: JobId,
        from: &[JobStatus],
        to: JobStatus,
        error_message: Option<&str>,
    ) -> bool {
        let mut inner = self.inner.lock();
        let Some(job) = inner.jobs.get_mut(&id) else {
            return false;
        };
        if !from.contains(&job.status) {
            tracing::warn!("Job {} not moved to {}: currently {}", id, to, job.status);
            return false;
        }

        let now = self.clock.utc_now();
        job.status = to;
        if to == JobStatus::Running {
            job.started_at = Some(now);
        } else {
            job.completed_at = Some(now);
        }
        if let Some(message) = error_message {
            job.error_message = Some(message.to_string());
        }
        true
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn try_admit(&self, mode: Mode, triggered_by: TriggeredBy) -> Result<Admission> {
        let mut inner = self.inner.lock();
        if let Some(active) = inner
            .jobs
            .values()
            .find(|job| !job.status.is_terminal())
        {
            return Ok(Admission::Conflict { active: active.id });
        }

        let id = inner.allocate();
        inner.jobs.insert(
            id,
            JobRecord {
                id,
                mode,
                status: JobStatus::Pending,
                triggered_by,
                created_at: self.clock.utc_now(),
                started_at: None,
                completed_at: None,
                error_message: None,
                logs: String::new(),
            },
        );
        drop(inner);

        tracing::info!("Admitted {} job {}", mode, id);
        Ok(Admission::Admitted(id))
    }

    async fn mark_running(&self, id: JobId) -> Result<bool> {
        Ok(self.transition(id, &[JobStatus::Pending], JobStatus::Running, None))
    }

    async fn mark_completed(&self, id: JobId) -> Result<bool> {
        Ok(self.transition(id, &[JobStatus::Running], JobStatus::Completed, None))
    }

    async fn mark_skipped(&self, id: JobId, reason: &str) -> Result<bool> {
        Ok(self.transition(id, &[JobStatus::Running], JobStatus::Skipped, Some(reason)))
    }

    async fn mark_failed(&self, id: JobId, error: &str) -> Result<bool> {
        Ok(self.transition(
            id,
            &[JobStatus::Pending, JobStatus::Running],
            JobStatus::Failed,
            Some(error),
        ))
    }

    async fn append_log(&self, id: JobId, line: &str) -> Result<()> {
        if let Some(job) = self.inner.lock().jobs.get_mut(&id) {
            append_line(&mut job.logs, line);
        }
        Ok(())
    }

    async fn get(&self, id: JobId) -> Result<Option<JobRecord>> {
        Ok(self.inner.lock().jobs.get(&id).cloned())
    }

    async fn current(&self) -> Result<Option<JobRecord>> {
        Ok(self
            .inner
            .lock()
            .jobs
            .values()
            .rev()
            .find(|job| !job.status.is_terminal())
            .cloned())
    }

    async fn history(&self, limit: u32) -> Result<Vec<JobRecord>> {
        Ok(self
            .inner
            .lock()
            .jobs
            .values()
            .rev()
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn completed_between(
        &self,
        mode: Mode,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<bool> {
        Ok(self.inner.lock().jobs.values().any(|job| {
            job.mode == mode
                && job.status == JobStatus::Completed
                && job
                    .completed_at
                    .is_some_and(|at| at >= from && at < to)
        }))
    }

    async fn record_skipped(
        &self,
        mode: Mode,
        triggered_by: TriggeredBy,
        reason: &str,
    ) -> Result<JobId> {
        let now = self.clock.utc_now();
        let mut inner = self.inner.lock();
        let id = inner.allocate();
        inner.jobs.insert(
            id,
            JobRecord {
                id,
                mode,
                status: JobStatus::Skipped,
                triggered_by,
                created_at: now,
                started_at: Some(now),
                completed_at: Some(now),
                error_message: Some(reason.to_string()),
                logs: String::new(),
            },
        );
        Ok(id)
    }
}
