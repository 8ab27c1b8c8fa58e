use crate::error::ApiError;
use crate::server::AppState;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tradepilot_core::{JobStatus, Mode, TriggeredBy};
use tradepilot_orchestrator::{Admission, JobId, JobRecord};

#[derive(Debug, Default, Deserialize)]
pub struct RunRequest {
    #[serde(default)]
    pub mode: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RunResponse {
    pub job_id: JobId,
    pub mode: Mode,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct JobView {
    pub job_id: JobId,
    pub mode: Mode,
    pub status: JobStatus,
    pub triggered_by: TriggeredBy,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logs: Option<String>,
}

impl JobView {
    fn new(job: JobRecord, with_logs: bool) -> Self {
        Self {
            job_id: job.id,
            mode: job.mode,
            status: job.status,
            triggered_by: job.triggered_by,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            error_message: job.error_message,
            logs: with_logs.then_some(job.logs),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CurrentResponse {
    pub running: bool,
    pub job_id: Option<JobId>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    pub limit: u32,
}

const fn default_history_limit() -> u32 {
    10
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Admits a run and starts it in the background.
///
/// An empty body runs `market`. A non-empty body must be a JSON object.
///
fn parse_run_request(headers: &HeaderMap, body: &[u8]) -> Result<RunRequest, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(RunRequest::default());
    }

    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.trim_start().starts_with("application/json"));
    if !is_json {
        return Err(ApiError::bad_request(
            "Expected request with `Content-Type: application/json`",
        ));
    }

    Json::<RunRequest>::from_bytes(body)
        .map(|Json(request)| request)
        .map_err(|rejection| ApiError::bad_request(rejection.body_text()))
}

/// # Errors
/// 400 for a malformed body or an unknown mode, 409 while another run is
/// active, 503 if the ledger is busy.
pub async fn run(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<RunResponse>), ApiError> {
    let request = parse_run_request(&headers, &body)?;
    let mode: Mode = request
        .mode
        .as_deref()
        .unwrap_or("market")
        .parse()
        .map_err(ApiError::bad_request)?;

    match state.orchestrator.submit(mode, TriggeredBy::Manual).await? {
        Admission::Admitted(job_id) => {
            let created_at = state
                .orchestrator
                .jobs()
                .get(job_id)
                .await?
                .map_or_else(Utc::now, |job| job.created_at);
            Ok((
                StatusCode::ACCEPTED,
                Json(RunResponse {
                    job_id,
                    mode,
                    status: JobStatus::Pending,
                    created_at,
                }),
            ))
        }
        Admission::Conflict { active } => Err(ApiError::conflict(format!(
            "An orchestrator run is already in progress (job {active})"
        ))),
    }
}

/// # Errors
/// 404 if the job does not exist.
pub async fn status(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> Result<Json<JobView>, ApiError> {
    let job = state
        .orchestrator
        .jobs()
        .get(job_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Job not found"))?;
    Ok(Json(JobView::new(job, true)))
}

/// # Errors
/// 500 if the ledger cannot be read.
pub async fn current(State(state): State<AppState>) -> Result<Json<CurrentResponse>, ApiError> {
    let job = state.orchestrator.jobs().current().await?;
    Ok(Json(CurrentResponse {
        running: job.is_some(),
        job_id: job.map(|j| j.id),
    }))
}

/// # Errors
/// 500 if the ledger cannot be read.
pub async fn history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<JobView>>, ApiError> {
    let jobs = state.orchestrator.jobs().history(query.limit).await?;
    Ok(Json(jobs.into_iter().map(|j| JobView::new(j, false)).collect()))
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
