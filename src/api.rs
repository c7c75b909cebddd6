//! HTTP control surface for the news pipeline.
//!
//! This module exposes a compact Axum router:
//!
//! - `POST /collector/start` / `POST /collector/stop` – Start or stop the collector schedule.
//!   Both return `{ "running": bool, "message": string }` and are idempotent.
//! - `POST /jobs/:job/start` / `POST /jobs/:job/stop` – The same for any job (`collector`,
//!   `summarizer`, `embedder`, `indexer`).
//! - `POST /jobs/:job/run` – Run a job once now and return its per-partition report.
//! - `GET /jobs/:job/status` – Run state, trigger state and the run in flight.
//! - `GET /metrics` – Per-job run and item counters.
//! - `GET /commands` – Machine-readable command catalog for quick discovery by tools/hosts.
//!
//! A run already in flight answers `409 Conflict`; a scheduler that cannot be controlled answers
//! `503 Service Unavailable`.

use crate::metrics::MetricsSnapshot;
use crate::pipeline::{JobKind, JobReport, UnknownJob};
use crate::scheduler::{ControlResponse, SchedulerError, SchedulerStatus};
use crate::service::PipelineApi;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

/// Build the HTTP router exposing the pipeline control surface.
pub fn create_router<S>(service: Arc<S>) -> Router
where
    S: PipelineApi + 'static,
{
    Router::new()
        .route("/collector/start", post(start_collector::<S>))
        .route("/collector/stop", post(stop_collector::<S>))
        .route("/jobs/:job/start", post(start_job::<S>))
        .route("/jobs/:job/stop", post(stop_job::<S>))
        .route("/jobs/:job/run", post(run_job::<S>))
        .route("/jobs/:job/status", get(job_status::<S>))
        .route("/metrics", get(get_metrics::<S>))
        .route("/commands", get(get_commands))
        .with_state(service)
}

async fn start_collector<S>(
    State(service): State<Arc<S>>,
) -> Result<Json<ControlResponse>, AppError>
where
    S: PipelineApi,
{
    Ok(Json(service.start_collector().await?))
}

async fn stop_collector<S>(State(service): State<Arc<S>>) -> Result<Json<ControlResponse>, AppError>
where
    S: PipelineApi,
{
    Ok(Json(service.stop_collector().await?))
}

async fn start_job<S>(
    State(service): State<Arc<S>>,
    Path(job): Path<String>,
) -> Result<Json<ControlResponse>, AppError>
where
    S: PipelineApi,
{
    Ok(Json(service.start_job(job.parse()?).await?))
}

async fn stop_job<S>(
    State(service): State<Arc<S>>,
    Path(job): Path<String>,
) -> Result<Json<ControlResponse>, AppError>
where
    S: PipelineApi,
{
    Ok(Json(service.stop_job(job.parse()?).await?))
}

/// Run a job synchronously; the response carries the run id and per-partition counts.
async fn run_job<S>(
    State(service): State<Arc<S>>,
    Path(job): Path<String>,
) -> Result<Json<JobReport>, AppError>
where
    S: PipelineApi,
{
    let job: JobKind = job.parse()?;
    let report = service.run_job_now(job).await?;
    tracing::info!(
        job = %job,
        run_id = %report.run_id,
        written = report.totals.written,
        skipped = report.totals.skipped,
        "Manual run completed"
    );
    Ok(Json(report))
}

async fn job_status<S>(
    State(service): State<Arc<S>>,
    Path(job): Path<String>,
) -> Result<Json<SchedulerStatus>, AppError>
where
    S: PipelineApi,
{
    let job: JobKind = job.parse()?;
    service
        .job_status(job)
        .map(Json)
        .ok_or(AppError::Scheduler(SchedulerError::Unavailable { job }))
}

async fn get_metrics<S>(State(service): State<Arc<S>>) -> Json<MetricsSnapshot>
where
    S: PipelineApi,
{
    Json(service.metrics_snapshot())
}

/// Descriptor for a single command in the discovery catalog.
#[derive(Serialize)]
struct CommandDescriptor {
    name: &'static str,
    method: &'static str,
    path: &'static str,
    description: &'static str,
}

/// Response body for `GET /commands`.
#[derive(Serialize)]
struct CommandsResponse {
    commands: Vec<CommandDescriptor>,
}

/// Enumerate supported HTTP commands for discovery/UX in hosts and tools.
async fn get_commands() -> Json<CommandsResponse> {
    Json(CommandsResponse {
        commands: vec![
            CommandDescriptor {
                name: "start_collector",
                method: "POST",
                path: "/collector/start",
                description: "Start the collector schedule. Idempotent; returns { \"running\": bool, \"message\": string }.",
            },
            CommandDescriptor {
                name: "stop_collector",
                method: "POST",
                path: "/collector/stop",
                description: "Stop the collector schedule after in-flight partitions finish their current chunk.",
            },
            CommandDescriptor {
                name: "start_job",
                method: "POST",
                path: "/jobs/:job/start",
                description: "Start the schedule of collector, summarizer, embedder or indexer.",
            },
            CommandDescriptor {
                name: "stop_job",
                method: "POST",
                path: "/jobs/:job/stop",
                description: "Stop the schedule of a job.",
            },
            CommandDescriptor {
                name: "run_job",
                method: "POST",
                path: "/jobs/:job/run",
                description: "Run a job once now. Rejected with 409 while another run of the job is in flight.",
            },
            CommandDescriptor {
                name: "job_status",
                method: "GET",
                path: "/jobs/:job/status",
                description: "Return the run state of a job and the id of any run in flight.",
            },
            CommandDescriptor {
                name: "metrics",
                method: "GET",
                path: "/metrics",
                description: "Return per-job run and item counters useful for observability dashboards.",
            },
        ],
    })
}

enum AppError {
    UnknownJob(UnknownJob),
    Scheduler(SchedulerError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::UnknownJob(error) => (StatusCode::NOT_FOUND, error.to_string()),
            AppError::Scheduler(error) => {
                let status = match error {
                    SchedulerError::JobAlreadyRunning { .. } => StatusCode::CONFLICT,
                    SchedulerError::Control { .. } | SchedulerError::Unavailable { .. } => {
                        StatusCode::SERVICE_UNAVAILABLE
                    }
                    SchedulerError::JobFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, error.to_string())
            }
        };
        (status, Json(json!({ "running": false, "message": message }))).into_response()
    }
}

impl From<UnknownJob> for AppError {
    fn from(inner: UnknownJob) -> Self {
        Self::UnknownJob(inner)
    }
}

impl From<SchedulerError> for AppError {
    fn from(inner: SchedulerError) -> Self {
        Self::Scheduler(inner)
    }
}
