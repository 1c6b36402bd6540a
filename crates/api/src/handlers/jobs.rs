//! Handlers for the `/jobs` resource.
//!
//! Everything keyed by job id also takes the site's `endpoint`; a job
//! submitted for another site answers 404.

use autotune_cloud::storage::validate_name;
use autotune_cloud::StorageError;
use autotune_core::error::CoreError;
use autotune_core::results::{parse_recommendations, ParseOptions, ParsedResult};
use autotune_core::types::DbId;
use autotune_db::models::job::JobView;
use autotune_db::models::status::JobStatus;
use autotune_pipeline::dispatcher::backend_job_name;
use autotune_pipeline::{SubmissionReceipt, SubmitOutcome, SubmitRequest};
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// Output files served by the log download. Everything else in a job's
/// container is an input or internal.
const LOG_SUFFIX: &str = ".log";

#[derive(Debug, Deserialize)]
pub struct EndpointQuery {
    pub endpoint: String,
}

#[derive(Debug, Deserialize)]
pub struct DeleteHistoryQuery {
    pub endpoint: String,
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct DeletedHistory {
    pub deleted: u64,
}

#[derive(Debug, Serialize)]
pub struct JobResults {
    pub job_id: DbId,
    #[serde(flatten)]
    pub result: ParsedResult,
}

/// POST /api/v1/jobs
///
/// 201 for a new job, 200 when an equal job is already queued or running.
/// A new job whose dispatch failed is still 201 with a `pending` dispatch.
pub async fn submit(
    State(state): State<AppState>,
    Json(input): Json<SubmitRequest>,
) -> AppResult<(StatusCode, Json<DataResponse<SubmissionReceipt>>)> {
    let receipt = state.submissions.submit(input).await?;
    let status = match receipt.outcome {
        SubmitOutcome::Created { .. } => StatusCode::CREATED,
        _ => StatusCode::OK,
    };
    Ok((status, Json(DataResponse { data: receipt })))
}

/// GET /api/v1/jobs?endpoint=
pub async fn list_history(
    State(state): State<AppState>,
    Query(query): Query<EndpointQuery>,
) -> AppResult<Json<DataResponse<Vec<JobView>>>> {
    let jobs = state.ledger.history(query.endpoint.trim()).await?;
    Ok(Json(DataResponse {
        data: jobs.iter().map(JobView::from).collect(),
    }))
}

/// DELETE /api/v1/jobs?endpoint=&email=
pub async fn delete_history(
    State(state): State<AppState>,
    Query(query): Query<DeleteHistoryQuery>,
) -> AppResult<Json<DataResponse<DeletedHistory>>> {
    let deleted = state
        .ledger
        .delete_history(query.endpoint.trim(), query.email.trim())
        .await?;
    Ok(Json(DataResponse {
        data: DeletedHistory { deleted },
    }))
}

/// GET /api/v1/jobs/{id}?endpoint=
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    Query(query): Query<EndpointQuery>,
) -> AppResult<Json<DataResponse<JobView>>> {
    let job = state.ledger.find_for_endpoint(id, query.endpoint.trim()).await?;
    Ok(Json(DataResponse {
        data: JobView::from(&job),
    }))
}

/// POST /api/v1/jobs/{id}/dispatch?endpoint=
///
/// Retry dispatch of a job left Queued. 503 while the backend is still down.
pub async fn dispatch(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    Query(query): Query<EndpointQuery>,
) -> AppResult<(StatusCode, Json<DataResponse<JobView>>)> {
    state.ledger.find_for_endpoint(id, query.endpoint.trim()).await?;
    let job = state.submissions.retry_dispatch(id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(DataResponse {
            data: JobView::from(&job),
        }),
    ))
}

/// GET /api/v1/jobs/{id}/results?endpoint=
///
/// Re-parse the stored recommendations log of a completed job.
pub async fn results(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    Query(query): Query<EndpointQuery>,
) -> AppResult<Json<DataResponse<JobResults>>> {
    let job = state.ledger.find_for_endpoint(id, query.endpoint.trim()).await?;
    let log = match (job.status(), job.result.as_deref()) {
        (Some(JobStatus::Completed), Some(log)) if !job.failed => log,
        _ => {
            return Err(AppError::Core(CoreError::Conflict(format!(
                "Job {id} has no results"
            ))))
        }
    };

    let mut options = ParseOptions::new(job.glucose_units(), job.basal_increment, job.day_window());
    options.rounding = state.config.basal_rounding;
    let result = parse_recommendations(log, &options).map_err(|e| {
        AppError::InternalError(format!("stored log of job {id} no longer parses: {e}"))
    })?;
    Ok(Json(DataResponse {
        data: JobResults { job_id: id, result },
    }))
}

/// GET /api/v1/jobs/{id}/logs/{name}?endpoint=
///
/// Download one log file the tuning tool wrote for the job.
pub async fn download_log(
    State(state): State<AppState>,
    Path((id, name)): Path<(DbId, String)>,
    Query(query): Query<EndpointQuery>,
) -> AppResult<impl IntoResponse> {
    validate_name(&name)?;
    let job = state.ledger.find_for_endpoint(id, query.endpoint.trim()).await?;
    let container = job
        .backend_job_name
        .clone()
        .unwrap_or_else(|| backend_job_name(job.id));
    if !name.ends_with(LOG_SUFFIX) {
        return Err(StorageError::NotFound { container, name }.into());
    }

    let bytes = state.objects.get(&container, &name).await?;
    tracing::debug!(job_id = job.id, name = %name, size = bytes.len(), "Serving job log");
    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{name}\""),
            ),
        ],
        bytes,
    ))
}
