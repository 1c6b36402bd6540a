use autotune_cloud::StorageError;
use autotune_core::error::CoreError;
use autotune_db::StoreError;
use autotune_nightscout::NightscoutError;
use autotune_pipeline::{CompletionError, LedgerError, SubmissionError};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Wraps the domain errors of the pipeline crates and adds HTTP-specific
/// variants. Implements [`IntoResponse`] to produce consistent JSON error
/// responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Submission(#[from] SubmissionError),

    #[error(transparent)]
    Completion(#[from] CompletionError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Fetching from the user's Nightscout site failed.
    #[error(transparent)]
    Upstream(#[from] NightscoutError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

type Classified = (StatusCode, &'static str, String);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Core(core) => classify_core(core),
            AppError::Ledger(err) => classify_ledger(err),

            AppError::Submission(err) => match err {
                SubmissionError::Core(core) => classify_core(core),
                SubmissionError::Ledger(ledger) => classify_ledger(ledger),
                SubmissionError::Dispatch(dispatch) => {
                    tracing::warn!(error = %dispatch, "Dispatch failed");
                    (
                        StatusCode::SERVICE_UNAVAILABLE,
                        "DISPATCH_UNAVAILABLE",
                        "The execution backend is unavailable, the job stays queued".to_string(),
                    )
                }
            },

            // A bad key looks the same as an unknown job.
            AppError::Completion(err) => match err {
                CompletionError::Unauthorized | CompletionError::UnknownJob(_) => (
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    "Job not found".to_string(),
                ),
                CompletionError::Ledger(ledger) => classify_ledger(ledger),
            },

            AppError::Upstream(err) => match err {
                NightscoutError::InvalidUrl(_) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", err.to_string())
                }
                other => {
                    tracing::warn!(error = %other, "Nightscout request failed");
                    (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR", other.to_string())
                }
            },

            AppError::Store(err) => classify_store(err),

            AppError::Storage(err) => match err {
                StorageError::NotFound { name, .. } => (
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    format!("Output '{name}' not found"),
                ),
                StorageError::InvalidName(name) => (
                    StatusCode::BAD_REQUEST,
                    "VALIDATION_ERROR",
                    format!("Invalid output name '{name}'"),
                ),
                other => {
                    tracing::error!(error = %other, "Object store error");
                    internal()
                }
            },

            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::InternalError(msg) => {
                tracing::error!(error = %msg, "Internal error");
                internal()
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

fn classify_core(err: &CoreError) -> Classified {
    match err {
        CoreError::NotFound { entity, id } => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("{entity} with id {id} not found"),
        ),
        CoreError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
        CoreError::AmbiguousProfile(msg) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            "AMBIGUOUS_PROFILE",
            msg.clone(),
        ),
        CoreError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
        CoreError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone()),
        CoreError::Internal(msg) => {
            tracing::error!(error = %msg, "Internal core error");
            internal()
        }
    }
}

fn classify_ledger(err: &LedgerError) -> Classified {
    match err {
        LedgerError::NotFound(id) => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("Job with id {id} not found"),
        ),
        LedgerError::InvalidTransition(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
        LedgerError::Store(store) => classify_store(store),
    }
}

/// Unique violations (PostgreSQL 23505) come from the in-flight fingerprint
/// index when two equal submissions race.
fn classify_store(err: &StoreError) -> Classified {
    match err {
        StoreError::NotFound { entity, id } => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("{entity} with id {id} not found"),
        ),
        StoreError::Database(sqlx::Error::Database(db_err))
            if db_err.code().as_deref() == Some("23505") =>
        {
            (
                StatusCode::CONFLICT,
                "CONFLICT",
                "An equal job was submitted at the same time".to_string(),
            )
        }
        other => {
            tracing::error!(error = %other, "Ledger store error");
            internal()
        }
    }
}

fn internal() -> Classified {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}
