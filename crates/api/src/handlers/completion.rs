//! Completion callback called by the notify step of a backend job.

use autotune_pipeline::CompletionSummary;
use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CompletionQuery {
    #[serde(rename = "jobRef")]
    pub job_ref: String,
    pub key: String,
    #[serde(default)]
    pub commit: Option<String>,
}

/// GET|POST /api/v1/completion?jobRef=&key=&commit=
///
/// Unknown jobs and bad keys are both 404.
pub async fn complete(
    State(state): State<AppState>,
    Query(query): Query<CompletionQuery>,
) -> AppResult<Json<DataResponse<CompletionSummary>>> {
    let summary = state
        .completion
        .on_callback(&query.job_ref, &query.key, query.commit.as_deref())
        .await?;
    Ok(Json(DataResponse { data: summary }))
}
