use autotune_db::models::setting::TOOL_COMMIT_KEY;
use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct AboutResponse {
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// Tuning tool revision reported by the most recent completed job.
    pub tool_commit: Option<String>,
}

/// GET /api/v1/about
async fn about(State(state): State<AppState>) -> AppResult<Json<DataResponse<AboutResponse>>> {
    let tool_commit = state.settings.get(TOOL_COMMIT_KEY).await?.map(|s| s.value);
    Ok(Json(DataResponse {
        data: AboutResponse {
            version: env!("CARGO_PKG_VERSION"),
            tool_commit,
        },
    }))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/about", get(about))
}
