//! Route definitions for the `/jobs` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::jobs;
use crate::state::AppState;

/// Routes mounted at `/jobs`.
///
/// ```text
/// POST   /                            -> submit
/// GET    /?endpoint=                  -> list_history
/// DELETE /?endpoint=&email=           -> delete_history
/// GET    /{id}?endpoint=              -> get_job
/// POST   /{id}/dispatch?endpoint=     -> dispatch
/// GET    /{id}/results?endpoint=      -> results
/// GET    /{id}/logs/{name}?endpoint=  -> download_log
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/",
            post(jobs::submit)
                .get(jobs::list_history)
                .delete(jobs::delete_history),
        )
        .route("/{id}", get(jobs::get_job))
        .route("/{id}/dispatch", post(jobs::dispatch))
        .route("/{id}/results", get(jobs::results))
        .route("/{id}/logs/{name}", get(jobs::download_log))
}
