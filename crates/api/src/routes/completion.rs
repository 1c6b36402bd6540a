use axum::routing::get;
use axum::Router;

use crate::config::COMPLETION_PATH;
use crate::handlers::completion;
use crate::state::AppState;

/// The callback route. Its absolute path is also what the notify step calls,
/// so it is declared from [`COMPLETION_PATH`] minus the `/api/v1` prefix.
pub fn router() -> Router<AppState> {
    let path = COMPLETION_PATH.trim_start_matches("/api/v1");
    Router::new().route(path, get(completion::complete).post(completion::complete))
}
