pub mod about;
pub mod completion;
pub mod health;
pub mod jobs;
pub mod profiles;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /profiles/convert                 fetch from Nightscout and normalize (POST)
/// /profiles/normalize               normalize a supplied profile (POST)
///
/// /jobs                             submit (POST), history (GET), delete history (DELETE)
/// /jobs/{id}                        get
/// /jobs/{id}/dispatch               retry dispatch of a queued job (POST)
/// /jobs/{id}/results                parsed recommendations (GET)
/// /jobs/{id}/logs/{name}            download one output log (GET)
///
/// /completion                       backend callback (GET, POST)
/// /about                            service version and tool commit (GET)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/profiles", profiles::router())
        .nest("/jobs", jobs::router())
        .merge(completion::router())
        .merge(about::router())
}
