//! Route definitions for the `/profiles` resource.

use axum::routing::post;
use axum::Router;

use crate::handlers::profiles;
use crate::state::AppState;

/// Routes mounted at `/profiles`.
///
/// ```text
/// POST /convert     -> convert
/// POST /normalize   -> normalize
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/convert", post(profiles::convert))
        .route("/normalize", post(profiles::normalize))
}
