pub mod auth;
pub mod converse;
pub mod health;
pub mod stats;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Build the full API router.
///
/// Routes are split into **public** (the liveness probe) and
/// **protected** (everything else, gated behind the bearer-token
/// middleware when a token is configured).
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new().route("/hydrochat/health", get(health::health));

    let protected = Router::new()
        .route("/hydrochat/converse/", post(converse::converse))
        .route(
            "/hydrochat/converse/:conversation_id/stop/",
            post(converse::stop),
        )
        .route("/hydrochat/stats/", get(stats::stats))
        .route_layer(middleware::from_fn_with_state(
            state,
            auth::require_api_token,
        ));

    public
        .merge(protected)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
