//! Operator stats endpoint.

use axum::extract::State;
use axum::response::{IntoResponse, Json};

use crate::runtime::metrics_view;
use crate::state::AppState;

/// `GET /hydrochat/stats/`: counters, timing percentiles, alert
/// predicates, session-store occupancy, and name-cache health.
pub async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    let stats = metrics_view::gather(
        &state.deps.metrics,
        state.deps.store.as_ref(),
        &state.deps.cache,
    )
    .await;
    Json(stats)
}
