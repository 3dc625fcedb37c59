use axum::{extract::State, Json};

use crate::http::server::AppState;
use crate::observability::metrics::MetricsSnapshot;

/// Current values of the request/response counters.
pub async fn debug_vars(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}
